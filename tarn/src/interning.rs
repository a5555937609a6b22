use std::sync::{Arc, OnceLock};

use crate::{Type, TypeTag, Val, ValKind};

/// Process-wide pool of the 65536 boxed port values, built once at first use
/// and read-only afterwards. Port conversion hands out shared instances
/// instead of allocating.
pub struct InternedPorts {
    vals: Vec<Arc<Val>>,
}

impl InternedPorts {
    fn build() -> Self {
        let ty = Type::new(TypeTag::Port);
        let vals = (0..=u16::MAX)
            .map(|p| Val::new(ty.clone(), ValKind::UInt(u64::from(p))))
            .collect();
        Self { vals }
    }

    pub fn get(&self, port: u64) -> Arc<Val> {
        self.vals[(port & 0xffff) as usize].clone()
    }
}

static INTERNED_PORTS: OnceLock<InternedPorts> = OnceLock::new();

pub fn interned_ports() -> &'static InternedPorts {
    INTERNED_PORTS.get_or_init(InternedPorts::build)
}
