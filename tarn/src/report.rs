use std::cell::RefCell;

use log::{error, warn};
use thiserror::Error;

use crate::{TypeTag, Val};

thread_local! {
    static FATAL_HOOK: RefCell<Option<Box<dyn FnMut(&str)>>> = RefCell::new(None);
}

/// Install a fatal-sink hook for the current thread. While a hook is set,
/// [`internal_error`] calls it with the message and then unwinds (panics)
/// instead of terminating the process, so the fatal path can be observed.
pub fn set_fatal_hook(hook: Box<dyn FnMut(&str)>) {
    FATAL_HOOK.with(|h| *h.borrow_mut() = Some(hook));
}

pub fn clear_fatal_hook() {
    FATAL_HOOK.with(|h| *h.borrow_mut() = None);
}

/// Report an internal inconsistency: an impossible type tag, a managed-only
/// operation on a non-managed type, or a violated synchronization
/// precondition. These indicate a defect in the compiler or interpreter, never
/// a reachable runtime state, so there is no recovery path.
pub fn internal_error(msg: &str) -> ! {
    error!("internal inconsistency: {msg}");

    let hooked = FATAL_HOOK.with(|h| {
        if let Some(hook) = h.borrow_mut().as_mut() {
            hook(msg);
            true
        } else {
            false
        }
    });

    if hooked {
        panic!("internal inconsistency: {msg}");
    }
    std::process::abort();
}

/// A recoverable fault raised while converting between representations. The
/// interpreter inspects the status it threaded through the operation and may
/// abandon the current script without taking the host process down.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeFault {
    #[error("uninitialized value in compiled code")]
    UninitializedValue,
    #[error("vector type clash: {wanted} vs. {got}")]
    VectorTypeClash { wanted: TypeTag, got: TypeTag },
}

/// Caller-visible fault flag plus the originating source-object context when
/// one was available at the raise site.
#[derive(Debug, Default)]
pub struct ExecStatus {
    fault: Option<RuntimeFault>,
    context: Option<String>,
}

impl ExecStatus {
    pub fn raise(&mut self, fault: RuntimeFault, src: Option<&Val>) {
        match src {
            Some(v) => warn!("runtime fault: {fault} (in {} value)", v.tag()),
            None => warn!("runtime fault: {fault}"),
        }
        self.context = src.map(|v| v.tag().to_string());
        self.fault = Some(fault);
    }

    #[inline]
    pub fn failed(&self) -> bool {
        self.fault.is_some()
    }

    pub fn fault(&self) -> Option<&RuntimeFault> {
        self.fault.as_ref()
    }

    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    pub fn take(&mut self) -> Option<RuntimeFault> {
        self.context = None;
        self.fault.take()
    }

    pub fn clear(&mut self) {
        self.fault = None;
        self.context = None;
    }
}
