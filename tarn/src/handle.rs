use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use crate::{
    ExecStatus, RegVal, ShadowRegistry, ShadowVec, Type, TypeTag, Val, internal_error, is_managed,
};

/// Shareable wrapper around one shadow vector plus its resolved yield type.
/// Several handles may alias the same shadow, matching the reference
/// semantics of the boxed vector they mirror.
pub struct VecHandle {
    shadow: Rc<RefCell<ShadowVec>>,
    yield_type: Option<Arc<Type>>,
    /// Slots were built under an `any` yield and hold identity pointers;
    /// conversion must pass them through rather than reinterpret them under
    /// the resolved type.
    any_slots: bool,
}

impl VecHandle {
    /// Wrap a shadow, resolving the element type. An `any` yield resolves to
    /// the concrete runtime type of element 0; it stays unresolved while the
    /// vector is empty or element 0 is a hole. A managed yield is recorded on
    /// the shadow only when the slots are tagged with it (concrete declared
    /// yields); slots of an any-yield vector hold identity pointers and must
    /// never be released as owned payloads.
    pub fn new(shadow: Rc<RefCell<ShadowVec>>) -> Self {
        let mut declared_any = false;
        let resolved = {
            let sh = shadow.borrow();
            match sh.backing() {
                None => None,
                Some(vv) => {
                    let yt = match vv.ty().yield_type() {
                        Some(yt) => yt.clone(),
                        None => internal_error("wrapping a vector without a yield type"),
                    };
                    if yt.tag() == TypeTag::Any {
                        declared_any = true;
                        if sh.is_empty() {
                            None
                        } else {
                            vv.vector_elem(0).map(|e0| e0.ty().clone())
                        }
                    } else {
                        Some(yt)
                    }
                }
            }
        };

        if !declared_any {
            if let Some(yt) = &resolved {
                if is_managed(yt) {
                    shadow.borrow_mut().set_managed_yield(yt.clone());
                }
            }
        }

        Self {
            shadow,
            yield_type: resolved,
            any_slots: declared_any,
        }
    }

    #[inline]
    pub fn shadow(&self) -> &Rc<RefCell<ShadowVec>> {
        &self.shadow
    }

    #[inline]
    pub fn yield_type(&self) -> Option<&Arc<Type>> {
        self.yield_type.as_ref()
    }

    #[inline]
    pub fn any_slots(&self) -> bool {
        self.any_slots
    }

    /// Copy the handle, sharing the underlying shadow.
    pub fn shallow_copy(&self) -> VecHandle {
        Self {
            shadow: Rc::clone(&self.shadow),
            yield_type: self.yield_type.clone(),
            any_slots: self.any_slots,
        }
    }
}

/// Shadow a boxed vector and wrap it. With `track_val` false the value is
/// known to be ephemeral and unaliased, so the shadow skips aggregate-binding
/// synchronization entirely.
pub fn wrap_vector(
    v: &Arc<Val>,
    bindings: Option<&Rc<ShadowRegistry>>,
    track_val: bool,
) -> VecHandle {
    let bindings = if track_val { bindings } else { None };
    VecHandle::new(raw_shadow(v, bindings))
}

/// Build the raw shadow for a boxed vector: sized and typed from the declared
/// yield type, every slot populated in one pass. Holes stay holes.
pub fn raw_shadow(v: &Arc<Val>, bindings: Option<&Rc<ShadowRegistry>>) -> Rc<RefCell<ShadowVec>> {
    let yt = match v.ty().yield_type() {
        Some(yt) => yt.clone(),
        None => internal_error("shadowing a vector without a yield type"),
    };
    let managed = is_managed(&yt).then(|| yt.clone());

    let shadow = Rc::new(RefCell::new(ShadowVec::mirroring(
        v,
        bindings.cloned(),
        managed,
    )));

    {
        let mut sh = shadow.borrow_mut();
        let elems = v.vector_raw().read();
        let mut status = ExecStatus::default();
        for elem in elems.iter() {
            let cell = match elem {
                None => RegVal::nil(),
                Some(e) => RegVal::from_val(Some(e), &yt, bindings, Some(v.as_ref()), &mut status),
            };
            sh.cells_mut_untracked().push(cell);
        }
    }

    shadow
}
