use std::rc::Rc;
use std::sync::{Arc, Weak};

use log::trace;

use crate::{
    ExecStatus, RegVal, ShadowRegistry, Type, TypeTag, Val, internal_error, release_managed,
};

/// Lazy mirror of one boxed vector: a slot sequence of register cells, a
/// coarse dirty flag, and a weak reference to the mirrored boxed value.
///
/// The AM interpreter is the single mutator. A shadow may be shared by
/// several handles (aliasing registers), but never mutated concurrently, and
/// [`ShadowVec::spill`] / [`ShadowVec::freshen`] are never interleaved with
/// outside mutation of either representation.
pub struct ShadowVec {
    cells: Vec<RegVal>,
    /// Set when the elements own heap storage; drives slot copy and release.
    managed_yield: Option<Arc<Type>>,
    /// The mirrored boxed vector. Dangling means no boxed form exists (an
    /// AM-internal output vector, or a mirror whose boxed side was destroyed).
    backing: Weak<Val>,
    bindings: Option<Rc<ShadowRegistry>>,
    /// Slots have been mutated since the last flush.
    dirty: bool,
}

impl ShadowVec {
    /// Shadow an existing boxed vector. Slots start empty; populate with
    /// [`ShadowVec::freshen`] or through [`ShadowVec::cells_mut_untracked`].
    pub fn mirroring(
        backing: &Arc<Val>,
        bindings: Option<Rc<ShadowRegistry>>,
        managed_yield: Option<Arc<Type>>,
    ) -> Self {
        if let Some(b) = &bindings {
            b.track();
        }
        Self {
            cells: Vec::with_capacity(backing.vector_len()),
            managed_yield,
            backing: Arc::downgrade(backing),
            bindings,
            dirty: false,
        }
    }

    /// An AM-internal output vector with no boxed form yet.
    pub fn detached(
        bindings: Option<Rc<ShadowRegistry>>,
        managed_yield: Option<Arc<Type>>,
    ) -> Self {
        if let Some(b) = &bindings {
            b.track();
        }
        Self {
            cells: Vec::new(),
            managed_yield,
            backing: Weak::new(),
            bindings,
            dirty: false,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn cells(&self) -> &[RegVal] {
        &self.cells
    }

    /// Mutable slot access; marks the whole vector dirty (dirtying is
    /// coarse-grained).
    pub fn cells_mut(&mut self) -> &mut Vec<RegVal> {
        self.dirty = true;
        &mut self.cells
    }

    /// Mutable slot access for initial population; does not dirty.
    pub fn cells_mut_untracked(&mut self) -> &mut Vec<RegVal> {
        &mut self.cells
    }

    pub fn managed_yield(&self) -> Option<&Arc<Type>> {
        self.managed_yield.as_ref()
    }

    pub fn set_managed_yield(&mut self, yt: Arc<Type>) {
        self.managed_yield = Some(yt);
    }

    /// The mirrored boxed vector, if a live one exists.
    pub fn backing(&self) -> Option<Arc<Val>> {
        self.backing.upgrade()
    }

    /// Cache a freshly materialized boxed vector. The two representations are
    /// identical at this instant, so the shadow is clean.
    pub(crate) fn set_backing(&mut self, v: &Arc<Val>) {
        self.backing = Arc::downgrade(v);
        self.dirty = false;
    }

    /// Extend the slot sequence to `new_size`, nil-initializing the new
    /// slots. Shrinking is not a supported operation.
    pub fn grow(&mut self, new_size: usize) {
        debug_assert!(new_size >= self.cells.len(), "shadow vectors never shrink");
        if new_size > self.cells.len() {
            self.cells.resize(new_size, RegVal::nil());
            self.dirty = true;
        }
    }

    /// Replace slot `n` with a deep copy of the managed payload in `v`:
    /// strings, addresses and subnets are duplicated, vectors shallow-copied
    /// (sharing their own shadow). The previous payload is released first.
    ///
    /// # Safety
    /// `v` must hold the alternative selected by this shadow's managed yield
    /// type, and it must not be nil.
    pub unsafe fn set_managed_element(&mut self, n: usize, v: &RegVal) {
        let yt = match &self.managed_yield {
            Some(yt) => yt.clone(),
            None => internal_error("managed element assignment without a managed yield type"),
        };

        let cell = &mut self.cells[n];
        // SAFETY: slots of a managed shadow follow the managed yield type.
        unsafe { release_managed(cell, &yt) };

        // SAFETY: per contract `v` holds the alternative selected by `yt`.
        unsafe {
            match yt.tag() {
                TypeTag::String => {
                    cell.string_val = Box::into_raw(Box::new((*v.string_val).clone()));
                }
                TypeTag::Addr => {
                    cell.addr_val = Box::into_raw(Box::new(*v.addr_val));
                }
                TypeTag::Subnet => {
                    cell.subnet_val = Box::into_raw(Box::new(*v.subnet_val));
                }
                TypeTag::Vector => {
                    cell.vector_val = Box::into_raw(Box::new((*v.vector_val).shallow_copy()));
                }
                _ => internal_error("bad type tag in managed element assignment"),
            }
        }

        self.dirty = true;
    }

    /// Release every owned slot payload. Used when the container itself is
    /// torn down; releasing is per-slot null-safe.
    pub fn delete_members(&mut self) {
        let Some(yt) = self.managed_yield.clone() else {
            internal_error("deleting members without a managed yield type");
        };
        for cell in &mut self.cells {
            // SAFETY: slots of a managed shadow follow the managed yield type.
            unsafe { release_managed(cell, &yt) };
        }
    }

    /// Flush mutated slots back into the mirrored boxed vector. No-op when no
    /// live boxed form exists or the representations have not diverged. The
    /// fresh element list is built completely before the backing storage is
    /// swapped, so borrowed slot pointers stay valid across the release of
    /// the previously-held element references.
    pub fn spill(&mut self) {
        let Some(vv) = self.backing.upgrade() else {
            return;
        };
        if !self.dirty {
            return;
        }

        let yt = match vv.ty().yield_type() {
            Some(yt) => yt.clone(),
            None => internal_error("spilling into a vector without a yield type"),
        };

        let mut fresh: Vec<Option<Arc<Val>>> = Vec::with_capacity(self.cells.len());
        for cell in &self.cells {
            // SAFETY: slots follow the backing vector's yield type.
            let boxed = unsafe {
                if cell.is_nil(&yt) {
                    None
                } else {
                    Some(cell.to_val(&yt))
                }
            };
            fresh.push(boxed);
        }

        *vv.vector_raw().write() = fresh;
        self.dirty = false;
        trace!("spilled {} slots into boxed vector", self.cells.len());
    }

    /// Rebuild the slot sequence from the mirrored boxed vector, discarding
    /// prior shadow content. The shadow must be clean and the boxed form must
    /// be alive; anything else is a caller defect.
    pub fn freshen(&mut self) {
        if self.dirty {
            internal_error("refreshing a dirty shadow vector");
        }
        let Some(vv) = self.backing.upgrade() else {
            internal_error("refreshing a shadow whose boxed vector is gone");
        };
        let yt = match vv.ty().yield_type() {
            Some(yt) => yt.clone(),
            None => internal_error("refreshing from a vector without a yield type"),
        };

        if self.managed_yield.is_some() {
            self.delete_members();
        }
        self.cells.clear();

        let elems = vv.vector_raw().read();
        let mut status = ExecStatus::default();
        for elem in elems.iter() {
            let cell = match elem {
                // Holes stay holes.
                None => RegVal::nil(),
                Some(e) => RegVal::from_val(
                    Some(e),
                    &yt,
                    self.bindings.as_ref(),
                    Some(vv.as_ref()),
                    &mut status,
                ),
            };
            self.cells.push(cell);
        }
        trace!("freshened {} slots from boxed vector", self.cells.len());
    }
}

impl Drop for ShadowVec {
    fn drop(&mut self) {
        if self.managed_yield.is_some() {
            self.delete_members();
        }
        if let Some(b) = &self.bindings {
            b.untrack();
        }
    }
}
