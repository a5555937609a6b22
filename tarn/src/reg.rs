use std::fmt;
use std::net::IpAddr;
use std::ptr;
use std::rc::Rc;
use std::sync::Arc;

use crate::{
    ByteStr, ExecStatus, FileObj, FuncObj, RuntimeFault, ShadowRegistry, StorageKind, Subnet, Type,
    TypeTag, Val, ValKind, VecHandle, internal_error, interned_ports, wrap_vector,
};

/// One AM register cell: a single machine word holding exactly one
/// alternative, selected by an externally supplied type tag. The union itself
/// carries no tag, so every read is a contract with the construction site.
///
/// Ownership is a static function of the tag alone:
///   - `int_val` / `uint_val` / `double_val` are inline copies;
///   - `string_val` / `addr_val` / `subnet_val` / `vector_val` are exclusively
///     owned boxes, freed through [`release_managed`];
///   - the remaining pointer alternatives borrow into the boxed object graph
///     and must not outlive the boxed value they were constructed from.
#[derive(Clone, Copy)]
pub union RegVal {
    pub int_val: i64,
    pub uint_val: u64,
    pub double_val: f64,
    pub string_val: *mut ByteStr,
    pub addr_val: *mut IpAddr,
    pub subnet_val: *mut Subnet,
    pub vector_val: *mut VecHandle,
    pub func_val: *const FuncObj,
    pub file_val: *const FileObj,
    pub shared_val: *const Val,
    pub type_val: *const Type,
    pub raw: u64,
}

impl Default for RegVal {
    fn default() -> Self {
        Self::nil()
    }
}

impl fmt::Debug for RegVal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // SAFETY: every alternative is one word; the raw view is always valid.
        write!(f, "RegVal({:#x})", unsafe { self.raw })
    }
}

/// Recover an owning `Arc` handle from a borrowed raw pointer, bumping the
/// shared count.
///
/// # Safety
/// `p` must have come from a live `Arc<T>` that is still kept alive by its
/// owner.
unsafe fn clone_arc_from<T>(p: *const T) -> Arc<T> {
    // SAFETY: per contract the allocation is live; the increment pays for the
    // handle we hand out.
    unsafe {
        Arc::increment_strong_count(p);
        Arc::from_raw(p)
    }
}

/// Free the owned alternative of a managed-type cell and null it. Freeing an
/// already-nil cell is a no-op. Calling this with a non-managed type is a
/// caller defect and hits the fatal sink.
///
/// # Safety
/// `ty` must be the tag `cell` was constructed with.
pub unsafe fn release_managed(cell: &mut RegVal, ty: &Type) {
    match ty.tag() {
        TypeTag::Addr => {
            // SAFETY: the addr alternative is active and was boxed by us.
            unsafe {
                if !cell.addr_val.is_null() {
                    drop(Box::from_raw(cell.addr_val));
                }
                cell.addr_val = ptr::null_mut();
            }
        }
        TypeTag::Subnet => {
            // SAFETY: as above, for the subnet alternative.
            unsafe {
                if !cell.subnet_val.is_null() {
                    drop(Box::from_raw(cell.subnet_val));
                }
                cell.subnet_val = ptr::null_mut();
            }
        }
        TypeTag::String => {
            // SAFETY: as above, for the string alternative.
            unsafe {
                if !cell.string_val.is_null() {
                    drop(Box::from_raw(cell.string_val));
                }
                cell.string_val = ptr::null_mut();
            }
        }
        TypeTag::Vector => {
            // SAFETY: as above, for the vector-handle alternative.
            unsafe {
                if !cell.vector_val.is_null() {
                    drop(Box::from_raw(cell.vector_val));
                }
                cell.vector_val = ptr::null_mut();
            }
        }
        _ => internal_error("type inconsistency in managed release"),
    }
}

impl RegVal {
    #[inline]
    pub fn nil() -> Self {
        Self { raw: 0 }
    }

    #[inline]
    pub fn from_int(i: i64) -> Self {
        Self { int_val: i }
    }

    #[inline]
    pub fn from_uint(u: u64) -> Self {
        Self { uint_val: u }
    }

    #[inline]
    pub fn from_double(d: f64) -> Self {
        Self { double_val: d }
    }

    /// Unbox `v` into a register cell for target type `ty`.
    ///
    /// A missing value raises the recoverable `UninitializedValue` fault into
    /// `status` and yields a zeroed cell so execution can continue in error
    /// mode. A vector whose concrete yield type clashes with the target's
    /// raises `VectorTypeClash` and yields a nil cell; this is reachable
    /// through vector-of-any interop, not a caller bug.
    pub fn from_val(
        v: Option<&Arc<Val>>,
        ty: &Arc<Type>,
        bindings: Option<&Rc<ShadowRegistry>>,
        src: Option<&Val>,
        status: &mut ExecStatus,
    ) -> Self {
        let Some(v) = v else {
            status.raise(RuntimeFault::UninitializedValue, src);
            return Self { int_val: 0 };
        };

        let vt = v.ty();
        if vt.tag() != ty.tag() && ty.tag() != TypeTag::Any {
            // Tolerated only when the low-level storage agrees.
            if ty.storage() == StorageKind::Other || ty.storage() != vt.storage() {
                internal_error("type inconsistency in register construction");
            }
        }

        match ty.tag() {
            TypeTag::Bool | TypeTag::Int | TypeTag::Enum => Self { int_val: v.as_int() },
            TypeTag::Count | TypeTag::Counter | TypeTag::Port => Self { uint_val: v.as_uint() },
            TypeTag::Double | TypeTag::Time | TypeTag::Interval => Self {
                double_val: v.as_double(),
            },

            TypeTag::Func => Self {
                func_val: Arc::as_ptr(v.as_func()),
            },
            TypeTag::File => Self {
                file_val: Arc::as_ptr(v.as_file()),
            },

            // Borrowed whole-value pointers; the source must stay alive for
            // the cell's lifetime.
            TypeTag::List
            | TypeTag::Opaque
            | TypeTag::Pattern
            | TypeTag::Record
            | TypeTag::Table
            | TypeTag::Any => Self {
                shared_val: Arc::as_ptr(v),
            },

            TypeTag::Type => Self {
                type_val: Arc::as_ptr(v.as_type()),
            },

            TypeTag::Vector => {
                let wanted = match ty.yield_type() {
                    Some(yt) => yt.tag(),
                    None => internal_error("vector type without a yield type"),
                };
                let got = match vt.yield_type() {
                    Some(yt) => yt.tag(),
                    None => internal_error("vector value without a yield type"),
                };

                if wanted != got && wanted != TypeTag::Any && got != TypeTag::Any {
                    // Reachable when vector-of-any lets a concrete
                    // vector-of-U flow into a vector-of-T slot.
                    status.raise(RuntimeFault::VectorTypeClash { wanted, got }, src);
                    Self {
                        vector_val: ptr::null_mut(),
                    }
                } else {
                    Self {
                        vector_val: Box::into_raw(Box::new(wrap_vector(v, bindings, true))),
                    }
                }
            }

            TypeTag::String => Self {
                string_val: Box::into_raw(Box::new(v.as_bytes().clone())),
            },
            TypeTag::Addr => Self {
                addr_val: Box::into_raw(Box::new(*v.as_addr())),
            },
            TypeTag::Subnet => Self {
                subnet_val: Box::into_raw(Box::new(*v.as_subnet())),
            },

            TypeTag::Error | TypeTag::Timer | TypeTag::Union | TypeTag::Void => {
                internal_error("bad type in register construction")
            }
        }
    }

    /// Is the alternative selected by `ty` a null pointer? Numeric
    /// alternatives are never nil.
    ///
    /// # Safety
    /// `ty` must be the tag this cell was constructed with.
    pub unsafe fn is_nil(&self, ty: &Type) -> bool {
        // SAFETY: per contract the matching alternative is read.
        unsafe {
            match ty.tag() {
                TypeTag::Addr => self.addr_val.is_null(),
                TypeTag::Subnet => self.subnet_val.is_null(),
                TypeTag::String => self.string_val.is_null(),
                TypeTag::Vector => self.vector_val.is_null(),
                TypeTag::Func => self.func_val.is_null(),
                TypeTag::File => self.file_val.is_null(),
                TypeTag::List
                | TypeTag::Opaque
                | TypeTag::Pattern
                | TypeTag::Record
                | TypeTag::Table
                | TypeTag::Any => self.shared_val.is_null(),
                TypeTag::Type => self.type_val.is_null(),
                _ => false,
            }
        }
    }

    /// Box this cell back into a host value. Ownership of the returned handle
    /// transfers to the caller. Owned kinds deep-copy; shared kinds alias the
    /// original object with an incremented count; ports resolve through the
    /// interned pool.
    ///
    /// # Safety
    /// `ty` must be the tag this cell was constructed with, and the cell must
    /// not be nil for pointer alternatives.
    pub unsafe fn to_val(&self, ty: &Arc<Type>) -> Arc<Val> {
        // SAFETY: per contract the matching alternative is active and live.
        unsafe {
            match ty.tag() {
                TypeTag::Bool | TypeTag::Int | TypeTag::Enum => {
                    Val::new(ty.clone(), ValKind::Int(self.int_val))
                }
                TypeTag::Count | TypeTag::Counter => {
                    Val::new(ty.clone(), ValKind::UInt(self.uint_val))
                }
                TypeTag::Double | TypeTag::Time | TypeTag::Interval => {
                    Val::new(ty.clone(), ValKind::Double(self.double_val))
                }

                TypeTag::Port => interned_ports().get(self.uint_val),

                TypeTag::Func => {
                    let f = clone_arc_from(self.func_val);
                    Val::new(ty.clone(), ValKind::Func(f))
                }
                TypeTag::File => {
                    let f = clone_arc_from(self.file_val);
                    Val::new(ty.clone(), ValKind::File(f))
                }

                TypeTag::String => Val::new(ty.clone(), ValKind::Str((*self.string_val).clone())),
                TypeTag::Addr => Val::new(ty.clone(), ValKind::Addr(*self.addr_val)),
                TypeTag::Subnet => Val::new(ty.clone(), ValKind::Subnet(*self.subnet_val)),

                TypeTag::Vector => self.to_vector(ty),

                TypeTag::Any
                | TypeTag::List
                | TypeTag::Opaque
                | TypeTag::Pattern
                | TypeTag::Record
                | TypeTag::Table => clone_arc_from(self.shared_val),

                TypeTag::Type => Val::of_type(clone_arc_from(self.type_val)),

                TypeTag::Error | TypeTag::Timer | TypeTag::Union | TypeTag::Void => {
                    internal_error("bad type in boxed conversion")
                }
            }
        }
    }

    /// Box this cell's vector. Flushes the shadow first; if a boxed form
    /// already exists it is returned shared, otherwise one is materialized
    /// from the shadow slots and cached for subsequent calls.
    ///
    /// # Safety
    /// The vector alternative must be active and non-nil.
    pub unsafe fn to_vector(&self, ty: &Arc<Type>) -> Arc<Val> {
        // SAFETY: per contract the handle pointer is live.
        let handle = unsafe { &*self.vector_val };
        let mut shadow = handle.shadow().borrow_mut();

        shadow.spill();

        if let Some(vv) = shadow.backing() {
            return vv;
        }

        // No boxed form yet: an AM-internal output vector. Materialize it.
        let declared_yt = match ty.yield_type() {
            Some(yt) => yt.clone(),
            None => internal_error("vector type without a yield type"),
        };
        let actual_yt = handle.yield_type().cloned().unwrap_or(declared_yt);
        let is_any = handle.any_slots() || actual_yt.tag() == TypeTag::Any;

        let n = shadow.len();
        let mut elems: Vec<Option<Arc<Val>>> = vec![None; n];
        for (i, cell) in shadow.cells().iter().enumerate() {
            // SAFETY: slots follow the resolved yield type.
            if unsafe { cell.is_nil(&actual_yt) } {
                continue;
            }
            let elem = if is_any {
                // Heterogeneous elements pass through identity-preserving.
                // SAFETY: the any alternative borrows a live boxed value.
                unsafe { clone_arc_from(cell.shared_val) }
            } else {
                // SAFETY: the slot matches the resolved yield type.
                unsafe { cell.to_val(&actual_yt) }
            };
            elems[i] = Some(elem);
        }

        let vv = Val::vector(ty.clone(), elems);
        shadow.set_backing(&vv);
        vv
    }
}

#[cfg(test)]
mod reg_tests {
    use std::cell::RefCell;
    use std::mem;
    use std::net::Ipv4Addr;
    use std::panic::{AssertUnwindSafe, catch_unwind};

    use super::*;
    use crate::{
        OpaqueObj, PatternObj, RecordObj, ShadowVec, TableObj, clear_fatal_hook, set_fatal_hook,
    };

    fn make(v: &Arc<Val>, ty: &Arc<Type>) -> (RegVal, ExecStatus) {
        let mut status = ExecStatus::default();
        let cell = RegVal::from_val(Some(v), ty, None, None, &mut status);
        (cell, status)
    }

    #[test]
    fn cell_is_one_machine_word() {
        assert_eq!(mem::size_of::<RegVal>(), 8);
    }

    #[test]
    fn release_nulls_every_managed_alternative() {
        let cases: Vec<(Arc<Val>, Arc<Type>)> = vec![
            (Val::string("abc"), Type::new(TypeTag::String)),
            (
                Val::addr(IpAddr::V4(Ipv4Addr::new(192, 168, 0, 1))),
                Type::new(TypeTag::Addr),
            ),
            (
                Val::subnet(Subnet {
                    addr: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 0)),
                    prefix: 8,
                }),
                Type::new(TypeTag::Subnet),
            ),
            (
                Val::vector(Type::vector_of(Type::new(TypeTag::Int)), vec![None]),
                Type::vector_of(Type::new(TypeTag::Int)),
            ),
        ];

        for (v, ty) in cases {
            let (mut cell, status) = make(&v, &ty);
            assert!(!status.failed());
            unsafe {
                assert!(!cell.is_nil(&ty), "{} cell must start non-nil", ty.tag());
                release_managed(&mut cell, &ty);
                assert!(cell.is_nil(&ty), "{} cell must be nil after release", ty.tag());
                // Null-safe: a second release is a no-op.
                release_managed(&mut cell, &ty);
            }
        }
    }

    #[test]
    fn release_on_non_managed_type_is_fatal() {
        let seen = std::rc::Rc::new(RefCell::new(None));
        let sink = seen.clone();
        set_fatal_hook(Box::new(move |msg| {
            *sink.borrow_mut() = Some(msg.to_string());
        }));

        let mut cell = RegVal::from_int(7);
        let ty = Type::new(TypeTag::Int);
        let result = catch_unwind(AssertUnwindSafe(|| unsafe {
            release_managed(&mut cell, &ty);
        }));
        clear_fatal_hook();

        assert!(result.is_err());
        assert_eq!(
            seen.borrow().as_deref(),
            Some("type inconsistency in managed release")
        );
    }

    #[test]
    fn scalar_round_trips_preserve_content() {
        let int_ty = Type::new(TypeTag::Int);
        let (cell, _) = make(&Val::int(-42), &int_ty);
        assert_eq!(unsafe { cell.to_val(&int_ty) }.as_int(), -42);

        let bool_ty = Type::new(TypeTag::Bool);
        let (cell, _) = make(&Val::boolean(true), &bool_ty);
        assert_eq!(unsafe { cell.to_val(&bool_ty) }.as_int(), 1);

        let dbl_ty = Type::new(TypeTag::Double);
        let (cell, _) = make(&Val::double(2.5), &dbl_ty);
        assert_eq!(unsafe { cell.to_val(&dbl_ty) }.as_double(), 2.5);

        let enum_ty = Type::new(TypeTag::Enum);
        let (cell, _) = make(&Val::enum_val(enum_ty.clone(), 3), &enum_ty);
        let back = unsafe { cell.to_val(&enum_ty) };
        assert_eq!(back.as_int(), 3);
        assert_eq!(back.tag(), TypeTag::Enum);
    }

    #[test]
    fn owned_round_trips_copy_rather_than_alias() {
        let str_ty = Type::new(TypeTag::String);
        let original = Val::string("payload");
        let (mut cell, _) = make(&original, &str_ty);
        let back = unsafe { cell.to_val(&str_ty) };
        assert!(!Arc::ptr_eq(&original, &back));
        assert_eq!(back.as_bytes(), original.as_bytes());
        unsafe { release_managed(&mut cell, &str_ty) };

        let addr_ty = Type::new(TypeTag::Addr);
        let a = IpAddr::V4(Ipv4Addr::new(172, 16, 0, 9));
        let original = Val::addr(a);
        let (mut cell, _) = make(&original, &addr_ty);
        let back = unsafe { cell.to_val(&addr_ty) };
        assert!(!Arc::ptr_eq(&original, &back));
        assert_eq!(*back.as_addr(), a);
        unsafe { release_managed(&mut cell, &addr_ty) };

        let subnet_ty = Type::new(TypeTag::Subnet);
        let s = Subnet { addr: a, prefix: 12 };
        let original = Val::subnet(s);
        let (mut cell, _) = make(&original, &subnet_ty);
        let back = unsafe { cell.to_val(&subnet_ty) };
        assert!(!Arc::ptr_eq(&original, &back));
        assert_eq!(*back.as_subnet(), s);
        unsafe { release_managed(&mut cell, &subnet_ty) };
    }

    #[test]
    fn shared_round_trips_alias_with_incremented_count() {
        let rec_ty = Type::new(TypeTag::Record);
        let original = Val::record(RecordObj {
            type_name: "conn_id".into(),
        });
        let before = Arc::strong_count(&original);

        let (cell, _) = make(&original, &rec_ty);
        assert_eq!(Arc::strong_count(&original), before, "borrow must not count");

        let back = unsafe { cell.to_val(&rec_ty) };
        assert!(Arc::ptr_eq(&original, &back));
        assert_eq!(Arc::strong_count(&original), before + 1);
    }

    #[test]
    fn borrowed_kinds_round_trip_identically() {
        let cases: Vec<(Arc<Val>, Arc<Type>)> = vec![
            (
                Val::pattern(PatternObj {
                    source: "/ab+/".into(),
                }),
                Type::new(TypeTag::Pattern),
            ),
            (
                Val::opaque(OpaqueObj {
                    kind_name: "md5".into(),
                }),
                Type::new(TypeTag::Opaque),
            ),
            (
                Val::table(TableObj {
                    name: "seen".into(),
                }),
                Type::new(TypeTag::Table),
            ),
            (Val::list(vec![Val::int(1)]), Type::new(TypeTag::List)),
        ];

        for (original, ty) in cases {
            let before = Arc::strong_count(&original);
            let (cell, _) = make(&original, &ty);
            let back = unsafe { cell.to_val(&ty) };
            assert!(Arc::ptr_eq(&original, &back), "{} must alias", ty.tag());
            assert_eq!(Arc::strong_count(&original), before + 1);
        }
    }

    #[test]
    fn file_round_trip_shares_the_file_object() {
        let file_ty = Type::new(TypeTag::File);
        let original = Val::file(FileObj {
            path: "/var/log/out".into(),
        });
        let (cell, _) = make(&original, &file_ty);
        let back = unsafe { cell.to_val(&file_ty) };

        assert!(!Arc::ptr_eq(&original, &back));
        assert!(Arc::ptr_eq(original.as_file(), back.as_file()));
    }

    #[test]
    fn any_round_trip_preserves_identity() {
        let any_ty = Type::new(TypeTag::Any);
        let original = Val::string("boxed through any");
        let (cell, _) = make(&original, &any_ty);
        let back = unsafe { cell.to_val(&any_ty) };
        assert!(Arc::ptr_eq(&original, &back));
    }

    #[test]
    fn func_round_trip_shares_the_function_object() {
        let func_ty = Type::new(TypeTag::Func);
        let original = Val::func(FuncObj {
            name: "handler".into(),
            arity: 2,
        });
        let payload_before = Arc::strong_count(original.as_func());

        let (cell, _) = make(&original, &func_ty);
        let back = unsafe { cell.to_val(&func_ty) };

        // A fresh boxed wrapper around the identical function object.
        assert!(!Arc::ptr_eq(&original, &back));
        assert!(Arc::ptr_eq(original.as_func(), back.as_func()));
        assert_eq!(Arc::strong_count(original.as_func()), payload_before + 1);
    }

    #[test]
    fn type_round_trip_preserves_the_descriptor() {
        let type_ty = Type::new(TypeTag::Type);
        let desc = Type::new(TypeTag::Count);
        let original = Val::of_type(desc.clone());
        let (cell, _) = make(&original, &type_ty);
        let back = unsafe { cell.to_val(&type_ty) };
        assert!(Arc::ptr_eq(back.as_type(), &desc));
    }

    #[test]
    fn port_conversion_resolves_through_the_interned_pool() {
        let port_ty = Type::new(TypeTag::Port);
        let source = interned_ports().get(53);
        let (cell, _) = make(&source, &port_ty);
        let back = unsafe { cell.to_val(&port_ty) };
        assert!(Arc::ptr_eq(&back, &interned_ports().get(53)));
    }

    #[test]
    fn missing_value_raises_a_recoverable_fault() {
        let int_ty = Type::new(TypeTag::Int);
        let mut status = ExecStatus::default();
        let cell = RegVal::from_val(None, &int_ty, None, None, &mut status);

        assert!(status.failed());
        assert_eq!(status.fault(), Some(&RuntimeFault::UninitializedValue));
        assert_eq!(unsafe { cell.int_val }, 0);
    }

    #[test]
    fn yield_clash_raises_a_recoverable_fault_and_leaves_nil() {
        let source = Val::vector(
            Type::vector_of(Type::new(TypeTag::Int)),
            vec![Some(Val::int(1))],
        );
        let target_ty = Type::vector_of(Type::new(TypeTag::String));

        let mut status = ExecStatus::default();
        let cell = RegVal::from_val(Some(&source), &target_ty, None, None, &mut status);

        assert_eq!(
            status.fault(),
            Some(&RuntimeFault::VectorTypeClash {
                wanted: TypeTag::String,
                got: TypeTag::Int,
            })
        );
        assert!(unsafe { cell.is_nil(&target_ty) });
    }

    #[test]
    fn wrapped_vector_converts_back_to_the_same_backing() {
        let vec_ty = Type::vector_of(Type::new(TypeTag::Int));
        let original = Val::vector(
            vec_ty.clone(),
            vec![Some(Val::int(1)), None, Some(Val::int(3))],
        );

        let (mut cell, status) = make(&original, &vec_ty);
        assert!(!status.failed());

        let back = unsafe { cell.to_vector(&vec_ty) };
        assert!(Arc::ptr_eq(&original, &back));
        assert_eq!(back.vector_len(), 3);
        assert!(back.vector_elem(1).is_none());
        assert_eq!(back.vector_elem(2).unwrap().as_int(), 3);

        unsafe { release_managed(&mut cell, &vec_ty) };
    }

    #[test]
    fn materializing_an_internal_vector_caches_the_boxed_form() {
        let str_ty = Type::new(TypeTag::String);
        let vec_ty = Type::vector_of(str_ty.clone());

        // An AM-internal output vector: no boxed form exists yet.
        let mut sv = ShadowVec::detached(None, Some(str_ty.clone()));
        let mut status = ExecStatus::default();
        sv.cells_mut_untracked().push(RegVal::from_val(
            Some(&Val::string("a")),
            &str_ty,
            None,
            None,
            &mut status,
        ));
        sv.cells_mut_untracked().push(RegVal::nil());

        let handle = VecHandle::new(Rc::new(RefCell::new(sv)));
        let mut cell = RegVal {
            vector_val: Box::into_raw(Box::new(handle)),
        };

        let first = unsafe { cell.to_vector(&vec_ty) };
        assert_eq!(first.vector_len(), 2);
        assert_eq!(first.vector_elem(0).unwrap().as_bytes(), &ByteStr::from("a"));
        assert!(first.vector_elem(1).is_none(), "holes must be preserved");

        let second = unsafe { cell.to_vector(&vec_ty) };
        assert!(Arc::ptr_eq(&first, &second), "materialization must cache");

        unsafe { release_managed(&mut cell, &vec_ty) };
    }

    #[test]
    fn conversion_of_a_marker_tag_is_fatal() {
        set_fatal_hook(Box::new(|_| {}));
        let cell = RegVal::nil();
        let void_ty = Type::new(TypeTag::Void);
        let result = catch_unwind(AssertUnwindSafe(|| unsafe {
            cell.to_val(&void_ty);
        }));
        clear_fatal_hook();
        assert!(result.is_err());
    }
}
