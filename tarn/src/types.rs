use std::fmt;
use std::sync::Arc;

/// Semantic type tag of a script value.
///
/// `Error`, `Timer`, `Union` and `Void` are marker tags used by the compiler;
/// a value carrying one of them must never reach the conversion layer.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum TypeTag {
    Bool,
    Int,
    Count,
    Counter,
    Double,
    Time,
    Interval,
    String,
    Addr,
    Subnet,
    Enum,
    Port,
    Func,
    File,
    List,
    Opaque,
    Pattern,
    Record,
    Table,
    Vector,
    Any,
    Type,
    Error,
    Timer,
    Union,
    Void,
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TypeTag::Bool => "bool",
            TypeTag::Int => "int",
            TypeTag::Count => "count",
            TypeTag::Counter => "counter",
            TypeTag::Double => "double",
            TypeTag::Time => "time",
            TypeTag::Interval => "interval",
            TypeTag::String => "string",
            TypeTag::Addr => "addr",
            TypeTag::Subnet => "subnet",
            TypeTag::Enum => "enum",
            TypeTag::Port => "port",
            TypeTag::Func => "func",
            TypeTag::File => "file",
            TypeTag::List => "list",
            TypeTag::Opaque => "opaque",
            TypeTag::Pattern => "pattern",
            TypeTag::Record => "record",
            TypeTag::Table => "table",
            TypeTag::Vector => "vector",
            TypeTag::Any => "any",
            TypeTag::Type => "type",
            TypeTag::Error => "error",
            TypeTag::Timer => "timer",
            TypeTag::Union => "union",
            TypeTag::Void => "void",
        };
        write!(f, "{name}")
    }
}

/// Low-level storage kind behind a tag. Tags that share a kind share the same
/// raw alternative in both the boxed and the unboxed representation.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StorageKind {
    Int,
    UInt,
    Double,
    Str,
    Addr,
    Subnet,
    Other,
}

/// Type descriptor. For `Vector` the yield (element) type is carried; for
/// every other tag `yield_ty` is `None`.
#[derive(Debug)]
pub struct Type {
    tag: TypeTag,
    yield_ty: Option<Arc<Type>>,
}

impl Type {
    pub fn new(tag: TypeTag) -> Arc<Self> {
        debug_assert!(tag != TypeTag::Vector, "vector types need a yield type");
        Arc::new(Self {
            tag,
            yield_ty: None,
        })
    }

    pub fn vector_of(yield_ty: Arc<Type>) -> Arc<Self> {
        Arc::new(Self {
            tag: TypeTag::Vector,
            yield_ty: Some(yield_ty),
        })
    }

    #[inline]
    pub fn tag(&self) -> TypeTag {
        self.tag
    }

    #[inline]
    pub fn yield_type(&self) -> Option<&Arc<Type>> {
        self.yield_ty.as_ref()
    }

    pub fn storage(&self) -> StorageKind {
        match self.tag {
            TypeTag::Bool | TypeTag::Int | TypeTag::Enum => StorageKind::Int,
            TypeTag::Count | TypeTag::Counter | TypeTag::Port => StorageKind::UInt,
            TypeTag::Double | TypeTag::Time | TypeTag::Interval => StorageKind::Double,
            TypeTag::String => StorageKind::Str,
            TypeTag::Addr => StorageKind::Addr,
            TypeTag::Subnet => StorageKind::Subnet,
            _ => StorageKind::Other,
        }
    }
}

pub fn is_any(t: &Type) -> bool {
    t.tag() == TypeTag::Any
}

/// Is this a vector whose elements are individually typed?
pub fn is_any_vec(t: &Type) -> bool {
    if t.tag() != TypeTag::Vector {
        return false;
    }
    match t.yield_type() {
        Some(yt) => yt.tag() == TypeTag::Any,
        None => false,
    }
}

/// Does the unboxed alternative for this type own heap storage that must be
/// explicitly allocated and freed?
pub fn is_managed(t: &Type) -> bool {
    match t.tag() {
        TypeTag::Addr | TypeTag::Subnet | TypeTag::String => true,
        TypeTag::Vector => !is_any_vec(t),
        _ => false,
    }
}

#[cfg(test)]
mod type_tests {
    use super::*;

    #[test]
    fn managed_covers_exactly_the_owned_kinds() {
        for tag in [TypeTag::Addr, TypeTag::Subnet, TypeTag::String] {
            assert!(is_managed(&Type::new(tag)), "{tag} must be managed");
        }

        let vec_of_int = Type::vector_of(Type::new(TypeTag::Int));
        assert!(is_managed(&vec_of_int));

        let vec_of_any = Type::vector_of(Type::new(TypeTag::Any));
        assert!(!is_managed(&vec_of_any));

        for tag in [
            TypeTag::Bool,
            TypeTag::Int,
            TypeTag::Count,
            TypeTag::Counter,
            TypeTag::Double,
            TypeTag::Time,
            TypeTag::Interval,
            TypeTag::Enum,
            TypeTag::Port,
            TypeTag::Func,
            TypeTag::File,
            TypeTag::List,
            TypeTag::Opaque,
            TypeTag::Pattern,
            TypeTag::Record,
            TypeTag::Table,
            TypeTag::Any,
            TypeTag::Type,
        ] {
            assert!(!is_managed(&Type::new(tag)), "{tag} must not be managed");
        }
    }

    #[test]
    fn any_vec_requires_vector_of_any() {
        assert!(is_any_vec(&Type::vector_of(Type::new(TypeTag::Any))));
        assert!(!is_any_vec(&Type::vector_of(Type::new(TypeTag::Int))));
        assert!(!is_any_vec(&Type::new(TypeTag::Any)));
        assert!(is_any(&Type::new(TypeTag::Any)));
        assert!(!is_any(&Type::new(TypeTag::Int)));
    }

    #[test]
    fn storage_kinds_follow_tags() {
        assert_eq!(Type::new(TypeTag::Bool).storage(), StorageKind::Int);
        assert_eq!(Type::new(TypeTag::Enum).storage(), StorageKind::Int);
        assert_eq!(Type::new(TypeTag::Port).storage(), StorageKind::UInt);
        assert_eq!(Type::new(TypeTag::Time).storage(), StorageKind::Double);
        assert_eq!(Type::new(TypeTag::String).storage(), StorageKind::Str);
        assert_eq!(Type::new(TypeTag::Record).storage(), StorageKind::Other);
    }
}
