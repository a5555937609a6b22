use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::{Type, TypeTag, internal_error};

/// Script strings are byte sequences, not UTF-8.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ByteStr(Vec<u8>);

impl ByteStr {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for ByteStr {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl fmt::Display for ByteStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

/// An address prefix: base address plus prefix length in bits.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Subnet {
    pub addr: IpAddr,
    pub prefix: u8,
}

impl fmt::Display for Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix)
    }
}

// Collaborator objects the AM only ever passes through by shared pointer.
// Their internals belong to other parts of the runtime.

#[derive(Debug)]
pub struct FuncObj {
    pub name: String,
    pub arity: u32,
}

#[derive(Debug)]
pub struct FileObj {
    pub path: String,
}

#[derive(Debug)]
pub struct PatternObj {
    pub source: String,
}

#[derive(Debug)]
pub struct OpaqueObj {
    pub kind_name: String,
}

#[derive(Debug)]
pub struct RecordObj {
    pub type_name: String,
}

#[derive(Debug)]
pub struct TableObj {
    pub name: String,
}

/// Raw stored alternative of a boxed value, one variant per storage kind.
#[derive(Debug)]
pub enum ValKind {
    Int(i64),
    UInt(u64),
    Double(f64),
    Str(ByteStr),
    Addr(IpAddr),
    Subnet(Subnet),
    Func(Arc<FuncObj>),
    File(Arc<FileObj>),
    Pattern(Arc<PatternObj>),
    Opaque(Arc<OpaqueObj>),
    Record(Arc<RecordObj>),
    Table(Arc<TableObj>),
    List(Vec<Arc<Val>>),
    /// Element storage of a boxed vector. Entries may be `None` (holes).
    /// The lock exists for outside observers of the boxed form; the AM
    /// itself is the single mutator and never blocks on it.
    Vector(RwLock<Vec<Option<Arc<Val>>>>),
    TypeRef(Arc<Type>),
}

/// The host's canonical boxed value: declared type plus raw alternative.
/// Shared by reference count (`Arc`); identity is `Arc::ptr_eq`.
#[derive(Debug)]
pub struct Val {
    ty: Arc<Type>,
    kind: ValKind,
}

impl Val {
    pub fn new(ty: Arc<Type>, kind: ValKind) -> Arc<Self> {
        Arc::new(Self { ty, kind })
    }

    #[inline]
    pub fn ty(&self) -> &Arc<Type> {
        &self.ty
    }

    #[inline]
    pub fn tag(&self) -> TypeTag {
        self.ty.tag()
    }

    pub fn boolean(b: bool) -> Arc<Self> {
        Self::new(Type::new(TypeTag::Bool), ValKind::Int(i64::from(b)))
    }

    pub fn int(i: i64) -> Arc<Self> {
        Self::new(Type::new(TypeTag::Int), ValKind::Int(i))
    }

    pub fn count(c: u64) -> Arc<Self> {
        Self::new(Type::new(TypeTag::Count), ValKind::UInt(c))
    }

    pub fn double(d: f64) -> Arc<Self> {
        Self::new(Type::new(TypeTag::Double), ValKind::Double(d))
    }

    pub fn time(t: f64) -> Arc<Self> {
        Self::new(Type::new(TypeTag::Time), ValKind::Double(t))
    }

    pub fn interval(dt: f64) -> Arc<Self> {
        Self::new(Type::new(TypeTag::Interval), ValKind::Double(dt))
    }

    pub fn enum_val(ty: Arc<Type>, ordinal: i64) -> Arc<Self> {
        Self::new(ty, ValKind::Int(ordinal))
    }

    pub fn string(bytes: impl Into<ByteStr>) -> Arc<Self> {
        Self::new(Type::new(TypeTag::String), ValKind::Str(bytes.into()))
    }

    pub fn addr(a: IpAddr) -> Arc<Self> {
        Self::new(Type::new(TypeTag::Addr), ValKind::Addr(a))
    }

    pub fn subnet(s: Subnet) -> Arc<Self> {
        Self::new(Type::new(TypeTag::Subnet), ValKind::Subnet(s))
    }

    pub fn func(f: FuncObj) -> Arc<Self> {
        Self::new(Type::new(TypeTag::Func), ValKind::Func(Arc::new(f)))
    }

    pub fn file(f: FileObj) -> Arc<Self> {
        Self::new(Type::new(TypeTag::File), ValKind::File(Arc::new(f)))
    }

    pub fn pattern(p: PatternObj) -> Arc<Self> {
        Self::new(Type::new(TypeTag::Pattern), ValKind::Pattern(Arc::new(p)))
    }

    pub fn opaque(o: OpaqueObj) -> Arc<Self> {
        Self::new(Type::new(TypeTag::Opaque), ValKind::Opaque(Arc::new(o)))
    }

    pub fn record(r: RecordObj) -> Arc<Self> {
        Self::new(Type::new(TypeTag::Record), ValKind::Record(Arc::new(r)))
    }

    pub fn table(t: TableObj) -> Arc<Self> {
        Self::new(Type::new(TypeTag::Table), ValKind::Table(Arc::new(t)))
    }

    pub fn list(vals: Vec<Arc<Val>>) -> Arc<Self> {
        Self::new(Type::new(TypeTag::List), ValKind::List(vals))
    }

    /// Build a boxed vector. `ty` must be a vector type; `elems` may contain
    /// holes.
    pub fn vector(ty: Arc<Type>, elems: Vec<Option<Arc<Val>>>) -> Arc<Self> {
        debug_assert_eq!(ty.tag(), TypeTag::Vector);
        Self::new(ty, ValKind::Vector(RwLock::new(elems)))
    }

    pub fn of_type(t: Arc<Type>) -> Arc<Self> {
        Self::new(Type::new(TypeTag::Type), ValKind::TypeRef(t))
    }

    // By-tag raw accessors. Asking for the wrong alternative is a defect in
    // the caller, not a runtime condition.

    pub fn as_int(&self) -> i64 {
        match &self.kind {
            ValKind::Int(i) => *i,
            _ => internal_error("int storage expected"),
        }
    }

    pub fn as_uint(&self) -> u64 {
        match &self.kind {
            ValKind::UInt(u) => *u,
            _ => internal_error("uint storage expected"),
        }
    }

    pub fn as_double(&self) -> f64 {
        match &self.kind {
            ValKind::Double(d) => *d,
            _ => internal_error("double storage expected"),
        }
    }

    pub fn as_bytes(&self) -> &ByteStr {
        match &self.kind {
            ValKind::Str(s) => s,
            _ => internal_error("string storage expected"),
        }
    }

    pub fn as_addr(&self) -> &IpAddr {
        match &self.kind {
            ValKind::Addr(a) => a,
            _ => internal_error("addr storage expected"),
        }
    }

    pub fn as_subnet(&self) -> &Subnet {
        match &self.kind {
            ValKind::Subnet(s) => s,
            _ => internal_error("subnet storage expected"),
        }
    }

    pub fn as_func(&self) -> &Arc<FuncObj> {
        match &self.kind {
            ValKind::Func(f) => f,
            _ => internal_error("func storage expected"),
        }
    }

    pub fn as_file(&self) -> &Arc<FileObj> {
        match &self.kind {
            ValKind::File(f) => f,
            _ => internal_error("file storage expected"),
        }
    }

    pub fn as_type(&self) -> &Arc<Type> {
        match &self.kind {
            ValKind::TypeRef(t) => t,
            _ => internal_error("type storage expected"),
        }
    }

    /// Bulk element storage of a boxed vector.
    pub fn vector_raw(&self) -> &RwLock<Vec<Option<Arc<Val>>>> {
        match &self.kind {
            ValKind::Vector(v) => v,
            _ => internal_error("vector storage expected"),
        }
    }

    pub fn vector_len(&self) -> usize {
        self.vector_raw().read().len()
    }

    /// Indexed element lookup; `None` for holes and out-of-range indices.
    pub fn vector_elem(&self, idx: usize) -> Option<Arc<Val>> {
        self.vector_raw().read().get(idx).cloned().flatten()
    }
}
