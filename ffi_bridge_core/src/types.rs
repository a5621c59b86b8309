//! Type descriptors: the transport-safe values that stand in for native
//! types on the wire.
//!
//! Grounded on `windows_rpc_macros::types::{Type, BaseType}` from the
//! teacher crate, generalized from "the handful of scalar types a trait
//! method signature can name" to the full scalar/aggregate set a runtime
//! routine registry needs (spec.md §3, §6).

use serde::{Deserialize, Serialize};

/// Canonical scalar type names (spec.md §6's minimum set).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarName {
    Bool,
    Int8,
    Uint8,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Int64,
    Uint64,
    Float32,
    Float64,
    LongDouble,
    Char,
    Uchar,
    Wchar,
    CharPtr,
    WcharPtr,
    VoidPtr,
    SizeT,
    SsizeT,
}

impl ScalarName {
    /// `(size, align)` in bytes under the Windows LLP64 ABI. `Wchar` is
    /// always 2 bytes here -- the wire-canonical width. Host-side width
    /// translation happens at the memsync boundary, never here.
    pub fn layout(self) -> (usize, usize) {
        use ScalarName::*;
        match self {
            Bool | Int8 | Uint8 | Char | Uchar => (1, 1),
            Int16 | Uint16 | Wchar => (2, 2),
            Int32 | Uint32 | Float32 => (4, 4),
            Int64 | Uint64 | Float64 => (8, 8),
            LongDouble => (8, 8), // MSVC long double == double
            CharPtr | WcharPtr | VoidPtr | SizeT | SsizeT => (8, 8),
        }
    }
}

/// A named field inside a [`TypeDescriptor::Struct`] or
/// [`TypeDescriptor::Union`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub descriptor: TypeDescriptor,
}

/// A transport-safe value identifying a native type (spec.md §3).
///
/// Both sides of the bridge must resolve a given descriptor to the same
/// in-memory layout. Unresolvable or forward-declared types are represented
/// by a `Pointer(Void)` descriptor -- "opaque void-pointer" semantics, the
/// only implicit widening the marshaller is allowed to perform (spec.md
/// §4.2).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TypeDescriptor {
    Void,
    Scalar(ScalarName),
    Pointer(Box<TypeDescriptor>),
    Struct(Vec<Field>),
    Union(Vec<Field>),
    Array {
        element: Box<TypeDescriptor>,
        count: usize,
    },
    FunctionPointer,
}

impl TypeDescriptor {
    /// The opaque-void fallback used whenever a descriptor can't be
    /// resolved to a concrete layout.
    pub fn opaque() -> Self {
        TypeDescriptor::Pointer(Box::new(TypeDescriptor::Void))
    }

    pub fn is_opaque(&self) -> bool {
        matches!(self, TypeDescriptor::Pointer(inner) if matches!(**inner, TypeDescriptor::Void))
    }

    /// `(size, align)` under Windows ABI rules. Structs/unions/arrays are
    /// resolved recursively; `Void`/`FunctionPointer` have no size of their
    /// own (a `FunctionPointer` value is only ever passed as an address).
    pub fn layout(&self) -> (usize, usize) {
        match self {
            TypeDescriptor::Void => (0, 1),
            TypeDescriptor::Scalar(s) => s.layout(),
            TypeDescriptor::Pointer(_) | TypeDescriptor::FunctionPointer => (8, 8),
            TypeDescriptor::Array { element, count } => {
                let (size, align) = element.layout();
                (size * count, align)
            }
            TypeDescriptor::Struct(fields) => struct_layout(fields),
            TypeDescriptor::Union(fields) => {
                let mut size = 0;
                let mut align = 1;
                for f in fields {
                    let (s, a) = f.descriptor.layout();
                    size = size.max(s);
                    align = align.max(a);
                }
                (round_up(size, align), align)
            }
        }
    }
}

fn struct_layout(fields: &[Field]) -> (usize, usize) {
    let mut offset = 0usize;
    let mut align = 1usize;
    for f in fields {
        let (size, field_align) = f.descriptor.layout();
        align = align.max(field_align);
        offset = round_up(offset, field_align) + size;
    }
    (round_up(offset, align), align)
}

fn round_up(value: usize, align: usize) -> usize {
    if align == 0 {
        return value;
    }
    value.div_ceil(align) * align
}

/// Native calling convention (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AbiKind {
    Cdecl,
    Stdcall,
    /// Alias for `Stdcall` on the Windows side (spec.md §6).
    Windows,
}

impl AbiKind {
    pub fn normalize(self) -> AbiKind {
        match self {
            AbiKind::Windows => AbiKind::Stdcall,
            other => other,
        }
    }
}

/// One element of a [`MemsyncRule::pointer_path`] or length path.
///
/// `Index(-1)` is the sentinel meaning "leave the enclosing pointer-to-
/// pointer cell untouched; operate on the slot itself" (spec.md §3, §4.3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PathElement {
    Index(i64),
    Field(String),
}

impl PathElement {
    pub fn is_out_pointer_sentinel(&self) -> bool {
        matches!(self, PathElement::Index(-1))
    }
}

/// The systems-language replacement for "a tuple of paths plus a pure
/// function `f(*values) -> int`" (spec.md §3). An arbitrary closure can't
/// cross the process boundary and be re-evaluated identically by the peer,
/// so the catalog below stands in for it -- see DESIGN.md's "Open
/// questions resolved" section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LengthOp {
    /// `strlen(p) + 1`, evaluated against the pointee bytes at the single
    /// resolved path (spec.md §8 scenarios 2 and 4).
    NullTerminatedPlusOne,
    /// Sum of all resolved values.
    Sum,
    /// Largest resolved value.
    Max,
    /// The first resolved value, others ignored (kept for symmetry with
    /// the single-path case, useful when a length is nominally computed
    /// but only one argument actually matters).
    First,
}

/// Either a single path to a scalar element count, or a set of paths
/// combined by a [`LengthOp`] (spec.md §3 `length_path`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LengthSpec {
    Path(Vec<PathElement>),
    Computed {
        paths: Vec<Vec<PathElement>>,
        op: LengthOp,
    },
}

/// Declarative specification of one pointer-reachable memory region
/// (spec.md §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemsyncRule {
    pub pointer_path: Vec<PathElement>,
    pub length: LengthSpec,
    pub element_size: usize,
    pub is_wide: bool,
    pub coerce_descriptor: Option<TypeDescriptor>,
}

impl MemsyncRule {
    /// True if `self` and `other` would write through overlapping tail
    /// paths within the same call (spec.md §9: "declaring two rules whose
    /// pointer paths share a suffix is an error").
    pub fn shares_suffix_with(&self, other: &MemsyncRule) -> bool {
        let a = &self.pointer_path;
        let b = &other.pointer_path;
        let n = a.len().min(b.len());
        if n == 0 {
            return false;
        }
        a[a.len() - n..] == b[b.len() - n..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_layout_matches_llp64() {
        assert_eq!(ScalarName::Int64.layout(), (8, 8));
        assert_eq!(ScalarName::VoidPtr.layout(), (8, 8));
        assert_eq!(ScalarName::Wchar.layout(), (2, 2));
    }

    #[test]
    fn struct_layout_pads_to_alignment() {
        let descriptor = TypeDescriptor::Struct(vec![
            Field {
                name: "x".into(),
                descriptor: TypeDescriptor::Scalar(ScalarName::Int32),
            },
            Field {
                name: "name".into(),
                descriptor: TypeDescriptor::Scalar(ScalarName::CharPtr),
            },
        ]);
        // i32 at offset 0, pad to 8, ptr at offset 8, total size 16.
        assert_eq!(descriptor.layout(), (16, 8));
    }

    #[test]
    fn opaque_descriptor_round_trips() {
        let d = TypeDescriptor::opaque();
        assert!(d.is_opaque());
        assert!(!TypeDescriptor::Scalar(ScalarName::Int32).is_opaque());
    }

    #[test]
    fn overlapping_suffix_detected() {
        let a = MemsyncRule {
            pointer_path: vec![PathElement::Index(0), PathElement::Field("name".into())],
            length: LengthSpec::Path(vec![PathElement::Index(1)]),
            element_size: 1,
            is_wide: false,
            coerce_descriptor: None,
        };
        let b = MemsyncRule {
            pointer_path: vec![PathElement::Index(2), PathElement::Field("name".into())],
            length: LengthSpec::Path(vec![PathElement::Index(1)]),
            element_size: 1,
            is_wide: false,
            coerce_descriptor: None,
        };
        assert!(a.shares_suffix_with(&b));
    }
}
