//! Type-driven conversion between native byte layout and [`WireValue`]
//! trees (spec.md §4.2).
//!
//! Grounded on `windows_rpc_macros::types::Type::{to_rust_type,
//! rust_type_to_abi}` from the teacher crate -- same idea (pick the
//! conversion by matching on the type descriptor), generalized from "a
//! handful of scalar/`&str` cases hardcoded into generated source" to a
//! recursive walk over the full [`TypeDescriptor`] tree operating on raw
//! native-layout bytes, since descriptors are runtime values here rather
//! than proc-macro input.

use crate::error::BridgeError;
use crate::types::{Field, PathElement, ScalarName, TypeDescriptor};
use crate::wire::{PointerValue, ScalarValue, WireValue};

/// Entry point used by the dispatcher: wraps the free functions below so
/// callers have a single name to import, mirroring how
/// `windows_rpc_macros::types::Type` bundled its `to_rust_type`/
/// `rust_type_to_abi` pair under one type.
pub struct Marshaller;

impl Marshaller {
    pub fn to_wire(descriptor: &TypeDescriptor, bytes: &[u8]) -> Result<WireValue, BridgeError> {
        bytes_to_wire(descriptor, bytes)
    }

    pub fn from_wire(descriptor: &TypeDescriptor, value: &WireValue, out: &mut Vec<u8>) -> Result<(), BridgeError> {
        wire_to_bytes(descriptor, value, out)
    }

    pub fn apply_memsync_to_descriptors(arg_descriptors: &mut [TypeDescriptor], rules: &[crate::types::MemsyncRule]) {
        apply_memsync_to_descriptors(arg_descriptors, rules)
    }
}

/// Converts a native-layout byte buffer into a [`WireValue`] tree, walking
/// `descriptor` recursively. `bytes` must be at least `descriptor.layout().0`
/// bytes long.
pub fn bytes_to_wire(descriptor: &TypeDescriptor, bytes: &[u8]) -> Result<WireValue, BridgeError> {
    match descriptor {
        TypeDescriptor::Void => Ok(WireValue::Void),
        TypeDescriptor::Scalar(name) => scalar_from_bytes(*name, bytes),
        TypeDescriptor::Pointer(_) | TypeDescriptor::FunctionPointer => {
            let addr = read_u64(bytes)?;
            Ok(WireValue::Pointer(if addr == 0 {
                PointerValue::Null
            } else {
                PointerValue::Address(addr)
            }))
        }
        TypeDescriptor::Array { element, count } => {
            let (elem_size, elem_align) = element.layout();
            let stride = round_up(elem_size, elem_align);
            let mut items = Vec::with_capacity(*count);
            for i in 0..*count {
                let start = i * stride;
                let slice = bytes.get(start..start + elem_size).ok_or_else(|| {
                    BridgeError::TypeDescriptor(format!("array element {i} out of bounds"))
                })?;
                items.push(bytes_to_wire(element, slice)?);
            }
            Ok(WireValue::Sequence(items))
        }
        TypeDescriptor::Struct(fields) => struct_fields_from_bytes(fields, bytes),
        // Every field overlays offset 0, unlike a struct's cumulative
        // layout; report them all, the caller picks the active member by
        // context.
        TypeDescriptor::Union(fields) => union_fields_from_bytes(fields, bytes),
    }
}

/// Converts a [`WireValue`] back into native-layout bytes, appending to
/// `out`. `out` is truncated/extended to exactly `descriptor.layout().0`
/// bytes for this value.
pub fn wire_to_bytes(descriptor: &TypeDescriptor, value: &WireValue, out: &mut Vec<u8>) -> Result<(), BridgeError> {
    let (size, _align) = descriptor.layout();
    let start = out.len();
    out.resize(start + size, 0);

    match (descriptor, value) {
        (TypeDescriptor::Void, WireValue::Void) => {}
        (TypeDescriptor::Scalar(name), WireValue::Scalar(v)) => {
            scalar_into_bytes(*name, v, &mut out[start..start + size])?;
        }
        (TypeDescriptor::Pointer(_) | TypeDescriptor::FunctionPointer, WireValue::Pointer(p)) => {
            let addr = match p {
                PointerValue::Null => 0u64,
                PointerValue::Address(a) => *a,
            };
            out[start..start + 8].copy_from_slice(&addr.to_le_bytes());
        }
        (TypeDescriptor::Array { element, count }, WireValue::Sequence(items)) => {
            if items.len() != *count {
                return Err(BridgeError::TypeDescriptor(format!(
                    "expected {count} array elements, got {}",
                    items.len()
                )));
            }
            let (elem_size, elem_align) = element.layout();
            let stride = round_up(elem_size, elem_align);
            let mut scratch = Vec::new();
            for (i, item) in items.iter().enumerate() {
                scratch.clear();
                wire_to_bytes(element, item, &mut scratch)?;
                let dest = start + i * stride;
                out[dest..dest + elem_size].copy_from_slice(&scratch);
            }
        }
        (TypeDescriptor::Struct(fields), WireValue::Struct(values)) => {
            struct_fields_into_bytes(fields, values, &mut out[start..start + size])?;
        }
        (TypeDescriptor::Union(fields), WireValue::Struct(values)) => {
            union_fields_into_bytes(fields, values, &mut out[start..start + size])?;
        }
        (descriptor, value) => {
            return Err(BridgeError::TypeDescriptor(format!(
                "value {value:?} does not match descriptor {descriptor:?}"
            )));
        }
    }
    Ok(())
}

fn struct_fields_from_bytes(fields: &[Field], bytes: &[u8]) -> Result<WireValue, BridgeError> {
    let mut offset = 0usize;
    let mut out = Vec::with_capacity(fields.len());
    for field in fields {
        let (size, align) = field.descriptor.layout();
        offset = round_up(offset, align);
        let slice = bytes
            .get(offset..offset + size)
            .ok_or_else(|| BridgeError::TypeDescriptor(format!("field {} out of bounds", field.name)))?;
        out.push((field.name.clone(), bytes_to_wire(&field.descriptor, slice)?));
        offset += size;
    }
    Ok(WireValue::Struct(out))
}

fn struct_fields_into_bytes(fields: &[Field], values: &[(String, WireValue)], out: &mut [u8]) -> Result<(), BridgeError> {
    let mut offset = 0usize;
    for field in fields {
        let (size, align) = field.descriptor.layout();
        offset = round_up(offset, align);
        let (_, value) = values
            .iter()
            .find(|(name, _)| name == &field.name)
            .ok_or_else(|| BridgeError::TypeDescriptor(format!("missing field {}", field.name)))?;
        let mut scratch = Vec::new();
        wire_to_bytes(&field.descriptor, value, &mut scratch)?;
        out[offset..offset + size].copy_from_slice(&scratch);
        offset += size;
    }
    Ok(())
}

fn union_fields_from_bytes(fields: &[Field], bytes: &[u8]) -> Result<WireValue, BridgeError> {
    let mut out = Vec::with_capacity(fields.len());
    for field in fields {
        let (size, _align) = field.descriptor.layout();
        let slice = bytes
            .get(0..size)
            .ok_or_else(|| BridgeError::TypeDescriptor(format!("union field {} out of bounds", field.name)))?;
        out.push((field.name.clone(), bytes_to_wire(&field.descriptor, slice)?));
    }
    Ok(WireValue::Struct(out))
}

fn union_fields_into_bytes(fields: &[Field], values: &[(String, WireValue)], out: &mut [u8]) -> Result<(), BridgeError> {
    for field in fields {
        let (size, _align) = field.descriptor.layout();
        let (_, value) = values
            .iter()
            .find(|(name, _)| name == &field.name)
            .ok_or_else(|| BridgeError::TypeDescriptor(format!("missing union field {}", field.name)))?;
        let mut scratch = Vec::new();
        wire_to_bytes(&field.descriptor, value, &mut scratch)?;
        out.get_mut(0..size)
            .ok_or_else(|| BridgeError::TypeDescriptor(format!("union field {} out of bounds", field.name)))?
            .copy_from_slice(&scratch);
    }
    Ok(())
}

fn scalar_from_bytes(name: ScalarName, bytes: &[u8]) -> Result<WireValue, BridgeError> {
    use ScalarName::*;
    let v = match name {
        Bool => ScalarValue::Bool(bytes.first().copied().unwrap_or(0) != 0),
        Int8 | Char => ScalarValue::I8(bytes[0] as i8),
        Uint8 | Uchar => ScalarValue::U8(bytes[0]),
        Int16 => ScalarValue::I16(i16::from_le_bytes(bytes[0..2].try_into().unwrap())),
        Uint16 | Wchar => ScalarValue::U16(u16::from_le_bytes(bytes[0..2].try_into().unwrap())),
        Int32 => ScalarValue::I32(i32::from_le_bytes(bytes[0..4].try_into().unwrap())),
        Uint32 => ScalarValue::U32(u32::from_le_bytes(bytes[0..4].try_into().unwrap())),
        Int64 | SsizeT => ScalarValue::I64(i64::from_le_bytes(bytes[0..8].try_into().unwrap())),
        Uint64 | SizeT => ScalarValue::U64(u64::from_le_bytes(bytes[0..8].try_into().unwrap())),
        Float32 => ScalarValue::F32(f32::from_le_bytes(bytes[0..4].try_into().unwrap())),
        Float64 | LongDouble => ScalarValue::F64(f64::from_le_bytes(bytes[0..8].try_into().unwrap())),
        CharPtr | WcharPtr | VoidPtr => {
            return Ok(WireValue::Pointer(match read_u64(bytes)? {
                0 => PointerValue::Null,
                addr => PointerValue::Address(addr),
            }));
        }
    };
    Ok(WireValue::Scalar(v))
}

fn scalar_into_bytes(name: ScalarName, value: &ScalarValue, out: &mut [u8]) -> Result<(), BridgeError> {
    use ScalarValue::*;
    match (name, value) {
        (ScalarName::Bool, Bool(b)) => out[0] = *b as u8,
        (ScalarName::Int8 | ScalarName::Char, I8(v)) => out[0] = *v as u8,
        (ScalarName::Uint8 | ScalarName::Uchar, U8(v)) => out[0] = *v,
        (ScalarName::Int16, I16(v)) => out.copy_from_slice(&v.to_le_bytes()),
        (ScalarName::Uint16 | ScalarName::Wchar, U16(v)) => out.copy_from_slice(&v.to_le_bytes()),
        (ScalarName::Int32, I32(v)) => out.copy_from_slice(&v.to_le_bytes()),
        (ScalarName::Uint32, U32(v)) => out.copy_from_slice(&v.to_le_bytes()),
        (ScalarName::Int64 | ScalarName::SsizeT, I64(v)) => out.copy_from_slice(&v.to_le_bytes()),
        (ScalarName::Uint64 | ScalarName::SizeT, U64(v)) => out.copy_from_slice(&v.to_le_bytes()),
        (ScalarName::Float32, F32(v)) => out.copy_from_slice(&v.to_le_bytes()),
        (ScalarName::Float64 | ScalarName::LongDouble, F64(v)) => out.copy_from_slice(&v.to_le_bytes()),
        (name, value) => {
            return Err(BridgeError::TypeDescriptor(format!(
                "scalar value {value:?} does not match scalar name {name:?}"
            )));
        }
    }
    Ok(())
}

fn read_u64(bytes: &[u8]) -> Result<u64, BridgeError> {
    let slice = bytes
        .get(0..8)
        .ok_or_else(|| BridgeError::TypeDescriptor("pointer value truncated".into()))?;
    Ok(u64::from_le_bytes(slice.try_into().unwrap()))
}

fn round_up(value: usize, align: usize) -> usize {
    if align == 0 {
        return value;
    }
    value.div_ceil(align) * align
}

/// Downgrades the type descriptor of every argument covered by a memsync
/// rule to opaque `Pointer(Void)` (spec.md §4.2 tie-break rule: "if both a
/// scalar descriptor and a memsync rule apply to the same pointer argument,
/// the rule wins").
///
/// Ported from the original's
/// `apply_memsync_to_argtypes_definition`/`__get_argument_type_by_memsync_path__`.
pub fn apply_memsync_to_descriptors(arg_descriptors: &mut [TypeDescriptor], rules: &[crate::types::MemsyncRule]) {
    for rule in rules {
        let Some(PathElement::Index(i)) = rule.pointer_path.first() else {
            continue;
        };
        if *i < 0 {
            continue;
        }
        if let Some(root) = arg_descriptors.get_mut(*i as usize) {
            downgrade_path(root, &rule.pointer_path[1..]);
        }
    }
}

fn downgrade_path(descriptor: &mut TypeDescriptor, rest: &[PathElement]) {
    match rest.split_first() {
        None => *descriptor = TypeDescriptor::opaque(),
        Some((PathElement::Index(-1), tail)) => downgrade_path(descriptor, tail),
        Some((PathElement::Index(_), tail)) => match descriptor {
            TypeDescriptor::Pointer(inner) => downgrade_path(inner, tail),
            TypeDescriptor::Array { element, .. } => downgrade_path(element, tail),
            _ => {}
        },
        Some((PathElement::Field(name), tail)) => {
            let fields = match descriptor {
                TypeDescriptor::Pointer(inner) => match &mut **inner {
                    TypeDescriptor::Struct(f) | TypeDescriptor::Union(f) => Some(f),
                    _ => None,
                },
                TypeDescriptor::Struct(f) | TypeDescriptor::Union(f) => Some(f),
                _ => None,
            };
            if let Some(fields) = fields {
                if let Some(field) = fields.iter_mut().find(|f| &f.name == name) {
                    downgrade_path(&mut field.descriptor, tail);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MemsyncRule;

    #[test]
    fn scalar_round_trips_through_bytes() {
        let descriptor = TypeDescriptor::Scalar(ScalarName::Int32);
        let value = WireValue::Scalar(ScalarValue::I32(-7));
        let mut bytes = Vec::new();
        wire_to_bytes(&descriptor, &value, &mut bytes).unwrap();
        assert_eq!(bytes_to_wire(&descriptor, &bytes).unwrap(), value);
    }

    #[test]
    fn struct_with_pointer_field_round_trips() {
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
        let value = WireValue::Struct(vec![
            ("x".into(), WireValue::Scalar(ScalarValue::I32(42))),
            ("name".into(), WireValue::Pointer(PointerValue::Address(0x1000))),
        ]);
        let mut bytes = Vec::new();
        wire_to_bytes(&descriptor, &value, &mut bytes).unwrap();
        assert_eq!(bytes_to_wire(&descriptor, &bytes).unwrap(), value);
    }

    #[test]
    fn union_fields_all_overlay_offset_zero() {
        let descriptor = TypeDescriptor::Union(vec![
            Field {
                name: "as_i32".into(),
                descriptor: TypeDescriptor::Scalar(ScalarName::Int32),
            },
            Field {
                name: "as_u8".into(),
                descriptor: TypeDescriptor::Scalar(ScalarName::Uint8),
            },
        ]);
        let value = WireValue::Struct(vec![
            ("as_i32".into(), WireValue::Scalar(ScalarValue::I32(1))),
            ("as_u8".into(), WireValue::Scalar(ScalarValue::U8(7))),
        ]);
        let mut bytes = Vec::new();
        wire_to_bytes(&descriptor, &value, &mut bytes).unwrap();
        assert_eq!(bytes.len(), 4);

        // Writing "as_u8" must have landed at offset 0, not after the i32.
        let mut single_field = Vec::new();
        wire_to_bytes(
            &descriptor,
            &WireValue::Struct(vec![
                ("as_i32".into(), WireValue::Scalar(ScalarValue::I32(0))),
                ("as_u8".into(), WireValue::Scalar(ScalarValue::U8(7))),
            ]),
            &mut single_field,
        )
        .unwrap();
        assert_eq!(single_field[0], 7);

        let WireValue::Struct(fields) = bytes_to_wire(&descriptor, &single_field).unwrap() else {
            panic!("expected struct-shaped union value")
        };
        assert_eq!(fields[1].1, WireValue::Scalar(ScalarValue::U8(7)));
    }

    #[test]
    fn memsync_rule_downgrades_covered_argument_to_opaque() {
        let mut args = vec![TypeDescriptor::Scalar(ScalarName::VoidPtr)];
        let rules = vec![MemsyncRule {
            pointer_path: vec![PathElement::Index(0)],
            length: crate::types::LengthSpec::Path(vec![PathElement::Index(1)]),
            element_size: 1,
            is_wide: false,
            coerce_descriptor: None,
        }];
        apply_memsync_to_descriptors(&mut args, &rules);
        assert!(args[0].is_opaque());
    }

    #[test]
    fn memsync_rule_downgrades_nested_struct_field() {
        let mut args = vec![TypeDescriptor::Pointer(Box::new(TypeDescriptor::Struct(vec![
            Field {
                name: "x".into(),
                descriptor: TypeDescriptor::Scalar(ScalarName::Int32),
            },
            Field {
                name: "name".into(),
                descriptor: TypeDescriptor::Scalar(ScalarName::CharPtr),
            },
        ])))];
        let rules = vec![MemsyncRule {
            pointer_path: vec![PathElement::Index(0), PathElement::Field("name".into())],
            length: crate::types::LengthSpec::Computed {
                paths: vec![vec![PathElement::Index(0), PathElement::Field("name".into())]],
                op: crate::types::LengthOp::NullTerminatedPlusOne,
            },
            element_size: 1,
            is_wide: false,
            coerce_descriptor: None,
        }];
        apply_memsync_to_descriptors(&mut args, &rules);
        let TypeDescriptor::Pointer(inner) = &args[0] else {
            panic!("expected pointer")
        };
        let TypeDescriptor::Struct(fields) = &**inner else {
            panic!("expected struct")
        };
        assert!(fields[1].descriptor.is_opaque());
        assert!(!fields[0].descriptor.is_opaque());
    }
}
