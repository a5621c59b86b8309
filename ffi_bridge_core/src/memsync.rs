//! Memory-sync engine: keeps pointer-reachable buffers consistent across
//! the four phases of a call (spec.md §4.3).
//!
//! Ported from `mem_contents.py`'s `memory_contents_class`. That module
//! imports `generate_pointer_from_bytes`/`overwrite_pointer_with_bytes`/
//! `serialize_pointer_into_bytes` from a sibling `..memory` module rather
//! than touching raw pointers itself; [`MemoryAccess`] is the same split
//! here -- this module only decides *which* bytes move *where*, a
//! concrete implementation (unsafe, platform-specific) lives in
//! `ffi_bridge_server`.

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, MemsyncError};
use crate::types::{LengthOp, LengthSpec, MemsyncRule, PathElement};
use crate::wire::{PointerValue, ScalarValue, WireValue};

/// Windows' native `wchar_t` width, and the wire-canonical width every
/// [`MemoryPacket`] travels at (spec.md §3, §6).
pub const WIRE_WCHAR_WIDTH: u8 = 2;

/// One pointer-reachable memory region in transit between client and
/// server (spec.md §3 `MemoryPacket`).
///
/// `local_address`/`remote_address` are named from the perspective of
/// whichever side is *currently* holding the packet: the side that just
/// packed it considers its own buffer "local" and leaves `remote_address`
/// unset until the far side allocates its own copy and reports the
/// address back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryPacket {
    pub data: Vec<u8>,
    pub length: usize,
    pub local_address: Option<u64>,
    pub remote_address: Option<u64>,
    /// Width in bytes of one wide character in `data`, if this packet
    /// carries wide-character data; `None` for non-wide buffers.
    pub wchar_width: Option<u8>,
}

/// How [`adjust_wchar_length`] behaves when narrowing would discard a
/// non-zero high byte (spec.md §9 Open Question: unresolved in the
/// original, which only ever widens going into Wine). Resolved in
/// DESIGN.md: default to zero-padding / truncating silently, matching
/// the original's one-directional behavior, with an explicit opt-in to
/// reject lossy narrowing for callers that care.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WideCharPolicy {
    #[default]
    ZeroPad,
    ErrorOnTruncation,
}

/// Re-encodes wide-character data from `old_width` bytes per character to
/// `new_width`, ported verbatim from `__adjust_wchar_length__`'s
/// interleave trick: copy `min(old_width, new_width)` bytes per
/// character, stepping over the rest (zero-filled by `vec![0; _]`'s
/// initial zeros on widen, dropped on narrow).
pub fn adjust_wchar_length(
    data: &[u8],
    old_width: u8,
    new_width: u8,
    policy: WideCharPolicy,
) -> Result<Vec<u8>, MemsyncError> {
    if old_width == new_width {
        return Ok(data.to_vec());
    }
    let old_width = old_width as usize;
    let new_width = new_width as usize;
    if data.len() % old_width != 0 {
        return Err(MemsyncError::NonMultipleWcharLength {
            length: data.len(),
            width: old_width as u8,
        });
    }
    if policy == WideCharPolicy::ErrorOnTruncation && new_width < old_width {
        for chunk in data.chunks(old_width) {
            if chunk[new_width..].iter().any(|&b| b != 0) {
                return Err(MemsyncError::TruncatingNarrow {
                    old_width: old_width as u8,
                    new_width: new_width as u8,
                });
            }
        }
    }

    let char_count = data.len() / old_width;
    let mut out = vec![0u8; char_count * new_width];
    let copy_width = old_width.min(new_width);
    for i in 0..char_count {
        let src = &data[i * old_width..i * old_width + copy_width];
        out[i * new_width..i * new_width + copy_width].copy_from_slice(src);
    }
    Ok(out)
}

/// Platform-specific raw memory access, implemented once per side of the
/// bridge. The core crate never dereferences a pointer itself.
pub trait MemoryAccess {
    fn read(&self, address: u64, length: usize) -> Result<Vec<u8>, BridgeError>;
    fn write(&mut self, address: u64, bytes: &[u8]) -> Result<(), BridgeError>;
    /// Allocates a fresh buffer at least `length` bytes long and returns
    /// its address; used both for the DLL-allocated-output-pointer case
    /// and whenever a receiving side needs its own local copy of data
    /// that arrived from the wire.
    fn allocate(&mut self, length: usize) -> Result<u64, BridgeError>;
    /// Number of `unit_width`-byte elements before the first all-zero
    /// element at `address`, not counting the terminator itself.
    fn read_until_zero(&self, address: u64, unit_width: usize) -> Result<usize, BridgeError>;
    /// Width in bytes of this host's native `wchar_t` (spec.md §4.3
    /// "client pack": `wchar_width = host_wchar_width`). Windows is always
    /// 2; a Unix implementor with glibc's 4-byte `wchar_t` reports that
    /// instead so the far side can translate correctly.
    fn wchar_width(&self) -> u8;
}

fn scalar_as_i64(value: &WireValue) -> Result<i64, MemsyncError> {
    let err = || MemsyncError::PathResolution {
        path: format!("{value:?}"),
        reason: "length path did not resolve to an integer scalar",
    };
    match value {
        WireValue::Scalar(ScalarValue::I8(v)) => Ok(*v as i64),
        WireValue::Scalar(ScalarValue::U8(v)) => Ok(*v as i64),
        WireValue::Scalar(ScalarValue::I16(v)) => Ok(*v as i64),
        WireValue::Scalar(ScalarValue::U16(v)) => Ok(*v as i64),
        WireValue::Scalar(ScalarValue::I32(v)) => Ok(*v as i64),
        WireValue::Scalar(ScalarValue::U32(v)) => Ok(*v as i64),
        WireValue::Scalar(ScalarValue::I64(v)) => Ok(*v),
        WireValue::Scalar(ScalarValue::U64(v)) => Ok(*v as i64),
        _ => Err(err()),
    }
}

fn pointer_address(value: &WireValue) -> Result<Option<u64>, MemsyncError> {
    match value {
        WireValue::Pointer(PointerValue::Null) => Ok(None),
        WireValue::Pointer(PointerValue::Address(a)) => Ok(Some(*a)),
        _ => Err(MemsyncError::PathResolution {
            path: format!("{value:?}"),
            reason: "expected a pointer value",
        }),
    }
}

/// Walks `path` into `args`, following [`PathElement::Index`] into
/// sequences/top level and [`PathElement::Field`] into structs. A
/// negative index is the "pointer to pointer" sentinel and leaves the
/// current element untouched (spec.md §3, ported from
/// `__get_argument_by_memsync_path__`).
fn resolve<'a>(args: &'a [WireValue], path: &[PathElement]) -> Result<&'a WireValue, MemsyncError> {
    let path_err = || MemsyncError::PathResolution {
        path: format!("{path:?}"),
        reason: "path did not resolve against the argument tree",
    };
    let mut iter = path.iter();
    let first = iter.next().ok_or_else(path_err)?;
    let PathElement::Index(i) = first else {
        return Err(path_err());
    };
    if *i < 0 {
        return Err(path_err());
    }
    let mut current = args.get(*i as usize).ok_or_else(path_err)?;
    for element in iter {
        current = match element {
            PathElement::Index(i) if *i < 0 => current,
            PathElement::Index(i) => match current {
                WireValue::Sequence(items) => items.get(*i as usize).ok_or_else(path_err)?,
                _ => return Err(path_err()),
            },
            PathElement::Field(name) => match current {
                WireValue::Struct(fields) => {
                    &fields.iter().find(|(n, _)| n == name).ok_or_else(path_err)?.1
                }
                _ => return Err(path_err()),
            },
        };
    }
    Ok(current)
}

fn navigate_mut<'a>(args: &'a mut [WireValue], path: &[PathElement]) -> Result<&'a mut WireValue, MemsyncError> {
    let path_err = || MemsyncError::PathResolution {
        path: format!("{path:?}"),
        reason: "path did not resolve against the argument tree",
    };
    let mut iter = path.iter();
    let first = iter.next().ok_or_else(path_err)?;
    let PathElement::Index(i) = first else {
        return Err(path_err());
    };
    if *i < 0 {
        return Err(path_err());
    }
    let mut current = args.get_mut(*i as usize).ok_or_else(path_err)?;
    for element in iter {
        current = match element {
            PathElement::Index(i) if *i < 0 => current,
            PathElement::Index(i) => match current {
                WireValue::Sequence(items) => items.get_mut(*i as usize).ok_or_else(path_err)?,
                _ => return Err(path_err()),
            },
            PathElement::Field(name) => match current {
                WireValue::Struct(fields) => {
                    &mut fields.iter_mut().find(|(n, _)| n == name).ok_or_else(path_err)?.1
                }
                _ => return Err(path_err()),
            },
        };
    }
    Ok(current)
}

/// Writes a freshly-resolved pointer value into the argument tree at
/// `path`'s slot.
///
/// Ported from `__unpack_memory_item_data__`/`__unpack_memory_item_null__`,
/// unified into one function. The original's two call sites disagreed on
/// which path element identifies the slot to overwrite when `path` ends in
/// the `-1` "pointer to pointer" sentinel: the array-index branch correctly
/// used `p[-2]` (the element just above the sentinel) but the struct-field
/// branch used `p[-1]` (the sentinel itself, which is never a real field
/// name) -- spec.md §9's open question. Both branches here use `p[-2]`
/// when the sentinel is present, and `p[-1]` otherwise.
fn splice_pointer(args: &mut [WireValue], path: &[PathElement], value: PointerValue) -> Result<(), MemsyncError> {
    let path_err = || MemsyncError::PathResolution {
        path: format!("{path:?}"),
        reason: "pointer slot path is too short to splice into",
    };
    let ends_in_sentinel = path.last().map(PathElement::is_out_pointer_sentinel).unwrap_or(false);
    let skip = if ends_in_sentinel { 2 } else { 1 };
    if path.len() < skip {
        return Err(path_err());
    }
    let parent_path = &path[..path.len() - skip];
    let key = &path[path.len() - skip];

    if parent_path.is_empty() {
        let PathElement::Index(i) = key else {
            return Err(path_err());
        };
        let slot = args.get_mut(*i as usize).ok_or_else(path_err)?;
        *slot = WireValue::Pointer(value);
        return Ok(());
    }

    let parent = navigate_mut(args, parent_path)?;
    match (parent, key) {
        (WireValue::Sequence(items), PathElement::Index(i)) => {
            let slot = items.get_mut(*i as usize).ok_or_else(path_err)?;
            *slot = WireValue::Pointer(value);
        }
        (WireValue::Struct(fields), PathElement::Field(name)) => {
            let slot = &mut fields.iter_mut().find(|(n, _)| n == name).ok_or_else(path_err)?.1;
            *slot = WireValue::Pointer(value);
        }
        _ => return Err(path_err()),
    }
    Ok(())
}

fn resolve_length(
    args: &[WireValue],
    spec: &LengthSpec,
    element_size: usize,
    is_wide: bool,
    access: &dyn MemoryAccess,
) -> Result<usize, MemsyncError> {
    let count = match spec {
        LengthSpec::Path(path) => scalar_as_i64(resolve(args, path)?)?,
        LengthSpec::Computed {
            paths,
            op: LengthOp::NullTerminatedPlusOne,
        } => {
            let path = paths.first().ok_or(MemsyncError::PathResolution {
                path: "<empty>".into(),
                reason: "null-terminated length needs at least one path",
            })?;
            let unit = if is_wide { access.wchar_width() as usize } else { 1 };
            let addr = pointer_address(resolve(args, path)?)?.ok_or(MemsyncError::PathResolution {
                path: format!("{path:?}"),
                reason: "null-terminated length path resolved to a null pointer",
            })?;
            let units = access
                .read_until_zero(addr, unit)
                .map_err(|_| MemsyncError::PathResolution {
                    path: format!("{path:?}"),
                    reason: "could not scan target buffer for a terminator",
                })?;
            (units + 1) as i64
        }
        LengthSpec::Computed { paths, op } => {
            let values = paths
                .iter()
                .map(|p| resolve(args, p).and_then(scalar_as_i64))
                .collect::<Result<Vec<_>, _>>()?;
            match op {
                LengthOp::Sum => values.iter().sum(),
                LengthOp::Max => values.iter().copied().max().unwrap_or(0),
                LengthOp::First => values.first().copied().unwrap_or(0),
                LengthOp::NullTerminatedPlusOne => unreachable!("handled above"),
            }
        }
    };
    if count < 0 {
        return Err(MemsyncError::NegativeLength);
    }
    Ok(count as usize * element_size)
}

/// Orchestrates the four memsync phases in rule-declaration order
/// (spec.md §4.3: "each processed in strict memsync-rule declaration
/// order").
pub struct MemsyncEngine {
    policy: WideCharPolicy,
}

impl MemsyncEngine {
    pub fn new(policy: WideCharPolicy) -> Self {
        Self { policy }
    }

    /// Rejects a rule set where two rules would write through overlapping
    /// tail paths (spec.md §9).
    pub fn validate_rules(&self, rules: &[MemsyncRule]) -> Result<(), MemsyncError> {
        for (i, rule) in rules.iter().enumerate() {
            for other in &rules[..i] {
                if rule.shares_suffix_with(other) {
                    return Err(MemsyncError::OverlappingRule(i));
                }
            }
        }
        Ok(())
    }

    /// Client-side pack: read the bytes behind every memsync-covered
    /// pointer argument before the call crosses the wire (ported from
    /// `client_pack_memory_list`/`__pack_memory_item__`).
    pub fn client_pack(
        &self,
        args: &[WireValue],
        rules: &[MemsyncRule],
        access: &dyn MemoryAccess,
    ) -> Result<Vec<MemoryPacket>, BridgeError> {
        self.validate_rules(rules)?;
        rules
            .iter()
            .map(|rule| self.pack_one(args, rule, access))
            .collect()
    }

    /// Server-side pack: re-read the (possibly DLL-mutated) buffers after
    /// the native call returns (ported from `server_pack_memory_list`).
    pub fn server_pack(
        &self,
        args: &[WireValue],
        packets: &mut [MemoryPacket],
        rules: &[MemsyncRule],
        access: &dyn MemoryAccess,
    ) -> Result<(), BridgeError> {
        for (packet, rule) in packets.iter_mut().zip(rules) {
            match packet.local_address {
                None => *packet = self.pack_one(args, rule, access)?,
                Some(addr) => {
                    packet.data = access.read(addr, packet.length)?;
                }
            }
        }
        Ok(())
    }

    fn pack_one(&self, args: &[WireValue], rule: &MemsyncRule, access: &dyn MemoryAccess) -> Result<MemoryPacket, BridgeError> {
        let length = resolve_length(args, &rule.length, rule.element_size, rule.is_wide, access)?;
        let pointer = resolve(args, &rule.pointer_path)?;
        let address = pointer_address(pointer)?;
        let wchar_width = rule.is_wide.then_some(access.wchar_width());
        match address {
            None => Ok(MemoryPacket {
                data: Vec::new(),
                length,
                local_address: None,
                remote_address: None,
                wchar_width,
            }),
            Some(addr) => Ok(MemoryPacket {
                data: access.read(addr, length)?,
                length,
                local_address: Some(addr),
                remote_address: None,
                wchar_width,
            }),
        }
    }

    /// Server-side unpack: allocate the server's own copy of every
    /// memsync buffer and splice its address into the argument tree so
    /// the native call sees a server-local pointer (ported from
    /// `server_unpack_memory_list`, covering both
    /// `__unpack_memory_item_data__` and `__unpack_memory_item_null__`).
    ///
    /// If the packet's `local_address` is null, the client's argument
    /// pointer was null and the null-preservation invariant (spec.md §8)
    /// applies: install a fresh null-pointer cell at the rule's tail path
    /// position rather than allocating anything.
    pub fn server_unpack(
        &self,
        args: &mut [WireValue],
        packets: &mut [MemoryPacket],
        rules: &[MemsyncRule],
        access: &mut dyn MemoryAccess,
    ) -> Result<(), BridgeError> {
        self.validate_rules(rules)?;
        for (packet, rule) in packets.iter_mut().zip(rules) {
            if packet.local_address.is_none() {
                splice_pointer(args, &rule.pointer_path, PointerValue::Null)?;
                packet.remote_address = None;
                continue;
            }
            let data = if rule.is_wide {
                adjust_wchar_length(
                    &packet.data,
                    packet.wchar_width.unwrap_or(WIRE_WCHAR_WIDTH),
                    WIRE_WCHAR_WIDTH,
                    self.policy,
                )?
            } else {
                packet.data.clone()
            };
            let addr = access.allocate(packet.length.max(data.len()))?;
            if !data.is_empty() {
                access.write(addr, &data)?;
            }
            splice_pointer(args, &rule.pointer_path, PointerValue::Address(addr))?;
            packet.remote_address = Some(addr);
        }
        Ok(())
    }

    /// Client-side unpack: write the server's (possibly new) bytes back
    /// into the caller's own buffers (ported from
    /// `client_unpack_memory_list`).
    pub fn client_unpack(
        &self,
        args: &mut [WireValue],
        packets: &[MemoryPacket],
        rules: &[MemsyncRule],
        access: &mut dyn MemoryAccess,
    ) -> Result<(), BridgeError> {
        for (packet, rule) in packets.iter().zip(rules) {
            let data = if rule.is_wide {
                adjust_wchar_length(
                    &packet.data,
                    packet.wchar_width.unwrap_or(WIRE_WCHAR_WIDTH),
                    WIRE_WCHAR_WIDTH,
                    self.policy,
                )?
            } else {
                packet.data.clone()
            };
            match packet.local_address {
                Some(addr) => access.write(addr, &data)?,
                None => {
                    let addr = access.allocate(data.len())?;
                    if !data.is_empty() {
                        access.write(addr, &data)?;
                    }
                    splice_pointer(args, &rule.pointer_path, PointerValue::Address(addr))?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeMemory {
        buffers: RefCell<HashMap<u64, Vec<u8>>>,
        next_addr: RefCell<u64>,
    }

    impl FakeMemory {
        fn seed(&self, addr: u64, bytes: &[u8]) {
            self.buffers.borrow_mut().insert(addr, bytes.to_vec());
            let mut next = self.next_addr.borrow_mut();
            *next = (*next).max(addr + bytes.len() as u64 + 1);
        }
    }

    impl MemoryAccess for FakeMemory {
        fn read(&self, address: u64, length: usize) -> Result<Vec<u8>, BridgeError> {
            let buffers = self.buffers.borrow();
            let buf = buffers
                .get(&address)
                .ok_or_else(|| BridgeError::TypeDescriptor("no such address".into()))?;
            Ok(buf[..length.min(buf.len())].to_vec())
        }

        fn write(&mut self, address: u64, bytes: &[u8]) -> Result<(), BridgeError> {
            self.buffers.borrow_mut().insert(address, bytes.to_vec());
            Ok(())
        }

        fn allocate(&mut self, length: usize) -> Result<u64, BridgeError> {
            let mut next = self.next_addr.borrow_mut();
            let addr = *next;
            *next += length as u64 + 1;
            self.buffers.borrow_mut().insert(addr, vec![0u8; length]);
            Ok(addr)
        }

        fn read_until_zero(&self, address: u64, unit_width: usize) -> Result<usize, BridgeError> {
            let buffers = self.buffers.borrow();
            let buf = buffers
                .get(&address)
                .ok_or_else(|| BridgeError::TypeDescriptor("no such address".into()))?;
            Ok(buf.chunks(unit_width).take_while(|c| c.iter().any(|&b| b != 0)).count())
        }

        fn wchar_width(&self) -> u8 {
            WIRE_WCHAR_WIDTH
        }
    }

    fn strlen_rule(path: Vec<PathElement>) -> MemsyncRule {
        MemsyncRule {
            pointer_path: path.clone(),
            length: LengthSpec::Computed {
                paths: vec![path],
                op: LengthOp::NullTerminatedPlusOne,
            },
            element_size: 1,
            is_wide: false,
            coerce_descriptor: None,
        }
    }

    #[test]
    fn adjust_wchar_length_widens_with_zero_padding() {
        let data = b"hi".to_vec(); // 2 narrow (1-byte) "characters"
        let widened = adjust_wchar_length(&data, 1, 2, WideCharPolicy::ZeroPad).unwrap();
        assert_eq!(widened, vec![b'h', 0, b'i', 0]);
    }

    #[test]
    fn adjust_wchar_length_narrows_by_dropping_high_byte() {
        let data = vec![b'h', 0, b'i', 0];
        let narrowed = adjust_wchar_length(&data, 2, 1, WideCharPolicy::ZeroPad).unwrap();
        assert_eq!(narrowed, b"hi".to_vec());
    }

    #[test]
    fn adjust_wchar_length_rejects_lossy_narrow_when_policy_says_so() {
        let data = vec![b'h', 1, b'i', 0]; // high byte 1 would be lost
        let err = adjust_wchar_length(&data, 2, 1, WideCharPolicy::ErrorOnTruncation).unwrap_err();
        assert!(matches!(err, MemsyncError::TruncatingNarrow { .. }));
    }

    #[test]
    fn client_pack_then_server_round_trip_for_null_terminated_string() {
        let mem = FakeMemory::default();
        mem.seed(100, b"hello\0");
        let args = vec![WireValue::Pointer(PointerValue::Address(100))];
        let rule = strlen_rule(vec![PathElement::Index(0)]);
        let engine = MemsyncEngine::new(WideCharPolicy::ZeroPad);

        let packets = engine.client_pack(&args, std::slice::from_ref(&rule), &mem).unwrap();
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].data, b"hello\0");
        assert_eq!(packets[0].local_address, Some(100));
    }

    #[test]
    fn server_unpack_allocates_its_own_copy_and_splices_pointer() {
        let mut mem = FakeMemory::default();
        let mut args = vec![WireValue::Pointer(PointerValue::Address(100))];
        let rule = strlen_rule(vec![PathElement::Index(0)]);
        let mut packets = vec![MemoryPacket {
            data: b"hi\0".to_vec(),
            length: 3,
            local_address: Some(100),
            remote_address: None,
            wchar_width: None,
        }];
        let engine = MemsyncEngine::new(WideCharPolicy::ZeroPad);
        engine
            .server_unpack(&mut args, &mut packets, std::slice::from_ref(&rule), &mut mem)
            .unwrap();

        let WireValue::Pointer(PointerValue::Address(server_addr)) = args[0] else {
            panic!("expected spliced pointer");
        };
        assert_ne!(server_addr, 100);
        assert_eq!(mem.read(server_addr, 3).unwrap(), b"hi\0");
        assert_eq!(packets[0].remote_address, Some(server_addr));
    }

    #[test]
    fn null_output_pointer_splices_consistent_slot_for_struct_field() {
        // pointer_path = [arg 0, field "out", sentinel -1]: arg 0 is a
        // struct passed by value with an output T** field "out".
        let mut mem = FakeMemory::default();
        let mut args = vec![WireValue::Struct(vec![(
            "out".into(),
            WireValue::Pointer(PointerValue::Null),
        )])];
        let rule = MemsyncRule {
            pointer_path: vec![
                PathElement::Index(0),
                PathElement::Field("out".into()),
                PathElement::Index(-1),
            ],
            length: LengthSpec::Path(vec![PathElement::Index(1)]),
            element_size: 1,
            is_wide: false,
            coerce_descriptor: None,
        };
        let mut packets = vec![MemoryPacket {
            data: Vec::new(),
            length: 4,
            local_address: None,
            remote_address: None,
            wchar_width: None,
        }];
        let engine = MemsyncEngine::new(WideCharPolicy::ZeroPad);
        engine
            .server_unpack(&mut args, &mut packets, std::slice::from_ref(&rule), &mut mem)
            .unwrap();

        let WireValue::Struct(fields) = &args[0] else {
            panic!("expected struct")
        };
        // The fix: the struct-field branch must land the new pointer in
        // the "out" field itself, not attempt to set a field named "-1".
        // `local_address` is None here, so null preservation applies and
        // the spliced cell stays Null rather than getting an allocation.
        assert!(matches!(fields[0].1, WireValue::Pointer(PointerValue::Null)));
        assert_eq!(fields[0].0, "out");
        assert_eq!(packets[0].remote_address, None);
    }

    #[test]
    fn server_unpack_allocates_when_local_address_is_present() {
        let mut mem = FakeMemory::default();
        let mut args = vec![WireValue::Struct(vec![(
            "out".into(),
            WireValue::Pointer(PointerValue::Address(100)),
        )])];
        let rule = MemsyncRule {
            pointer_path: vec![
                PathElement::Index(0),
                PathElement::Field("out".into()),
                PathElement::Index(-1),
            ],
            length: LengthSpec::Path(vec![PathElement::Index(1)]),
            element_size: 1,
            is_wide: false,
            coerce_descriptor: None,
        };
        let mut packets = vec![MemoryPacket {
            data: b"hi\0".to_vec(),
            length: 4,
            local_address: Some(100),
            remote_address: None,
            wchar_width: None,
        }];
        let engine = MemsyncEngine::new(WideCharPolicy::ZeroPad);
        engine
            .server_unpack(&mut args, &mut packets, std::slice::from_ref(&rule), &mut mem)
            .unwrap();

        let WireValue::Struct(fields) = &args[0] else {
            panic!("expected struct")
        };
        assert!(matches!(fields[0].1, WireValue::Pointer(PointerValue::Address(_))));
        assert!(packets[0].remote_address.is_some());
    }

    #[test]
    fn overlapping_rules_are_rejected() {
        let engine = MemsyncEngine::new(WideCharPolicy::ZeroPad);
        let a = strlen_rule(vec![PathElement::Index(0), PathElement::Field("buf".into())]);
        let b = strlen_rule(vec![PathElement::Index(0), PathElement::Field("buf".into())]);
        let err = engine.validate_rules(&[a, b]).unwrap_err();
        assert!(matches!(err, MemsyncError::OverlappingRule(1)));
    }

    #[test]
    fn distinct_argument_indices_do_not_overlap() {
        let engine = MemsyncEngine::new(WideCharPolicy::ZeroPad);
        let a = strlen_rule(vec![PathElement::Index(0), PathElement::Field("buf".into())]);
        let b = strlen_rule(vec![PathElement::Index(1), PathElement::Field("buf".into())]);
        engine.validate_rules(&[a, b]).unwrap();
    }
}
