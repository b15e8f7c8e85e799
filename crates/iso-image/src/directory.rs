//! Directory records (Ecma-119 Section 9) and the node graph built from
//! them.
//!
//! A [`Node`] stands for either a file or a directory in one hierarchy
//! (primary or Joliet). Nodes live in an [`Arena`] and refer to each other
//! by [`Handle`]; this is what lets a Rock Ridge `CL`/`PL` pair, or the
//! ordinary parent/child/".."  relationships, exist without owned cycles.

extern crate alloc;

use alloc::string::String;
use alloc::vec::Vec;
use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};
use iso_common::{DirDateTime, Endian, LittleEndian, U16, U16LsbMsb, U32LsbMsb};

use crate::arena::Handle;
use crate::rockridge::RockRidge;

bitflags! {
    /// Directory record flags, Ecma-119 9.1.6.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FileFlags: u8 {
        const HIDDEN = 0x01;
        const DIRECTORY = 0x02;
        const ASSOCIATED_FILE = 0x04;
        const RECORD_FORMAT = 0x08;
        const EXTENDED_PERMISSIONS = 0x10;
        const NOT_FINAL = 0x80;
    }
}

/// The fixed-size portion of a directory record, before the variable-length
/// identifier and system-use area.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct DirectoryRecordHeader {
    pub len: u8,
    pub extended_attr_record_len: u8,
    pub extent: U32LsbMsb,
    pub data_len: U32LsbMsb,
    pub date: DirDateTime,
    pub flags: u8,
    pub file_unit_size: u8,
    pub interleave_gap_size: u8,
    pub volume_sequence_number: U16LsbMsb,
    pub file_identifier_len: u8,
}

impl DirectoryRecordHeader {
    pub const SIZE: usize = core::mem::size_of::<Self>();

    pub fn from_bytes(bytes: &[u8]) -> Self {
        *bytemuck::from_bytes(&bytes[..Self::SIZE])
    }

    pub fn is_directory(&self) -> bool {
        self.flags & FileFlags::DIRECTORY.bits() != 0
    }
}

/// A byte identifier on disk: d1-characters (plus `;N`) for the primary
/// hierarchy, UCS-2 big-endian for Joliet. Sentinel identifiers `\x00` and
/// `\x01` denote "." and "..".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identifier {
    Dot,
    DotDot,
    Primary(String),
    Joliet(String),
}

impl Identifier {
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Identifier::Dot => alloc::vec![0u8],
            Identifier::DotDot => alloc::vec![1u8],
            Identifier::Primary(s) => s.as_bytes().to_vec(),
            Identifier::Joliet(s) => {
                let mut out = Vec::with_capacity(s.len() * 2);
                for c in s.encode_utf16() {
                    let bytes = U16::<iso_common::BigEndian>::new(c);
                    out.extend_from_slice(bytemuck::bytes_of(&bytes));
                }
                out
            }
        }
    }

    pub fn display(&self) -> String {
        match self {
            Identifier::Dot => ".".into(),
            Identifier::DotDot => "..".into(),
            Identifier::Primary(s) | Identifier::Joliet(s) => s.clone(),
        }
    }
}

/// Where a file's payload bytes actually live. Parsed-through files keep
/// pointing at the image they were opened from (so the caller's source must
/// stay live until `write`, per the resource-lifetime contract); newly
/// added files own their bytes outright.
#[derive(Debug, Clone)]
pub enum Payload {
    Owned(Vec<u8>),
    /// Bytes live at `extent` in the image this node was parsed from.
    FromSource { extent: u32, len: u32 },
}

impl Payload {
    pub fn len(&self) -> u32 {
        match self {
            Payload::Owned(v) => v.len() as u32,
            Payload::FromSource { len, .. } => *len,
        }
    }
}

/// A node in one directory hierarchy (either the primary ISO9660 tree or
/// the Joliet tree). Files and directories share this type; `is_dir`
/// distinguishes them.
#[derive(Debug, Clone)]
pub struct Node {
    pub identifier: Identifier,
    pub is_dir: bool,
    pub flags: FileFlags,
    pub parent: Option<Handle>,
    pub children: Vec<Handle>,
    /// Logical block (extent) this node occupies once the allocator has
    /// run. Zero means "not yet assigned".
    pub extent: u32,
    pub data_len: u32,
    pub date: DirDateTime,
    /// Owned file contents. `None` for directories.
    pub payload: Option<Payload>,
    pub rock_ridge: Option<RockRidge>,
    /// The corresponding node in the other hierarchy (primary <-> Joliet),
    /// when both are present. Lets the allocator give a Joliet file record
    /// the same extent/length as the primary payload it mirrors instead of
    /// re-deriving the correspondence from sort order.
    pub mirror: Option<Handle>,
}

impl Node {
    pub fn new_directory(identifier: Identifier, parent: Option<Handle>) -> Self {
        Self {
            identifier,
            is_dir: true,
            flags: FileFlags::DIRECTORY,
            parent,
            children: Vec::new(),
            extent: 0,
            data_len: 0,
            date: DirDateTime::zero(),
            payload: None,
            rock_ridge: None,
            mirror: None,
        }
    }

    pub fn new_file(identifier: Identifier, parent: Handle, data: Payload) -> Self {
        let data_len = data.len();
        Self {
            identifier,
            is_dir: false,
            flags: FileFlags::empty(),
            parent: Some(parent),
            children: Vec::new(),
            extent: 0,
            data_len,
            date: DirDateTime::zero(),
            payload: Some(data),
            rock_ridge: None,
            mirror: None,
        }
    }

    pub fn is_dot(&self) -> bool {
        matches!(self.identifier, Identifier::Dot)
    }

    pub fn is_dotdot(&self) -> bool {
        matches!(self.identifier, Identifier::DotDot)
    }

    pub fn is_sentinel(&self) -> bool {
        self.is_dot() || self.is_dotdot()
    }

    pub fn extents(&self) -> u32 {
        self.data_len.div_ceil(2048)
    }

    /// Adds `child` in sorted position (sentinels always stay at indices 0
    /// and 1). Returns the index it was inserted at.
    pub fn insert_child_sorted(&mut self, child: Handle, key: &[u8], key_of: impl Fn(Handle) -> Vec<u8>) -> usize {
        let start = if self.children.len() >= 2 { 2 } else { self.children.len() };
        let pos = self.children[start..]
            .iter()
            .position(|&h| compare_identifier_keys(key, &key_of(h)) == core::cmp::Ordering::Less)
            .map(|p| p + start)
            .unwrap_or(self.children.len());
        self.children.insert(pos, child);
        pos
    }

    pub fn remove_child_at(&mut self, index: usize) -> Handle {
        self.children.remove(index)
    }
}

/// Sort-order key bytes for one identifier: d-characters for the primary
/// hierarchy compare extension-first per Ecma-119 9.3, big-endian UCS-2
/// bytes for Joliet. Sentinels sort first by construction (callers never
/// pass them through this comparator).
pub fn identifier_sort_key(identifier: &Identifier) -> Vec<u8> {
    match identifier {
        Identifier::Dot => alloc::vec![0u8],
        Identifier::DotDot => alloc::vec![1u8],
        Identifier::Primary(s) => {
            let (stem, rest) = s.split_once('.').map(|(a, b)| (a, b)).unwrap_or((s.as_str(), ""));
            let (ext, version) = rest.split_once(';').unwrap_or((rest, ""));
            let version: i32 = version.parse().unwrap_or(0);
            let mut key = Vec::new();
            key.extend_from_slice(ext.as_bytes());
            key.push(0);
            key.extend_from_slice(stem.as_bytes());
            key.push(0);
            // descending version: encode as negated so ascending byte-sort
            // yields descending version order.
            key.extend_from_slice(&(i32::MAX - version).to_be_bytes());
            key
        }
        Identifier::Joliet(s) => s.encode_utf16().flat_map(|c| c.to_be_bytes()).collect(),
    }
}

fn compare_identifier_keys(a: &[u8], b: &[u8]) -> core::cmp::Ordering {
    a.cmp(b)
}

/// Parses one on-disk directory record starting at `bytes[0]`. Returns the
/// record and the number of bytes it occupied (the header's `len` field),
/// or `None` if `bytes[0]` is the zero-length padding sentinel that marks
/// "skip to the next 2048-byte block".
pub struct ParsedRecord {
    pub header: DirectoryRecordHeader,
    pub identifier_bytes: Vec<u8>,
    pub system_use: Vec<u8>,
    pub consumed: usize,
}

pub fn parse_record(bytes: &[u8]) -> Option<ParsedRecord> {
    if bytes.is_empty() || bytes[0] == 0 {
        return None;
    }
    let len = bytes[0] as usize;
    if len < DirectoryRecordHeader::SIZE || len > bytes.len() {
        return None;
    }
    let header = DirectoryRecordHeader::from_bytes(bytes);
    let ident_start = DirectoryRecordHeader::SIZE;
    let ident_len = header.file_identifier_len as usize;
    let identifier_bytes = bytes[ident_start..ident_start + ident_len].to_vec();
    let mut su_start = ident_start + ident_len;
    if ident_len % 2 == 0 {
        su_start += 1; // padding byte to keep the identifier field even
    }
    let system_use = if su_start < len { bytes[su_start..len].to_vec() } else { Vec::new() };
    Some(ParsedRecord { header, identifier_bytes, system_use, consumed: len })
}

/// Emits one on-disk directory record: fixed header, identifier (padded to
/// an even length), and system-use area.
pub fn emit_record(
    extent: u32,
    data_len: u32,
    date: DirDateTime,
    flags: FileFlags,
    identifier: &[u8],
    system_use: &[u8],
) -> Vec<u8> {
    let ident_len = identifier.len();
    let ident_padded = ident_len + if ident_len % 2 == 0 { 1 } else { 0 };
    let fixed_len = DirectoryRecordHeader::SIZE + ident_padded + system_use.len();
    let total_len = fixed_len + (fixed_len % 2);

    let header = DirectoryRecordHeader {
        len: total_len as u8,
        extended_attr_record_len: 0,
        extent: U32LsbMsb::new(extent),
        data_len: U32LsbMsb::new(data_len),
        date,
        flags: flags.bits(),
        file_unit_size: 0,
        interleave_gap_size: 0,
        volume_sequence_number: U16LsbMsb::new(1),
        file_identifier_len: ident_len as u8,
    };

    let mut out = Vec::with_capacity(total_len);
    out.extend_from_slice(bytemuck::bytes_of(&header));
    out.extend_from_slice(identifier);
    while out.len() < DirectoryRecordHeader::SIZE + ident_padded {
        out.push(0);
    }
    out.extend_from_slice(system_use);
    while out.len() < total_len {
        out.push(0);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_size_is_34_minus_variable_parts() {
        // 1+1+8+8+7+1+1+1+4+1 = 33 bytes fixed header (identifier follows)
        assert_eq!(DirectoryRecordHeader::SIZE, 33);
    }

    #[test]
    fn joliet_identifier_is_big_endian_ucs2() {
        let id = Identifier::Joliet("AB".into());
        assert_eq!(id.to_bytes(), alloc::vec![0x00, 0x41, 0x00, 0x42]);
    }

    #[test]
    fn dot_and_dotdot_are_single_bytes() {
        assert_eq!(Identifier::Dot.to_bytes(), alloc::vec![0u8]);
        assert_eq!(Identifier::DotDot.to_bytes(), alloc::vec![1u8]);
    }

    #[test]
    fn file_extents_round_up() {
        let node = Node::new_file(
            Identifier::Primary("FOO.TXT;1".into()),
            Handle(0),
            Payload::Owned(alloc::vec![0; 2049]),
        );
        assert_eq!(node.extents(), 2);
    }

    #[test]
    fn record_roundtrips_through_bytes() {
        let bytes = emit_record(42, 2048, DirDateTime::zero(), FileFlags::DIRECTORY, b"DIR1", &[]);
        let parsed = parse_record(&bytes).unwrap();
        assert_eq!(parsed.header.extent.read(), Some(42));
        assert_eq!(parsed.header.data_len.read(), Some(2048));
        assert_eq!(parsed.identifier_bytes, b"DIR1");
        assert_eq!(parsed.consumed, bytes.len());
        assert_eq!(bytes.len() % 2, 0);
    }

    #[test]
    fn zero_length_byte_signals_padding() {
        assert!(parse_record(&[0u8; 8]).is_none());
    }

    #[test]
    fn primary_sort_key_orders_extension_then_name_then_version_desc() {
        let a = identifier_sort_key(&Identifier::Primary("FOO.TXT;1".into()));
        let b = identifier_sort_key(&Identifier::Primary("FOO.TXT;2".into()));
        assert!(compare_identifier_keys(&a, &b) == core::cmp::Ordering::Less);
    }
}
