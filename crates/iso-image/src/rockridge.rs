//! Rock Ridge / SUSP entries (IEEE P1282, SUSP P1281): POSIX metadata,
//! long names, symlinks, and the continuation-entry chaining that lets any
//! of those overflow a directory record's system-use area.

extern crate alloc;

use alloc::string::String;
use alloc::vec::Vec;

use crate::arena::Handle;

/// One component of a Rock Ridge symlink target (`SL`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlComponent {
    CurrentDir,
    ParentDir,
    Root,
    NetworkRoot,
    Name(String),
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SlComponentFlags: u8 {
        const CONTINUE = 0x01;
        const CURRENT = 0x02;
        const PARENT = 0x04;
        const ROOT = 0x08;
    }
}

/// The Rock Ridge annotation attached to one primary-hierarchy node.
#[derive(Debug, Clone, Default)]
pub struct RockRidge {
    /// `PX`: POSIX mode, link count, uid, gid, (and optionally inode).
    pub mode: u32,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    /// `NM`: the real, case-preserving, arbitrary-length name.
    pub name: Option<String>,
    /// `SL`: symlink target, absent for non-symlinks.
    pub symlink: Option<Vec<SlComponent>>,
    /// `TF`: access/modify/attribute timestamps, reusing the directory
    /// record's binary date encoding.
    pub access_time: Option<iso_common::DirDateTime>,
    pub modify_time: Option<iso_common::DirDateTime>,
    /// `RE`: this node was relocated out of its natural position because
    /// the tree was deeper than 8 levels.
    pub relocated: bool,
    /// `CL`: this (fake, shallow) node is a pointer to the real node's new
    /// location under `/RR_MOVED`.
    pub child_link: Option<Handle>,
    /// `PL`: this (real, relocated) node points back at its original
    /// parent, recorded so tools can reconstruct the logical tree.
    pub parent_link: Option<Handle>,
    /// Continuation area location, assigned by the allocator once any
    /// entry here overflows the record's system-use area.
    pub continuation: Option<ContinuationRef>,
}

#[derive(Debug, Clone, Copy)]
pub struct ContinuationRef {
    pub extent: u32,
    pub offset: u32,
    pub len: u32,
}

/// SUSP entry tags.
pub mod tag {
    pub const SP: [u8; 2] = *b"SP";
    pub const CE: [u8; 2] = *b"CE";
    pub const ER: [u8; 2] = *b"ER";
    pub const PX: [u8; 2] = *b"PX";
    pub const NM: [u8; 2] = *b"NM";
    pub const SL: [u8; 2] = *b"SL";
    pub const CL: [u8; 2] = *b"CL";
    pub const PL: [u8; 2] = *b"PL";
    pub const RE: [u8; 2] = *b"RE";
    pub const TF: [u8; 2] = *b"TF";
}

/// The maximum system-use-area bytes most directory records have room for
/// before an `NM`/`SL` needs a `CE` continuation (conservative; actual
/// room depends on the identifier length).
pub const MAX_INLINE_SUSP_BYTES: usize = 180;

/// `NM` entries longer than this many bytes of payload must be split with
/// the `CONTINUE` flag across successive `NM` entries (254 byte SUSP entry
/// minus the 5-byte SUSP/NM header).
pub const NM_CHUNK_LEN: usize = 250;

fn encode_entry(tag: [u8; 2], version: u8, payload: &[u8], out: &mut Vec<u8>) {
    let len = 4 + payload.len();
    out.push(tag[0]);
    out.push(tag[1]);
    out.push(len as u8);
    out.push(version);
    out.extend_from_slice(payload);
}

/// Encodes the `NM` entries for `name`, splitting at [`NM_CHUNK_LEN`] and
/// setting the continue flag on every chunk but the last.
pub fn encode_nm(name: &str) -> Vec<u8> {
    let bytes = name.as_bytes();
    let mut out = Vec::new();
    let mut chunks = bytes.chunks(NM_CHUNK_LEN).peekable();
    if chunks.peek().is_none() {
        encode_entry(tag::NM, 1, &[0], &mut out);
        return out;
    }
    while let Some(chunk) = chunks.next() {
        let flags: u8 = if chunks.peek().is_some() { 0x01 } else { 0x00 };
        let mut payload = alloc::vec![flags];
        payload.extend_from_slice(chunk);
        encode_entry(tag::NM, 1, &payload, &mut out);
    }
    out
}

/// Decodes one or more consecutive `NM` entries (already located by the
/// caller) back into the original name.
pub fn decode_nm(entries: &[(u8, Vec<u8>)]) -> String {
    let mut name = Vec::new();
    for (flags, payload) in entries {
        name.extend_from_slice(payload);
        let _ = flags;
    }
    String::from_utf8_lossy(&name).into_owned()
}

pub fn encode_sl(components: &[SlComponent]) -> Vec<u8> {
    let mut payload = alloc::vec![0u8]; // top-level flags byte, unused here
    for c in components {
        let (flags, name): (u8, &[u8]) = match c {
            SlComponent::CurrentDir => (SlComponentFlags::CURRENT.bits(), &[]),
            SlComponent::ParentDir => (SlComponentFlags::PARENT.bits(), &[]),
            SlComponent::Root => (SlComponentFlags::ROOT.bits(), &[]),
            SlComponent::NetworkRoot => (SlComponentFlags::ROOT.bits(), &[]),
            SlComponent::Name(n) => (0, n.as_bytes()),
        };
        payload.push(flags);
        payload.push(name.len() as u8);
        payload.extend_from_slice(name);
    }
    let mut out = Vec::new();
    encode_entry(tag::SL, 1, &payload, &mut out);
    out
}

pub fn decode_sl(payload: &[u8]) -> Vec<SlComponent> {
    let mut components = Vec::new();
    let mut i = 1; // skip top-level flags byte
    while i + 2 <= payload.len() {
        let flags = SlComponentFlags::from_bits_truncate(payload[i]);
        let len = payload[i + 1] as usize;
        let name_start = i + 2;
        if flags.contains(SlComponentFlags::CURRENT) {
            components.push(SlComponent::CurrentDir);
        } else if flags.contains(SlComponentFlags::PARENT) {
            components.push(SlComponent::ParentDir);
        } else if flags.contains(SlComponentFlags::ROOT) {
            components.push(SlComponent::Root);
        } else if name_start + len <= payload.len() {
            let name = String::from_utf8_lossy(&payload[name_start..name_start + len]).into_owned();
            components.push(SlComponent::Name(name));
        }
        i = name_start + len;
    }
    components
}

/// Encodes a `PX` entry: mode, nlink, uid, gid as four dual-endian u32s.
pub fn encode_px(rr: &RockRidge) -> Vec<u8> {
    let mut payload = Vec::with_capacity(32);
    for v in [rr.mode, rr.nlink, rr.uid, rr.gid] {
        let dual = iso_common::U32LsbMsb::new(v);
        payload.extend_from_slice(bytemuck::bytes_of(&dual));
    }
    let mut out = Vec::new();
    encode_entry(tag::PX, 1, &payload, &mut out);
    out
}

pub fn decode_px(payload: &[u8]) -> Option<(u32, u32, u32, u32)> {
    if payload.len() < 32 {
        return None;
    }
    let read = |off: usize| -> u32 {
        let dual: &iso_common::U32LsbMsb = bytemuck::from_bytes(&payload[off..off + 8]);
        dual.get_lossy()
    };
    Some((read(0), read(8), read(16), read(24)))
}

/// `SP` (SUSP 5.3): once on the root's "." entry, `be_pad` bytes to skip to
/// reach the first SUSP entry (always 0 for a well-formed image) plus the
/// two magic check bytes.
pub fn encode_sp() -> Vec<u8> {
    let mut out = Vec::new();
    encode_entry(tag::SP, 1, &[0xBE, 0xEF, 0], &mut out);
    out
}

pub fn is_valid_sp_payload(payload: &[u8]) -> bool {
    payload.len() >= 2 && payload[0] == 0xBE && payload[1] == 0xEF
}

/// `ER` (SUSP 5.5): identifies the extension in force, carried once on the
/// root's "." entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionRecord {
    pub ext_id: String,
    pub ext_des: String,
    pub ext_src: String,
    pub ext_ver: u8,
}

impl ExtensionRecord {
    pub fn rock_ridge() -> Self {
        Self {
            ext_id: "IEEE_P1282".into(),
            ext_des: "THE ROCK RIDGE INTERCHANGE PROTOCOL PROVIDES SUPPORT FOR POSIX FILE SYSTEM SEMANTICS".into(),
            ext_src: "PLEASE CONTACT DISC PUBLISHER FOR SPECIFICATION SOURCE.  SEE PUBLISHER IDENTIFIER IN PRIMARY VOLUME DESCRIPTOR FOR CONTACT INFORMATION.".into(),
            ext_ver: 1,
        }
    }
}

pub fn encode_er(er: &ExtensionRecord) -> Vec<u8> {
    let mut payload = alloc::vec![er.ext_id.len() as u8, er.ext_des.len() as u8, er.ext_src.len() as u8, er.ext_ver];
    payload.extend_from_slice(er.ext_id.as_bytes());
    payload.extend_from_slice(er.ext_des.as_bytes());
    payload.extend_from_slice(er.ext_src.as_bytes());
    let mut out = Vec::new();
    encode_entry(tag::ER, 1, &payload, &mut out);
    out
}

pub fn decode_er(payload: &[u8]) -> Option<ExtensionRecord> {
    if payload.len() < 4 {
        return None;
    }
    let id_len = payload[0] as usize;
    let des_len = payload[1] as usize;
    let src_len = payload[2] as usize;
    let ext_ver = payload[3];
    let mut off = 4;
    let ext_id = String::from_utf8_lossy(payload.get(off..off + id_len)?).into_owned();
    off += id_len;
    let ext_des = String::from_utf8_lossy(payload.get(off..off + des_len)?).into_owned();
    off += des_len;
    let ext_src = String::from_utf8_lossy(payload.get(off..off + src_len)?).into_owned();
    Some(ExtensionRecord { ext_id, ext_des, ext_src, ext_ver })
}

/// `CE` (SUSP 5.1): points the continuation area that holds system-use
/// entries which did not fit inline. The extent/offset/length are zero
/// placeholders until the allocator assigns the continuation area; they are
/// patched in-place once known ([`patch_ce`]).
pub fn encode_ce(continuation: &ContinuationRef) -> Vec<u8> {
    let mut payload = Vec::with_capacity(24);
    payload.extend_from_slice(bytemuck::bytes_of(&iso_common::U32LsbMsb::new(continuation.extent)));
    payload.extend_from_slice(bytemuck::bytes_of(&iso_common::U32LsbMsb::new(continuation.offset)));
    payload.extend_from_slice(bytemuck::bytes_of(&iso_common::U32LsbMsb::new(continuation.len)));
    let mut out = Vec::new();
    encode_entry(tag::CE, 1, &payload, &mut out);
    out
}

/// Rewrites the three dual-endian fields of an already-encoded `CE` entry in
/// place, now that the allocator has assigned the continuation area.
pub fn patch_ce(entry_bytes: &mut [u8], continuation: &ContinuationRef) {
    debug_assert_eq!(&entry_bytes[0..2], b"CE");
    let payload = &mut entry_bytes[4..];
    payload[0..8].copy_from_slice(bytemuck::bytes_of(&iso_common::U32LsbMsb::new(continuation.extent)));
    payload[8..16].copy_from_slice(bytemuck::bytes_of(&iso_common::U32LsbMsb::new(continuation.offset)));
    payload[16..24].copy_from_slice(bytemuck::bytes_of(&iso_common::U32LsbMsb::new(continuation.len)));
}

pub fn decode_ce(payload: &[u8]) -> Option<ContinuationRef> {
    if payload.len() < 24 {
        return None;
    }
    let read_u32 = |off: usize| -> u32 {
        let dual: &iso_common::U32LsbMsb = bytemuck::from_bytes(&payload[off..off + 8]);
        dual.get_lossy()
    };
    Some(ContinuationRef { extent: read_u32(0), offset: read_u32(8), len: read_u32(16) })
}

/// `TF` (SUSP 5.7): a subset of access/modify/attribute timestamps, each
/// using the directory record's 7-byte binary date form.
pub fn encode_tf(access: Option<iso_common::DirDateTime>, modify: Option<iso_common::DirDateTime>) -> Vec<u8> {
    let mut flags: u8 = 0;
    const MODIFY: u8 = 0x02;
    const ACCESS: u8 = 0x04;
    let mut payload = alloc::vec![0u8];
    if let Some(m) = modify {
        flags |= MODIFY;
        payload.extend_from_slice(bytemuck::bytes_of(&m));
    }
    if let Some(a) = access {
        flags |= ACCESS;
        payload.extend_from_slice(bytemuck::bytes_of(&a));
    }
    payload[0] = flags;
    let mut out = Vec::new();
    encode_entry(tag::TF, 1, &payload, &mut out);
    out
}

pub fn decode_tf(payload: &[u8]) -> (Option<iso_common::DirDateTime>, Option<iso_common::DirDateTime>) {
    if payload.is_empty() {
        return (None, None);
    }
    const MODIFY: u8 = 0x02;
    const ACCESS: u8 = 0x04;
    let flags = payload[0];
    let mut off = 1;
    let mut modify = None;
    let mut access = None;
    if flags & MODIFY != 0 && payload.len() >= off + 7 {
        modify = Some(*bytemuck::from_bytes::<iso_common::DirDateTime>(&payload[off..off + 7]));
        off += 7;
    }
    if flags & ACCESS != 0 && payload.len() >= off + 7 {
        access = Some(*bytemuck::from_bytes::<iso_common::DirDateTime>(&payload[off..off + 7]));
    }
    (access, modify)
}

/// `CL` (RRIP 4.1.5.1): the fake, shallow record left behind when a
/// directory is relocated under `/RR_MOVED`; payload is the dual-endian
/// extent of the real (relocated) directory.
pub fn encode_cl(target_extent: u32) -> Vec<u8> {
    let payload = bytemuck::bytes_of(&iso_common::U32LsbMsb::new(target_extent)).to_vec();
    let mut out = Vec::new();
    encode_entry(tag::CL, 1, &payload, &mut out);
    out
}

pub fn decode_cl(payload: &[u8]) -> Option<u32> {
    if payload.len() < 8 {
        return None;
    }
    let dual: &iso_common::U32LsbMsb = bytemuck::from_bytes(&payload[0..8]);
    Some(dual.get_lossy())
}

/// `PL` (RRIP 4.1.5.2): on the real, relocated record under `/RR_MOVED`,
/// points back at the original parent directory's extent.
pub fn encode_pl(parent_extent: u32) -> Vec<u8> {
    let payload = bytemuck::bytes_of(&iso_common::U32LsbMsb::new(parent_extent)).to_vec();
    let mut out = Vec::new();
    encode_entry(tag::PL, 1, &payload, &mut out);
    out
}

pub fn decode_pl(payload: &[u8]) -> Option<u32> {
    decode_cl(payload)
}

/// `RE` (RRIP 4.1.5.3): marks a record as the relocated twin of a `CL`
/// pointer; carries no payload.
pub fn encode_re() -> Vec<u8> {
    let mut out = Vec::new();
    encode_entry(tag::RE, 1, &[], &mut out);
    out
}

/// One System Use Sharing Protocol entry as read back off disk, before it
/// has been interpreted by [`decode_system_use_area`].
#[derive(Debug, Clone)]
pub struct RawEntry {
    pub tag: [u8; 2],
    pub version: u8,
    pub payload: Vec<u8>,
}

/// Walks a system-use area (the tail of one directory record, or a
/// continuation area) into a flat list of SUSP entries, stopping at the
/// first `ST` (terminator) or when fewer than 4 bytes remain. Does not chase
/// `CE`; callers that need the continuation fetch its bytes and call this
/// function again.
pub fn parse_entries(bytes: &[u8]) -> Vec<RawEntry> {
    let mut entries = Vec::new();
    let mut i = 0;
    while i + 4 <= bytes.len() {
        let tag = [bytes[i], bytes[i + 1]];
        let len = bytes[i + 2] as usize;
        if len < 4 || i + len > bytes.len() {
            break;
        }
        if &tag == b"ST" {
            break;
        }
        let version = bytes[i + 3];
        let payload = bytes[i + 4..i + len].to_vec();
        entries.push(RawEntry { tag, version, payload });
        i += len;
    }
    entries
}

/// The fully interpreted Rock Ridge annotation for one primary-hierarchy
/// record, decoded from its inline system-use area plus (if a `CE` entry was
/// present) the bytes of its continuation area.
#[derive(Debug, Clone, Default)]
pub struct DecodedSusp {
    pub sp_present: bool,
    pub er: Option<ExtensionRecord>,
    pub px: Option<(u32, u32, u32, u32)>,
    pub name: Option<String>,
    pub symlink: Option<Vec<SlComponent>>,
    pub access_time: Option<iso_common::DirDateTime>,
    pub modify_time: Option<iso_common::DirDateTime>,
    pub child_link_extent: Option<u32>,
    pub parent_link_extent: Option<u32>,
    pub relocated: bool,
    pub continuation: Option<ContinuationRef>,
}

/// Interprets the raw entries of an inline system-use area plus, if present,
/// its continuation area. `nm_parts`/`sl_parts` accumulate across both so a
/// name or symlink target split by `CE` still decodes whole.
pub fn decode_system_use_area(inline: &[u8], continuation: Option<&[u8]>) -> DecodedSusp {
    let mut decoded = DecodedSusp::default();
    let mut nm_parts: Vec<u8> = Vec::new();
    let mut sl_components: Vec<SlComponent> = Vec::new();

    let mut consume = |entries: Vec<RawEntry>, decoded: &mut DecodedSusp| {
        for e in entries {
            match &e.tag {
                b"SP" => decoded.sp_present = is_valid_sp_payload(&e.payload),
                b"ER" => decoded.er = decode_er(&e.payload),
                b"PX" => decoded.px = decode_px(&e.payload),
                b"NM" => {
                    if e.payload.len() > 1 {
                        nm_parts.extend_from_slice(&e.payload[1..]);
                    }
                }
                b"SL" => sl_components.extend(decode_sl(&e.payload)),
                b"TF" => {
                    let (access, modify) = decode_tf(&e.payload);
                    decoded.access_time = decoded.access_time.or(access);
                    decoded.modify_time = decoded.modify_time.or(modify);
                }
                b"CL" => decoded.child_link_extent = decode_cl(&e.payload),
                b"PL" => decoded.parent_link_extent = decode_pl(&e.payload),
                b"RE" => decoded.relocated = true,
                b"CE" => decoded.continuation = decode_ce(&e.payload),
                _ => {}
            }
        }
    };

    consume(parse_entries(inline), &mut decoded);
    if let Some(cont_bytes) = continuation {
        consume(parse_entries(cont_bytes), &mut decoded);
    }

    if !nm_parts.is_empty() {
        decoded.name = Some(String::from_utf8_lossy(&nm_parts).into_owned());
    }
    if !sl_components.is_empty() {
        decoded.symlink = Some(sl_components);
    }
    decoded
}

/// Builds the ordered list of entries for one record's Rock Ridge
/// annotation, in the fixed order the encoder always uses: `SP` first (root
/// "." only), `ER` (root "." only), `PX`, `TF`, `NM`, `SL`, `CL`, `PL`, `RE`,
/// and finally `CE` if an overflow was needed. `extent_of` resolves a
/// `child_link`/`parent_link` handle to the allocated extent of the
/// directory it names; `CL`/`PL` payloads are extents, never arena indices.
#[allow(clippy::too_many_arguments)]
pub fn encode_record_entries(rr: &RockRidge, is_root_dot: bool, extent_of: impl Fn(Handle) -> u32) -> Vec<Vec<u8>> {
    let mut entries = Vec::new();
    if is_root_dot {
        entries.push(encode_sp());
        entries.push(encode_er(&ExtensionRecord::rock_ridge()));
    }
    entries.push(encode_px(rr));
    if rr.access_time.is_some() || rr.modify_time.is_some() {
        entries.push(encode_tf(rr.access_time, rr.modify_time));
    }
    if let Some(name) = &rr.name {
        entries.extend(split_nm_entries(name));
    }
    if let Some(symlink) = &rr.symlink {
        entries.extend(split_sl_entries(symlink));
    }
    if let Some(target) = rr.child_link {
        entries.push(encode_cl(extent_of(target)));
    }
    if let Some(target) = rr.parent_link {
        entries.push(encode_pl(extent_of(target)));
    }
    if rr.relocated {
        entries.push(encode_re());
    }
    entries
}

fn split_nm_entries(name: &str) -> Vec<Vec<u8>> {
    // encode_nm concatenates every NM entry into one buffer; split it back
    // into individual entries so the packer can place each independently.
    let buf = encode_nm(name);
    split_entries(&buf)
}

fn split_sl_entries(components: &[SlComponent]) -> Vec<Vec<u8>> {
    let buf = encode_sl(components);
    split_entries(&buf)
}

fn split_entries(buf: &[u8]) -> Vec<Vec<u8>> {
    let mut out = Vec::new();
    let mut i = 0;
    while i + 3 <= buf.len() {
        let len = buf[i + 2] as usize;
        out.push(buf[i..i + len].to_vec());
        i += len;
    }
    out
}

/// Greedily packs `entries` into a record's system-use area: entries are
/// appended while they fit within `available` bytes (minus 8 bytes reserved
/// for a trailing `CE`, reserved whenever at least one entry overflows).
/// Anything left over is returned as the continuation payload, still in
/// entry-framed form, ready to be written starting at offset 0 of whatever
/// extent the allocator assigns.
pub fn pack_system_use_area(entries: Vec<Vec<u8>>, available: usize) -> (Vec<u8>, Option<Vec<u8>>) {
    let total: usize = entries.iter().map(|e| e.len()).sum();
    if total <= available {
        let mut inline = Vec::with_capacity(total);
        for e in entries {
            inline.extend_from_slice(&e);
        }
        return (inline, None);
    }

    let budget = available.saturating_sub(28); // reserve room for CE(28 bytes)
    let mut inline = Vec::new();
    let mut overflow = Vec::new();
    let mut splitting = false;
    for e in entries {
        if !splitting && inline.len() + e.len() <= budget {
            inline.extend_from_slice(&e);
        } else {
            splitting = true;
            overflow.extend_from_slice(&e);
        }
    }
    let placeholder = ContinuationRef { extent: 0, offset: 0, len: overflow.len() as u32 };
    inline.extend_from_slice(&encode_ce(&placeholder));
    (inline, Some(overflow))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nm_short_name_single_entry() {
        let entry = encode_nm("short.txt");
        // tag(2) + len(1) + version(1) + flags(1) + "short.txt"(9)
        assert_eq!(entry.len(), 4 + 1 + 9);
        assert_eq!(&entry[0..2], b"NM");
    }

    #[test]
    fn nm_long_name_splits_and_sets_continue() {
        let long_name: String = "a".repeat(NM_CHUNK_LEN + 10);
        let entries = encode_nm(&long_name);
        // Two NM entries are expected.
        let mut count = 0;
        let mut i = 0;
        while i < entries.len() {
            assert_eq!(&entries[i..i + 2], b"NM");
            let len = entries[i + 2] as usize;
            i += len;
            count += 1;
        }
        assert_eq!(count, 2);
    }

    #[test]
    fn sl_roundtrips_components() {
        let components = alloc::vec![SlComponent::ParentDir, SlComponent::Name("foo".into())];
        let entry = encode_sl(&components);
        let payload = &entry[4..];
        let decoded = decode_sl(payload);
        assert_eq!(decoded, components);
    }
}
