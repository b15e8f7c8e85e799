//! Reads an existing image back into the object graph [`crate::writer`]
//! knows how to re-serialize: the volume descriptor set, an isohybrid MBR
//! probe, the El Torito boot catalog (if any), and both directory
//! hierarchies walked breadth-first from their path tables' root.
//!
//! Every directory record field this crate writes as dual-endian is read
//! back with [`iso_common::LsbMsb::read`], which rejects a little-/big-endian
//! disagreement rather than silently trusting one half; Ecma-119 intends the
//! duplication as a cross-check, not padding.

extern crate alloc;

use alloc::boxed::Box;
use alloc::collections::{BTreeMap, VecDeque};
use alloc::string::String;
use alloc::vec::Vec;

use iso_common::{Endian, MbrPartitionTable, MbrPartitionType};
use iso_io::{Read, Seek, SeekFrom};

use crate::arena::{Arena, Handle};
use crate::directory::{self, DirectoryRecordHeader, FileFlags, Identifier, Node, Payload};
use crate::eltorito::{self, BootCatalog, BootCatalogEntry, EmulationType};
use crate::error::{IsoError, Result};
use crate::image::{ByteSource, Image, ImageOptions, Tree};
use crate::isohybrid::{self, IsohybridOptions};
use crate::pathtable::{self, PathTableRecord};
use crate::rockridge::{self, DecodedSusp, RockRidge};
use crate::strname::FileInterchange;
use crate::volume::{self, PrimaryVolumeDescriptor, VolumeDescriptor, SECTOR_SIZE};

/// Safety net against a corrupt image whose descriptor set never reaches a
/// terminator; real images need at most a handful of descriptors.
const MAX_VOLUME_DESCRIPTORS: u32 = 64;

impl Image {
    /// Opens an existing image, parsing its volume descriptors and both
    /// directory hierarchies back into the same object graph [`Image::new`]
    /// builds. `source` is kept alive on the returned `Image` so files parsed
    /// as [`Payload::FromSource`] can still be streamed out by
    /// [`Image::write`]; nothing is read into memory here beyond the volume
    /// descriptors, path tables, directory records, and system-use areas.
    pub fn open<S>(source: S) -> Result<Self>
    where
        S: ByteSource + 'static,
    {
        open_image(source)
    }
}

fn open_image<S: ByteSource + 'static>(mut source: S) -> Result<Image> {
    log::debug!("opening image");

    let raw = scan_volume_descriptors(&mut source)?;

    let mut pvd: Option<PrimaryVolumeDescriptor> = None;
    let mut svd: Option<PrimaryVolumeDescriptor> = None;
    let mut boot_descriptors: Vec<volume::BootRecordVolumeDescriptor> = Vec::new();
    let mut boot_catalog_extent: Option<(usize, u32)> = None;
    let mut terminator_extent: Option<u32> = None;

    for (bytes, extent) in &raw {
        match VolumeDescriptor::parse(bytes, *extent, Handle(0))? {
            VolumeDescriptor::Primary(d) => {
                if pvd.is_some() {
                    return Err(IsoError::InvalidDescriptor("more than one primary volume descriptor"));
                }
                pvd = Some(d);
            }
            VolumeDescriptor::Supplementary(d) => {
                if svd.is_some() {
                    return Err(IsoError::Unsupported("more than one supplementary volume descriptor"));
                }
                svd = Some(d);
            }
            VolumeDescriptor::Boot(b) => {
                if b.is_el_torito() {
                    if let Some(cat_extent) = b.catalog_extent() {
                        if boot_catalog_extent.is_some() {
                            return Err(IsoError::Unsupported("more than one El Torito boot record"));
                        }
                        boot_catalog_extent = Some((boot_descriptors.len(), cat_extent));
                    }
                }
                boot_descriptors.push(b);
            }
            VolumeDescriptor::Terminator(t) => terminator_extent = Some(t.extent),
        }
    }

    let mut pvd = pvd.ok_or(IsoError::InvalidDescriptor("no primary volume descriptor present"))?;
    terminator_extent.ok_or(IsoError::InvalidDescriptor("no volume descriptor set terminator present"))?;

    source.seek(SeekFrom::Start(0))?;
    let mut mbr_probe = [0u8; 512];
    source.read_exact(&mut mbr_probe)?;
    let isohybrid = isohybrid::probe_is_isohybrid(&mbr_probe).then(|| parse_isohybrid_mbr(&mbr_probe));

    let decoded_catalog = match boot_catalog_extent {
        Some((_, cat_extent)) => {
            let bytes = read_sector(&mut source, cat_extent)?;
            let decoded = eltorito::decode_catalog(&bytes)
                .ok_or(IsoError::InvalidDescriptor("El Torito boot catalog is malformed"))?;
            Some((decoded, cat_extent))
        }
        None => None,
    };

    let primary_le = read_path_table(&mut source, pvd.le_path_table_extent, pvd.path_table_size.get_lossy())?;
    let primary_be = read_path_table(&mut source, pvd.be_path_table_extent, pvd.path_table_size.get_lossy())?;
    if !pathtable::tables_agree(&primary_le, &primary_be) {
        return Err(IsoError::InvalidDescriptor("little-endian and big-endian path tables disagree"));
    }

    let pvd_bytes = read_sector(&mut source, pvd.extent)?;
    let root_record = directory::parse_record(&pvd_bytes[volume::pvd_layout::ROOT_DIRECTORY_RECORD..])
        .ok_or(IsoError::InvalidDescriptor("primary root directory record is malformed"))?;
    let root_extent = root_record.header.extent.read().ok_or(IsoError::EndianMismatch("root directory record extent"))?;
    let root_len =
        root_record.header.data_len.read().ok_or(IsoError::EndianMismatch("root directory record data length"))?;

    let primary_walk = walk_directory_tree(&mut source, true, root_extent, root_len, true)?;

    let boot_catalog = match decoded_catalog {
        Some((decoded, cat_extent)) => {
            let (boot_idx, _) = boot_catalog_extent.expect("set alongside decoded_catalog");
            Some(resolve_boot_catalog(&decoded, cat_extent, boot_idx + 1, &primary_walk.files_by_extent)?)
        }
        None => None,
    };

    let options = ImageOptions {
        interchange_level: primary_walk.interchange_level,
        system_identifier: pvd.system_identifier.to_str(),
        volume_identifier: pvd.volume_identifier.to_str(),
        publisher_identifier: pvd.publisher_identifier.clone(),
        data_preparer_identifier: pvd.data_preparer_identifier.clone(),
        application_identifier: pvd.application_identifier.clone(),
        volume_set_identifier: pvd.volume_set_identifier.clone(),
        copyright_file_identifier: pvd.copyright_file_identifier.clone(),
        abstract_file_identifier: pvd.abstract_file_identifier.clone(),
        bibliographic_file_identifier: pvd.bibliographic_file_identifier.clone(),
        volume_expiration_date: Some(pvd.expiration_date),
        application_use: Vec::new(),
        joliet: svd.is_some(),
        rock_ridge: primary_walk.rock_ridge_present,
    };
    let space_size = pvd.volume_space_size.get_lossy();

    let mut primary_tree = Tree { arena: primary_walk.arena, root: primary_walk.root };
    pvd.root_directory = primary_tree.root;
    let mut volume_descriptors = alloc::vec![VolumeDescriptor::Primary(pvd)];
    for boot in boot_descriptors {
        volume_descriptors.push(VolumeDescriptor::Boot(boot));
    }

    let joliet_tree = match svd {
        Some(mut svd) => {
            let escape = svd
                .escape_sequences
                .ok_or(IsoError::InvalidDescriptor("supplementary volume descriptor missing escape sequences"))?;
            if escape[..3] != *volume::JOLIET_LEVEL1 && escape[..3] != *volume::JOLIET_LEVEL2 && escape[..3] != *volume::JOLIET_LEVEL3
            {
                return Err(IsoError::Unsupported("supplementary volume descriptor is not a recognized Joliet escape sequence"));
            }

            let joliet_le = read_path_table(&mut source, svd.le_path_table_extent, svd.path_table_size.get_lossy())?;
            let joliet_be = read_path_table(&mut source, svd.be_path_table_extent, svd.path_table_size.get_lossy())?;
            if !pathtable::tables_agree(&joliet_le, &joliet_be) {
                return Err(IsoError::InvalidDescriptor("little-endian and big-endian Joliet path tables disagree"));
            }

            let svd_bytes = read_sector(&mut source, svd.extent)?;
            let jroot_record = directory::parse_record(&svd_bytes[volume::pvd_layout::ROOT_DIRECTORY_RECORD..])
                .ok_or(IsoError::InvalidDescriptor("Joliet root directory record is malformed"))?;
            let jroot_extent =
                jroot_record.header.extent.read().ok_or(IsoError::EndianMismatch("Joliet root directory record extent"))?;
            let jroot_len = jroot_record
                .header
                .data_len
                .read()
                .ok_or(IsoError::EndianMismatch("Joliet root directory record data length"))?;

            let joliet_walk = walk_directory_tree(&mut source, false, jroot_extent, jroot_len, false)?;
            let mut joliet_tree = Tree { arena: joliet_walk.arena, root: joliet_walk.root };
            link_mirrors(&mut primary_tree, &mut joliet_tree);

            svd.root_directory = joliet_tree.root;
            volume_descriptors.push(VolumeDescriptor::Supplementary(svd));
            Some(joliet_tree)
        }
        None => None,
    };

    volume_descriptors.push(VolumeDescriptor::Terminator(volume::VolumeDescriptorSetTerminator {
        extent: terminator_extent.expect("checked above"),
    }));

    log::debug!(
        "opened image: space_size={} joliet={} rock_ridge={} el_torito={} isohybrid={}",
        space_size,
        joliet_tree.is_some(),
        options.rock_ridge,
        boot_catalog.is_some(),
        isohybrid.is_some()
    );

    Ok(Image {
        options,
        volume_descriptors,
        primary: primary_tree,
        joliet_tree,
        boot_catalog,
        isohybrid,
        space_size,
        rr_continuation_area: Vec::new(),
        source: Some(Box::new(source)),
        initialized: true,
    })
}

fn read_sector<S: Read + Seek>(source: &mut S, extent: u32) -> Result<[u8; 2048]> {
    source.seek(SeekFrom::Start(extent as u64 * SECTOR_SIZE as u64))?;
    let mut buf = [0u8; 2048];
    source.read_exact(&mut buf)?;
    Ok(buf)
}

fn scan_volume_descriptors<S: Read + Seek>(source: &mut S) -> Result<Vec<([u8; 2048], u32)>> {
    let mut out = Vec::new();
    let mut extent = 16u32;
    loop {
        let bytes = read_sector(source, extent)?;
        let is_terminator = bytes[0] == volume::DescriptorType::Terminator as u8;
        out.push((bytes, extent));
        extent += 1;
        if is_terminator {
            break;
        }
        if out.len() as u32 >= MAX_VOLUME_DESCRIPTORS {
            return Err(IsoError::InvalidDescriptor("volume descriptor set has no terminator"));
        }
    }
    Ok(out)
}

fn read_path_table<S: Read + Seek>(source: &mut S, extent: u32, size: u32) -> Result<Vec<PathTableRecord>> {
    source.seek(SeekFrom::Start(extent as u64 * SECTOR_SIZE as u64))?;
    let mut buf = alloc::vec![0u8; size as usize];
    source.read_exact(&mut buf)?;
    let mut records = Vec::new();
    let mut offset = 0usize;
    while offset + 8 <= buf.len() {
        let Some((record, consumed, _)) = PathTableRecord::parse(&buf[offset..], iso_common::EndianType::LittleEndian) else {
            break;
        };
        offset += consumed;
        records.push(record);
    }
    Ok(records)
}

fn parse_isohybrid_mbr(mbr: &[u8; 512]) -> IsohybridOptions {
    let mut code_prefix = [0u8; isohybrid::CODE_PREFIX_LEN];
    code_prefix.copy_from_slice(&mbr[..isohybrid::CODE_PREFIX_LEN]);
    let mbr_id = u32::from_le_bytes(mbr[432..436].try_into().unwrap());
    let table_bytes: [u8; 64] = mbr[440..504].try_into().unwrap();
    let table = MbrPartitionTable::parse(&table_bytes);
    let partition_type = MbrPartitionType::from_u8(table[0].part_type);
    IsohybridOptions {
        code_prefix,
        mbr_id,
        partition_type,
        sectors_per_track: iso_common::Chs::SECTORS_PER_TRACK,
        heads_per_cylinder: iso_common::Chs::HEADS_PER_CYLINDER,
    }
}

/// Tries to re-encode an already-on-disk (and already version-suffixed)
/// primary identifier at `level`; success means the name would fit that
/// interchange level without truncation or rejection.
fn fits_level(on_disk_name: &str, is_dir: bool, level: FileInterchange) -> bool {
    let original = FileInterchange::original(on_disk_name);
    level.encode_file_name(&original, is_dir).is_ok()
}

fn decode_identifier_bytes(bytes: &[u8], is_primary: bool) -> String {
    if is_primary {
        String::from_utf8_lossy(bytes).into_owned()
    } else {
        let units: Vec<u16> = bytes.chunks_exact(2).map(|c| u16::from_be_bytes([c[0], c[1]])).collect();
        String::from_utf16_lossy(&units)
    }
}

fn decoded_susp_has_content(d: &DecodedSusp) -> bool {
    d.sp_present
        || d.er.is_some()
        || d.px.is_some()
        || d.name.is_some()
        || d.symlink.is_some()
        || d.access_time.is_some()
        || d.modify_time.is_some()
        || d.relocated
        || d.child_link_extent.is_some()
        || d.parent_link_extent.is_some()
}

/// Follows a `CE` entry (if any) found among `inline`'s SUSP entries,
/// fetching the continuation area's bytes without losing the caller's place
/// in the directory stream it's mid-read of.
fn fetch_continuation<S: Read + Seek>(source: &mut S, inline: &[u8]) -> Result<Option<Vec<u8>>> {
    let entries = rockridge::parse_entries(inline);
    let Some(ce) = entries.iter().find(|e| e.tag == rockridge::tag::CE) else {
        return Ok(None);
    };
    let Some(cref) = rockridge::decode_ce(&ce.payload) else {
        return Ok(None);
    };
    let resume = source.seek(SeekFrom::Current(0))?;
    source.seek(SeekFrom::Start(cref.extent as u64 * SECTOR_SIZE as u64 + cref.offset as u64))?;
    let mut buf = alloc::vec![0u8; cref.len as usize];
    source.read_exact(&mut buf)?;
    source.seek(SeekFrom::Start(resume))?;
    Ok(Some(buf))
}

/// The result of walking one directory hierarchy from its root record.
struct WalkOutcome {
    arena: Arena<Node>,
    root: Handle,
    rock_ridge_present: bool,
    interchange_level: FileInterchange,
    dirs_by_extent: BTreeMap<u32, Handle>,
    files_by_extent: BTreeMap<u32, Handle>,
}

/// Walks one directory hierarchy breadth-first from its root record,
/// decoding Rock Ridge (primary only) as it goes and deferring `CL`/`PL`
/// resolution until every directory's extent is known.
fn walk_directory_tree<S: Read + Seek>(
    source: &mut S,
    is_primary: bool,
    root_extent: u32,
    root_len: u32,
    check_interchange: bool,
) -> Result<WalkOutcome> {
    let mut arena = Arena::new();
    let root_identifier = if is_primary { Identifier::Primary(String::new()) } else { Identifier::Joliet(String::new()) };
    let root = arena.insert(Node::new_directory(root_identifier, None));

    let mut dirs_by_extent = BTreeMap::new();
    let mut files_by_extent = BTreeMap::new();
    dirs_by_extent.insert(root_extent, root);

    let mut rock_ridge_present = false;
    let mut level1_ok = true;
    let mut pending_links: Vec<(Handle, Option<u32>, Option<u32>)> = Vec::new();

    let mut bfs: VecDeque<(Handle, u32, u32)> = VecDeque::new();
    bfs.push_back((root, root_extent, root_len));

    while let Some((dir_handle, extent, len)) = bfs.pop_front() {
        source.seek(SeekFrom::Start(extent as u64 * SECTOR_SIZE as u64))?;
        let mut remaining: i64 = len as i64;
        let mut pos_in_dir: u32 = 0;
        let mut first = true;

        while remaining > 0 {
            let mut len_byte = [0u8; 1];
            source.read_exact(&mut len_byte)?;
            pos_in_dir += 1;
            remaining -= 1;

            if len_byte[0] == 0 {
                let rem_in_sector = pos_in_dir % SECTOR_SIZE;
                let pad = if rem_in_sector == 0 { 0 } else { SECTOR_SIZE - rem_in_sector };
                if pad > 0 {
                    let mut skip = alloc::vec![0u8; pad as usize];
                    source.read_exact(&mut skip)?;
                    pos_in_dir += pad;
                    remaining -= pad as i64;
                }
                continue;
            }

            let total_len = len_byte[0] as usize;
            if total_len < DirectoryRecordHeader::SIZE {
                return Err(IsoError::InvalidDescriptor("directory record shorter than its fixed header"));
            }
            let mut rest = alloc::vec![0u8; total_len - 1];
            source.read_exact(&mut rest)?;
            pos_in_dir += (total_len - 1) as u32;
            remaining -= (total_len - 1) as i64;

            let mut full = Vec::with_capacity(total_len);
            full.push(len_byte[0]);
            full.extend_from_slice(&rest);
            let parsed = directory::parse_record(&full).ok_or(IsoError::InvalidDescriptor("directory record is malformed"))?;

            if parsed.identifier_bytes == [0u8] {
                if !first {
                    return Err(IsoError::InvalidDescriptor("\".\" entry is not the first record in a directory"));
                }
                if is_primary && !parsed.system_use.is_empty() {
                    let continuation = fetch_continuation(source, &parsed.system_use)?;
                    let decoded = rockridge::decode_system_use_area(&parsed.system_use, continuation.as_deref());
                    if decoded_susp_has_content(&decoded) {
                        rock_ridge_present = true;
                    }
                    let (mode, nlink, uid, gid) = decoded.px.unwrap_or((0, 0, 0, 0));
                    arena[dir_handle].rock_ridge = Some(RockRidge {
                        mode,
                        nlink,
                        uid,
                        gid,
                        access_time: decoded.access_time,
                        modify_time: decoded.modify_time,
                        continuation: decoded.continuation,
                        ..Default::default()
                    });
                }
                let dot = arena.insert(Node::new_directory(Identifier::Dot, Some(dir_handle)));
                arena[dir_handle].children.push(dot);
                first = false;
                continue;
            }
            if parsed.identifier_bytes == [1u8] {
                // The directory's own Rock Ridge annotation is already captured
                // from its "." entry above; ".." never carries anything new.
                let dotdot = arena.insert(Node::new_directory(Identifier::DotDot, Some(dir_handle)));
                arena[dir_handle].children.push(dotdot);
                first = false;
                continue;
            }
            first = false;

            let is_dir = parsed.header.is_directory();
            let flags = FileFlags::from_bits_truncate(parsed.header.flags);
            let rec_extent = parsed.header.extent.read().ok_or(IsoError::EndianMismatch("directory record extent"))?;
            let rec_len = parsed.header.data_len.read().ok_or(IsoError::EndianMismatch("directory record data length"))?;
            let name = decode_identifier_bytes(&parsed.identifier_bytes, is_primary);

            if check_interchange && level1_ok {
                level1_ok = fits_level(&name, is_dir, FileInterchange::L1);
            }

            let identifier = if is_primary { Identifier::Primary(name) } else { Identifier::Joliet(name) };

            let mut rr = None;
            let mut link_extents: Option<(Option<u32>, Option<u32>)> = None;
            if is_primary && !parsed.system_use.is_empty() {
                let continuation = fetch_continuation(source, &parsed.system_use)?;
                let decoded = rockridge::decode_system_use_area(&parsed.system_use, continuation.as_deref());
                if decoded_susp_has_content(&decoded) {
                    rock_ridge_present = true;
                }
                if decoded.child_link_extent.is_some() || decoded.parent_link_extent.is_some() {
                    link_extents = Some((decoded.child_link_extent, decoded.parent_link_extent));
                }
                let (mode, nlink, uid, gid) = decoded.px.unwrap_or((0, 0, 0, 0));
                rr = Some(RockRidge {
                    mode,
                    nlink,
                    uid,
                    gid,
                    name: decoded.name,
                    symlink: decoded.symlink,
                    access_time: decoded.access_time,
                    modify_time: decoded.modify_time,
                    relocated: decoded.relocated,
                    child_link: None,
                    parent_link: None,
                    continuation: decoded.continuation,
                });
            }

            let mut node = if is_dir {
                Node::new_directory(identifier, Some(dir_handle))
            } else {
                Node::new_file(identifier, dir_handle, Payload::FromSource { extent: rec_extent, len: rec_len })
            };
            node.flags = flags;
            node.extent = rec_extent;
            node.data_len = rec_len;
            node.date = parsed.header.date;
            node.rock_ridge = rr;

            let handle = arena.insert(node);
            arena[dir_handle].children.push(handle);
            // Can't resolve CL/PL to a Handle until every directory's extent
            // is known; stash it and patch in once the walk is done.
            if let Some((child_ext, parent_ext)) = link_extents {
                pending_links.push((handle, child_ext, parent_ext));
            }

            if is_dir {
                dirs_by_extent.insert(rec_extent, handle);
                bfs.push_back((handle, rec_extent, rec_len));
            } else {
                files_by_extent.insert(rec_extent, handle);
            }
        }
    }

    for (handle, child_ext, parent_ext) in pending_links {
        if let Some(ext) = child_ext {
            if let Some(&target) = dirs_by_extent.get(&ext) {
                if let Some(rr) = arena[handle].rock_ridge.as_mut() {
                    rr.child_link = Some(target);
                }
            }
        }
        if let Some(ext) = parent_ext {
            if let Some(&target) = dirs_by_extent.get(&ext) {
                if let Some(rr) = arena[handle].rock_ridge.as_mut() {
                    rr.parent_link = Some(target);
                }
            }
        }
    }

    let interchange_level = if !check_interchange {
        FileInterchange::NonConformant
    } else if level1_ok {
        FileInterchange::L1
    } else {
        FileInterchange::L3
    };

    Ok(WalkOutcome { arena, root, rock_ridge_present, interchange_level, dirs_by_extent, files_by_extent })
}

fn emulation_from_media_type(v: u8) -> EmulationType {
    match v {
        1 => EmulationType::Floppy1_2M,
        2 => EmulationType::Floppy1_44M,
        3 => EmulationType::Floppy2_88M,
        4 => EmulationType::HardDisk,
        _ => EmulationType::NoEmulation,
    }
}

fn resolve_boot_catalog(
    decoded: &eltorito::DecodedCatalog,
    cat_extent: u32,
    boot_record_index: usize,
    files_by_extent: &BTreeMap<u32, Handle>,
) -> Result<BootCatalog> {
    let catalog_node = files_by_extent
        .get(&cat_extent)
        .copied()
        .ok_or(IsoError::InvalidDescriptor("El Torito boot catalog extent does not match any file in the directory tree"))?;
    let default_extent = decoded.default.load_rba.get();
    let boot_file = files_by_extent.get(&default_extent).copied().ok_or(IsoError::InvalidDescriptor(
        "El Torito initial/default boot file extent does not match any file in the directory tree",
    ))?;

    let default = BootCatalogEntry {
        emulation: emulation_from_media_type(decoded.default.boot_media_type),
        load_segment: decoded.default.load_segment.get(),
        sector_count: decoded.default.sector_count.get(),
        boot_file,
        boot_info_table: false,
        grub2_boot_info: false,
    };

    let mut sections = Vec::with_capacity(decoded.sections.len());
    for (_, platform, entries) in &decoded.sections {
        let mut out_entries = Vec::with_capacity(entries.len());
        for entry in entries {
            let extent = entry.load_rba.get();
            let boot_file = files_by_extent
                .get(&extent)
                .copied()
                .ok_or(IsoError::InvalidDescriptor("El Torito section entry extent does not match any file in the directory tree"))?;
            out_entries.push(BootCatalogEntry {
                emulation: emulation_from_media_type(entry.boot_media_type),
                load_segment: entry.load_segment.get(),
                sector_count: entry.sector_count.get(),
                boot_file,
                boot_info_table: false,
                grub2_boot_info: false,
            });
        }
        sections.push((*platform, out_entries));
    }

    Ok(BootCatalog {
        manufacturer: decoded.validation.manufacturer.to_vec(),
        default,
        sections,
        catalog_node,
        boot_record_index,
    })
}

/// Links primary/Joliet root handles and every file whose extent appears in
/// both trees, so later mutation can propagate one hierarchy's extents to
/// the other without re-deriving the correspondence from sort order.
fn link_mirrors(primary: &mut Tree, joliet: &mut Tree) {
    primary.arena[primary.root].mirror = Some(joliet.root);
    joliet.arena[joliet.root].mirror = Some(primary.root);

    let mut joliet_files_by_extent: BTreeMap<u32, Handle> = BTreeMap::new();
    for (handle, node) in joliet.arena.iter() {
        if !node.is_dir {
            joliet_files_by_extent.insert(node.extent, handle);
        }
    }
    let primary_files: Vec<(Handle, u32)> =
        primary.arena.iter().filter(|(_, n)| !n.is_dir).map(|(h, n)| (h, n.extent)).collect();
    for (phandle, extent) in primary_files {
        if let Some(&jhandle) = joliet_files_by_extent.get(&extent) {
            primary.arena[phandle].mirror = Some(jhandle);
            joliet.arena[jhandle].mirror = Some(phandle);
        }
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;
    use crate::directory::emit_record;
    use iso_common::{DecDateTime, DirDateTime, EndianType, IsoStrA, IsoStrD, U16LsbMsb, U32LsbMsb};
    use std::io::Cursor;

    fn build_minimal_image_bytes() -> Vec<u8> {
        let pvd = PrimaryVolumeDescriptor {
            system_identifier: IsoStrA::empty(),
            volume_identifier: IsoStrD::from_str("TESTVOL").unwrap(),
            volume_space_size: U32LsbMsb::new(21),
            volume_set_size: U16LsbMsb::new(1),
            volume_sequence_number: U16LsbMsb::new(1),
            logical_block_size: U16LsbMsb::new(2048),
            path_table_size: U32LsbMsb::new(10),
            le_path_table_extent: 18,
            le_optional_path_table_extent: 0,
            be_path_table_extent: 19,
            be_optional_path_table_extent: 0,
            root_directory: Handle(0),
            volume_set_identifier: String::new(),
            publisher_identifier: String::new(),
            data_preparer_identifier: String::new(),
            application_identifier: String::new(),
            copyright_file_identifier: String::new(),
            abstract_file_identifier: String::new(),
            bibliographic_file_identifier: String::new(),
            creation_date: DecDateTime::unspecified(),
            modification_date: DecDateTime::unspecified(),
            expiration_date: DecDateTime::unspecified(),
            effective_date: DecDateTime::unspecified(),
            file_structure_version: 1,
            escape_sequences: None,
            extent: 16,
        };

        let root_record = emit_record(20, 2048, DirDateTime::zero(), FileFlags::DIRECTORY, &[0u8], &[]);
        let pvd_bytes = pvd.to_bytes(&root_record);

        let vdst = volume::VolumeDescriptorSetTerminator { extent: 17 };
        let vdst_bytes = vdst.to_bytes();

        let root_pt = PathTableRecord { extent: 20, parent_index: 1, identifier: Vec::new(), node: Handle(0) };
        let mut le_pt = root_pt.to_bytes(EndianType::LittleEndian);
        le_pt.resize(2048, 0);
        let mut be_pt = root_pt.to_bytes(EndianType::BigEndian);
        be_pt.resize(2048, 0);

        let dot = emit_record(20, 2048, DirDateTime::zero(), FileFlags::DIRECTORY, &[0u8], &[]);
        let dotdot = emit_record(20, 2048, DirDateTime::zero(), FileFlags::DIRECTORY, &[1u8], &[]);
        let mut root_dir = Vec::new();
        root_dir.extend_from_slice(&dot);
        root_dir.extend_from_slice(&dotdot);
        root_dir.resize(2048, 0);

        let mut out = alloc::vec![0u8; 16 * 2048];
        out.extend_from_slice(&pvd_bytes);
        out.extend_from_slice(&vdst_bytes);
        out.extend_from_slice(&le_pt);
        out.extend_from_slice(&be_pt);
        out.extend_from_slice(&root_dir);
        out
    }

    #[test]
    fn opens_a_minimal_empty_image() {
        let bytes = build_minimal_image_bytes();
        let image = Image::open(Cursor::new(bytes)).unwrap();
        assert_eq!(image.list_dir("/").unwrap().len(), 0);
        assert!(!image.options.joliet);
        assert!(!image.options.rock_ridge);
        assert_eq!(image.space_size, 21);
    }

    #[test]
    fn rejects_an_image_with_no_terminator() {
        let mut bytes = build_minimal_image_bytes();
        // Overwrite the terminator descriptor's type byte so the scan never
        // finds one and keeps reading past the end of the buffer.
        bytes[17 * 2048] = volume::DescriptorType::BootRecord as u8;
        let result = Image::open(Cursor::new(bytes));
        assert!(result.is_err());
    }

    #[test]
    fn fits_level1_accepts_short_names_rejects_long_ones() {
        assert!(fits_level("FOO.TXT;1", false, FileInterchange::L1));
        assert!(!fits_level("AVERYLONGFILENAME.TXT;1", false, FileInterchange::L1));
        assert!(fits_level("DIR1", true, FileInterchange::L1));
    }

    #[test]
    fn decodes_joliet_identifier_bytes() {
        let bytes = alloc::vec![0x00, 0x41, 0x00, 0x42];
        assert_eq!(decode_identifier_bytes(&bytes, false), "AB");
    }
}
