//! The extent allocator. After every mutation the whole image is reshuffled:
//! every extent number is recomputed from scratch in one fixed order (PVD,
//! boot records, SVD, terminator, version descriptor, path tables, the
//! primary directory tree, the Joliet directory tree, Rock Ridge
//! continuation areas, the El Torito boot image and catalog, and finally
//! every remaining file payload), so the image never spends time in a
//! partially-renumbered state between mutations.
//!
//! Directory record *sizes* never depend on the numeric value of an extent
//! or length field, only on whether the field is present, so this pass can
//! size a directory's contents before the node's own extent is known. That
//! lets the allocator work in a single top-down breadth-first sweep per
//! tree instead of the bottom-up-then-patch two-pass technique a streaming
//! writer needs; [`crate::writer`] regenerates the identical bytes afterward
//! once every extent in the graph is final.

extern crate alloc;

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use iso_common::{DirDateTime, Endian, U32, U32LsbMsb};

use crate::arena::Handle;
use crate::directory::{emit_record, FileFlags, Identifier, Payload};
use crate::eltorito::{BootCatalog, BootInfoTable, PlatformId};
use crate::error::Result;
use crate::image::{Image, Tree};
use crate::pathtable::build_path_table;
use crate::rockridge::{self, ContinuationRef, RockRidge};
use crate::volume::{VolumeDescriptor, SECTOR_SIZE};

pub(crate) const SECTOR: u32 = SECTOR_SIZE;

pub(crate) fn extents_for_bytes(len: usize) -> u32 {
    (len as u32).div_ceil(SECTOR)
}

/// One record about to be packed into a directory's on-disk listing.
pub(crate) struct RecordInput {
    pub(crate) handle: Handle,
    identifier: Vec<u8>,
    flags: FileFlags,
    date: DirDateTime,
    rr: Option<RockRidge>,
    is_root_dot: bool,
}

pub(crate) fn records_for(tree: &Tree, dir: Handle, is_primary_root: bool, rock_ridge_enabled: bool) -> Vec<RecordInput> {
    let node = &tree.arena[dir];
    let mut out = Vec::with_capacity(node.children.len());
    for &child in &node.children {
        let cnode = &tree.arena[child];
        if cnode.is_dot() {
            let rr = if rock_ridge_enabled {
                node.rock_ridge.clone().map(|mut rr| {
                    rr.name = None;
                    rr.child_link = None;
                    rr.parent_link = None;
                    rr.relocated = false;
                    rr
                })
            } else {
                None
            };
            out.push(RecordInput {
                handle: dir,
                identifier: Identifier::Dot.to_bytes(),
                flags: FileFlags::DIRECTORY,
                date: node.date,
                rr,
                is_root_dot: is_primary_root,
            });
        } else if cnode.is_dotdot() {
            let parent = node.parent.unwrap_or(dir);
            let pnode = &tree.arena[parent];
            let rr = if rock_ridge_enabled {
                pnode.rock_ridge.clone().map(|mut rr| {
                    rr.name = None;
                    rr.child_link = None;
                    rr
                })
            } else {
                None
            };
            out.push(RecordInput {
                handle: parent,
                identifier: Identifier::DotDot.to_bytes(),
                flags: FileFlags::DIRECTORY,
                date: pnode.date,
                rr,
                is_root_dot: false,
            });
        } else {
            let rr = if rock_ridge_enabled { cnode.rock_ridge.clone() } else { None };
            out.push(RecordInput {
                handle: child,
                identifier: cnode.identifier.to_bytes(),
                flags: cnode.flags,
                date: cnode.date,
                rr,
                is_root_dot: false,
            });
        }
    }
    out
}

/// Packs one directory's records into sector-padded bytes (no record is
/// allowed to span a 2048-byte boundary). `continuation_of` supplies the
/// real continuation-area reference for a record that needs one; passing a
/// function that always returns `None` (the sizing pass) leaves such
/// records' overflow bytes unplaced and returns them in the second element
/// instead, for the caller to place and patch in afterward.
pub(crate) fn pack_directory(
    records: &[RecordInput],
    extent_of: impl Fn(Handle) -> u32,
    data_len_of: impl Fn(Handle) -> u32,
    continuation_of: impl Fn(Handle) -> Option<ContinuationRef>,
) -> (Vec<u8>, Vec<(Handle, Vec<u8>)>) {
    let mut out = Vec::new();
    let mut overflow_pieces = Vec::new();

    for rec in records {
        let mut system_use = Vec::new();
        if let Some(rr) = &rec.rr {
            let entries = rockridge::encode_record_entries(rr, rec.is_root_dot, &extent_of);
            let (mut inline, overflow) = rockridge::pack_system_use_area(entries, rockridge::MAX_INLINE_SUSP_BYTES);
            if let Some(overflow_bytes) = overflow {
                if let Some(real_ref) = continuation_of(rec.handle) {
                    let tail_start = inline.len() - 28;
                    inline.truncate(tail_start);
                    inline.extend_from_slice(&rockridge::encode_ce(&real_ref));
                } else {
                    overflow_pieces.push((rec.handle, overflow_bytes));
                }
            }
            system_use = inline;
        }

        let record_bytes =
            emit_record(extent_of(rec.handle), data_len_of(rec.handle), rec.date, rec.flags, &rec.identifier, &system_use);

        let used = out.len() % SECTOR as usize;
        if used != 0 && used + record_bytes.len() > SECTOR as usize {
            out.extend(core::iter::repeat(0u8).take(SECTOR as usize - used));
        }
        out.extend_from_slice(&record_bytes);
    }

    let rem = out.len() % SECTOR as usize;
    if rem != 0 {
        out.extend(core::iter::repeat(0u8).take(SECTOR as usize - rem));
    }
    (out, overflow_pieces)
}

pub(crate) fn children_dirs(tree: &Tree, h: Handle) -> Vec<Handle> {
    tree.arena[h].children.iter().copied().filter(|&c| tree.arena[c].is_dir && !tree.arena[c].is_sentinel()).collect()
}

fn assign_directory_tree(tree: &mut Tree, rock_ridge_enabled: bool, counter: &mut u32, pending: &mut Vec<(Handle, Vec<u8>)>) {
    let mut bfs = VecDeque::new();
    bfs.push_back(tree.root);
    while let Some(dir) = bfs.pop_front() {
        let records = records_for(tree, dir, dir == tree.root, rock_ridge_enabled);
        let (bytes, overflow) = pack_directory(&records, |_| 0, |_| 0, |_| None);
        let extents = extents_for_bytes(bytes.len());
        tree.arena[dir].extent = *counter;
        tree.arena[dir].data_len = bytes.len() as u32;
        *counter += extents;
        pending.extend(overflow);

        let children = children_dirs(tree, dir);
        for c in children {
            bfs.push_back(c);
        }
    }
}

pub(crate) fn collect_files_bfs(tree: &Tree) -> Vec<Handle> {
    let mut out = Vec::new();
    let mut bfs = VecDeque::new();
    bfs.push_back(tree.root);
    while let Some(dir) = bfs.pop_front() {
        for &child in &tree.arena[dir].children {
            let cnode = &tree.arena[child];
            if cnode.is_sentinel() {
                continue;
            }
            if cnode.is_dir {
                bfs.push_back(child);
            } else {
                out.push(child);
            }
        }
    }
    out
}

/// Renders one directory's final on-disk bytes, using the extents and Rock
/// Ridge continuation references already assigned by a prior reshuffle.
/// Used by [`crate::writer`], which needs the same bytes the allocator sized
/// but never kept around.
pub(crate) fn render_directory_bytes(tree: &Tree, dir: Handle, rock_ridge_enabled: bool) -> Vec<u8> {
    let records = records_for(tree, dir, dir == tree.root, rock_ridge_enabled);
    let (bytes, _overflow) = pack_directory(
        &records,
        |h| tree.arena[h].extent,
        |h| tree.arena[h].data_len,
        |h| tree.arena[h].rock_ridge.as_ref().and_then(|rr| rr.continuation),
    );
    bytes
}

impl Image {
    /// Re-derives every extent and length in the image from scratch. Called
    /// by every mutating method once its structural change is applied.
    pub(crate) fn reshuffle(&mut self) -> Result<()> {
        reshuffle(self)
    }
}

fn reshuffle(image: &mut Image) -> Result<()> {
    let mut counter: u32 = 16;

    image.pvd_mut().extent = counter;
    counter += 1;

    for vd in image.volume_descriptors.iter_mut() {
        if let VolumeDescriptor::Boot(b) = vd {
            b.extent = counter;
            counter += 1;
        }
    }

    if let Some(svd) = image.svd_mut() {
        svd.extent = counter;
        counter += 1;
    }

    // Volume Descriptor Set Terminator and the all-zero Version descriptor
    // carry no mutable state; they are never stored as graph nodes, only
    // accounted for here so later extents land in the right place.
    counter += 2;

    let (primary_pt_size, primary_pt_extents) = {
        let tree = &image.primary;
        let records = build_path_table(tree.root, |h| children_dirs(tree, h), |h| tree.arena[h].identifier.to_bytes());
        let size: u32 = records.iter().map(|r| r.size() as u32).sum();
        (size, extents_for_bytes(size as usize))
    };
    {
        let pvd = image.pvd_mut();
        pvd.path_table_size = U32LsbMsb::new(primary_pt_size);
        pvd.le_path_table_extent = counter;
        pvd.le_optional_path_table_extent = 0;
    }
    counter += primary_pt_extents;
    image.pvd_mut().be_path_table_extent = counter;
    counter += primary_pt_extents;
    image.pvd_mut().be_optional_path_table_extent = 0;

    if image.joliet_tree.is_some() {
        let (joliet_pt_size, joliet_pt_extents) = {
            let tree = image.joliet_tree.as_ref().unwrap();
            let records = build_path_table(tree.root, |h| children_dirs(tree, h), |h| tree.arena[h].identifier.to_bytes());
            let size: u32 = records.iter().map(|r| r.size() as u32).sum();
            (size, extents_for_bytes(size as usize))
        };
        if let Some(svd) = image.svd_mut() {
            svd.path_table_size = U32LsbMsb::new(joliet_pt_size);
            svd.le_path_table_extent = counter;
        }
        counter += joliet_pt_extents;
        if let Some(svd) = image.svd_mut() {
            svd.be_path_table_extent = counter;
        }
        counter += joliet_pt_extents;
        if let Some(svd) = image.svd_mut() {
            svd.le_optional_path_table_extent = 0;
            svd.be_optional_path_table_extent = 0;
        }
    }

    let mut pending_continuations: Vec<(Handle, Vec<u8>)> = Vec::new();
    assign_directory_tree(&mut image.primary, image.options.rock_ridge, &mut counter, &mut pending_continuations);

    if let Some(joliet) = image.joliet_tree.as_mut() {
        let mut unused = Vec::new();
        assign_directory_tree(joliet, false, &mut counter, &mut unused);
    }

    if pending_continuations.is_empty() {
        image.rr_continuation_area = Vec::new();
    } else {
        let mut buf = Vec::new();
        let mut placements = Vec::with_capacity(pending_continuations.len());
        for (handle, bytes) in &pending_continuations {
            placements.push((*handle, buf.len() as u32, bytes.len() as u32));
            buf.extend_from_slice(bytes);
        }
        let extents = extents_for_bytes(buf.len());
        let area_extent = counter;
        counter += extents;
        buf.resize(extents as usize * SECTOR as usize, 0);
        for (handle, offset, len) in placements {
            if let Some(rr) = image.primary.arena[handle].rock_ridge.as_mut() {
                rr.continuation = Some(ContinuationRef { extent: area_extent, offset, len });
            }
        }
        image.rr_continuation_area = buf;
    }

    let mut file_handles = collect_files_bfs(&image.primary);
    if let Some(catalog) = image.boot_catalog.as_ref() {
        let boot_file = catalog.default.boot_file;
        let catalog_node = catalog.catalog_node;
        file_handles.retain(|&h| h != boot_file && h != catalog_node);
        file_handles.insert(0, catalog_node);
        file_handles.insert(0, boot_file);
    }

    for &handle in &file_handles {
        let node = &mut image.primary.arena[handle];
        let extents = node.extents();
        node.extent = counter;
        counter += extents;
    }

    if image.joliet_tree.is_some() {
        let mirrors: Vec<(Handle, u32, u32)> = image
            .primary
            .arena
            .iter()
            .filter(|(_, n)| !n.is_dir)
            .filter_map(|(_, n)| n.mirror.map(|m| (m, n.extent, n.data_len)))
            .collect();
        let joliet = image.joliet_tree.as_mut().unwrap();
        for (jhandle, extent, data_len) in mirrors {
            joliet.arena[jhandle].extent = extent;
            joliet.arena[jhandle].data_len = data_len;
        }
    }

    if let Some(catalog) = image.boot_catalog.clone() {
        let boot_file_extent = image.primary.arena[catalog.default.boot_file].extent;
        let catalog_extent = image.primary.arena[catalog.catalog_node].extent;

        const DEFAULT_ENTRY_OFFSET: usize = 32; // right after the validation entry
        let mut catalog_bytes = catalog.encode(PlatformId::X80X86);
        BootCatalog::patch_load_rbas(&mut catalog_bytes, &[(DEFAULT_ENTRY_OFFSET, boot_file_extent)]);
        image.primary.arena[catalog.catalog_node].payload = Some(Payload::Owned(catalog_bytes));
        image.primary.arena[catalog.catalog_node].data_len = image.primary.arena[catalog.catalog_node]
            .payload
            .as_ref()
            .map(Payload::len)
            .unwrap_or(0);

        if catalog.default.boot_info_table {
            let pvd_extent = image.pvd().extent;
            if let Some(Payload::Owned(boot_bytes)) = image.primary.arena[catalog.default.boot_file].payload.as_mut() {
                let table_size = core::mem::size_of::<BootInfoTable>();
                if boot_bytes.len() >= BootInfoTable::FILE_OFFSET + table_size {
                    let off = BootInfoTable::FILE_OFFSET;
                    boot_bytes[off..off + table_size].fill(0);
                    let checksum = BootInfoTable::checksum_of(boot_bytes);
                    let table = BootInfoTable {
                        pvd_extent: U32::new(pvd_extent),
                        file_extent: U32::new(boot_file_extent),
                        file_length: U32::new(boot_bytes.len() as u32),
                        checksum: U32::new(checksum),
                    };
                    boot_bytes[off..off + table_size].copy_from_slice(bytemuck::bytes_of(&table));
                }
            }
        }

        if let Some(VolumeDescriptor::Boot(b)) = image.volume_descriptors.get_mut(catalog.boot_record_index) {
            let mut use_bytes = alloc::vec![0u8; 4];
            use_bytes.copy_from_slice(&catalog_extent.to_le_bytes());
            b.boot_system_use = use_bytes;
        }
    }

    image.space_size = counter;
    image.pvd_mut().volume_space_size = U32LsbMsb::new(counter);
    if let Some(svd) = image.svd_mut() {
        svd.volume_space_size = U32LsbMsb::new(counter);
    }

    log::debug!("reshuffled image: total_extents={counter}");
    Ok(())
}
