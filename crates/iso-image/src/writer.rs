//! Serializes an [`Image`] to a byte sink, in the exact extent order the
//! allocator ([`crate::reshuffle`]) assigned. `write` never reorders or
//! re-derives extents itself; it runs a reshuffle up front so a caller who
//! never triggered one (an image freshly built with [`Image::new`] and no
//! mutations) still gets a consistent layout, then seeks to each extent and
//! emits its bytes.
//!
//! Resource lifetime: a [`Payload::FromSource`] file keeps pointing at the
//! image's original `source` rather than owning a copy, so `source` must
//! still be open and seekable to the same bytes when `write` runs. Opening
//! an image, never touching it, and writing it back out is therefore a
//! cheap structural copy; the payload bytes themselves stream straight from
//! the old source to the new sink.

extern crate alloc;

use alloc::vec::Vec;

use iso_io::{Seek, SeekFrom, Write};

use crate::directory::Payload;
use crate::error::{IsoError, Result};
use crate::image::Image;
use crate::isohybrid::SECTORS_PER_EXTENT;
use crate::pathtable::build_path_table;
use crate::reshuffle::{children_dirs, collect_files_bfs, extents_for_bytes, render_directory_bytes, SECTOR};
use crate::volume::{VolumeDescriptor, SECTOR_SIZE};
use iso_common::EndianType;

/// Invoked with `(bytes_written_so_far, total_bytes)` as [`Image::write`]
/// streams the image. `total_bytes` includes any isohybrid tail padding.
pub type ProgressCallback<'a> = dyn FnMut(u64, u64) + 'a;

/// Default chunk size used to stream a [`Payload::FromSource`] file from the
/// old source into the new sink.
const DEFAULT_STREAM_BLOCK: usize = 64 * 1024;

fn write_at<W: Write + Seek>(sink: &mut W, extent: u32, bytes: &[u8]) -> Result<()> {
    sink.seek(SeekFrom::Start(extent as u64 * SECTOR_SIZE as u64))?;
    sink.write_all(bytes)?;
    Ok(())
}

fn write_zeros<W: Write + Seek>(sink: &mut W, len: usize) -> Result<()> {
    const CHUNK: usize = 4096;
    let zeros = [0u8; CHUNK];
    let mut remaining = len;
    while remaining > 0 {
        let n = remaining.min(CHUNK);
        sink.write_all(&zeros[..n])?;
        remaining -= n;
    }
    Ok(())
}

/// Pads `bytes` up to a whole number of 2048-byte sectors.
fn sector_padded(mut bytes: Vec<u8>) -> Vec<u8> {
    let rem = bytes.len() % SECTOR_SIZE as usize;
    if rem != 0 {
        bytes.resize(bytes.len() + (SECTOR_SIZE as usize - rem), 0);
    }
    bytes
}

/// Builds the 34-byte directory record embedded at offset 156 of a PVD/SVD:
/// a copy of the root directory's own record, identified by the `.`
/// sentinel byte rather than its real name.
fn root_record_bytes(node: &crate::directory::Node) -> Vec<u8> {
    crate::directory::emit_record(node.extent, node.data_len, node.date, node.flags, &[0u8], &[])
}

impl Image {
    /// Serializes the whole image to `sink`, in the allocator's extent
    /// order. `blocksize` bounds how large a chunk a [`Payload::FromSource`]
    /// file is streamed in; it has no effect on the bytes written, only on
    /// peak memory use while copying from the image's original source.
    /// `progress`, if given, is called at least once per written section
    /// with a monotonically increasing `done_bytes`.
    pub fn write<W: Write + Seek>(
        &mut self,
        sink: &mut W,
        blocksize: Option<usize>,
        mut progress: Option<&mut ProgressCallback<'_>>,
    ) -> Result<()> {
        self.require_initialized()?;
        self.reshuffle()?;

        let block = blocksize.unwrap_or(DEFAULT_STREAM_BLOCK).max(1);
        let tail_sectors = self
            .isohybrid
            .as_ref()
            .map(|h| h.tail_padding_sectors(self.space_size * SECTORS_PER_EXTENT))
            .unwrap_or(0);
        let total_bytes = self.space_size as u64 * SECTOR_SIZE as u64 + tail_sectors as u64 * 512;
        let mut done: u64 = 0;
        let report = |done: u64, progress: &mut Option<&mut ProgressCallback<'_>>| {
            if let Some(cb) = progress {
                cb(done, total_bytes);
            }
        };

        // System area: 16 reserved sectors, overwritten at the front by the
        // isohybrid MBR when one is configured.
        sink.seek(SeekFrom::Start(0))?;
        write_zeros(sink, 16 * SECTOR as usize)?;
        done += 16 * SECTOR as u64;
        report(done, &mut progress);

        if let Some(isohybrid) = self.isohybrid.clone() {
            let catalog = self.boot_catalog.as_ref().ok_or(IsoError::NotPermitted("isohybrid requires El Torito"))?;
            let boot_extent = self.primary.arena[catalog.default.boot_file].extent;
            let image_sectors = self.space_size * SECTORS_PER_EXTENT;
            let mbr = isohybrid.build_mbr(boot_extent, image_sectors);
            sink.seek(SeekFrom::Start(0))?;
            sink.write_all(&mbr)?;
        }

        write_at(sink, self.pvd().extent, &self.pvd().to_bytes(&root_record_bytes(&self.primary.arena[self.primary.root])))?;
        done += SECTOR as u64;
        report(done, &mut progress);

        for vd in &self.volume_descriptors {
            if let VolumeDescriptor::Boot(b) = vd {
                write_at(sink, b.extent, &b.to_bytes())?;
                done += SECTOR as u64;
            }
        }
        report(done, &mut progress);

        if let Some(svd) = self.svd() {
            let jroot = self.joliet_tree.as_ref().expect("svd implies a joliet tree").root;
            let jroot_node = &self.joliet_tree.as_ref().unwrap().arena[jroot];
            write_at(sink, svd.extent, &svd.to_bytes(&root_record_bytes(jroot_node)))?;
            done += SECTOR as u64;
        }
        report(done, &mut progress);

        // The terminator sits right after whichever volume descriptor the
        // allocator placed last: the Joliet SVD if present, else the
        // highest-numbered Boot Record, else the PVD itself.
        let last_descriptor_extent = self
            .svd()
            .map(|d| d.extent)
            .or_else(|| {
                self.volume_descriptors
                    .iter()
                    .filter_map(|d| if let VolumeDescriptor::Boot(b) = d { Some(b.extent) } else { None })
                    .max()
            })
            .unwrap_or(self.pvd().extent);
        let terminator_extent = last_descriptor_extent + 1;
        write_at(sink, terminator_extent, &crate::volume::VolumeDescriptorSetTerminator { extent: terminator_extent }.to_bytes())?;
        write_at(sink, terminator_extent + 1, &[0u8; SECTOR_SIZE as usize])?;
        done += 2 * SECTOR as u64;
        report(done, &mut progress);

        // Path tables: little-endian copy, then big-endian, each padded to
        // the extent count the allocator reserved for it.
        let primary_records =
            build_path_table(self.primary.root, |h| children_dirs(&self.primary, h), |h| self.primary.arena[h].identifier.to_bytes());
        write_path_table(sink, self.pvd().le_path_table_extent, &primary_records, EndianType::LittleEndian)?;
        write_path_table(sink, self.pvd().be_path_table_extent, &primary_records, EndianType::BigEndian)?;
        done += 2 * extents_for_bytes(primary_records.iter().map(|r| r.size()).sum()) as u64 * SECTOR as u64;
        report(done, &mut progress);

        if let Some(joliet) = &self.joliet_tree {
            let svd = self.svd().expect("joliet tree implies an svd");
            let joliet_records = build_path_table(joliet.root, |h| children_dirs(joliet, h), |h| joliet.arena[h].identifier.to_bytes());
            write_path_table(sink, svd.le_path_table_extent, &joliet_records, EndianType::LittleEndian)?;
            write_path_table(sink, svd.be_path_table_extent, &joliet_records, EndianType::BigEndian)?;
            done += 2 * extents_for_bytes(joliet_records.iter().map(|r| r.size()).sum()) as u64 * SECTOR as u64;
            report(done, &mut progress);
        }

        // Every directory record listing, one extent range per directory;
        // order doesn't matter here since each directory already carries its
        // final extent from the reshuffle above.
        for handle in self.primary.arena.handles() {
            let node = &self.primary.arena[handle];
            if node.is_dir && !node.is_sentinel() {
                let bytes = render_directory_bytes(&self.primary, handle, self.options.rock_ridge);
                write_at(sink, node.extent, &bytes)?;
            }
        }
        if let Some(joliet) = &self.joliet_tree {
            for handle in joliet.arena.handles() {
                let node = &joliet.arena[handle];
                if node.is_dir && !node.is_sentinel() {
                    let bytes = render_directory_bytes(joliet, handle, false);
                    write_at(sink, node.extent, &bytes)?;
                }
            }
        }
        report(done, &mut progress);

        if !self.rr_continuation_area.is_empty() {
            if let Some(area_extent) = self
                .primary
                .arena
                .iter()
                .find_map(|(_, n)| n.rock_ridge.as_ref().and_then(|rr| rr.continuation).map(|c| c.extent))
            {
                write_at(sink, area_extent, &self.rr_continuation_area)?;
            }
        }
        done += extents_for_bytes(self.rr_continuation_area.len()) as u64 * SECTOR as u64;
        report(done, &mut progress);

        for handle in collect_files_bfs(&self.primary) {
            let node = &self.primary.arena[handle];
            let extent = node.extent;
            let extents = node.extents();
            let payload = node.payload.clone().ok_or(IsoError::Unsupported("file node with no payload"))?;
            match payload {
                Payload::Owned(bytes) => {
                    write_at(sink, extent, &sector_padded(bytes))?;
                }
                Payload::FromSource { extent: src_extent, len } => {
                    stream_from_source(self, sink, extent, src_extent, len, block)?;
                }
            }
            done += extents as u64 * SECTOR as u64;
            report(done, &mut progress);
        }

        if tail_sectors > 0 {
            sink.seek(SeekFrom::Start(self.space_size as u64 * SECTOR_SIZE as u64))?;
            write_zeros(sink, tail_sectors as usize * 512)?;
            done += tail_sectors as u64 * 512;
        }
        report(done, &mut progress);

        log::debug!("wrote image: total_bytes={total_bytes}");
        Ok(())
    }

    /// Extracts one file's original content (not the padded, sector-aligned
    /// form it occupies inside the image) to `sink`.
    pub fn get_and_write<W: Write>(&mut self, iso_path: &str, sink: &mut W, blocksize: Option<usize>) -> Result<()> {
        self.require_initialized()?;
        let handle = self.resolve(iso_path)?;
        let node = &self.primary.arena[handle];
        if node.is_dir {
            return Err(IsoError::NotPermitted("get_and_write target is a directory"));
        }
        let block = blocksize.unwrap_or(DEFAULT_STREAM_BLOCK).max(1);
        let payload = node.payload.clone().ok_or(IsoError::Unsupported("file node with no payload"))?;
        match payload {
            Payload::Owned(bytes) => sink.write_all(&bytes).map_err(IsoError::from),
            Payload::FromSource { extent, len } => {
                let source = self.source.as_mut().ok_or(IsoError::NotPermitted("image has no live source to read from"))?;
                copy_range(source.as_mut(), sink, extent, len, block)
            }
        }
    }
}

fn write_path_table<W: Write + Seek>(
    sink: &mut W,
    extent: u32,
    records: &[crate::pathtable::PathTableRecord],
    endian: EndianType,
) -> Result<()> {
    let mut bytes = Vec::new();
    for rec in records {
        bytes.extend_from_slice(&rec.to_bytes(endian));
    }
    write_at(sink, extent, &sector_padded(bytes))
}

/// Streams a [`Payload::FromSource`] file's bytes straight from the image's
/// original source into `sink`, then pads the tail out to a whole sector.
fn stream_from_source<W: Write + Seek>(
    image: &mut Image,
    sink: &mut W,
    dest_extent: u32,
    src_extent: u32,
    len: u32,
    block: usize,
) -> Result<()> {
    sink.seek(SeekFrom::Start(dest_extent as u64 * SECTOR_SIZE as u64))?;
    let source = image.source.as_mut().ok_or(IsoError::NotPermitted("image has no live source to read from"))?;
    copy_range(source.as_mut(), sink, src_extent, len, block)?;
    let padded = extents_for_bytes(len as usize) as u64 * SECTOR as u64 - len as u64;
    write_zeros(sink, padded as usize)
}

fn copy_range<W: Write>(source: &mut dyn crate::image::ByteSource, sink: &mut W, extent: u32, len: u32, block: usize) -> Result<()> {
    use iso_io::Read;
    source.seek(SeekFrom::Start(extent as u64 * SECTOR_SIZE as u64))?;
    let mut remaining = len as usize;
    let mut buf = alloc::vec![0u8; block.min(len.max(1) as usize).max(1)];
    while remaining > 0 {
        let n = remaining.min(buf.len());
        source.read_exact(&mut buf[..n])?;
        sink.write_all(&buf[..n])?;
        remaining -= n;
    }
    Ok(())
}
