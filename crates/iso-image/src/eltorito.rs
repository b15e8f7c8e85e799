//! The El Torito boot catalog: a validation entry, an initial/default
//! entry, and optionally further section header/entry pairs for
//! multi-platform boot images.

extern crate alloc;

use alloc::vec::Vec;
use bytemuck::{Pod, Zeroable};
use iso_common::{Endian, LittleEndian, U16, U32};

use crate::arena::Handle;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformId {
    X80X86 = 0x00,
    PowerPC = 0x01,
    Macintosh = 0x02,
    Uefi = 0xEF,
}

impl PlatformId {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0x01 => Self::PowerPC,
            0x02 => Self::Macintosh,
            0xEF => Self::Uefi,
            _ => Self::X80X86,
        }
    }
    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmulationType {
    NoEmulation = 0x00,
    Floppy1_2M = 0x01,
    Floppy1_44M = 0x02,
    Floppy2_88M = 0x03,
    HardDisk = 0x04,
}

/// 32-byte validation entry; its checksum field makes the whole entry sum
/// to zero modulo 2^16 when read as sixteen little-endian words.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct BootValidationEntry {
    pub header_id: u8,
    pub platform_id: u8,
    pub reserved: [u8; 2],
    pub manufacturer: [u8; 24],
    pub checksum: U16<LittleEndian>,
    pub key: [u8; 2],
}

impl BootValidationEntry {
    pub fn new(platform_id: PlatformId, manufacturer: &[u8]) -> Self {
        let mut manufacturer_buf = [0u8; 24];
        let len = manufacturer.len().min(24);
        manufacturer_buf[..len].copy_from_slice(&manufacturer[..len]);
        let mut entry = Self {
            header_id: 0x01,
            platform_id: platform_id.to_u8(),
            reserved: [0; 2],
            manufacturer: manufacturer_buf,
            checksum: U16::new(0),
            key: [0x55, 0xAA],
        };
        entry.checksum = U16::new(entry.calculate_checksum());
        entry
    }

    /// The value that makes all sixteen words of this entry sum to zero,
    /// computed with the checksum field itself held at zero.
    pub fn calculate_checksum(&self) -> u16 {
        let mut copy = *self;
        copy.checksum = U16::new(0);
        let bytes = bytemuck::bytes_of(&copy);
        let mut sum: u16 = 0;
        for chunk in bytes.chunks_exact(2) {
            let word = u16::from_le_bytes([chunk[0], chunk[1]]);
            sum = sum.wrapping_add(word);
        }
        0u16.wrapping_sub(sum)
    }

    pub fn is_valid(&self) -> bool {
        let bytes = bytemuck::bytes_of(self);
        let mut sum: u16 = 0;
        for chunk in bytes.chunks_exact(2) {
            sum = sum.wrapping_add(u16::from_le_bytes([chunk[0], chunk[1]]));
        }
        sum == 0 && self.key == [0x55, 0xAA]
    }
}

/// 32-byte initial entry (and, after the first, default/section entries).
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct BootSectionEntry {
    pub boot_indicator: u8,
    pub boot_media_type: u8,
    pub load_segment: U16<LittleEndian>,
    pub system_type: u8,
    pub unused0: u8,
    pub sector_count: U16<LittleEndian>,
    pub load_rba: U32<LittleEndian>,
    pub selection_criteria: u8,
    pub vendor_unique: [u8; 19],
}

impl BootSectionEntry {
    pub fn new(emulation: EmulationType, load_segment: u16, sector_count: u16, load_rba: u32) -> Self {
        Self {
            boot_indicator: 0x88,
            boot_media_type: emulation as u8,
            load_segment: U16::new(load_segment),
            system_type: 0,
            unused0: 0,
            sector_count: U16::new(sector_count),
            load_rba: U32::new(load_rba),
            selection_criteria: 0,
            vendor_unique: [0; 19],
        }
    }

    pub fn is_bootable(&self) -> bool {
        self.boot_indicator == 0x88
    }
}

/// 32-byte section header, preceding one or more [`BootSectionEntry`]
/// values for a non-default platform.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct BootSectionHeaderEntry {
    pub header_type: u8,
    pub platform_id: u8,
    pub section_count: U16<LittleEndian>,
    pub section_identifier: [u8; 28],
}

impl BootSectionHeaderEntry {
    pub const MORE_FOLLOWS: u8 = 0x90;
    pub const FINAL: u8 = 0x91;
}

/// The boot-info-table patched into the first sector of a boot image when
/// `boot_info_table` is requested (used by GRUB/SYSLINUX/LIMINE).
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct BootInfoTable {
    pub pvd_extent: U32<LittleEndian>,
    pub file_extent: U32<LittleEndian>,
    pub file_length: U32<LittleEndian>,
    pub checksum: U32<LittleEndian>,
}

impl BootInfoTable {
    /// The byte offset within the boot file's first sector where this table
    /// is patched in (bytes 8..=63 of the file; bytes 0..8 are left for the
    /// jump instruction some bootloaders embed there).
    pub const FILE_OFFSET: usize = 8;

    pub fn checksum_of(sectors: &[u8]) -> u32 {
        let mut sum: u32 = 0;
        for chunk in sectors.chunks(4) {
            let mut buf = [0u8; 4];
            buf[..chunk.len()].copy_from_slice(chunk);
            sum = sum.wrapping_add(u32::from_le_bytes(buf));
        }
        sum
    }
}

#[derive(Debug, Clone)]
pub struct BootCatalogEntry {
    pub emulation: EmulationType,
    pub load_segment: u16,
    pub sector_count: u16,
    /// The file node this entry boots; its extent is read out post-reshuffle
    /// to fill in `load_rba`.
    pub boot_file: Handle,
    pub boot_info_table: bool,
    pub grub2_boot_info: bool,
}

/// The in-memory boot catalog object. Its own backing file (`boot_file`'s
/// sibling "boot.catalog"-style node) is tracked via `catalog_node` so the
/// allocator can move it like any other file.
#[derive(Debug, Clone)]
pub struct BootCatalog {
    pub manufacturer: alloc::vec::Vec<u8>,
    pub default: BootCatalogEntry,
    pub sections: Vec<(PlatformId, Vec<BootCatalogEntry>)>,
    pub catalog_node: Handle,
    /// The `BootRecordVolumeDescriptor`'s own position in the descriptor
    /// list, so its embedded catalog-extent pointer can be patched.
    pub boot_record_index: usize,
}

impl BootCatalog {
    /// Serializes the validation entry, default entry, and every section
    /// header/entry pair into one contiguous byte buffer (a whole number of
    /// 2048-byte extents).
    pub fn encode(&self, default_platform: PlatformId) -> Vec<u8> {
        let mut out = Vec::new();
        let validation = BootValidationEntry::new(default_platform, &self.manufacturer);
        out.extend_from_slice(bytemuck::bytes_of(&validation));

        let default_entry = BootSectionEntry::new(
            self.default.emulation,
            self.default.load_segment,
            self.default.sector_count,
            0, // patched by the allocator once boot_file's extent is known
        );
        out.extend_from_slice(bytemuck::bytes_of(&default_entry));

        let section_count = self.sections.len();
        for (i, (platform, entries)) in self.sections.iter().enumerate() {
            let is_last = i + 1 == section_count;
            let header = BootSectionHeaderEntry {
                header_type: if is_last { BootSectionHeaderEntry::FINAL } else { BootSectionHeaderEntry::MORE_FOLLOWS },
                platform_id: platform.to_u8(),
                section_count: U16::new(entries.len() as u16),
                section_identifier: [0; 28],
            };
            out.extend_from_slice(bytemuck::bytes_of(&header));
            for entry in entries {
                let section_entry = BootSectionEntry::new(entry.emulation, entry.load_segment, entry.sector_count, 0);
                out.extend_from_slice(bytemuck::bytes_of(&section_entry));
            }
        }

        let padded_len = (out.len() + 2047) & !2047;
        out.resize(padded_len, 0);
        out
    }

    /// Re-patches the `load_rba` fields once every boot file's extent is
    /// known, without re-deriving the rest of the catalog layout.
    pub fn patch_load_rbas(bytes: &mut [u8], rbas: &[(usize, u32)]) {
        for (byte_offset, rba) in rbas {
            let entry_bytes = &mut bytes[*byte_offset..*byte_offset + 32];
            let mut entry: BootSectionEntry = *bytemuck::from_bytes(entry_bytes);
            entry.load_rba = U32::new(*rba);
            entry_bytes.copy_from_slice(bytemuck::bytes_of(&entry));
        }
    }
}

/// One 32-byte record read back from an existing boot catalog, before the
/// file nodes it references have been resolved to [`Handle`]s.
#[derive(Debug, Clone)]
pub enum DecodedRecord {
    Validation(BootValidationEntry),
    Entry { header: Option<BootSectionHeaderEntry>, platform: PlatformId, entry: BootSectionEntry },
}

/// The raw shape of a parsed boot catalog: the validation entry, the
/// default entry, and every section header/entry pair, all still carrying
/// on-disk `load_rba` values rather than resolved file handles. The
/// higher-level image parser (component I) turns this into a
/// [`BootCatalog`] once it has matched each `load_rba` to a file node.
#[derive(Debug, Clone)]
pub struct DecodedCatalog {
    pub validation: BootValidationEntry,
    pub default: BootSectionEntry,
    pub sections: Vec<(BootSectionHeaderEntry, PlatformId, Vec<BootSectionEntry>)>,
}

/// Decodes an existing boot catalog from its raw bytes (the extent pointed
/// to by the Boot Record volume descriptor). Blocks are dispatched by their
/// first byte: `0x01` validation, `0x88` initial/default entry, `0x90`/`0x91`
/// section header (more-follows / final), anything else a plain section
/// entry belonging to the section most recently opened by a header.
pub fn decode_catalog(bytes: &[u8]) -> Option<DecodedCatalog> {
    let mut offset = 0usize;
    if bytes.len() < 64 {
        return None;
    }
    let validation: BootValidationEntry = *bytemuck::from_bytes(&bytes[offset..offset + 32]);
    if validation.header_id != 0x01 || !validation.is_valid() {
        return None;
    }
    offset += 32;

    let default: BootSectionEntry = *bytemuck::from_bytes(&bytes[offset..offset + 32]);
    offset += 32;

    let mut sections = Vec::new();
    while offset + 32 <= bytes.len() {
        let block = &bytes[offset..offset + 32];
        match block[0] {
            BootSectionHeaderEntry::MORE_FOLLOWS | BootSectionHeaderEntry::FINAL => {
                let header: BootSectionHeaderEntry = *bytemuck::from_bytes(block);
                let is_final = block[0] == BootSectionHeaderEntry::FINAL;
                let platform = PlatformId::from_u8(header.platform_id);
                let count = header.section_count.get() as usize;
                offset += 32;
                let mut entries = Vec::with_capacity(count);
                for _ in 0..count {
                    if offset + 32 > bytes.len() {
                        break;
                    }
                    let entry: BootSectionEntry = *bytemuck::from_bytes(&bytes[offset..offset + 32]);
                    entries.push(entry);
                    offset += 32;
                }
                sections.push((header, platform, entries));
                if is_final {
                    break;
                }
            }
            0x00 => break,
            _ => {
                // A stray entry with no preceding header; nothing further we
                // can associate it with.
                break;
            }
        }
    }

    Some(DecodedCatalog { validation, default, sections })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_entry_checksum_is_zero_sum() {
        let entry = BootValidationEntry::new(PlatformId::X80X86, b"ISO9660-RS");
        assert!(entry.is_valid());
    }

    #[test]
    fn section_entry_is_32_bytes() {
        assert_eq!(core::mem::size_of::<BootSectionEntry>(), 32);
        assert_eq!(core::mem::size_of::<BootValidationEntry>(), 32);
        assert_eq!(core::mem::size_of::<BootSectionHeaderEntry>(), 32);
    }

    #[test]
    fn encode_pads_to_extent_boundary() {
        let catalog = BootCatalog {
            manufacturer: alloc::vec![],
            default: BootCatalogEntry {
                emulation: EmulationType::NoEmulation,
                load_segment: 0,
                sector_count: 4,
                boot_file: Handle(0),
                boot_info_table: true,
                grub2_boot_info: false,
            },
            sections: Vec::new(),
            catalog_node: Handle(0),
            boot_record_index: 0,
        };
        let bytes = catalog.encode(PlatformId::X80X86);
        assert_eq!(bytes.len() % 2048, 0);
    }

    #[test]
    fn decode_recovers_validation_and_default_entry() {
        let catalog = BootCatalog {
            manufacturer: alloc::vec![],
            default: BootCatalogEntry {
                emulation: EmulationType::NoEmulation,
                load_segment: 0,
                sector_count: 4,
                boot_file: Handle(0),
                boot_info_table: false,
                grub2_boot_info: false,
            },
            sections: alloc::vec![(
                PlatformId::Uefi,
                alloc::vec![BootCatalogEntry {
                    emulation: EmulationType::NoEmulation,
                    load_segment: 0,
                    sector_count: 8,
                    boot_file: Handle(1),
                    boot_info_table: false,
                    grub2_boot_info: false,
                }]
            )],
            catalog_node: Handle(0),
            boot_record_index: 0,
        };
        let bytes = catalog.encode(PlatformId::X80X86);
        let decoded = decode_catalog(&bytes).unwrap();
        assert!(decoded.validation.is_valid());
        assert_eq!(decoded.default.sector_count.get(), 4);
        assert_eq!(decoded.sections.len(), 1);
        assert_eq!(decoded.sections[0].1, PlatformId::Uefi);
        assert_eq!(decoded.sections[0].2[0].sector_count.get(), 8);
    }
}
