//! Isohybrid MBR: a 432-byte code prefix plus a partition table, layered
//! over the system area so the same image boots both as an optical disc
//! and as a raw block device.

extern crate alloc;

use alloc::vec::Vec;
use iso_common::{Chs, Endian, MbrPartition, MbrPartitionTable, MbrPartitionType};

pub const CODE_PREFIX_LEN: usize = 432;
pub const MBR_SIGNATURE_OFFSET: usize = 0x40;
pub const EXPECTED_BOOT_SIGNATURE: [u8; 4] = [0xFB, 0xC0, 0x78, 0x70];
/// A 512-byte logical ISO sector is 4 MBR (512-byte) sectors.
pub const SECTORS_PER_EXTENT: u32 = 4;

#[derive(Debug, Clone)]
pub struct IsohybridOptions {
    pub code_prefix: [u8; CODE_PREFIX_LEN],
    pub mbr_id: u32,
    pub partition_type: MbrPartitionType,
    /// Geometry used only for the CHS fields; the actual partition bounds
    /// are always expressed in LBA.
    pub sectors_per_track: u32,
    pub heads_per_cylinder: u32,
}

impl IsohybridOptions {
    pub fn validate_boot_image(boot_image: &[u8], boot_sector_count: u16) -> Result<(), &'static str> {
        if boot_sector_count != 4 {
            return Err("isohybrid requires the El Torito entry to load exactly 4 sectors");
        }
        if boot_image.len() < MBR_SIGNATURE_OFFSET + 4 {
            return Err("boot image too small to carry the isohybrid signature");
        }
        if boot_image[MBR_SIGNATURE_OFFSET..MBR_SIGNATURE_OFFSET + 4] != EXPECTED_BOOT_SIGNATURE {
            return Err("boot image is missing the isolinux isohybrid signature");
        }
        Ok(())
    }

    /// Builds the 512-byte MBR block: code prefix, disk id, signature, and
    /// partition table.
    pub fn build_mbr(&self, boot_file_load_rba: u32, image_sectors: u32) -> Vec<u8> {
        let mut out = Vec::with_capacity(512);
        out.extend_from_slice(&self.code_prefix);
        out.extend_from_slice(&self.mbr_id.to_le_bytes());
        out.extend_from_slice(&[0u8; 2]); // unused
        out.extend_from_slice(&0x1234u16.to_le_bytes());

        let mut table = MbrPartitionTable { partitions: [bytemuck::Zeroable::zeroed(); 4] };
        let start_sector = boot_file_load_rba * SECTORS_PER_EXTENT;
        let block_count = image_sectors.saturating_sub(start_sector);
        table.partitions[0] = MbrPartition {
            boot_indicator: 0x80,
            start_head: Chs::with_geometry(start_sector, self.sectors_per_track, self.heads_per_cylinder),
            part_type: self.partition_type.to_u8(),
            end_head: Chs::with_geometry(
                start_sector + block_count.saturating_sub(1),
                self.sectors_per_track,
                self.heads_per_cylinder,
            ),
            start_sector: iso_common::U32::new(start_sector),
            block_count: iso_common::U32::new(block_count),
        };
        out.extend_from_slice(bytemuck::bytes_of(&table));
        out.resize(512, 0);
        out
    }

    /// Bytes to append after the final extent so the image occupies a whole
    /// number of cylinders, as isohybrid images conventionally do.
    pub fn tail_padding_sectors(&self, image_sectors: u32) -> u32 {
        let sectors_per_cylinder = self.sectors_per_track * self.heads_per_cylinder;
        if sectors_per_cylinder == 0 {
            return 0;
        }
        let remainder = image_sectors % sectors_per_cylinder;
        if remainder == 0 { 0 } else { sectors_per_cylinder - remainder }
    }
}

pub fn probe_is_isohybrid(first_bytes: &[u8]) -> bool {
    first_bytes.len() >= 2 && first_bytes[0] == 0x33 && first_bytes[1] == 0xED
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_wrong_sector_count() {
        assert!(IsohybridOptions::validate_boot_image(&[0; 512], 1).is_err());
    }

    #[test]
    fn rejects_missing_signature() {
        assert!(IsohybridOptions::validate_boot_image(&[0; 512], 4).is_err());
    }

    #[test]
    fn accepts_valid_signature() {
        let mut image = alloc::vec![0u8; 512];
        image[MBR_SIGNATURE_OFFSET..MBR_SIGNATURE_OFFSET + 4].copy_from_slice(&EXPECTED_BOOT_SIGNATURE);
        assert!(IsohybridOptions::validate_boot_image(&image, 4).is_ok());
    }

    #[test]
    fn probe_detects_mbr_signature() {
        assert!(probe_is_isohybrid(&[0x33, 0xED, 0, 0]));
        assert!(!probe_is_isohybrid(&[0, 0, 0, 0]));
    }
}
