//! Volume descriptors (Ecma-119 Section 8): the Primary Volume Descriptor,
//! optional Boot Records, the Joliet Supplementary Volume Descriptor, the
//! Volume Descriptor Set Terminator, and the all-zero Version descriptor.

extern crate alloc;

use alloc::string::String;
use alloc::vec::Vec;
use iso_common::{DecDateTime, IsoStrA, IsoStrD, U16LsbMsb, U32LsbMsb};

use crate::arena::Handle;
use crate::error::{IsoError, Result};

pub const STANDARD_IDENTIFIER: &[u8; 5] = b"CD001";
pub const SECTOR_SIZE: u32 = 2048;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorType {
    BootRecord = 0,
    Primary = 1,
    Supplementary = 2,
    Partition = 3,
    Terminator = 255,
}

impl DescriptorType {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => Self::BootRecord,
            1 => Self::Primary,
            2 => Self::Supplementary,
            3 => Self::Partition,
            255 => Self::Terminator,
            _ => return None,
        })
    }
}

/// Joliet's three supported escape sequences, identifying UCS-2 level 1/2/3.
pub const JOLIET_LEVEL1: &[u8; 3] = b"%/@";
pub const JOLIET_LEVEL2: &[u8; 3] = b"%/C";
pub const JOLIET_LEVEL3: &[u8; 3] = b"%/E";

/// The primary hierarchy's volume descriptor. Also used to represent the
/// Joliet supplementary volume descriptor, which shares this layout and
/// differs only in identifier charset and the `escape_sequences` field.
#[derive(Debug, Clone)]
pub struct PrimaryVolumeDescriptor {
    pub system_identifier: IsoStrA<32>,
    pub volume_identifier: IsoStrD<32>,
    pub volume_space_size: U32LsbMsb,
    pub volume_set_size: U16LsbMsb,
    pub volume_sequence_number: U16LsbMsb,
    pub logical_block_size: U16LsbMsb,
    pub path_table_size: U32LsbMsb,
    pub le_path_table_extent: u32,
    pub le_optional_path_table_extent: u32,
    pub be_path_table_extent: u32,
    pub be_optional_path_table_extent: u32,
    pub root_directory: Handle,
    pub volume_set_identifier: String,
    pub publisher_identifier: String,
    pub data_preparer_identifier: String,
    pub application_identifier: String,
    pub copyright_file_identifier: String,
    pub abstract_file_identifier: String,
    pub bibliographic_file_identifier: String,
    pub creation_date: DecDateTime,
    pub modification_date: DecDateTime,
    pub expiration_date: DecDateTime,
    pub effective_date: DecDateTime,
    pub file_structure_version: u8,
    /// Present only on the Joliet SVD; `None` for the PVD.
    pub escape_sequences: Option<[u8; 32]>,
    /// The extent this descriptor occupies, set by parse or the allocator.
    pub extent: u32,
}

/// Byte offsets of the fixed a/d-character and string fields within a
/// 2048-byte PVD/SVD, per Ecma-119 8.4/8.5.
pub(crate) mod pvd_layout {
    pub const TYPE: usize = 0;
    pub const IDENT: usize = 1;
    pub const VERSION: usize = 6;
    pub const SYSTEM_IDENTIFIER: usize = 8;
    pub const VOLUME_IDENTIFIER: usize = 40;
    pub const VOLUME_SPACE_SIZE: usize = 80;
    pub const ESCAPE_SEQUENCES: usize = 88;
    pub const VOLUME_SET_SIZE: usize = 120;
    pub const VOLUME_SEQUENCE_NUMBER: usize = 124;
    pub const LOGICAL_BLOCK_SIZE: usize = 128;
    pub const PATH_TABLE_SIZE: usize = 132;
    pub const LE_PATH_TABLE: usize = 140;
    pub const LE_OPTIONAL_PATH_TABLE: usize = 144;
    pub const BE_PATH_TABLE: usize = 148;
    pub const BE_OPTIONAL_PATH_TABLE: usize = 152;
    pub const ROOT_DIRECTORY_RECORD: usize = 156;
    pub const VOLUME_SET_IDENTIFIER: usize = 190;
    pub const PUBLISHER_IDENTIFIER: usize = 318;
    pub const DATA_PREPARER_IDENTIFIER: usize = 446;
    pub const APPLICATION_IDENTIFIER: usize = 574;
    pub const COPYRIGHT_FILE_IDENTIFIER: usize = 702;
    pub const ABSTRACT_FILE_IDENTIFIER: usize = 739;
    pub const BIBLIOGRAPHIC_FILE_IDENTIFIER: usize = 776;
    pub const CREATION_DATE: usize = 813;
    pub const MODIFICATION_DATE: usize = 830;
    pub const EXPIRATION_DATE: usize = 847;
    pub const EFFECTIVE_DATE: usize = 864;
    pub const FILE_STRUCTURE_VERSION: usize = 881;
}

fn read_str(bytes: &[u8], start: usize, len: usize) -> String {
    let s = core::str::from_utf8(&bytes[start..start + len]).unwrap_or("");
    s.trim_end().into()
}

fn write_str_padded(out: &mut [u8], start: usize, len: usize, value: &str) {
    let bytes = value.as_bytes();
    let n = bytes.len().min(len);
    out[start..start + n].copy_from_slice(&bytes[..n]);
    for b in &mut out[start + n..start + len] {
        *b = b' ';
    }
}

fn read_pod<T: bytemuck::Pod>(bytes: &[u8], start: usize) -> T {
    *bytemuck::from_bytes(&bytes[start..start + core::mem::size_of::<T>()])
}

fn write_pod<T: bytemuck::Pod>(out: &mut [u8], start: usize, value: &T) {
    out[start..start + core::mem::size_of::<T>()].copy_from_slice(bytemuck::bytes_of(value));
}

impl PrimaryVolumeDescriptor {
    pub fn is_joliet(&self) -> bool {
        self.escape_sequences.is_some()
    }

    /// Parses a 2048-byte PVD or SVD. `descriptor_type` (1 or 2) tells the
    /// caller which it got; `root_directory` is a placeholder handle the
    /// directory-tree parser fills in once the root record is read.
    pub fn parse(bytes: &[u8; 2048], extent: u32, root_directory: Handle) -> Result<(Self, bool)> {
        use pvd_layout::*;
        if &bytes[IDENT..IDENT + 5] != STANDARD_IDENTIFIER {
            return Err(IsoError::InvalidDescriptor("standard identifier is not CD001"));
        }
        if bytes[VERSION] != 1 {
            return Err(IsoError::InvalidDescriptor("volume descriptor version is not 1"));
        }
        let is_supplementary = bytes[TYPE] == DescriptorType::Supplementary as u8;

        let volume_space_size: U32LsbMsb = read_pod(bytes, VOLUME_SPACE_SIZE);
        volume_space_size.read().ok_or(IsoError::EndianMismatch("volume_space_size"))?;
        let volume_set_size: U16LsbMsb = read_pod(bytes, VOLUME_SET_SIZE);
        volume_set_size.read().ok_or(IsoError::EndianMismatch("volume_set_size"))?;
        let volume_sequence_number: U16LsbMsb = read_pod(bytes, VOLUME_SEQUENCE_NUMBER);
        volume_sequence_number.read().ok_or(IsoError::EndianMismatch("volume_sequence_number"))?;
        let logical_block_size: U16LsbMsb = read_pod(bytes, LOGICAL_BLOCK_SIZE);
        logical_block_size.read().ok_or(IsoError::EndianMismatch("logical_block_size"))?;
        let path_table_size: U32LsbMsb = read_pod(bytes, PATH_TABLE_SIZE);
        path_table_size.read().ok_or(IsoError::EndianMismatch("path_table_size"))?;

        let le_path_table_extent = u32::from_le_bytes(bytes[LE_PATH_TABLE..LE_PATH_TABLE + 4].try_into().unwrap());
        let le_optional_path_table_extent =
            u32::from_le_bytes(bytes[LE_OPTIONAL_PATH_TABLE..LE_OPTIONAL_PATH_TABLE + 4].try_into().unwrap());
        let be_path_table_extent = u32::from_be_bytes(bytes[BE_PATH_TABLE..BE_PATH_TABLE + 4].try_into().unwrap());
        let be_optional_path_table_extent =
            u32::from_be_bytes(bytes[BE_OPTIONAL_PATH_TABLE..BE_OPTIONAL_PATH_TABLE + 4].try_into().unwrap());

        let escape_sequences = if is_supplementary {
            let mut esc = [0u8; 32];
            esc.copy_from_slice(&bytes[ESCAPE_SEQUENCES..ESCAPE_SEQUENCES + 32]);
            Some(esc)
        } else {
            None
        };

        let desc = Self {
            system_identifier: IsoStrA::from_bytes_exact(bytes[SYSTEM_IDENTIFIER..SYSTEM_IDENTIFIER + 32].try_into().unwrap()),
            volume_identifier: IsoStrD::from_bytes_exact(bytes[VOLUME_IDENTIFIER..VOLUME_IDENTIFIER + 32].try_into().unwrap()),
            volume_space_size,
            volume_set_size,
            volume_sequence_number,
            logical_block_size,
            path_table_size,
            le_path_table_extent,
            le_optional_path_table_extent,
            be_path_table_extent,
            be_optional_path_table_extent,
            root_directory,
            volume_set_identifier: read_str(bytes, VOLUME_SET_IDENTIFIER, 128),
            publisher_identifier: read_str(bytes, PUBLISHER_IDENTIFIER, 128),
            data_preparer_identifier: read_str(bytes, DATA_PREPARER_IDENTIFIER, 128),
            application_identifier: read_str(bytes, APPLICATION_IDENTIFIER, 128),
            copyright_file_identifier: read_str(bytes, COPYRIGHT_FILE_IDENTIFIER, 37),
            abstract_file_identifier: read_str(bytes, ABSTRACT_FILE_IDENTIFIER, 37),
            bibliographic_file_identifier: read_str(bytes, BIBLIOGRAPHIC_FILE_IDENTIFIER, 37),
            creation_date: *bytemuck::from_bytes(&bytes[CREATION_DATE..CREATION_DATE + 17]),
            modification_date: *bytemuck::from_bytes(&bytes[MODIFICATION_DATE..MODIFICATION_DATE + 17]),
            expiration_date: *bytemuck::from_bytes(&bytes[EXPIRATION_DATE..EXPIRATION_DATE + 17]),
            effective_date: *bytemuck::from_bytes(&bytes[EFFECTIVE_DATE..EFFECTIVE_DATE + 17]),
            file_structure_version: bytes[FILE_STRUCTURE_VERSION],
            escape_sequences,
            extent,
        };
        if desc.file_structure_version != 1 {
            return Err(IsoError::InvalidDescriptor("file structure version is not 1"));
        }
        Ok((desc, is_supplementary))
    }

    /// Emits a 2048-byte PVD or SVD. The root directory record embedded at
    /// byte 156 is written separately by the caller once the root node's
    /// own record is known; this leaves that 34-byte span zeroed.
    pub fn to_bytes(&self, root_record: &[u8]) -> [u8; 2048] {
        use pvd_layout::*;
        let mut out = [0u8; 2048];
        out[TYPE] = if self.is_joliet() { DescriptorType::Supplementary as u8 } else { DescriptorType::Primary as u8 };
        out[IDENT..IDENT + 5].copy_from_slice(STANDARD_IDENTIFIER);
        out[VERSION] = 1;

        out[SYSTEM_IDENTIFIER..SYSTEM_IDENTIFIER + 32].copy_from_slice(self.system_identifier.as_bytes());
        out[VOLUME_IDENTIFIER..VOLUME_IDENTIFIER + 32].copy_from_slice(self.volume_identifier.as_bytes());

        write_pod(&mut out, VOLUME_SPACE_SIZE, &self.volume_space_size);
        if let Some(esc) = self.escape_sequences {
            out[ESCAPE_SEQUENCES..ESCAPE_SEQUENCES + 32].copy_from_slice(&esc);
        }
        write_pod(&mut out, VOLUME_SET_SIZE, &self.volume_set_size);
        write_pod(&mut out, VOLUME_SEQUENCE_NUMBER, &self.volume_sequence_number);
        write_pod(&mut out, LOGICAL_BLOCK_SIZE, &self.logical_block_size);
        write_pod(&mut out, PATH_TABLE_SIZE, &self.path_table_size);

        out[LE_PATH_TABLE..LE_PATH_TABLE + 4].copy_from_slice(&self.le_path_table_extent.to_le_bytes());
        out[LE_OPTIONAL_PATH_TABLE..LE_OPTIONAL_PATH_TABLE + 4]
            .copy_from_slice(&self.le_optional_path_table_extent.to_le_bytes());
        out[BE_PATH_TABLE..BE_PATH_TABLE + 4].copy_from_slice(&self.be_path_table_extent.to_be_bytes());
        out[BE_OPTIONAL_PATH_TABLE..BE_OPTIONAL_PATH_TABLE + 4]
            .copy_from_slice(&self.be_optional_path_table_extent.to_be_bytes());

        let n = root_record.len().min(34);
        out[ROOT_DIRECTORY_RECORD..ROOT_DIRECTORY_RECORD + n].copy_from_slice(&root_record[..n]);

        write_str_padded(&mut out, VOLUME_SET_IDENTIFIER, 128, &self.volume_set_identifier);
        write_str_padded(&mut out, PUBLISHER_IDENTIFIER, 128, &self.publisher_identifier);
        write_str_padded(&mut out, DATA_PREPARER_IDENTIFIER, 128, &self.data_preparer_identifier);
        write_str_padded(&mut out, APPLICATION_IDENTIFIER, 128, &self.application_identifier);
        write_str_padded(&mut out, COPYRIGHT_FILE_IDENTIFIER, 37, &self.copyright_file_identifier);
        write_str_padded(&mut out, ABSTRACT_FILE_IDENTIFIER, 37, &self.abstract_file_identifier);
        write_str_padded(&mut out, BIBLIOGRAPHIC_FILE_IDENTIFIER, 37, &self.bibliographic_file_identifier);

        out[CREATION_DATE..CREATION_DATE + 17].copy_from_slice(bytemuck::bytes_of(&self.creation_date));
        out[MODIFICATION_DATE..MODIFICATION_DATE + 17].copy_from_slice(bytemuck::bytes_of(&self.modification_date));
        out[EXPIRATION_DATE..EXPIRATION_DATE + 17].copy_from_slice(bytemuck::bytes_of(&self.expiration_date));
        out[EFFECTIVE_DATE..EFFECTIVE_DATE + 17].copy_from_slice(bytemuck::bytes_of(&self.effective_date));
        out[FILE_STRUCTURE_VERSION] = 1;
        out
    }
}

/// A Boot Record volume descriptor (Ecma-119 8.2); when `boot_system_identifier`
/// equals El Torito's, the first four bytes of `boot_system_use` hold the
/// little-endian boot catalog extent.
#[derive(Debug, Clone)]
pub struct BootRecordVolumeDescriptor {
    pub boot_system_identifier: [u8; 32],
    pub boot_identifier: [u8; 32],
    pub boot_system_use: Vec<u8>,
    pub extent: u32,
}

pub const EL_TORITO_IDENTIFIER: &[u8; 23] = b"EL TORITO SPECIFICATION";

impl BootRecordVolumeDescriptor {
    pub fn is_el_torito(&self) -> bool {
        self.boot_system_identifier.starts_with(EL_TORITO_IDENTIFIER)
    }

    pub fn catalog_extent(&self) -> Option<u32> {
        if self.boot_system_use.len() >= 4 {
            Some(u32::from_le_bytes([
                self.boot_system_use[0],
                self.boot_system_use[1],
                self.boot_system_use[2],
                self.boot_system_use[3],
            ]))
        } else {
            None
        }
    }

    pub fn parse(bytes: &[u8; 2048], extent: u32) -> Result<Self> {
        if bytes[0] != DescriptorType::BootRecord as u8 {
            return Err(IsoError::InvalidDescriptor("expected a boot record descriptor"));
        }
        if &bytes[1..6] != STANDARD_IDENTIFIER {
            return Err(IsoError::InvalidDescriptor("standard identifier is not CD001"));
        }
        if bytes[6] != 1 {
            return Err(IsoError::InvalidDescriptor("boot record version is not 1"));
        }
        let mut boot_system_identifier = [0u8; 32];
        boot_system_identifier.copy_from_slice(&bytes[7..39]);
        let mut boot_identifier = [0u8; 32];
        boot_identifier.copy_from_slice(&bytes[39..71]);
        Ok(Self { boot_system_identifier, boot_identifier, boot_system_use: bytes[71..2048].to_vec(), extent })
    }

    pub fn to_bytes(&self) -> [u8; 2048] {
        let mut out = [0u8; 2048];
        out[0] = DescriptorType::BootRecord as u8;
        out[1..6].copy_from_slice(STANDARD_IDENTIFIER);
        out[6] = 1;
        out[7..39].copy_from_slice(&self.boot_system_identifier);
        out[39..71].copy_from_slice(&self.boot_identifier);
        let n = self.boot_system_use.len().min(2048 - 71);
        out[71..71 + n].copy_from_slice(&self.boot_system_use[..n]);
        out
    }
}

/// Volume Descriptor Set Terminator (Ecma-119 8.3): a single marker
/// descriptor with no payload besides its type and identifier.
#[derive(Debug, Clone, Copy)]
pub struct VolumeDescriptorSetTerminator {
    pub extent: u32,
}

impl VolumeDescriptorSetTerminator {
    pub fn parse(bytes: &[u8; 2048], extent: u32) -> Result<Self> {
        if bytes[0] != DescriptorType::Terminator as u8 {
            return Err(IsoError::InvalidDescriptor("expected a volume descriptor set terminator"));
        }
        if &bytes[1..6] != STANDARD_IDENTIFIER {
            return Err(IsoError::InvalidDescriptor("standard identifier is not CD001"));
        }
        // Version and the remainder of the sector are reserved and tolerated
        // as written by whatever produced the image.
        Ok(Self { extent })
    }

    pub fn to_bytes(&self) -> [u8; 2048] {
        let mut out = [0u8; 2048];
        out[0] = DescriptorType::Terminator as u8;
        out[1..6].copy_from_slice(STANDARD_IDENTIFIER);
        out[6] = 1;
        out
    }
}

#[derive(Debug, Clone)]
pub enum VolumeDescriptor {
    Primary(PrimaryVolumeDescriptor),
    Supplementary(PrimaryVolumeDescriptor),
    Boot(BootRecordVolumeDescriptor),
    Terminator(VolumeDescriptorSetTerminator),
}

impl VolumeDescriptor {
    pub fn extent(&self) -> u32 {
        match self {
            VolumeDescriptor::Primary(d) | VolumeDescriptor::Supplementary(d) => d.extent,
            VolumeDescriptor::Boot(d) => d.extent,
            VolumeDescriptor::Terminator(d) => d.extent,
        }
    }

    /// Dispatches on the descriptor type byte and parses the matching
    /// variant. `root_directory` is a placeholder handle for PVD/SVD; the
    /// directory-tree parser backfills the real root once it reads it.
    pub fn parse(bytes: &[u8; 2048], extent: u32, root_directory: Handle) -> Result<Self> {
        let ty = DescriptorType::from_u8(bytes[0])
            .ok_or(IsoError::InvalidDescriptor("unrecognized volume descriptor type"))?;
        Ok(match ty {
            DescriptorType::BootRecord => VolumeDescriptor::Boot(BootRecordVolumeDescriptor::parse(bytes, extent)?),
            DescriptorType::Primary => {
                let (pvd, _) = PrimaryVolumeDescriptor::parse(bytes, extent, root_directory)?;
                VolumeDescriptor::Primary(pvd)
            }
            DescriptorType::Supplementary => {
                let (svd, _) = PrimaryVolumeDescriptor::parse(bytes, extent, root_directory)?;
                VolumeDescriptor::Supplementary(svd)
            }
            DescriptorType::Terminator => {
                VolumeDescriptor::Terminator(VolumeDescriptorSetTerminator::parse(bytes, extent)?)
            }
            DescriptorType::Partition => {
                return Err(IsoError::Unsupported("partition volume descriptors are not supported"));
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn el_torito_identifier_matches() {
        let mut id = [0u8; 32];
        id[..EL_TORITO_IDENTIFIER.len()].copy_from_slice(EL_TORITO_IDENTIFIER);
        let br = BootRecordVolumeDescriptor {
            boot_system_identifier: id,
            boot_identifier: [0; 32],
            boot_system_use: alloc::vec![0; 4],
            extent: 17,
        };
        assert!(br.is_el_torito());
    }
}
