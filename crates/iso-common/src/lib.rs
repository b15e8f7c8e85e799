//! Types shared between the ISO9660 codec and the isohybrid MBR writer:
//! dual-endian number wrappers, fixed/variable ISO strings, volume and
//! directory date codecs, and MBR partition table structures.

#![no_std]

extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

pub mod datetime;
pub mod part;
pub mod strings;
pub mod types;

pub use datetime::{DecDateTime, DirDateTime};
pub use part::mbr::{Chs, MbrPartition, MbrPartitionTable, MbrPartitionType};
pub use strings::{Charset, CharsetA, CharsetD, CharsetFile, IsoStr, IsoStrA, IsoStrD, IsoStrFile, IsoString, IsoStringFile};
pub use types::endian::{BigEndian, Endian, Endianness, EndianType, LittleEndian, NativeEndian};
pub use types::number::{LsbMsb, U16, U32, U64, U16LsbMsb, U32LsbMsb, U64LsbMsb};
