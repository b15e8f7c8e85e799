//! A read/write implementation of the ISO9660 (Ecma-119) optical disc
//! filesystem, with Joliet, Rock Ridge, El Torito, and isohybrid support.
//!
//! The object graph built by [`Image::open`] (or [`Image::new`]) represents
//! the volume descriptors, the primary directory hierarchy, an optional
//! parallel Joliet hierarchy, an optional El Torito boot catalog, and an
//! optional isohybrid MBR configuration. Mutating methods (`add_file`,
//! `rm_directory`, `add_eltorito`, ...) update that graph and then run the
//! extent allocator ([`reshuffle`]) so the whole image stays internally
//! consistent; [`Image::write`] serializes the result byte-exactly.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

pub mod arena;
pub mod directory;
pub mod eltorito;
pub mod error;
pub mod image;
pub mod isohybrid;
pub mod mutate;
pub mod parser;
pub mod pathtable;
pub mod reshuffle;
pub mod rockridge;
pub mod strname;
pub mod volume;
pub mod writer;

pub use arena::{Arena, Handle};
pub use directory::{FileFlags, Identifier, Node, Payload};
pub use eltorito::{BootCatalog, BootCatalogEntry, EmulationType, PlatformId};
pub use error::{IsoError, Result};
pub use image::{ByteSource, Image, ImageOptions, Tree};
pub use isohybrid::IsohybridOptions;
pub use rockridge::{RockRidge, SlComponent};
pub use strname::FileInterchange;
pub use writer::ProgressCallback;
