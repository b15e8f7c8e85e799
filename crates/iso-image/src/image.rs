//! The top-level [`Image`] object: the in-memory graph of an ISO9660 image
//! plus the state threaded through parse, mutate, reshuffle, and write.

extern crate alloc;

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;

use iso_common::{DecDateTime, IsoStrA, IsoStrD};
use iso_io::{Read, Seek};

use crate::arena::{Arena, Handle};
use crate::directory::{Identifier, Node};
use crate::eltorito::BootCatalog;
use crate::error::{IsoError, Result};
use crate::isohybrid::IsohybridOptions;
use crate::rockridge::RockRidge;
use crate::strname::FileInterchange;
use crate::volume::{PrimaryVolumeDescriptor, VolumeDescriptor};

/// A random-access byte source an opened image keeps alive so
/// parse-through-write file payloads can be read lazily at write time.
pub trait ByteSource: Read + Seek {}
impl<T: Read + Seek> ByteSource for T {}

/// One directory hierarchy: the node arena plus its root handle.
#[derive(Debug, Clone)]
pub struct Tree {
    pub arena: Arena<Node>,
    pub root: Handle,
}

impl Tree {
    pub fn new_empty(root_identifier: Identifier) -> Self {
        let mut arena = Arena::new();
        let root = arena.insert(Node::new_directory(root_identifier, None));
        let dot = arena.insert(Node::new_directory(Identifier::Dot, Some(root)));
        let dotdot = arena.insert(Node::new_directory(Identifier::DotDot, Some(root)));
        arena[root].children.push(dot);
        arena[root].children.push(dotdot);
        Self { arena, root }
    }
}

/// Construction-time options threaded through [`Image::new`], grouped the
/// way a builder-style options type collects a long parameter list.
#[derive(Debug, Clone)]
pub struct ImageOptions {
    pub interchange_level: FileInterchange,
    pub system_identifier: String,
    pub volume_identifier: String,
    pub publisher_identifier: String,
    pub data_preparer_identifier: String,
    pub application_identifier: String,
    pub volume_set_identifier: String,
    pub copyright_file_identifier: String,
    pub abstract_file_identifier: String,
    pub bibliographic_file_identifier: String,
    pub volume_expiration_date: Option<DecDateTime>,
    pub application_use: Vec<u8>,
    pub joliet: bool,
    pub rock_ridge: bool,
}

impl Default for ImageOptions {
    fn default() -> Self {
        Self {
            interchange_level: FileInterchange::L1,
            system_identifier: String::new(),
            volume_identifier: String::from("ISOIMAGE"),
            publisher_identifier: String::new(),
            data_preparer_identifier: String::new(),
            application_identifier: String::new(),
            volume_set_identifier: String::new(),
            copyright_file_identifier: String::new(),
            abstract_file_identifier: String::new(),
            bibliographic_file_identifier: String::new(),
            volume_expiration_date: None,
            application_use: Vec::new(),
            joliet: false,
            rock_ridge: false,
        }
    }
}

/// The in-memory object graph for one ISO9660 image: volume descriptors,
/// the primary hierarchy, an optional Joliet hierarchy sharing file
/// payloads with it, an optional El Torito boot catalog, and an optional
/// isohybrid MBR configuration.
pub struct Image {
    pub(crate) options: ImageOptions,
    pub(crate) volume_descriptors: Vec<VolumeDescriptor>,
    pub(crate) primary: Tree,
    pub(crate) joliet_tree: Option<Tree>,
    pub(crate) boot_catalog: Option<BootCatalog>,
    pub(crate) isohybrid: Option<IsohybridOptions>,
    pub(crate) space_size: u32,
    /// Overflow bytes for every Rock Ridge system-use entry that didn't fit
    /// inline, packed contiguously by the allocator. `None` until the first
    /// reshuffle; `Some(empty)` once reshuffled with nothing to spill.
    pub(crate) rr_continuation_area: Vec<u8>,
    /// Kept alive so previously-parsed file payloads can still be read when
    /// `write` is called; see the resource-lifetime note in the image
    /// writer's module documentation.
    pub(crate) source: Option<Box<dyn ByteSource>>,
    pub(crate) initialized: bool,
}

impl core::fmt::Debug for Image {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Image")
            .field("initialized", &self.initialized)
            .field("joliet", &self.options.joliet)
            .field("rock_ridge", &self.options.rock_ridge)
            .field("space_size", &self.space_size)
            .finish()
    }
}

impl Image {
    /// Creates a new, empty image object per the named construction
    /// parameters of the public API.
    pub fn new(options: ImageOptions) -> Result<Self> {
        crate::strname::validate_volume_identifier(&options.volume_identifier)
            .map_err(|reason| IsoError::InvalidName { name: options.volume_identifier.clone(), reason })?;

        let mut primary = Tree::new_empty(Identifier::Primary(String::new()));
        let joliet_tree = if options.joliet {
            let mut joliet = Tree::new_empty(Identifier::Joliet(String::new()));
            primary.arena[primary.root].mirror = Some(joliet.root);
            joliet.arena[joliet.root].mirror = Some(primary.root);
            Some(joliet)
        } else {
            None
        };

        let pvd = PrimaryVolumeDescriptor {
            system_identifier: IsoStrA::from_str(&options.system_identifier).unwrap_or_else(IsoStrA::empty),
            volume_identifier: IsoStrD::from_str(&options.volume_identifier).unwrap_or_else(IsoStrD::empty),
            volume_space_size: iso_common::U32LsbMsb::new(0),
            volume_set_size: iso_common::U16LsbMsb::new(1),
            volume_sequence_number: iso_common::U16LsbMsb::new(1),
            logical_block_size: iso_common::U16LsbMsb::new(2048),
            path_table_size: iso_common::U32LsbMsb::new(0),
            le_path_table_extent: 0,
            le_optional_path_table_extent: 0,
            be_path_table_extent: 0,
            be_optional_path_table_extent: 0,
            root_directory: primary.root,
            volume_set_identifier: options.volume_set_identifier.clone(),
            publisher_identifier: options.publisher_identifier.clone(),
            data_preparer_identifier: options.data_preparer_identifier.clone(),
            application_identifier: options.application_identifier.clone(),
            copyright_file_identifier: options.copyright_file_identifier.clone(),
            abstract_file_identifier: options.abstract_file_identifier.clone(),
            bibliographic_file_identifier: options.bibliographic_file_identifier.clone(),
            creation_date: DecDateTime::unspecified(),
            modification_date: DecDateTime::unspecified(),
            expiration_date: options.volume_expiration_date.unwrap_or_else(DecDateTime::unspecified),
            effective_date: DecDateTime::unspecified(),
            file_structure_version: 1,
            escape_sequences: None,
            extent: 16,
        };

        if options.rock_ridge {
            primary.arena[primary.root].rock_ridge =
                Some(RockRidge { mode: 0o040755, nlink: 2, ..Default::default() });
        }

        let mut volume_descriptors = alloc::vec![VolumeDescriptor::Primary(pvd)];

        if let Some(joliet) = &joliet_tree {
            let mut svd = volume_descriptors[0].clone();
            if let VolumeDescriptor::Primary(pvd) = &svd {
                let mut svd_inner = pvd.clone();
                svd_inner.root_directory = joliet.root;
                svd_inner.escape_sequences = Some({
                    let mut esc = [0u8; 32];
                    esc[..3].copy_from_slice(crate::volume::JOLIET_LEVEL3);
                    esc
                });
                svd_inner.extent = 0;
                svd = VolumeDescriptor::Supplementary(svd_inner);
            }
            volume_descriptors.push(svd);
        }

        Ok(Self {
            options,
            volume_descriptors,
            primary,
            joliet_tree,
            boot_catalog: None,
            isohybrid: None,
            space_size: 0,
            rr_continuation_area: Vec::new(),
            source: None,
            initialized: true,
        })
    }

    pub fn close(&mut self) {
        log::debug!("closing image");
        self.initialized = false;
        self.source = None;
    }

    pub(crate) fn require_initialized(&self) -> Result<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(IsoError::NotInitialized)
        }
    }

    /// Splits an absolute ISO path (`"/a/b/c"`) into its non-empty
    /// components.
    pub(crate) fn split_path(path: &str) -> Vec<&str> {
        path.split('/').filter(|s| !s.is_empty()).collect()
    }

    /// Resolves an absolute path against the primary hierarchy, returning
    /// the handle of the final component.
    pub fn resolve(&self, path: &str) -> Result<Handle> {
        self.require_initialized()?;
        let mut current = self.primary.root;
        for segment in Self::split_path(path) {
            // A CL placeholder left behind by Rock Ridge deep-tree
            // relocation has no children of its own; the real subtree
            // lives under the handle its `CL` entry points at.
            current = self.follow_child_link(current);
            let mut found = None;
            for &child in &self.primary.arena[current].children {
                let node = &self.primary.arena[child];
                if node.is_sentinel() {
                    continue;
                }
                let display = node.identifier.display();
                let original = FileInterchange::original(&display);
                if original.eq_ignore_ascii_case(segment) || display.eq_ignore_ascii_case(segment) {
                    found = Some(child);
                    break;
                }
            }
            current = found.ok_or_else(|| IsoError::NotFound(path.into()))?;
        }
        Ok(self.follow_child_link(current))
    }

    /// If `handle` is a Rock Ridge `CL` placeholder, returns the real,
    /// relocated directory it points at; otherwise returns `handle`.
    pub(crate) fn follow_child_link(&self, handle: Handle) -> Handle {
        self.primary.arena[handle].rock_ridge.as_ref().and_then(|rr| rr.child_link).unwrap_or(handle)
    }

    /// Returns the children (excluding "." and "..") of the directory at
    /// `iso_path`, in stored (sorted) order.
    pub fn list_dir(&self, iso_path: &str) -> Result<Vec<Handle>> {
        let handle = self.resolve(iso_path)?;
        let node = &self.primary.arena[handle];
        if !node.is_dir {
            return Err(IsoError::NotPermitted("not a directory"));
        }
        Ok(node.children.iter().copied().filter(|&h| !self.primary.arena[h].is_sentinel()).collect())
    }

    /// Returns the directory-record node at `iso_path`.
    pub fn get_entry(&self, iso_path: &str) -> Result<&Node> {
        let handle = self.resolve(iso_path)?;
        Ok(&self.primary.arena[handle])
    }

    /// Resolves `iso_path` against the Joliet hierarchy instead of the
    /// primary one. Joliet names carry no `;N` version suffix and no
    /// Rock Ridge `CL` relocation, so this is a plain case-insensitive walk.
    pub fn resolve_joliet(&self, iso_path: &str) -> Result<Handle> {
        self.require_initialized()?;
        let tree = self.joliet_tree.as_ref().ok_or(IsoError::NotPermitted("image has no Joliet hierarchy"))?;
        let mut current = tree.root;
        for segment in Self::split_path(iso_path) {
            let mut found = None;
            for &child in &tree.arena[current].children {
                let node = &tree.arena[child];
                if node.is_sentinel() {
                    continue;
                }
                if node.identifier.display().eq_ignore_ascii_case(segment) {
                    found = Some(child);
                    break;
                }
            }
            current = found.ok_or_else(|| IsoError::NotFound(iso_path.into()))?;
        }
        Ok(current)
    }

    /// Returns the children (excluding "." and "..") of the Joliet
    /// directory at `iso_path`, in stored (sorted) order.
    pub fn list_dir_joliet(&self, iso_path: &str) -> Result<Vec<Handle>> {
        let handle = self.resolve_joliet(iso_path)?;
        let tree = self.joliet_tree.as_ref().ok_or(IsoError::NotPermitted("image has no Joliet hierarchy"))?;
        let node = &tree.arena[handle];
        if !node.is_dir {
            return Err(IsoError::NotPermitted("not a directory"));
        }
        Ok(node.children.iter().copied().filter(|&h| !tree.arena[h].is_sentinel()).collect())
    }

    /// Returns the Joliet directory-record node at `iso_path`.
    pub fn get_entry_joliet(&self, iso_path: &str) -> Result<&Node> {
        let handle = self.resolve_joliet(iso_path)?;
        Ok(&self.joliet_tree.as_ref().ok_or(IsoError::NotPermitted("image has no Joliet hierarchy"))?.arena[handle])
    }

    /// Total extents the image occupies, as last computed by [`reshuffle`](Self::reshuffle).
    /// `space_size * 2048` is the byte length [`write`](Self::write) emits,
    /// excluding any isohybrid tail padding.
    pub fn space_size(&self) -> u32 {
        self.space_size
    }

    /// The installed isohybrid MBR configuration, if any.
    pub fn isohybrid(&self) -> Option<&IsohybridOptions> {
        self.isohybrid.as_ref()
    }

    /// Dumps the primary hierarchy as an indented diagnostic tree.
    pub fn print_tree(&self) -> String {
        let mut out = String::new();
        self.print_tree_at(self.primary.root, 0, &mut out);
        out
    }

    fn print_tree_at(&self, handle: Handle, depth: usize, out: &mut String) {
        for &child in &self.primary.arena[handle].children {
            let node = &self.primary.arena[child];
            if node.is_sentinel() {
                continue;
            }
            for _ in 0..depth {
                out.push_str("  ");
            }
            out.push_str(&node.identifier.display());
            out.push('\n');
            if node.is_dir {
                self.print_tree_at(child, depth + 1, out);
            }
        }
    }

    pub(crate) fn pvd_mut(&mut self) -> &mut PrimaryVolumeDescriptor {
        match &mut self.volume_descriptors[0] {
            VolumeDescriptor::Primary(pvd) => pvd,
            _ => unreachable!("first volume descriptor is always the PVD"),
        }
    }

    pub(crate) fn pvd(&self) -> &PrimaryVolumeDescriptor {
        match &self.volume_descriptors[0] {
            VolumeDescriptor::Primary(pvd) => pvd,
            _ => unreachable!("first volume descriptor is always the PVD"),
        }
    }

    pub(crate) fn svd_mut(&mut self) -> Option<&mut PrimaryVolumeDescriptor> {
        self.volume_descriptors.iter_mut().find_map(|d| match d {
            VolumeDescriptor::Supplementary(svd) => Some(svd),
            _ => None,
        })
    }

    pub(crate) fn svd(&self) -> Option<&PrimaryVolumeDescriptor> {
        self.volume_descriptors.iter().find_map(|d| match d {
            VolumeDescriptor::Supplementary(svd) => Some(svd),
            _ => None,
        })
    }
}
