//! The mutation API: add/remove files, directories, symlinks, El Torito
//! boot records, and isohybrid configuration. Every mutation validates its
//! inputs, applies the change to the primary (and, where applicable,
//! Joliet) tree, and triggers a reshuffle before returning.

extern crate alloc;

use alloc::string::{String, ToString};
use alloc::vec::Vec;

use crate::arena::Handle;
use crate::directory::{Identifier, Node, Payload};
use crate::eltorito::{BootCatalog, BootCatalogEntry, EmulationType, PlatformId};
use crate::error::{IsoError, Result};
use crate::image::Image;
use crate::isohybrid::IsohybridOptions;
use crate::rockridge::RockRidge;

/// Maximum directory depth without Rock Ridge relocation (root is level 1).
const MAX_DEPTH_NO_RR: u32 = 7;
/// Depth, in levels, at which Rock Ridge relocates a subtree under
/// `/RR_MOVED`.
const RR_RELOCATION_DEPTH: u32 = 8;

fn depth_of(image: &Image, handle: Handle) -> u32 {
    let mut depth = 1;
    let mut current = handle;
    while let Some(parent) = image.primary.arena[current].parent {
        if parent == current {
            break;
        }
        depth += 1;
        current = parent;
    }
    depth
}

/// If `handle` is a `CL` placeholder left behind by a Rock Ridge deep-tree
/// relocation, returns the real (relocated, under `/RR_MOVED`) directory it
/// points at; otherwise returns `handle` unchanged. Every insertion under a
/// resolved parent must go through this, since resolving a path by name
/// only ever finds the placeholder that still sits at the nominal location.
fn real_child_of(image: &Image, handle: Handle) -> Handle {
    image.follow_child_link(handle)
}

fn split_parent_and_name(iso_path: &str) -> Result<(String, String)> {
    let trimmed = iso_path.trim_start_matches('/');
    match trimmed.rsplit_once('/') {
        Some((parent, name)) => Ok((alloc::format!("/{}", parent), name.to_string())),
        None => Ok((String::from("/"), trimmed.to_string())),
    }
}

impl Image {
    /// Adds a file at `iso_path` with contents `data`. `rr_name`/`joliet_name`
    /// are required exactly when Rock Ridge/Joliet are active.
    pub fn add_file(
        &mut self,
        iso_path: &str,
        data: Payload,
        rr_name: Option<&str>,
        joliet_name: Option<&str>,
    ) -> Result<()> {
        self.require_initialized()?;
        log::trace!("add_file path={iso_path}");
        if self.options.rock_ridge != rr_name.is_some() {
            return Err(IsoError::NotPermitted("rr_name must be given exactly when Rock Ridge is enabled"));
        }
        if self.options.joliet != joliet_name.is_some() {
            return Err(IsoError::NotPermitted("joliet_name must be given exactly when Joliet is enabled"));
        }

        let (parent_path, name) = split_parent_and_name(iso_path)?;
        let parent = self.resolve(&parent_path)?;
        if !self.primary.arena[parent].is_dir {
            return Err(IsoError::NotPermitted("parent is not a directory"));
        }
        let depth = depth_of(self, parent) + 1;
        if !self.options.rock_ridge && depth > MAX_DEPTH_NO_RR {
            return Err(IsoError::DepthExceeded { path: iso_path.into(), max: MAX_DEPTH_NO_RR });
        }
        let real_parent = real_child_of(self, parent);

        let encoded = self
            .options
            .interchange_level
            .encode_file_name(&name, false)
            .map_err(|reason| IsoError::InvalidName { name: name.clone(), reason })?;

        let mut node = Node::new_file(Identifier::Primary(encoded.clone()), real_parent, data);
        if self.options.rock_ridge {
            let rr_name = rr_name.unwrap();
            node.rock_ridge = Some(RockRidge { mode: 0o100644, nlink: 1, name: Some(rr_name.into()), ..Default::default() });
        }
        let handle = self.primary.arena.insert(node);
        let key = crate::directory::identifier_sort_key(&self.primary.arena[handle].identifier);
        let arena = &self.primary.arena;
        self.primary.arena[real_parent].insert_child_sorted(handle, &key, |h| crate::directory::identifier_sort_key(&arena[h].identifier));

        if self.options.joliet {
            let joliet_name = joliet_name.unwrap();
            self.add_joliet_file(&parent_path, joliet_name, handle)?;
        }

        self.reshuffle()
    }

    fn add_joliet_file(&mut self, parent_path: &str, joliet_name: &str, primary_handle: Handle) -> Result<()> {
        let tree = self.joliet_tree.as_mut().expect("joliet enabled");
        let jparent = resolve_mirrored(tree, parent_path)?;
        let data_len = self.primary.arena[primary_handle].data_len;
        let mut node = Node::new_file(Identifier::Joliet(joliet_name.into()), jparent, Payload::Owned(Vec::new()));
        node.data_len = data_len;
        node.mirror = Some(primary_handle);
        let handle = tree.arena.insert(node);
        let key = crate::directory::identifier_sort_key(&tree.arena[handle].identifier);
        let arena = &tree.arena;
        tree.arena[jparent].insert_child_sorted(handle, &key, |h| crate::directory::identifier_sort_key(&arena[h].identifier));
        self.primary.arena[primary_handle].mirror = Some(handle);
        Ok(())
    }

    /// Adds an empty directory at `iso_path`.
    pub fn add_directory(&mut self, iso_path: &str, rr_name: Option<&str>, joliet_name: Option<&str>) -> Result<()> {
        self.require_initialized()?;
        log::trace!("add_directory path={iso_path}");
        if self.options.rock_ridge != rr_name.is_some() {
            return Err(IsoError::NotPermitted("rr_name must be given exactly when Rock Ridge is enabled"));
        }
        if self.options.joliet != joliet_name.is_some() {
            return Err(IsoError::NotPermitted("joliet_name must be given exactly when Joliet is enabled"));
        }

        let (parent_path, name) = split_parent_and_name(iso_path)?;
        let parent = self.resolve(&parent_path)?;
        if !self.primary.arena[parent].is_dir {
            return Err(IsoError::NotPermitted("parent is not a directory"));
        }
        let depth = depth_of(self, parent) + 1;
        let relocate = self.options.rock_ridge && depth % RR_RELOCATION_DEPTH == 0;
        if !self.options.rock_ridge && depth > MAX_DEPTH_NO_RR {
            return Err(IsoError::DepthExceeded { path: iso_path.into(), max: MAX_DEPTH_NO_RR });
        }
        // `parent` may itself be a CL placeholder if an ancestor was already
        // relocated; the physical directory it stands in for is where new
        // children, and any placeholder this call leaves behind, actually live.
        let real_parent = real_child_of(self, parent);

        let encoded = self
            .options
            .interchange_level
            .encode_file_name(&name, true)
            .map_err(|reason| IsoError::InvalidName { name: name.clone(), reason })?;

        let actual_parent = if relocate { self.rr_moved_directory()? } else { real_parent };
        if relocate {
            log::debug!("relocating directory under /RR_MOVED: path={iso_path} depth={depth}");
        }

        let mut node = Node::new_directory(Identifier::Primary(encoded), Some(actual_parent));
        if self.options.rock_ridge {
            let rr_name = rr_name.unwrap();
            let mut rr = RockRidge { mode: 0o040755, nlink: 2, name: Some(rr_name.into()), ..Default::default() };
            if relocate {
                rr.relocated = true;
                rr.parent_link = Some(real_parent);
            }
            node.rock_ridge = Some(rr);
        }
        let dot = Node::new_directory(Identifier::Dot, None);
        let dotdot = Node::new_directory(Identifier::DotDot, None);
        let handle = self.primary.arena.insert(node);
        let dot_h = self.primary.arena.insert(dot);
        let dotdot_h = self.primary.arena.insert(dotdot);
        self.primary.arena[dot_h].parent = Some(handle);
        self.primary.arena[dotdot_h].parent = Some(handle);
        self.primary.arena[handle].children.push(dot_h);
        self.primary.arena[handle].children.push(dotdot_h);

        if relocate {
            // Leave a CL-marked placeholder at the original parent pointing
            // at the relocated real directory.
            let mut placeholder =
                Node::new_directory(Identifier::Primary(self.primary.arena[handle].identifier.display()), Some(real_parent));
            placeholder.rock_ridge = Some(RockRidge { child_link: Some(handle), ..Default::default() });
            let placeholder_h = self.primary.arena.insert(placeholder);
            let key = crate::directory::identifier_sort_key(&self.primary.arena[placeholder_h].identifier);
            let arena = &self.primary.arena;
            self.primary.arena[real_parent].insert_child_sorted(placeholder_h, &key, |h| crate::directory::identifier_sort_key(&arena[h].identifier));
        } else {
            let key = crate::directory::identifier_sort_key(&self.primary.arena[handle].identifier);
            let arena = &self.primary.arena;
            self.primary.arena[actual_parent].insert_child_sorted(handle, &key, |h| crate::directory::identifier_sort_key(&arena[h].identifier));
        }

        if self.options.joliet {
            let joliet_name = joliet_name.unwrap();
            let tree = self.joliet_tree.as_mut().expect("joliet enabled");
            let jparent = resolve_mirrored(tree, &parent_path)?;
            let mut jnode = Node::new_directory(Identifier::Joliet(joliet_name.into()), Some(jparent));
            jnode.mirror = Some(handle);
            let jhandle = tree.arena.insert(jnode);
            let jdot = tree.arena.insert(Node::new_directory(Identifier::Dot, Some(jhandle)));
            let jdotdot = tree.arena.insert(Node::new_directory(Identifier::DotDot, Some(jhandle)));
            tree.arena[jhandle].children.push(jdot);
            tree.arena[jhandle].children.push(jdotdot);
            let key = crate::directory::identifier_sort_key(&tree.arena[jhandle].identifier);
            let arena = &tree.arena;
            tree.arena[jparent].insert_child_sorted(jhandle, &key, |h| crate::directory::identifier_sort_key(&arena[h].identifier));
            self.primary.arena[handle].mirror = Some(jhandle);
        }

        self.reshuffle()
    }

    fn rr_moved_directory(&mut self) -> Result<Handle> {
        for &child in &self.primary.arena[self.primary.root].children {
            if let Identifier::Primary(name) = &self.primary.arena[child].identifier {
                if name.starts_with("RR_MOVED") {
                    return Ok(child);
                }
            }
        }
        let root = self.primary.root;
        let node = Node::new_directory(Identifier::Primary("RR_MOVED".into()), Some(root));
        let handle = self.primary.arena.insert(node);
        let dot = self.primary.arena.insert(Node::new_directory(Identifier::Dot, Some(handle)));
        let dotdot = self.primary.arena.insert(Node::new_directory(Identifier::DotDot, Some(handle)));
        self.primary.arena[handle].children.push(dot);
        self.primary.arena[handle].children.push(dotdot);
        let key = crate::directory::identifier_sort_key(&self.primary.arena[handle].identifier);
        let arena = &self.primary.arena;
        self.primary.arena[root].insert_child_sorted(handle, &key, |h| crate::directory::identifier_sort_key(&arena[h].identifier));
        Ok(handle)
    }

    /// Adds a Rock-Ridge-only symbolic link. `rr_target` must be a relative
    /// path.
    pub fn add_symlink(&mut self, iso_path: &str, rr_name: &str, rr_target: &str) -> Result<()> {
        self.require_initialized()?;
        log::trace!("add_symlink path={iso_path} target={rr_target}");
        if !self.options.rock_ridge {
            return Err(IsoError::NotPermitted("symlinks require Rock Ridge"));
        }
        if rr_target.starts_with('/') {
            return Err(IsoError::NotPermitted("symlink target must be relative"));
        }

        let (parent_path, name) = split_parent_and_name(iso_path)?;
        let parent = self.resolve(&parent_path)?;
        let encoded = self
            .options
            .interchange_level
            .encode_file_name(&name, false)
            .map_err(|reason| IsoError::InvalidName { name: name.clone(), reason })?;

        let components = parse_relative_symlink(rr_target);
        let mut node = Node::new_file(Identifier::Primary(encoded), parent, Payload::Owned(Vec::new()));
        node.rock_ridge =
            Some(RockRidge { mode: 0o120777, nlink: 1, name: Some(rr_name.into()), symlink: Some(components), ..Default::default() });
        let handle = self.primary.arena.insert(node);
        let key = crate::directory::identifier_sort_key(&self.primary.arena[handle].identifier);
        let arena = &self.primary.arena;
        self.primary.arena[parent].insert_child_sorted(handle, &key, |h| crate::directory::identifier_sort_key(&arena[h].identifier));

        self.reshuffle()
    }

    /// Removes the file at `iso_path`.
    pub fn rm_file(&mut self, iso_path: &str) -> Result<()> {
        self.require_initialized()?;
        log::trace!("rm_file path={iso_path}");
        let handle = self.resolve(iso_path)?;
        if self.primary.arena[handle].is_dir {
            return Err(IsoError::NotPermitted("rm_file target is a directory"));
        }
        let parent = self.primary.arena[handle].parent.ok_or(IsoError::NotFound(iso_path.into()))?;
        let index = self.primary.arena[parent].children.iter().position(|&h| h == handle).unwrap();
        self.primary.arena[parent].remove_child_at(index);
        self.reshuffle()
    }

    /// Removes the (empty) directory at `iso_path`.
    pub fn rm_directory(&mut self, iso_path: &str) -> Result<()> {
        self.require_initialized()?;
        log::trace!("rm_directory path={iso_path}");
        let handle = self.resolve(iso_path)?;
        if !self.primary.arena[handle].is_dir {
            return Err(IsoError::NotPermitted("rm_directory target is not a directory"));
        }
        let non_sentinel = self.primary.arena[handle].children.iter().filter(|&&h| !self.primary.arena[h].is_sentinel()).count();
        if non_sentinel > 0 {
            return Err(IsoError::NotPermitted("directory is not empty"));
        }
        let parent = self.primary.arena[handle].parent.ok_or(IsoError::NotFound(iso_path.into()))?;
        let index = self.primary.arena[parent].children.iter().position(|&h| h == handle).unwrap();
        self.primary.arena[parent].remove_child_at(index);
        self.reshuffle()
    }

    /// Installs an El Torito boot record and catalog. `boot_image` is the
    /// already-prepared boot sector contents; its layout is opaque to this
    /// library. `rr_boot_name`/`joliet_boot_name` and `rr_catalog_name`/
    /// `joliet_catalog_name` are required exactly when Rock Ridge/Joliet
    /// are active, same as every other file-adding mutation.
    pub fn add_eltorito(
        &mut self,
        boot_file_path: &str,
        boot_image: Vec<u8>,
        rr_boot_name: Option<&str>,
        joliet_boot_name: Option<&str>,
        catalog_path: &str,
        rr_catalog_name: Option<&str>,
        joliet_catalog_name: Option<&str>,
    ) -> Result<()> {
        self.require_initialized()?;
        log::debug!("add_eltorito boot_file={boot_file_path} catalog={catalog_path}");
        if self.boot_catalog.is_some() {
            return Err(IsoError::NotPermitted("an El Torito boot record is already installed"));
        }

        let sector_count = boot_image.len().div_ceil(512) as u16;
        self.add_file(boot_file_path, Payload::Owned(boot_image), rr_boot_name, joliet_boot_name)?;
        let boot_file = self.resolve(boot_file_path)?;

        // A placeholder catalog file; its real bytes are produced by
        // `BootCatalog::encode` once the allocator knows every extent.
        self.add_file(
            catalog_path,
            Payload::Owned(alloc::vec![0u8; 2048]),
            rr_catalog_name,
            joliet_catalog_name,
        )?;
        let catalog_node = self.resolve(catalog_path)?;

        self.boot_catalog = Some(BootCatalog {
            manufacturer: Vec::new(),
            default: BootCatalogEntry {
                emulation: EmulationType::NoEmulation,
                load_segment: 0,
                sector_count,
                boot_file,
                boot_info_table: false,
                grub2_boot_info: false,
            },
            sections: Vec::new(),
            catalog_node,
            boot_record_index: self.volume_descriptors.len(),
        });

        let mut boot_system_identifier = [0u8; 32];
        boot_system_identifier[..crate::volume::EL_TORITO_IDENTIFIER.len()].copy_from_slice(crate::volume::EL_TORITO_IDENTIFIER);
        self.volume_descriptors.push(crate::volume::VolumeDescriptor::Boot(crate::volume::BootRecordVolumeDescriptor {
            boot_system_identifier,
            boot_identifier: [0u8; 32],
            boot_system_use: alloc::vec![0u8; 4],
            extent: 0,
        }));

        self.reshuffle()
    }

    /// Removes the installed El Torito boot record and its catalog file.
    pub fn rm_eltorito(&mut self) -> Result<()> {
        self.require_initialized()?;
        log::debug!("rm_eltorito");
        let catalog = self.boot_catalog.take().ok_or(IsoError::NotFound("no El Torito boot record installed".into()))?;
        self.volume_descriptors.retain(|d| !matches!(d, crate::volume::VolumeDescriptor::Boot(_)));

        if let Some(parent) = self.primary.arena[catalog.catalog_node].parent {
            if let Some(index) = self.primary.arena[parent].children.iter().position(|&h| h == catalog.catalog_node) {
                self.primary.arena[parent].remove_child_at(index);
            }
        }
        self.isohybrid = None;
        self.reshuffle()
    }

    /// Installs isohybrid MBR configuration. Requires El Torito to be
    /// active with a 4-sector default boot entry matching the isolinux
    /// signature.
    pub fn add_isohybrid(&mut self, options: IsohybridOptions, boot_image_bytes: &[u8]) -> Result<()> {
        self.require_initialized()?;
        log::debug!("add_isohybrid");
        let catalog = self.boot_catalog.as_ref().ok_or(IsoError::NotPermitted("isohybrid requires El Torito"))?;
        IsohybridOptions::validate_boot_image(boot_image_bytes, catalog.default.sector_count)
            .map_err(IsoError::NotPermitted)?;
        self.isohybrid = Some(options);
        Ok(())
    }

    pub fn rm_isohybrid(&mut self) -> Result<()> {
        self.require_initialized()?;
        self.isohybrid = None;
        Ok(())
    }
}

fn resolve_mirrored(tree: &mut crate::image::Tree, path: &str) -> Result<Handle> {
    let mut current = tree.root;
    for segment in Image::split_path(path) {
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
        current = found.ok_or_else(|| IsoError::NotFound(path.into()))?;
    }
    Ok(current)
}

fn parse_relative_symlink(target: &str) -> Vec<crate::rockridge::SlComponent> {
    use crate::rockridge::SlComponent;
    target
        .split('/')
        .map(|segment| match segment {
            "." => SlComponent::CurrentDir,
            ".." => SlComponent::ParentDir,
            other => SlComponent::Name(other.into()),
        })
        .collect()
}
