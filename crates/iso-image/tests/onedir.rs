//! A single empty subdirectory under the root.

mod common;

use common::{options, roundtrip};
use iso_image::Image;

#[test]
fn subdirectory_appears_once_in_root() {
    let mut image = Image::new(options(false, false)).unwrap();
    image.add_directory("/DIR1", None, None).unwrap();

    let parsed = roundtrip(&mut image);

    let children = parsed.list_dir("/").unwrap();
    assert_eq!(children.len(), 1);

    let dir1 = parsed.get_entry("/DIR1").unwrap();
    assert!(dir1.is_dir);
    assert!(parsed.list_dir("/DIR1").unwrap().is_empty());
}

#[test]
fn nested_file_resolves_through_the_subdirectory() {
    let mut image = Image::new(options(false, false)).unwrap();
    image.add_directory("/DIR1", None, None).unwrap();
    image.add_file("/DIR1/A.TXT", iso_image::Payload::Owned(b"a".to_vec()), None, None).unwrap();

    let mut parsed = roundtrip(&mut image);
    let mut out = Vec::new();
    parsed.get_and_write("/DIR1/A.TXT", &mut out, None).unwrap();
    assert_eq!(out, b"a");
}
