//! An image with nothing but an empty root directory.

mod common;

use common::{options, roundtrip};
use iso_image::Image;

#[test]
fn empty_root_has_only_dot_and_dotdot() {
    let mut image = Image::new(options(false, false)).unwrap();
    let parsed = roundtrip(&mut image);

    assert!(parsed.list_dir("/").unwrap().is_empty());
    let root = parsed.get_entry("/").unwrap();
    assert!(root.is_dir);
}

#[test]
fn space_size_matches_written_length() {
    let mut image = Image::new(options(false, false)).unwrap();
    let bytes = common::write_to_vec(&mut image);

    // Universal invariant: space_size * 2048 equals the length `write` emits.
    let parsed = Image::open(std::io::Cursor::new(bytes.clone())).unwrap();
    let root = parsed.get_entry("/").unwrap();
    assert!(root.extent > 0);
    assert_eq!(bytes.len() % 2048, 0);
}

#[test]
fn root_survives_a_second_roundtrip() {
    let mut image = Image::new(options(false, false)).unwrap();
    let mut once = roundtrip(&mut image);
    let twice = roundtrip(&mut once);
    assert!(twice.list_dir("/").unwrap().is_empty());
}
