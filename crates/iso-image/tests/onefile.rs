//! A single small file at the root.

mod common;

use common::{options, roundtrip};
use iso_image::{Image, Payload};

#[test]
fn file_roundtrips_byte_for_byte() {
    let mut image = Image::new(options(false, false)).unwrap();
    image.add_file("/FOO.TXT", Payload::Owned(b"foo\n".to_vec()), None, None).unwrap();

    let mut parsed = roundtrip(&mut image);

    let mut out = Vec::new();
    parsed.get_and_write("/FOO.TXT;1", &mut out, None).unwrap();
    assert_eq!(out, b"foo\n");
}

#[test]
fn file_entry_reports_its_length() {
    let mut image = Image::new(options(false, false)).unwrap();
    image.add_file("/FOO.TXT", Payload::Owned(b"foo\n".to_vec()), None, None).unwrap();
    let parsed = roundtrip(&mut image);

    let entry = parsed.get_entry("/FOO.TXT;1").unwrap();
    assert!(!entry.is_dir);
    assert_eq!(entry.data_len, 4);
    assert!(entry.extent > 0);
}

#[test]
fn directory_listing_shows_the_file() {
    let mut image = Image::new(options(false, false)).unwrap();
    image.add_file("/FOO.TXT", Payload::Owned(b"foo\n".to_vec()), None, None).unwrap();
    let parsed = roundtrip(&mut image);

    assert_eq!(parsed.list_dir("/").unwrap().len(), 1);
}
