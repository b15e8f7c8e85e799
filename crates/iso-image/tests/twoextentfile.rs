//! A file just past one extent boundary, so its payload occupies two
//! extents and the tail sector is padded.

mod common;

use common::{options, roundtrip};
use iso_image::{Image, Payload};

#[test]
fn file_spanning_two_extents_roundtrips() {
    let mut image = Image::new(options(false, false)).unwrap();
    let data: Vec<u8> = (0..2049u32).map(|i| (i % 251) as u8).collect();
    image.add_file("/BIG.BIN", Payload::Owned(data.clone()), None, None).unwrap();

    let mut parsed = roundtrip(&mut image);

    let entry = parsed.get_entry("/BIG.BIN").unwrap();
    assert_eq!(entry.data_len, 2049);
    assert_eq!(entry.extents(), 2);

    let mut out = Vec::new();
    parsed.get_and_write("/BIG.BIN", &mut out, None).unwrap();
    assert_eq!(out, data);
}
