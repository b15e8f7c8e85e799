//! A file and a nested directory with Joliet enabled: both hierarchies
//! must resolve independently and the file's primary and Joliet records
//! must alias the same payload extent and length.

mod common;

use common::{options, roundtrip};
use iso_image::Image;

#[test]
fn joliet_and_primary_trees_stay_in_sync() {
    let mut image = Image::new(options(true, false)).unwrap();
    image.add_directory("/DIR1", None, Some("A long directory name")).unwrap();
    image.add_file("/DIR1/A.TXT", iso_image::Payload::Owned(b"joliet\n".to_vec()), None, Some("A much longer file name.txt")).unwrap();

    let mut parsed = roundtrip(&mut image);

    // Both hierarchies list the nested directory under their own naming.
    assert_eq!(parsed.list_dir("/").unwrap().len(), 1);
    assert_eq!(parsed.list_dir_joliet("/").unwrap().len(), 1);
    let jdir = parsed.get_entry_joliet("/A long directory name").unwrap();
    assert!(jdir.is_dir);

    // Dual-hierarchy payload aliasing: same extent, same length.
    let primary_file = parsed.get_entry("/DIR1/A.TXT;1").unwrap();
    let joliet_file = parsed.get_entry_joliet("/A long directory name/A much longer file name.txt").unwrap();
    assert!(!joliet_file.is_dir);
    assert_eq!(primary_file.extent, joliet_file.extent);
    assert_eq!(primary_file.data_len, joliet_file.data_len);

    // The payload itself is reachable and correct through the primary path.
    let mut out = Vec::new();
    parsed.get_and_write("/DIR1/A.TXT;1", &mut out, None).unwrap();
    assert_eq!(out, b"joliet\n");
}
