//! Eight nested directories plus a file, with Rock Ridge active: the
//! deepest levels must be relocated under `/RR_MOVED` and linked back to
//! their original parent via `CL`/`RE`/`PL`.

mod common;

use common::{options, roundtrip};
use iso_image::Image;

#[test]
fn deep_tree_is_relocated_under_rr_moved() {
    let mut image = Image::new(options(false, true)).unwrap();

    let mut path = String::new();
    for i in 1..=8 {
        path.push_str(&format!("/D{i}"));
        image.add_directory(&path, Some(&format!("dir-level-{i}")), None).unwrap();
    }
    image.add_file(&format!("{path}/LEAF.TXT"), iso_image::Payload::Owned(b"deep\n".to_vec()), Some("leaf.txt"), None).unwrap();

    let mut parsed = roundtrip(&mut image);

    // Root must carry an RR_MOVED directory now that level 8 relocated.
    let rr_moved = parsed.get_entry("/RR_MOVED").unwrap();
    assert!(rr_moved.is_dir);
    assert_eq!(parsed.list_dir("/RR_MOVED").unwrap().len(), 1);

    // The relocated directory's Rock Ridge name is still resolvable by its
    // original nominal path (through the CL placeholder) ...
    let via_placeholder = parsed.get_entry("/D1/D2/D3/D4/D5/D6/D7/D8").unwrap();
    assert!(via_placeholder.is_dir);

    // ... and the file underneath it still round-trips its payload.
    let mut out = Vec::new();
    parsed.get_and_write("/D1/D2/D3/D4/D5/D6/D7/D8/LEAF.TXT", &mut out, None).unwrap();
    assert_eq!(out, b"deep\n");
}
