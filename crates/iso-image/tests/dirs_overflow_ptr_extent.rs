//! Enough directories under the root that the path table spills past a
//! single 2048-byte extent, exercising the allocator's
//! `extents_for_bytes`/path-table-padding path.

mod common;

use common::{options, roundtrip};
use iso_image::Image;

#[test]
fn many_directories_roundtrip_through_an_overflowing_path_table() {
    let mut image = Image::new(options(false, false)).unwrap();
    for i in 1..=295 {
        image.add_directory(&format!("/DIR{i}"), None, None).unwrap();
    }

    let parsed = roundtrip(&mut image);

    let children = parsed.list_dir("/").unwrap();
    assert_eq!(children.len(), 295);

    for i in 1..=295 {
        let entry = parsed.get_entry(&format!("/DIR{i}")).unwrap();
        assert!(entry.is_dir);
        assert!(entry.extent > 0);
    }
}
