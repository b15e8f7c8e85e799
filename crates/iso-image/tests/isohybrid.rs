//! An El Torito boot image carrying the isolinux isohybrid signature: the
//! mastered image must begin with the isohybrid MBR and re-parse with the
//! same signature, and the image size must account for the isohybrid tail
//! padding.

mod common;

use std::io::Cursor;

use common::options;
use iso_common::MbrPartitionType;
use iso_image::{Image, IsohybridOptions, Payload};

/// A minimal stand-in for `isolinux.bin`: four 512-byte sectors carrying
/// the isohybrid signature at offset 0x40.
fn fake_isolinux_bin() -> Vec<u8> {
    let mut image = vec![0u8; 4 * 512];
    image[0x40..0x44].copy_from_slice(&[0xFB, 0xC0, 0x78, 0x70]);
    image
}

fn isohybrid_options() -> IsohybridOptions {
    let mut code_prefix = [0u8; iso_image::isohybrid::CODE_PREFIX_LEN];
    // Bytes isolinux's own isohybrid tool emits at the start of the MBR
    // code area; required for the probe on re-parse to recognize the image.
    code_prefix[0] = 0x33;
    code_prefix[1] = 0xED;
    IsohybridOptions {
        code_prefix,
        mbr_id: 0xDEAD_BEEF,
        partition_type: MbrPartitionType::Iso9660,
        sectors_per_track: 32,
        heads_per_cylinder: 64,
    }
}

#[test]
fn hybrid_image_starts_with_the_isohybrid_signature_and_round_trips() {
    let mut image = Image::new(options(false, false)).unwrap();
    image.add_eltorito("/BOOT.BIN", fake_isolinux_bin(), None, None, "/BOOT.CAT", None, None).unwrap();
    image.add_isohybrid(isohybrid_options(), &fake_isolinux_bin()).unwrap();

    let mut out = Cursor::new(Vec::new());
    image.write(&mut out, None, None).unwrap();
    let bytes = out.into_inner();

    assert_eq!(&bytes[0..2], &[0x33, 0xED]);

    let parsed = Image::open(Cursor::new(bytes.clone())).expect("isohybrid image should parse");
    assert!(parsed.isohybrid().is_some());

    // space_size plus isohybrid tail padding must account for the whole
    // written length.
    let tail_bytes = parsed.isohybrid().unwrap().tail_padding_sectors(parsed.space_size() * 4) as usize * 512;
    assert_eq!(parsed.space_size() as usize * 2048 + tail_bytes, bytes.len());
}
