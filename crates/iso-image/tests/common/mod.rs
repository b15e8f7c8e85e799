//! Shared fixture helpers for the integration tests: build an [`Image`] in
//! memory, master it to a `Cursor<Vec<u8>>`, and parse it back.

use std::io::Cursor;

use iso_image::{Image, ImageOptions};

pub fn options(joliet: bool, rock_ridge: bool) -> ImageOptions {
    ImageOptions { volume_identifier: "TESTVOL".into(), joliet, rock_ridge, ..ImageOptions::default() }
}

pub fn write_to_vec(image: &mut Image) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    image.write(&mut out, None, None).expect("write should succeed");
    out.into_inner()
}

/// Masters `image` and parses the result back into a fresh [`Image`].
pub fn roundtrip(image: &mut Image) -> Image {
    let bytes = write_to_vec(image);
    Image::open(Cursor::new(bytes)).expect("round-tripped image should parse")
}
