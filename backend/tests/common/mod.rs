#![allow(dead_code)]

use image::{Rgb, RgbImage};
use shared::{BoundingBox, Detection};
use std::io::Cursor;

/// A small valid PNG with distinguishable content.
pub fn test_png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x * 7 % 256) as u8, (y * 13 % 256) as u8, 90])
    });
    let mut buffer = Vec::new();
    img.write_to(&mut Cursor::new(&mut buffer), image::ImageFormat::Png)
        .expect("encoding a generated PNG cannot fail");
    buffer
}

/// A detection with a comfortably large box (40px sides) inside a 64x64
/// test image.
pub fn detection(class: &str, confidence: f32) -> Detection {
    Detection {
        class: class.to_string(),
        confidence,
        bbox: BoundingBox::from_corners(4.0, 4.0, 44.0, 44.0),
    }
}
