//! Scannable code rendering for the static-image screen.

use image::{DynamicImage, ImageFormat, Luma};
use qrcode::{EcLevel, QrCode};
use std::io::Cursor;

pub trait CodeEncoder: Send + Sync {
    /// Encode `text` as a square PNG at least `size` pixels wide.
    fn encode(&self, text: &str, size: u32) -> anyhow::Result<Vec<u8>>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct QrEncoder;

impl CodeEncoder for QrEncoder {
    fn encode(&self, text: &str, size: u32) -> anyhow::Result<Vec<u8>> {
        let code = QrCode::with_error_correction_level(text.as_bytes(), EcLevel::M)?;
        let img = code
            .render::<Luma<u8>>()
            .min_dimensions(size, size)
            .build();
        let mut png = Vec::new();
        DynamicImage::ImageLuma8(img).write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
        Ok(png)
    }
}
