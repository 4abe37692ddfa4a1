//! Panel drivers.
//!
//! A driver gets one encoded image per call (GIF or PNG bytes) and is
//! responsible for decoding it and pushing pixels to the screen.

use image::imageops::FilterType;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb(pub u8, pub u8, pub u8);

pub const BLACK: Rgb = Rgb(0, 0, 0);

pub trait DisplayDriver: Send + Sync {
    fn fill_screen(&self, color: Rgb) -> anyhow::Result<()>;
    /// Draw one frame.  `frame` is read until it reports end-of-stream.
    fn draw_frame(&self, frame: &mut dyn Read) -> anyhow::Result<()>;
}

// ── Framebuffer ──────────────────────────────────────────────────────────────

/// Writes RGB565 pixels to a Linux framebuffer device such as a small SPI
/// panel exposed as `/dev/fb1`.
pub struct FramebufferDriver {
    device: Mutex<File>,
    width: u32,
    height: u32,
}

impl FramebufferDriver {
    pub fn open(path: PathBuf, width: u32, height: u32) -> anyhow::Result<Self> {
        let device = std::fs::OpenOptions::new()
            .write(true)
            .open(&path)
            .map_err(|e| anyhow::anyhow!("cannot open framebuffer {}: {}", path.display(), e))?;
        info!("display: framebuffer {} ({}x{})", path.display(), width, height);
        Ok(Self {
            device: Mutex::new(device),
            width,
            height,
        })
    }

    /// Overwrite the panel from its first pixel.
    fn write_pixels(&self, raw: &[u8]) -> anyhow::Result<()> {
        let mut fb = self
            .device
            .lock()
            .map_err(|_| anyhow::anyhow!("framebuffer lock poisoned"))?;
        fb.seek(SeekFrom::Start(0))?;
        fb.write_all(raw)?;
        Ok(())
    }
}

fn to_rgb565(r: u8, g: u8, b: u8) -> [u8; 2] {
    let mut px: u16 = (r as u16 & 0b1111_1000) << 8;
    px |= (g as u16 & 0b1111_1100) << 3;
    px |= (b as u16) >> 3;
    px.to_le_bytes()
}

pub fn rgb888_to_rgb565(rgb888: &[u8]) -> Vec<u8> {
    let mut raw = Vec::with_capacity(rgb888.len() / 3 * 2);
    for px in rgb888.chunks_exact(3) {
        raw.extend(to_rgb565(px[0], px[1], px[2]));
    }
    raw
}

impl DisplayDriver for FramebufferDriver {
    fn fill_screen(&self, color: Rgb) -> anyhow::Result<()> {
        let px = to_rgb565(color.0, color.1, color.2);
        let raw: Vec<u8> = std::iter::repeat(px)
            .take((self.width * self.height) as usize)
            .flatten()
            .collect();
        self.write_pixels(&raw)
    }

    fn draw_frame(&self, frame: &mut dyn Read) -> anyhow::Result<()> {
        let mut encoded = Vec::new();
        frame.read_to_end(&mut encoded)?;
        let img = image::load_from_memory(&encoded)?;
        let img = if img.width() != self.width || img.height() != self.height {
            img.resize_exact(self.width, self.height, FilterType::Nearest)
        } else {
            img
        };
        self.write_pixels(&rgb888_to_rgb565(img.to_rgb8().as_raw()))
    }
}

// ── Log ──────────────────────────────────────────────────────────────────────

/// Headless driver: frames are consumed and counted.
#[derive(Default)]
pub struct LogDriver {
    frames: AtomicU64,
}

impl LogDriver {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DisplayDriver for LogDriver {
    fn fill_screen(&self, color: Rgb) -> anyhow::Result<()> {
        debug!("display: fill {:?}", color);
        Ok(())
    }

    fn draw_frame(&self, frame: &mut dyn Read) -> anyhow::Result<()> {
        let mut encoded = Vec::new();
        frame.read_to_end(&mut encoded)?;
        let n = self.frames.fetch_add(1, Ordering::Relaxed) + 1;
        if n % 100 == 1 {
            debug!("display: frame #{} ({} bytes)", n, encoded.len());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rgb565_packing() {
        assert_eq!(to_rgb565(0, 0, 0), [0, 0]);
        assert_eq!(to_rgb565(255, 255, 255), [0xff, 0xff]);
        // pure red: 11111 000000 00000
        assert_eq!(u16::from_le_bytes(to_rgb565(255, 0, 0)), 0xf800);
        assert_eq!(u16::from_le_bytes(to_rgb565(0, 255, 0)), 0x07e0);
        assert_eq!(u16::from_le_bytes(to_rgb565(0, 0, 255)), 0x001f);
    }

    #[test]
    fn test_framebuffer_fill_writes_whole_panel() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let driver = FramebufferDriver::open(file.path().to_path_buf(), 4, 2).unwrap();
        driver.fill_screen(Rgb(0, 0, 255)).unwrap();
        let raw = std::fs::read(file.path()).unwrap();
        assert_eq!(raw.len(), 4 * 2 * 2);
        assert_eq!(&raw[..2], &[0x1f, 0x00]);
    }

    #[test]
    fn test_framebuffer_draw_scales_png() {
        let img = image::RgbImage::from_pixel(2, 2, image::Rgb([255, 0, 0]));
        let mut png = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();

        let file = tempfile::NamedTempFile::new().unwrap();
        let driver = FramebufferDriver::open(file.path().to_path_buf(), 4, 4).unwrap();
        driver.draw_frame(&mut png.as_slice()).unwrap();
        let raw = std::fs::read(file.path()).unwrap();
        assert_eq!(raw.len(), 4 * 4 * 2);
        assert!(raw.chunks_exact(2).all(|px| px == [0x00, 0xf8]));
    }

    #[test]
    fn test_framebuffer_redraws_from_first_pixel() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let driver = FramebufferDriver::open(file.path().to_path_buf(), 2, 2).unwrap();
        driver.fill_screen(Rgb(0, 0, 255)).unwrap();
        driver.fill_screen(Rgb(255, 0, 0)).unwrap();
        let raw = std::fs::read(file.path()).unwrap();
        assert_eq!(raw.len(), 2 * 2 * 2);
        assert!(raw.chunks_exact(2).all(|px| px == [0x00, 0xf8]));
    }

    #[test]
    fn test_framebuffer_rejects_garbage() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let driver = FramebufferDriver::open(file.path().to_path_buf(), 4, 4).unwrap();
        assert!(driver.draw_frame(&mut &b"not an image"[..]).is_err());
    }
}
