//! Panel output: a sink that refreshes a sub-rectangle from an RGB frame.

use crate::frame::{rgb_row_to_rgb565_be, Frame};
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DisplayError {
    #[error("display device not found: {0}")]
    DeviceNotFound(String),
    #[error("display write failed: {0}")]
    Io(#[from] std::io::Error),
}

/// A pixel rectangle in panel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }

    /// Intersection with a `width` x `height` surface anchored at the origin.
    pub fn clip(&self, width: u32, height: u32) -> Option<Rect> {
        let x1 = (self.x.saturating_add(self.width)).min(width);
        let y1 = (self.y.saturating_add(self.height)).min(height);
        if self.x >= x1 || self.y >= y1 {
            return None;
        }
        Some(Rect {
            x: self.x,
            y: self.y,
            width: x1 - self.x,
            height: y1 - self.y,
        })
    }
}

/// Transport-level refresh of a panel region. Composition happens before
/// the frame reaches the sink.
pub trait DisplaySink: Send {
    fn refresh(&mut self, frame: &Frame, area: Rect) -> Result<(), DisplayError>;
}

/// Linux framebuffer device (e.g. an SPI TFT exposed as `/dev/fb1`),
/// 16 bits per pixel, RGB565 big-endian.
pub struct FramebufferDisplay {
    file: File,
    width: u32,
    height: u32,
    row: Vec<u8>,
}

impl FramebufferDisplay {
    pub fn open(path: &str, width: u32, height: u32) -> Result<Self, DisplayError> {
        if !Path::new(path).exists() {
            return Err(DisplayError::DeviceNotFound(path.to_string()));
        }
        let file = OpenOptions::new().write(true).open(path)?;
        tracing::info!(device = path, width, height, "opened framebuffer");
        Ok(Self {
            file,
            width,
            height,
            row: Vec::with_capacity(width as usize * 2),
        })
    }
}

impl DisplaySink for FramebufferDisplay {
    fn refresh(&mut self, frame: &Frame, area: Rect) -> Result<(), DisplayError> {
        let Some(area) = area
            .clip(self.width, self.height)
            .and_then(|a| a.clip(frame.width(), frame.height()))
        else {
            return Ok(());
        };

        let data = frame.data();
        let src_stride = frame.width() as usize * 3;
        for y in area.y..area.y + area.height {
            let start = y as usize * src_stride + area.x as usize * 3;
            let end = start + area.width as usize * 3;
            self.row.clear();
            rgb_row_to_rgb565_be(&data[start..end], &mut self.row);

            let offset = (y as u64 * self.width as u64 + area.x as u64) * 2;
            self.file.seek(SeekFrom::Start(offset))?;
            self.file.write_all(&self.row)?;
        }
        self.file.flush()?;
        Ok(())
    }
}

/// Discards output. Used headless and in tests.
#[derive(Debug, Default)]
pub struct NullDisplay {
    pub refreshes: usize,
}

impl DisplaySink for NullDisplay {
    fn refresh(&mut self, _frame: &Frame, _area: Rect) -> Result<(), DisplayError> {
        self.refreshes += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_clip() {
        let r = Rect { x: 300, y: 200, width: 50, height: 50 };
        assert_eq!(r.clip(320, 240), Some(Rect { x: 300, y: 200, width: 20, height: 40 }));
        assert_eq!(Rect { x: 400, y: 0, width: 10, height: 10 }.clip(320, 240), None);
        assert_eq!(Rect::full(320, 240).clip(320, 240), Some(Rect::full(320, 240)));
    }

    #[test]
    fn test_missing_framebuffer() {
        assert!(matches!(
            FramebufferDisplay::open("/nonexistent/fb9", 320, 240),
            Err(DisplayError::DeviceNotFound(_))
        ));
    }

    #[test]
    fn test_framebuffer_writes_subrect() {
        let path = std::env::temp_dir().join(format!("rollcall-fb-{}", std::process::id()));
        std::fs::write(&path, vec![0u8; 4 * 2 * 2]).unwrap();

        let mut fb = FramebufferDisplay::open(path.to_str().unwrap(), 4, 2).unwrap();
        let mut rgb = vec![0u8; 4 * 2 * 3];
        // Pixel (1, 1) red.
        rgb[(4 + 1) * 3] = 255;
        let frame = Frame::new(rgb, 4, 2, 0).unwrap();
        fb.refresh(&frame, Rect { x: 1, y: 1, width: 2, height: 1 }).unwrap();

        let written = std::fs::read(&path).unwrap();
        std::fs::remove_file(&path).ok();
        let offset = (4 + 1) * 2;
        assert_eq!(&written[offset..offset + 2], &[0xF8, 0x00]);
        assert!(written[..offset].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_null_display_counts() {
        let mut d = NullDisplay::default();
        let frame = Frame::new(vec![0; 3], 1, 1, 0).unwrap();
        d.refresh(&frame, Rect::full(1, 1)).unwrap();
        assert_eq!(d.refreshes, 1);
    }
}
