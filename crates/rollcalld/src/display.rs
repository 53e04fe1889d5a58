//! Display stage: composes the latest analysis result over the newest
//! camera frame and refreshes the panel.

use crate::channel::BoundedChannel;
use crate::state::{AnalysisOutput, RunFlag, Severity, SharedOutput};
use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect as DrawRect;
use rollcall_hw::{DisplaySink, Frame, Rect};

const BANNER_HEIGHT: u32 = 28;
const PROGRESS_HEIGHT: u32 = 6;
const TEXT_SCALE: f32 = 18.0;
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

pub fn severity_color(severity: Severity) -> Rgb<u8> {
    match severity {
        Severity::Idle => Rgb([90, 90, 90]),
        Severity::Info => Rgb([30, 120, 220]),
        Severity::Progress => Rgb([0, 190, 220]),
        Severity::Success => Rgb([0, 200, 70]),
        Severity::Warning => Rgb([240, 170, 0]),
        Severity::Error => Rgb([220, 40, 40]),
    }
}

/// Load the overlay font; without it the banner is drawn text-less.
pub fn load_font(path: &str) -> Option<FontArc> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(path, error = %e, "overlay font not readable; status text disabled");
            return None;
        }
    };
    match FontArc::try_from_vec(bytes) {
        Ok(font) => Some(font),
        Err(e) => {
            tracing::warn!(path, error = %e, "overlay font invalid; status text disabled");
            None
        }
    }
}

/// Draw region boxes, the enrollment progress bar and the status banner.
pub fn compose(image: &mut RgbImage, output: &AnalysisOutput, font: Option<&FontArc>) {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 {
        return;
    }
    let color = severity_color(output.severity);

    for region in &output.regions {
        let Some((x, y, rw, rh)) = region.pixel_rect(w, h) else {
            continue;
        };
        draw_hollow_rect_mut(image, DrawRect::at(x as i32, y as i32).of_size(rw, rh), color);
        if rw > 2 && rh > 2 {
            let inner = DrawRect::at(x as i32 + 1, y as i32 + 1).of_size(rw - 2, rh - 2);
            draw_hollow_rect_mut(image, inner, color);
        }
    }

    if let Some(progress) = output.enrollment {
        let filled = if progress.required == 0 {
            0
        } else {
            (w as u64 * progress.collected.min(progress.required) as u64 / progress.required as u64) as u32
        };
        if filled > 0 {
            draw_filled_rect_mut(image, DrawRect::at(0, 0).of_size(filled, PROGRESS_HEIGHT.min(h)), color);
        }
    }

    let banner = BANNER_HEIGHT.min(h);
    let top = (h - banner) as i32;
    draw_filled_rect_mut(image, DrawRect::at(0, top).of_size(w, banner), color);
    if let Some(font) = font {
        draw_text_mut(image, TEXT_COLOR, 6, top + 5, PxScale::from(TEXT_SCALE), font, &output.status);
    }
}

pub struct DisplayStage {
    sink: Box<dyn DisplaySink>,
    font: Option<FontArc>,
    output: SharedOutput,
    failing: bool,
}

impl DisplayStage {
    pub fn new(sink: Box<dyn DisplaySink>, font: Option<FontArc>, output: SharedOutput) -> Self {
        Self {
            sink,
            font,
            output,
            failing: false,
        }
    }

    /// Compose and refresh one frame on a private copy.
    pub fn show(&mut self, frame: Frame) {
        let sequence = frame.sequence();
        let snapshot = self.output.snapshot();
        let mut image = frame.into_image();
        compose(&mut image, &snapshot, self.font.as_ref());

        let composed = Frame::from_rgb_image(image, sequence);
        let area = Rect::full(composed.width(), composed.height());
        match self.sink.refresh(&composed, area) {
            Ok(()) => self.failing = false,
            Err(e) => {
                if !self.failing {
                    tracing::warn!(seq = sequence, error = %e, "display refresh failed");
                }
                self.failing = true;
            }
        }
    }

    pub fn run(&mut self, frames: &BoundedChannel<Frame>, running: &RunFlag) {
        tracing::info!("display thread started");
        while running.is_running() {
            let Some(frame) = frames.pop() else {
                break;
            };
            self.show(frame);
        }
        tracing::info!("display thread exiting");
    }
}
