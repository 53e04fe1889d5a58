//! Capture stage: fans each camera frame out to the display channel and
//! the analysis slot.

use crate::channel::BoundedChannel;
use crate::slot::LatestSlot;
use crate::state::RunFlag;
use rollcall_hw::{Frame, FrameSource};
use std::thread;
use std::time::Duration;

/// Back-off after a failed tick so a dead device does not spin a core.
const FAILED_TICK_BACKOFF: Duration = Duration::from_millis(10);

pub fn run_capture<S: FrameSource>(
    source: &mut S,
    frames: &BoundedChannel<Frame>,
    latest: &LatestSlot<Frame>,
    running: &RunFlag,
) {
    tracing::info!("capture thread started");
    let mut failures = 0u64;
    while running.is_running() {
        match source.next_frame() {
            Ok(frame) => {
                if failures > 0 {
                    tracing::info!(failures, "camera recovered");
                    failures = 0;
                }
                latest.publish(frame.clone());
                if frames.push(frame) {
                    tracing::trace!("display behind; dropped oldest frame");
                }
            }
            Err(e) => {
                failures += 1;
                if failures == 1 || failures % 100 == 0 {
                    tracing::warn!(failures, error = %e, "no frame this tick");
                } else {
                    tracing::debug!(error = %e, "no frame this tick");
                }
                thread::sleep(FAILED_TICK_BACKOFF);
            }
        }
    }
    tracing::info!("capture thread exiting");
}
