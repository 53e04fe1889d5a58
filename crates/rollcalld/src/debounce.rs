//! Enroll button: a polled, debounced input raising an edge-triggered
//! request flag.

use crate::state::RunFlag;
use rollcall_hw::{DigitalInput, InputError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// One-shot request shared between producers (button, D-Bus) and the
/// analysis thread, which consumes it at most once per cycle.
#[derive(Clone, Debug, Default)]
pub struct RequestFlag(Arc<AtomicBool>);

impl RequestFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag. `false` if a request was already pending.
    pub fn raise(&self) -> bool {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Consume the pending request, if any.
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }

    pub fn is_pending(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

pub struct InputDebouncer<I> {
    input: I,
    flag: RequestFlag,
    settle: Duration,
    /// Cleared after a press fires; set again once the input is released.
    armed: bool,
    failing: bool,
}

impl<I: DigitalInput> InputDebouncer<I> {
    pub fn new(input: I, flag: RequestFlag, settle: Duration) -> Self {
        Self {
            input,
            flag,
            settle,
            armed: true,
            failing: false,
        }
    }

    /// Sample the input once. Returns `true` when this call raised the flag.
    pub fn poll_once(&mut self) -> Result<bool, InputError> {
        let active = self.input.is_active()?;
        if !self.armed {
            if !active {
                self.armed = true;
            }
            return Ok(false);
        }
        if !active {
            return Ok(false);
        }

        thread::sleep(self.settle);
        if !self.input.is_active()? {
            tracing::trace!("input bounce ignored");
            return Ok(false);
        }

        if self.flag.raise() {
            self.armed = false;
            tracing::info!("enroll button pressed");
            Ok(true)
        } else {
            tracing::debug!("enroll button pressed; request already pending");
            Ok(false)
        }
    }

    /// Poll every `period` until shutdown.
    pub fn run(&mut self, running: &RunFlag, period: Duration) {
        tracing::info!(period_ms = period.as_millis() as u64, "input thread started");
        while running.is_running() {
            match self.poll_once() {
                Ok(_) => self.failing = false,
                Err(e) => {
                    if !self.failing {
                        tracing::warn!(error = %e, "input read failed");
                    }
                    self.failing = true;
                }
            }
            thread::sleep(period);
        }
        tracing::info!("input thread exiting");
    }
}
