//! rollcall-hw: Hardware abstraction for the kiosk.
//!
//! V4L2 camera capture producing RGB frames, framebuffer panel output and
//! a polled digital input for the enroll button.

pub mod camera;
pub mod display;
pub mod frame;
pub mod gpio;

pub use camera::{Camera, CameraError, CameraStream, CaptureSettings, FrameSource, PixelFormat};
pub use display::{DisplayError, DisplaySink, FramebufferDisplay, NullDisplay, Rect};
pub use frame::{Frame, FrameError};
pub use gpio::{DigitalInput, InputError, SysfsInput};
