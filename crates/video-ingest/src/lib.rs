//! Frame acquisition for the weigh station.
//!
//! A [`CaptureDevice`] is moved onto the [`FrameSource`] capture thread, which
//! keeps only the newest frame in a [`LatestSlot`]. Devices:
//! - [`ImageDirectory`]: replays still images, no native dependencies.
//! - [`FrameReplay`]: scripted in-memory frames for rigs and tests.
//! - `OpencvCamera`: V4L/CSI cameras, files, and streams (`with-opencv`).

pub mod camera;
pub mod device;
pub mod imaging;
pub mod slot;
pub mod source;
pub mod types;

#[cfg(feature = "with-opencv")]
pub use camera::OpencvCamera;
pub use camera::parse_device_index;
pub use device::{CaptureDevice, FrameReplay, ImageDirectory};
pub use slot::LatestSlot;
pub use source::{FrameSource, CAPTURE_RETRY_INTERVAL};
pub use types::{CaptureError, Frame, FrameFormat};
