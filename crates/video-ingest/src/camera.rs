//! OpenCV-backed camera capture.
//!
//! Compiled only with the `with-opencv` feature; URI parsing is always
//! available so configuration can be validated without the native stack.

#[cfg(feature = "with-opencv")]
pub use self::opencv_backend::OpencvCamera;

/// Parse a `/dev/videoX` style URI (or a bare index) into a device index.
pub fn parse_device_index(uri: &str) -> Option<i32> {
    if let Ok(index) = uri.parse::<i32>() {
        return Some(index);
    }
    if let Some(stripped) = uri.strip_prefix("/dev/video") {
        if !stripped.is_empty() && stripped.chars().all(|c| c.is_ascii_digit()) {
            return stripped.parse::<i32>().ok();
        }
    }
    None
}

#[cfg(feature = "with-opencv")]
mod opencv_backend {
    use chrono::Utc;
    use opencv::{
        core::{self, Mat, MatTraitConst, MatTraitConstManual},
        videoio::{self, VideoCapture, VideoCaptureTrait, VideoCaptureTraitConst},
    };
    use tracing::{debug, warn};

    use super::parse_device_index;
    use crate::{
        device::CaptureDevice,
        types::{CaptureError, Frame, FrameFormat},
    };

    /// USB/CSI camera, video file, or network stream opened through OpenCV.
    pub struct OpencvCamera {
        uri: String,
        cap: VideoCapture,
        frame: Mat,
        scratch: Mat,
        target_size: (u32, u32),
    }

    impl OpencvCamera {
        /// Open the device and apply the requested resolution.
        ///
        /// Failure to open is reported as [`CaptureError::Open`].
        pub fn open(uri: &str, target_size: (u32, u32)) -> Result<Self, CaptureError> {
            let mut cap = open_video_capture(uri)?;
            configure_camera(&mut cap, target_size, 30.0);
            Ok(Self {
                uri: uri.to_string(),
                cap,
                frame: Mat::default(),
                scratch: Mat::default(),
                target_size,
            })
        }
    }

    impl CaptureDevice for OpencvCamera {
        fn read(&mut self) -> Result<Option<Frame>, CaptureError> {
            let grabbed = self
                .cap
                .read(&mut self.frame)
                .map_err(|e| CaptureError::Other(e.into()))?;
            if !grabbed || self.frame.empty() {
                return Ok(None);
            }

            let size = self
                .frame
                .size()
                .map_err(|e| CaptureError::Other(e.into()))?;
            let (target_w, target_h) = self.target_size;

            let working = if size.width != target_w as i32 || size.height != target_h as i32 {
                opencv::imgproc::resize(
                    &self.frame,
                    &mut self.scratch,
                    core::Size {
                        width: target_w as i32,
                        height: target_h as i32,
                    },
                    0.0,
                    0.0,
                    opencv::imgproc::INTER_LINEAR,
                )
                .map_err(|e| CaptureError::Other(e.into()))?;
                &self.scratch
            } else {
                &self.frame
            };

            let data = working
                .data_bytes()
                .map_err(|e| CaptureError::Other(e.into()))?
                .to_vec();
            let mut frame = Frame::new(data, target_w, target_h, FrameFormat::Bgr8)?;
            frame.timestamp_ms = Utc::now().timestamp_millis();
            Ok(Some(frame))
        }

        fn release(&mut self) {
            match self.cap.release() {
                Ok(()) => debug!("camera {} released", self.uri),
                Err(err) => warn!("camera {} release failed: {err}", self.uri),
            }
        }

        fn describe(&self) -> String {
            format!(
                "opencv camera {} @ {}x{}",
                self.uri, self.target_size.0, self.target_size.1
            )
        }
    }

    /// Attempt to open a camera input either by index or URI.
    fn open_video_capture(uri: &str) -> Result<VideoCapture, CaptureError> {
        if let Some(index) = parse_device_index(uri) {
            for backend in [videoio::CAP_V4L, videoio::CAP_ANY] {
                match VideoCapture::new(index, backend) {
                    Ok(cap) => {
                        if cap.is_opened().map_err(|e| CaptureError::Other(e.into()))? {
                            return Ok(cap);
                        }
                    }
                    Err(err) => {
                        warn!("failed to open device #{index} with backend {backend}: {err}");
                    }
                }
            }
        }

        for backend in [videoio::CAP_V4L, videoio::CAP_ANY] {
            match VideoCapture::from_file(uri, backend) {
                Ok(cap) => {
                    if cap.is_opened().map_err(|e| CaptureError::Other(e.into()))? {
                        return Ok(cap);
                    }
                }
                Err(err) => {
                    warn!("failed to open {uri} with backend {backend}: {err}");
                }
            }
        }

        Err(CaptureError::Open {
            uri: uri.to_string(),
        })
    }

    /// Apply resolution, fps, and preferred pixel format. Best effort.
    fn configure_camera(cap: &mut VideoCapture, target_size: (u32, u32), fps: f64) {
        let mut fourcc_set = false;
        if let Ok(mjpg) = videoio::VideoWriter::fourcc('M', 'J', 'P', 'G') {
            if matches!(cap.set(videoio::CAP_PROP_FOURCC, mjpg as f64), Ok(true)) {
                fourcc_set = true;
            }
        }
        if !fourcc_set {
            if let Ok(yuyv) = videoio::VideoWriter::fourcc('Y', 'U', 'Y', 'V') {
                let _ = cap.set(videoio::CAP_PROP_FOURCC, yuyv as f64);
            }
        }
        let _ = cap.set(videoio::CAP_PROP_FRAME_WIDTH, target_size.0 as f64);
        let _ = cap.set(videoio::CAP_PROP_FRAME_HEIGHT, target_size.1 as f64);
        let _ = cap.set(videoio::CAP_PROP_FPS, fps);
    }
}
