//! Live capture from a local camera through OpenCV

use crate::camera::FrameSource;
use crate::config::CameraConfig;
use crate::error::VisionError;
use async_trait::async_trait;
use chrono::Utc;
use opencv::{
    core::Mat,
    imgproc,
    prelude::*,
    videoio::{
        VideoCapture, CAP_ANY, CAP_PROP_EXPOSURE, CAP_PROP_FPS, CAP_PROP_FRAME_HEIGHT,
        CAP_PROP_FRAME_WIDTH, CAP_PROP_GAIN,
    },
};
use radropi_core::{Frame, PixelFormat};
use tracing::{debug, info, warn};

/// Settings pushed to the driver when the camera opens
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureSettings {
    pub camera_id: u32,
    pub resolution: (u32, u32),
    pub frame_rate: u32,
    pub exposure: Option<f64>,
    pub gain: Option<f64>,
}

impl From<&CameraConfig> for CaptureSettings {
    fn from(config: &CameraConfig) -> Self {
        Self {
            camera_id: config.camera_id,
            resolution: config.resolution,
            frame_rate: config.frame_rate,
            exposure: config.exposure,
            gain: config.gain,
        }
    }
}

impl CaptureSettings {
    /// Driver properties in the order they are applied
    pub fn properties(&self) -> Vec<(i32, f64, &'static str)> {
        let mut props = vec![
            (CAP_PROP_FRAME_WIDTH, self.resolution.0 as f64, "width"),
            (CAP_PROP_FRAME_HEIGHT, self.resolution.1 as f64, "height"),
            (CAP_PROP_FPS, self.frame_rate as f64, "fps"),
        ];
        if let Some(exposure) = self.exposure {
            props.push((CAP_PROP_EXPOSURE, exposure, "exposure"));
        }
        if let Some(gain) = self.gain {
            props.push((CAP_PROP_GAIN, gain, "gain"));
        }
        props
    }
}

/// Frames read from camera `camera_id`, converted to 8-bit luminance.
///
/// The driver paces the stream; reads run on the blocking pool.
pub struct CaptureFrameSource {
    settings: CaptureSettings,
    capture: Option<VideoCapture>,
    sequence: u64,
}

impl CaptureFrameSource {
    pub fn new(config: &CameraConfig) -> Self {
        Self {
            settings: CaptureSettings::from(config),
            capture: None,
            sequence: 0,
        }
    }

    pub fn settings(&self) -> &CaptureSettings {
        &self.settings
    }

    fn open_device(settings: CaptureSettings) -> Result<VideoCapture, VisionError> {
        let id = settings.camera_id;
        let mut capture = VideoCapture::new(id as i32, CAP_ANY)
            .map_err(|e| VisionError::Camera(format!("Failed to open camera {}: {}", id, e)))?;
        let opened = capture
            .is_opened()
            .map_err(|e| VisionError::Camera(format!("Camera {} not opened: {}", id, e)))?;
        if !opened {
            return Err(VisionError::Camera(format!("Camera {} failed to open", id)));
        }

        for (prop, value, label) in settings.properties() {
            // drivers may refuse a property; the stream still works
            match capture.set(prop, value) {
                Ok(true) => {}
                Ok(false) => warn!("Camera {} ignored {} = {}", id, label, value),
                Err(e) => warn!("Failed to set {} on camera {}: {}", label, id, e),
            }
        }
        Ok(capture)
    }

    /// Grab one frame and reduce it to a single luma plane
    fn read_luma(capture: &mut VideoCapture) -> Result<(u32, u32, Vec<u8>), VisionError> {
        let mut raw = Mat::default();
        let grabbed = capture
            .read(&mut raw)
            .map_err(|e| VisionError::Camera(format!("Camera read failed: {}", e)))?;
        let size = raw
            .size()
            .map_err(|e| VisionError::Frame(format!("Unreadable frame: {}", e)))?;
        if !grabbed || size.width <= 0 || size.height <= 0 {
            return Err(VisionError::Frame("Camera returned an empty frame".to_string()));
        }

        let gray = if raw.channels() == 1 {
            raw
        } else {
            let mut gray = Mat::default();
            imgproc::cvt_color(&raw, &mut gray, imgproc::COLOR_BGR2GRAY, 0)
                .map_err(|e| VisionError::Frame(format!("Grayscale conversion failed: {}", e)))?;
            gray
        };
        let gray = if gray.is_continuous() {
            gray
        } else {
            gray.try_clone()
                .map_err(|e| VisionError::Frame(format!("Frame copy failed: {}", e)))?
        };
        let data = gray
            .data_bytes()
            .map_err(|e| VisionError::Frame(format!("Frame data unavailable: {}", e)))?
            .to_vec();
        Ok((size.width as u32, size.height as u32, data))
    }
}

#[async_trait]
impl FrameSource for CaptureFrameSource {
    fn name(&self) -> &str {
        "camera"
    }

    async fn open(&mut self) -> Result<(), VisionError> {
        if self.capture.is_some() {
            return Ok(());
        }
        let settings = self.settings;
        let capture = tokio::task::spawn_blocking(move || Self::open_device(settings))
            .await
            .map_err(|e| VisionError::Camera(format!("Camera open task failed: {}", e)))??;

        info!(
            "Camera {} opened at {}x{} @ {}fps",
            settings.camera_id, settings.resolution.0, settings.resolution.1, settings.frame_rate
        );
        self.capture = Some(capture);
        self.sequence = 0;
        Ok(())
    }

    async fn next_frame(&mut self) -> Result<Option<Frame>, VisionError> {
        let Some(mut capture) = self.capture.take() else {
            return Err(VisionError::Camera("Camera is not open".to_string()));
        };

        let joined = tokio::task::spawn_blocking(move || {
            let result = Self::read_luma(&mut capture);
            (capture, result)
        })
        .await;
        let (capture, result) =
            joined.map_err(|e| VisionError::Camera(format!("Camera read task failed: {}", e)))?;
        self.capture = Some(capture);

        let (width, height, data) = result?;
        let sequence = self.sequence;
        self.sequence += 1;
        debug!("Captured frame {} ({}x{})", sequence, width, height);
        Ok(Some(Frame::new(
            sequence,
            width,
            height,
            PixelFormat::Gray8,
            data,
            Utc::now(),
        )))
    }

    async fn close(&mut self) -> Result<(), VisionError> {
        if let Some(mut capture) = self.capture.take() {
            if let Err(e) = capture.release() {
                warn!("Camera {} release failed: {}", self.settings.camera_id, e);
            }
            info!(
                "Camera {} closed after {} frames",
                self.settings.camera_id, self.sequence
            );
        }
        Ok(())
    }
}
