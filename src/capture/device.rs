//! Camera platform abstraction
//!
//! A platform binding (or [`super::virtual_camera::VirtualCamera`]) implements
//! [`CameraBackend`]. Opening a device and configuring a session are
//! asynchronous: results come back through a [`StateCallback`], from whatever
//! thread the platform uses. The frame source forwards every notification onto
//! its worker context before touching any state.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::convert::YuvImage;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CameraError {
    #[error("camera permission not granted")]
    AccessDenied,

    #[error("camera {0} is in use")]
    InUse(String),

    #[error("camera {0} disconnected")]
    Disconnected(String),

    #[error("capture session configuration failed: {0}")]
    ConfigureFailed(String),

    #[error("no back-facing camera found")]
    NoBackCamera,

    #[error("camera {0} offers no output sizes")]
    NoOutputSizes(String),

    #[error("no preview surface set")]
    NoPreviewSurface,

    #[error("{0} is closed")]
    Closed(&'static str),

    #[error("camera platform error: {0}")]
    Platform(String),
}

/// Direction the lens faces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LensFacing {
    Front,
    Back,
    External,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Static properties of one camera
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraCharacteristics {
    /// `None` when the platform does not report it
    pub facing: Option<LensFacing>,
    pub output_sizes: Vec<Size>,
}

/// Opaque handle to something a capture request can target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Surface {
    pub id: u64,
    pub label: String,
}

impl Surface {
    pub fn new(id: u64, label: impl Into<String>) -> Self {
        Self {
            id,
            label: label.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestTemplate {
    Preview,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfMode {
    ContinuousPicture,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AeMode {
    OnAutoFlash,
}

/// Repeating capture request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRequest {
    pub template: RequestTemplate,
    pub targets: Vec<Surface>,
    pub af_mode: Option<AfMode>,
    pub ae_mode: Option<AeMode>,
}

impl CaptureRequest {
    pub fn new(template: RequestTemplate) -> Self {
        Self {
            template,
            targets: Vec::new(),
            af_mode: None,
            ae_mode: None,
        }
    }

    pub fn add_target(&mut self, surface: Surface) {
        self.targets.push(surface);
    }
}

/// Lifecycle notifications for an asynchronously created object.
///
/// Used both for devices (`T = Box<dyn CameraDevice>`) and for capture
/// sessions (`T = Box<dyn CaptureSession>`).
pub trait StateCallback<T>: Send + Sync {
    fn on_ready(&self, value: T);
    fn on_disconnected(&self);
    fn on_error(&self, error: CameraError);
}

/// Receives images from an [`ImageReader`], on a platform thread.
pub trait ImageListener: Send + Sync {
    fn on_image_available(&self, image: YuvImage);
}

pub type DeviceCallback = Arc<dyn StateCallback<Box<dyn CameraDevice>>>;
pub type SessionCallback = Arc<dyn StateCallback<Box<dyn CaptureSession>>>;

pub trait CameraBackend: Send + 'static {
    fn camera_ids(&self) -> Result<Vec<String>, CameraError>;

    fn characteristics(&self, id: &str) -> Result<CameraCharacteristics, CameraError>;

    /// Create a reader producing YUV 4:2:0 images of `size`, holding at most
    /// `max_images` buffers.
    fn create_image_reader(
        &mut self,
        size: Size,
        max_images: usize,
        listener: Arc<dyn ImageListener>,
    ) -> Result<Box<dyn ImageReader>, CameraError>;

    /// Request device access. The outcome arrives through `callback`.
    fn open_camera(&mut self, id: &str, callback: DeviceCallback) -> Result<(), CameraError>;
}

pub trait CameraDevice: Send {
    fn id(&self) -> &str;

    /// Configure a session over `outputs`. The outcome arrives through
    /// `callback`.
    fn create_capture_session(
        &mut self,
        outputs: Vec<Surface>,
        callback: SessionCallback,
    ) -> Result<(), CameraError>;

    fn close(&mut self);
}

pub trait CaptureSession: Send {
    fn set_repeating_request(&mut self, request: CaptureRequest) -> Result<(), CameraError>;

    fn close(&mut self);
}

pub trait ImageReader: Send {
    fn surface(&self) -> Surface;

    fn close(&mut self);
}
