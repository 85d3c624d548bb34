pub mod convert;
pub mod device;
pub mod frame;
pub mod pattern;
pub mod source;
pub mod virtual_camera;

pub use convert::{Plane, YuvImage};
pub use frame::{Frame, FrameMetadata, FrameOrigin};
pub use source::{FrameSource, SessionState, SourceMode, SourceStatus};
pub use virtual_camera::VirtualCamera;
