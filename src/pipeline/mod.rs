pub mod delivery;
pub mod fps;
pub mod session;
pub mod worker;

pub use delivery::{DeliveryStats, FrameDelivery};
pub use fps::FpsCounter;
pub use session::{ProcessingSession, SessionError};
pub use worker::{Worker, WorkerError, WorkerHandle};
