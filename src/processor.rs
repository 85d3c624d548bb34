//! Boundary to the edge-detection frame processor

use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("processor initialization failed: {0}")]
    Init(String),
}

/// Downstream consumer of canonical frames.
///
/// `initialize` is called once before the first frame and `shutdown` once
/// after the last one.
pub trait FrameProcessor: Send {
    fn initialize(&mut self) -> Result<(), ProcessorError>;

    fn process_frame(&mut self, data: &[u8], width: u32, height: u32);

    fn shutdown(&mut self);
}

/// Processor that only logs what it receives.
#[derive(Debug, Default)]
pub struct LoggingProcessor {
    frames: u64,
}

impl FrameProcessor for LoggingProcessor {
    fn initialize(&mut self) -> Result<(), ProcessorError> {
        info!("Frame processor initialized");
        Ok(())
    }

    fn process_frame(&mut self, data: &[u8], width: u32, height: u32) {
        self.frames += 1;
        debug!("Processing frame: {}x{} ({} bytes)", width, height, data.len());
    }

    fn shutdown(&mut self) {
        info!("Frame processor shut down after {} frames", self.frames);
    }
}

impl<P: FrameProcessor + ?Sized> FrameProcessor for Box<P> {
    fn initialize(&mut self) -> Result<(), ProcessorError> {
        (**self).initialize()
    }

    fn process_frame(&mut self, data: &[u8], width: u32, height: u32) {
        (**self).process_frame(data, width, height)
    }

    fn shutdown(&mut self) {
        (**self).shutdown()
    }
}
