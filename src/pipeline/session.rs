//! Wires a frame source to a processor for the lifetime of a capture run

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info};

use super::delivery::DeliveryStats;
use super::fps::FpsCounter;
use super::worker::WorkerError;
use crate::capture::device::CameraBackend;
use crate::capture::{Frame, FrameSource, SourceStatus};
use crate::processor::{FrameProcessor, ProcessorError};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Processor(#[from] ProcessorError),

    #[error(transparent)]
    Worker(#[from] WorkerError),
}

struct Consumer {
    processor: Box<dyn FrameProcessor>,
    fps: FpsCounter,
}

impl Consumer {
    fn on_frame(&mut self, frame: &Frame) {
        if let Some(fps) = self.fps.record(frame.timestamp) {
            debug!("FPS: {:.1}", fps);
        }
        self.processor
            .process_frame(&frame.data, frame.width(), frame.height());
    }
}

/// A running capture: the processor is initialized before the first frame
/// and shut down after the last one.
pub struct ProcessingSession<B: CameraBackend> {
    source: FrameSource<B>,
    consumer: Arc<Mutex<Consumer>>,
    shut_down: bool,
}

impl<B: CameraBackend> ProcessingSession<B> {
    pub fn start<P>(
        mut source: FrameSource<B>,
        mut processor: P,
        fps_window: Duration,
    ) -> Result<Self, SessionError>
    where
        P: FrameProcessor + 'static,
    {
        processor.initialize()?;

        let consumer = Arc::new(Mutex::new(Consumer {
            processor: Box::new(processor),
            fps: FpsCounter::new(fps_window),
        }));
        let sink = consumer.clone();
        source.set_frame_callback(move |frame| lock(&sink).on_frame(frame));

        if let Err(e) = source.open() {
            source.delivery().clear_callback();
            lock(&consumer).processor.shutdown();
            return Err(e.into());
        }

        info!("Processing session started ({:?} mode)", source.status().mode);
        Ok(Self {
            source,
            consumer,
            shut_down: false,
        })
    }

    /// Latest FPS estimate; `0.0` until a full window has passed.
    pub fn fps(&self) -> f64 {
        lock(&self.consumer).fps.current()
    }

    pub fn status(&self) -> SourceStatus {
        self.source.status()
    }

    pub fn delivery_stats(&self) -> DeliveryStats {
        self.source.delivery().stats()
    }

    pub fn source(&self) -> &FrameSource<B> {
        &self.source
    }

    /// Close the camera, stop the worker, then shut the processor down.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;

        let started = Instant::now();
        self.source.close();
        self.source.delivery().clear_callback();
        self.source.stop_worker();
        lock(&self.consumer).processor.shutdown();
        info!("Processing session stopped in {:?}", started.elapsed());
    }
}

impl<B: CameraBackend> Drop for ProcessingSession<B> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn lock(consumer: &Mutex<Consumer>) -> MutexGuard<'_, Consumer> {
    consumer
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
