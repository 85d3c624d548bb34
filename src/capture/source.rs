//! Frame source controller
//!
//! Switches between a live camera and the synthetic test pattern, never
//! running both. All capture state lives in [`SourceState`], which is owned by
//! the worker thread while it runs: device callbacks, session callbacks,
//! image-ready notifications and the mock timer all execute there, one at a
//! time. Other threads only see the published [`SourceStatus`] snapshot.

use std::sync::Arc;

use arc_swap::{ArcSwap, ArcSwapOption};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, trace, warn};

use super::convert::YuvImage;
use super::device::{
    AeMode, AfMode, CameraBackend, CameraDevice, CameraError, CaptureRequest, CaptureSession,
    ImageListener, ImageReader, RequestTemplate, Size, StateCallback, Surface,
};
use super::frame::Frame;
use super::pattern;
use crate::pipeline::delivery::FrameDelivery;
use crate::pipeline::worker::{Worker, WorkerError, WorkerHandle};
use crate::utils;
use crate::CaptureConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceMode {
    /// Synthetic test pattern on a timer
    Mock,
    /// Physical camera
    Live,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    /// Waiting for the device to open and the session to configure
    Opening,
    Active,
}

/// Snapshot of the controller, readable from any thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceStatus {
    pub mode: SourceMode,
    pub session: SessionState,
    pub frames_produced: u64,
}

type SourceWorker<B> = WorkerHandle<SourceState<B>>;

/// Capture state. Only ever touched on the worker thread.
struct SourceState<B> {
    backend: B,
    config: CaptureConfig,
    mode: SourceMode,
    session: SessionState,
    preview: Option<Surface>,
    device: Option<Box<dyn CameraDevice>>,
    capture_session: Option<Box<dyn CaptureSession>>,
    reader: Option<Box<dyn ImageReader>>,
    /// Bumped on every release so callbacks from an earlier open are ignored
    attempt: u64,
    sequence: u64,
    delivery: FrameDelivery,
    status: Arc<ArcSwap<SourceStatus>>,
}

impl<B: CameraBackend> SourceState<B> {
    fn publish(&self) {
        self.status.store(Arc::new(SourceStatus {
            mode: self.mode,
            session: self.session,
            frames_produced: self.sequence,
        }));
    }

    fn set_session(&mut self, session: SessionState) {
        if self.session != session {
            debug!("Session {:?} -> {:?}", self.session, session);
            self.session = session;
        }
        self.publish();
    }

    fn set_mode(&mut self, mode: SourceMode) {
        if self.mode == mode {
            return;
        }
        if self.session != SessionState::Closed {
            info!("Switching to {:?} mode, closing current {:?} source", mode, self.mode);
            self.release_all();
        }
        self.mode = mode;
        self.publish();
    }

    fn open(&mut self, worker: &SourceWorker<B>) {
        if self.session != SessionState::Closed {
            warn!("open() ignored, session is already {:?}", self.session);
            return;
        }

        match self.mode {
            SourceMode::Mock => self.start_mock(worker),
            SourceMode::Live => {
                if let Err(e) = self.open_live(worker) {
                    error!("Failed to open camera: {}", e);
                    self.release_all();
                }
            }
        }
    }

    fn start_mock(&mut self, worker: &SourceWorker<B>) {
        info!(
            "Mock frame generation at {}x{} every {:?}",
            self.config.target_width,
            self.config.target_height,
            self.config.mock_period()
        );
        self.set_session(SessionState::Active);
        worker.post_cancellable(Self::mock_tick);
    }

    fn generating(&self) -> bool {
        self.mode == SourceMode::Mock && self.session == SessionState::Active
    }

    /// One mock cycle: generate, deliver, then schedule the next one while
    /// still generating.
    fn mock_tick(&mut self, worker: &SourceWorker<B>) {
        if !self.generating() {
            return;
        }

        self.sequence += 1;
        let frame = pattern::mock_frame(
            self.config.target_width,
            self.config.target_height,
            self.sequence,
        );
        self.delivery.deliver(&frame);
        self.publish();

        if self.generating() {
            worker.post_delayed(self.config.mock_period(), Self::mock_tick);
        }
    }

    #[instrument(skip(self, worker))]
    fn open_live(&mut self, worker: &SourceWorker<B>) -> Result<(), CameraError> {
        let target = Size::new(self.config.target_width, self.config.target_height);
        let camera = utils::find_back_camera(&self.backend, target)?;

        let listener = Arc::new(ImageSlot {
            latest: Arc::new(ArcSwapOption::empty()),
            attempt: self.attempt,
            worker: worker.clone(),
            delivery: self.delivery.clone(),
        });
        self.reader = Some(self.backend.create_image_reader(
            camera.size,
            self.config.max_images,
            listener,
        )?);

        self.set_session(SessionState::Opening);
        let callback = Arc::new(DeviceEvents {
            attempt: self.attempt,
            worker: worker.clone(),
        });
        self.backend.open_camera(&camera.id, callback)?;
        info!("Requested camera {} at {}", camera.id, camera.size);
        Ok(())
    }

    fn session_outputs(&self) -> Result<Vec<Surface>, CameraError> {
        let preview = self.preview.clone().ok_or(CameraError::NoPreviewSurface)?;
        let reader = self
            .reader
            .as_ref()
            .ok_or(CameraError::Closed("image reader"))?;
        Ok(vec![preview, reader.surface()])
    }

    fn on_device_opened(
        &mut self,
        attempt: u64,
        mut device: Box<dyn CameraDevice>,
        worker: &SourceWorker<B>,
    ) {
        if attempt != self.attempt || self.session != SessionState::Opening {
            debug!("Closing camera {} that opened after close()", device.id());
            device.close();
            return;
        }
        info!("Camera {} opened", device.id());

        let outputs = match self.session_outputs() {
            Ok(outputs) => outputs,
            Err(e) => {
                error!("Cannot configure capture session: {}", e);
                self.device = Some(device);
                self.release_all();
                return;
            }
        };

        let callback = Arc::new(SessionEvents {
            attempt,
            worker: worker.clone(),
        });
        let result = device.create_capture_session(outputs, callback);
        self.device = Some(device);
        if let Err(e) = result {
            error!("Camera access error creating capture session: {}", e);
            self.release_all();
        }
    }

    fn on_session_configured(&mut self, attempt: u64, mut session: Box<dyn CaptureSession>) {
        if attempt != self.attempt
            || self.device.is_none()
            || self.session != SessionState::Opening
        {
            debug!("Closing capture session configured after close()");
            session.close();
            return;
        }

        let mut request = CaptureRequest::new(RequestTemplate::Preview);
        match self.session_outputs() {
            Ok(outputs) => outputs.into_iter().for_each(|s| request.add_target(s)),
            Err(e) => {
                error!("Capture targets vanished: {}", e);
                session.close();
                self.release_all();
                return;
            }
        }
        request.af_mode = Some(AfMode::ContinuousPicture);
        request.ae_mode = Some(AeMode::OnAutoFlash);

        if let Err(e) = session.set_repeating_request(request) {
            error!("Failed to start camera preview: {}", e);
            session.close();
            self.release_all();
            return;
        }

        self.capture_session = Some(session);
        self.set_session(SessionState::Active);
        info!("Capture session active");
    }

    fn on_session_failed(&mut self, attempt: u64, error: CameraError) {
        if attempt != self.attempt || self.session == SessionState::Closed {
            debug!("Ignoring stale session failure: {}", error);
            return;
        }
        error!("Failed to configure camera session: {}", error);
        self.release_all();
    }

    fn on_device_lost(&mut self, attempt: u64, error: CameraError) {
        if attempt != self.attempt || self.session == SessionState::Closed {
            debug!("Ignoring stale device notification: {}", error);
            return;
        }
        error!("Camera device lost: {}", error);
        self.release_all();
    }

    fn on_image_ready(&mut self, attempt: u64, latest: &ArcSwapOption<YuvImage>) {
        let Some(image) = latest.swap(None) else {
            return;
        };
        if attempt != self.attempt
            || self.mode != SourceMode::Live
            || self.session != SessionState::Active
        {
            trace!("Dropping image outside an active live session");
            return;
        }

        self.sequence += 1;
        let converted = image.to_frame(self.sequence);
        // Release the camera buffer before handing the frame on
        drop(image);

        match converted {
            Ok(frame) => {
                self.delivery.deliver(&frame);
                self.publish();
            }
            Err(e) => {
                metrics::counter!("convert_errors_total").increment(1);
                error!("Dropping malformed camera image: {}", e);
            }
        }
    }

    /// Close the capture session, the device and the image reader, in that
    /// order, and return to `Closed`. Safe to call in any state.
    fn release_all(&mut self) {
        if let Some(mut session) = self.capture_session.take() {
            session.close();
        }
        if let Some(mut device) = self.device.take() {
            debug!("Closing camera {}", device.id());
            device.close();
        }
        if let Some(mut reader) = self.reader.take() {
            reader.close();
        }
        if self.session != SessionState::Closed {
            self.attempt += 1;
        }
        self.set_session(SessionState::Closed);
    }
}

/// Device notifications, forwarded to the worker.
struct DeviceEvents<B> {
    attempt: u64,
    worker: SourceWorker<B>,
}

impl<B: CameraBackend> StateCallback<Box<dyn CameraDevice>> for DeviceEvents<B> {
    fn on_ready(&self, device: Box<dyn CameraDevice>) {
        let attempt = self.attempt;
        if !self
            .worker
            .post(move |state, worker| state.on_device_opened(attempt, device, worker))
        {
            warn!("Camera opened after the worker stopped");
        }
    }

    fn on_disconnected(&self) {
        let attempt = self.attempt;
        self.worker.post(move |state, _| {
            let id = state.device.as_ref().map(|d| d.id().to_string());
            state.on_device_lost(attempt, CameraError::Disconnected(id.unwrap_or_default()))
        });
    }

    fn on_error(&self, error: CameraError) {
        let attempt = self.attempt;
        self.worker
            .post(move |state, _| state.on_device_lost(attempt, error));
    }
}

/// Session notifications, forwarded to the worker.
struct SessionEvents<B> {
    attempt: u64,
    worker: SourceWorker<B>,
}

impl<B: CameraBackend> StateCallback<Box<dyn CaptureSession>> for SessionEvents<B> {
    fn on_ready(&self, session: Box<dyn CaptureSession>) {
        let attempt = self.attempt;
        if !self
            .worker
            .post(move |state, _| state.on_session_configured(attempt, session))
        {
            warn!("Capture session configured after the worker stopped");
        }
    }

    fn on_disconnected(&self) {
        let attempt = self.attempt;
        self.worker.post(move |state, _| {
            state.on_session_failed(attempt, CameraError::Closed("capture session"))
        });
    }

    fn on_error(&self, error: CameraError) {
        let attempt = self.attempt;
        self.worker
            .post(move |state, _| state.on_session_failed(attempt, error));
    }
}

/// Most-recent-wins handoff from the image reader to the worker.
///
/// A new image replaces one that has not been picked up yet; a task is only
/// posted when the slot goes from empty to full.
struct ImageSlot<B> {
    latest: Arc<ArcSwapOption<YuvImage>>,
    attempt: u64,
    worker: SourceWorker<B>,
    delivery: FrameDelivery,
}

impl<B: CameraBackend> ImageListener for ImageSlot<B> {
    fn on_image_available(&self, image: YuvImage) {
        if self.latest.swap(Some(Arc::new(image))).is_some() {
            self.delivery.record_overwritten();
            return;
        }
        let attempt = self.attempt;
        let latest = self.latest.clone();
        self.worker
            .post(move |state, _| state.on_image_ready(attempt, &latest));
    }
}

/// Controller for one frame source.
///
/// The source owns its worker context. While the worker runs, the capture
/// state lives on it; when stopped, the state is parked here.
pub struct FrameSource<B: CameraBackend> {
    config: CaptureConfig,
    delivery: FrameDelivery,
    status: Arc<ArcSwap<SourceStatus>>,
    worker: Option<Worker<SourceState<B>>>,
    parked: Option<SourceState<B>>,
}

impl<B: CameraBackend> FrameSource<B> {
    pub fn new(backend: B, config: CaptureConfig) -> Self {
        let delivery = FrameDelivery::new();
        let status = Arc::new(ArcSwap::from_pointee(SourceStatus {
            mode: config.mode,
            session: SessionState::Closed,
            frames_produced: 0,
        }));

        let state = SourceState {
            backend,
            config: config.clone(),
            mode: config.mode,
            session: SessionState::Closed,
            preview: None,
            device: None,
            capture_session: None,
            reader: None,
            attempt: 0,
            sequence: 0,
            delivery: delivery.clone(),
            status: status.clone(),
        };

        Self {
            config,
            delivery,
            status,
            worker: None,
            parked: Some(state),
        }
    }

    pub fn delivery(&self) -> &FrameDelivery {
        &self.delivery
    }

    /// Register the frame consumer. Replaces any earlier one.
    pub fn set_frame_callback<F>(&self, callback: F)
    where
        F: Fn(&Frame) + Send + Sync + 'static,
    {
        self.delivery.set_callback(callback);
    }

    pub fn status(&self) -> SourceStatus {
        **self.status.load()
    }

    pub fn is_worker_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Start the worker context.
    pub fn start_worker(&mut self) -> Result<(), WorkerError> {
        if self.worker.is_some() {
            return Err(WorkerError::AlreadyRunning);
        }
        let state = self.parked.take().ok_or(WorkerError::StateLost)?;

        match Worker::spawn(self.config.worker_name.clone(), state) {
            Ok(worker) => {
                self.worker = Some(worker);
                Ok(())
            }
            Err((e, state)) => {
                self.parked = state;
                Err(e)
            }
        }
    }

    /// Stop the worker after it drains its queue, and wait for it.
    ///
    /// Anything still open is released: its callbacks and the mock timer
    /// cannot run without the worker.
    pub fn stop_worker(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        match worker.join() {
            Ok(mut state) => {
                if state.session != SessionState::Closed {
                    warn!("Worker stopped with a {:?} session, releasing it", state.session);
                    state.release_all();
                }
                self.parked = Some(state);
            }
            Err(e) => error!("Error stopping worker: {}", e),
        }
    }

    pub fn set_mode(&mut self, mode: SourceMode) {
        self.with_state(move |state| state.set_mode(mode));
    }

    pub fn set_preview_surface(&mut self, surface: Surface) {
        self.with_state(move |state| state.preview = Some(surface));
    }

    /// Switch to the synthetic source and open it.
    pub fn enable_mock_mode(&mut self) -> Result<(), WorkerError> {
        info!("Mock camera mode enabled");
        self.set_mode(SourceMode::Mock);
        self.open()
    }

    /// Open the source for the current mode, starting the worker if needed.
    ///
    /// Live-mode failures are reported through logs and the status, which
    /// returns to `Closed`.
    pub fn open(&mut self) -> Result<(), WorkerError> {
        if self.worker.is_none() {
            self.start_worker()?;
        }
        if let Some(worker) = &self.worker {
            worker.handle().post(|state, worker| state.open(worker));
        }
        Ok(())
    }

    /// Stop producing frames and release every camera resource.
    ///
    /// Idempotent. Off the worker thread this waits for the teardown to run,
    /// so no frame is delivered once it returns.
    pub fn close(&mut self) {
        let Some(worker) = &self.worker else {
            if let Some(state) = self.parked.as_mut() {
                state.release_all();
            }
            return;
        };
        let handle = worker.handle();
        handle.remove_pending();

        if handle.is_worker_thread() {
            handle.post(|state, _| state.release_all());
            return;
        }

        let (done_tx, done_rx) = flume::bounded(1);
        let posted = handle.post(move |state, _| {
            state.release_all();
            let _ = done_tx.send(());
        });
        if !posted {
            warn!("Worker already stopped, nothing to close");
            return;
        }
        if done_rx.recv_timeout(self.config.close_timeout()).is_err() {
            warn!(
                "Timed out after {:?} waiting for capture teardown",
                self.config.close_timeout()
            );
        }
    }

    fn with_state<F>(&mut self, f: F)
    where
        F: FnOnce(&mut SourceState<B>) + Send + 'static,
    {
        if let Some(worker) = &self.worker {
            worker.handle().post(move |state, _| f(state));
        } else if let Some(state) = self.parked.as_mut() {
            f(state);
        }
    }
}

impl<B: CameraBackend> Drop for FrameSource<B> {
    fn drop(&mut self) {
        self.close();
        self.stop_worker();
    }
}
