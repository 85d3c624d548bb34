//! In-process camera backend that streams synthetic YUV images
//!
//! Behaves like a platform camera stack: devices open asynchronously, sessions
//! report configuration from another thread, and images arrive from a
//! producer thread at a fixed interval. Faults can be injected to exercise
//! the failure paths of the frame source.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use super::convert::{Plane, YuvImage};
use super::device::{
    CameraBackend, CameraCharacteristics, CameraDevice, CameraError, CaptureRequest,
    CaptureSession, DeviceCallback, ImageListener, ImageReader, LensFacing, SessionCallback, Size,
    Surface,
};

/// One camera the virtual backend exposes.
#[derive(Debug, Clone)]
pub struct VirtualCameraSpec {
    pub id: String,
    pub facing: Option<LensFacing>,
    pub output_sizes: Vec<Size>,
}

impl VirtualCameraSpec {
    pub fn new(id: impl Into<String>, facing: Option<LensFacing>, output_sizes: Vec<Size>) -> Self {
        Self {
            id: id.into(),
            facing,
            output_sizes,
        }
    }
}

/// Failure to inject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// `open_camera` fails immediately, as when permission is missing
    DenyAccess,
    /// Device open reports an in-use error through the callback
    InUse,
    /// Session configuration fails
    FailConfigure,
    /// Starting the repeating request fails
    FailRepeating,
    /// Device disconnects this long after streaming starts
    DisconnectAfter(Duration),
}

/// Counters describing what the backend has been asked to do.
#[derive(Debug, Default)]
pub struct VirtualProbe {
    pub devices_opened: AtomicUsize,
    pub device_close_calls: AtomicUsize,
    pub session_close_calls: AtomicUsize,
    pub reader_close_calls: AtomicUsize,
    pub images_produced: AtomicU64,
    pub last_request: Mutex<Option<CaptureRequest>>,
}

impl VirtualProbe {
    pub fn device_close_calls(&self) -> usize {
        self.device_close_calls.load(Ordering::SeqCst)
    }

    pub fn session_close_calls(&self) -> usize {
        self.session_close_calls.load(Ordering::SeqCst)
    }

    pub fn reader_close_calls(&self) -> usize {
        self.reader_close_calls.load(Ordering::SeqCst)
    }

    pub fn devices_opened(&self) -> usize {
        self.devices_opened.load(Ordering::SeqCst)
    }

    pub fn images_produced(&self) -> u64 {
        self.images_produced.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<CaptureRequest> {
        lock(&self.last_request).clone()
    }
}

struct ReaderEntry {
    size: Size,
    listener: Arc<dyn ImageListener>,
    open: Arc<AtomicBool>,
}

#[derive(Default)]
struct Registry {
    next_surface: AtomicU64,
    readers: Mutex<HashMap<u64, ReaderEntry>>,
}

pub struct VirtualCamera {
    cameras: Vec<VirtualCameraSpec>,
    open_delay: Duration,
    frame_interval: Duration,
    fault: Option<Fault>,
    registry: Arc<Registry>,
    probe: Arc<VirtualProbe>,
}

impl VirtualCamera {
    pub fn new(cameras: Vec<VirtualCameraSpec>) -> Self {
        Self {
            cameras,
            open_delay: Duration::from_millis(5),
            frame_interval: Duration::from_millis(33),
            fault: None,
            registry: Arc::default(),
            probe: Arc::default(),
        }
    }

    /// A front camera and a back camera offering `size` among others.
    pub fn with_back_camera(size: Size) -> Self {
        Self::new(vec![
            VirtualCameraSpec::new("0", Some(LensFacing::Front), vec![Size::new(1280, 720)]),
            VirtualCameraSpec::new(
                "1",
                Some(LensFacing::Back),
                vec![Size::new(1920, 1080), size, Size::new(320, 240)],
            ),
        ])
    }

    pub fn with_fault(mut self, fault: Fault) -> Self {
        self.fault = Some(fault);
        self
    }

    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval;
        self
    }

    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    pub fn probe(&self) -> Arc<VirtualProbe> {
        self.probe.clone()
    }

    fn spec(&self, id: &str) -> Result<&VirtualCameraSpec, CameraError> {
        self.cameras
            .iter()
            .find(|c| c.id == id)
            .ok_or_else(|| CameraError::Platform(format!("unknown camera id {id}")))
    }
}

impl CameraBackend for VirtualCamera {
    fn camera_ids(&self) -> Result<Vec<String>, CameraError> {
        Ok(self.cameras.iter().map(|c| c.id.clone()).collect())
    }

    fn characteristics(&self, id: &str) -> Result<CameraCharacteristics, CameraError> {
        let spec = self.spec(id)?;
        Ok(CameraCharacteristics {
            facing: spec.facing,
            output_sizes: spec.output_sizes.clone(),
        })
    }

    fn create_image_reader(
        &mut self,
        size: Size,
        max_images: usize,
        listener: Arc<dyn ImageListener>,
    ) -> Result<Box<dyn ImageReader>, CameraError> {
        let id = self.registry.next_surface.fetch_add(1, Ordering::Relaxed) + 1;
        let open = Arc::new(AtomicBool::new(true));
        lock(&self.registry.readers).insert(
            id,
            ReaderEntry {
                size,
                listener,
                open: open.clone(),
            },
        );
        debug!("Image reader {} created at {} ({} images)", id, size, max_images);

        Ok(Box::new(VirtualImageReader {
            surface: Surface::new(id, "image-reader"),
            registry: self.registry.clone(),
            open,
            probe: self.probe.clone(),
        }))
    }

    fn open_camera(&mut self, id: &str, callback: DeviceCallback) -> Result<(), CameraError> {
        self.spec(id)?;
        if self.fault == Some(Fault::DenyAccess) {
            return Err(CameraError::AccessDenied);
        }

        let device = VirtualDevice {
            id: id.to_string(),
            open: Arc::new(AtomicBool::new(true)),
            callback: callback.clone(),
            fault: self.fault,
            delay: self.open_delay,
            frame_interval: self.frame_interval,
            registry: self.registry.clone(),
            probe: self.probe.clone(),
        };
        let delay = self.open_delay;
        let in_use = self.fault == Some(Fault::InUse);
        let probe = self.probe.clone();

        thread::spawn(move || {
            thread::sleep(delay);
            if in_use {
                callback.on_error(CameraError::InUse(device.id.clone()));
            } else {
                probe.devices_opened.fetch_add(1, Ordering::SeqCst);
                callback.on_ready(Box::new(device));
            }
        });
        Ok(())
    }
}

struct VirtualImageReader {
    surface: Surface,
    registry: Arc<Registry>,
    open: Arc<AtomicBool>,
    probe: Arc<VirtualProbe>,
}

impl ImageReader for VirtualImageReader {
    fn surface(&self) -> Surface {
        self.surface.clone()
    }

    fn close(&mut self) {
        self.probe.reader_close_calls.fetch_add(1, Ordering::SeqCst);
        self.open.store(false, Ordering::SeqCst);
        lock(&self.registry.readers).remove(&self.surface.id);
    }
}

struct VirtualDevice {
    id: String,
    open: Arc<AtomicBool>,
    callback: DeviceCallback,
    fault: Option<Fault>,
    delay: Duration,
    frame_interval: Duration,
    registry: Arc<Registry>,
    probe: Arc<VirtualProbe>,
}

impl CameraDevice for VirtualDevice {
    fn id(&self) -> &str {
        &self.id
    }

    fn create_capture_session(
        &mut self,
        outputs: Vec<Surface>,
        callback: SessionCallback,
    ) -> Result<(), CameraError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(CameraError::Closed("camera device"));
        }

        let session = VirtualSession {
            outputs,
            device_open: self.open.clone(),
            device_callback: self.callback.clone(),
            fault: self.fault,
            frame_interval: self.frame_interval,
            registry: self.registry.clone(),
            probe: self.probe.clone(),
            stop: Arc::new(AtomicBool::new(false)),
            producer: None,
        };
        let delay = self.delay;
        let fail = self.fault == Some(Fault::FailConfigure);

        thread::spawn(move || {
            thread::sleep(delay);
            if fail {
                callback.on_error(CameraError::ConfigureFailed("unsupported output set".into()));
            } else {
                callback.on_ready(Box::new(session));
            }
        });
        Ok(())
    }

    fn close(&mut self) {
        self.probe.device_close_calls.fetch_add(1, Ordering::SeqCst);
        self.open.store(false, Ordering::SeqCst);
    }
}

struct VirtualSession {
    outputs: Vec<Surface>,
    device_open: Arc<AtomicBool>,
    device_callback: DeviceCallback,
    fault: Option<Fault>,
    frame_interval: Duration,
    registry: Arc<Registry>,
    probe: Arc<VirtualProbe>,
    stop: Arc<AtomicBool>,
    producer: Option<JoinHandle<()>>,
}

impl CaptureSession for VirtualSession {
    fn set_repeating_request(&mut self, request: CaptureRequest) -> Result<(), CameraError> {
        if self.fault == Some(Fault::FailRepeating) {
            return Err(CameraError::Platform("repeating request rejected".into()));
        }
        if let Some(target) = request.targets.iter().find(|t| !self.outputs.contains(t)) {
            return Err(CameraError::Platform(format!(
                "surface {} is not a session output",
                target.id
            )));
        }

        let readers = lock(&self.registry.readers);
        let sinks: Vec<(Size, Arc<dyn ImageListener>, Arc<AtomicBool>)> = request
            .targets
            .iter()
            .filter_map(|t| readers.get(&t.id))
            .map(|r| (r.size, r.listener.clone(), r.open.clone()))
            .collect();
        drop(readers);
        *lock(&self.probe.last_request) = Some(request);

        let stop = self.stop.clone();
        let device_open = self.device_open.clone();
        let device_callback = self.device_callback.clone();
        let interval = self.frame_interval;
        let disconnect_after = match self.fault {
            Some(Fault::DisconnectAfter(after)) => Some(after),
            _ => None,
        };
        let probe = self.probe.clone();

        self.producer = Some(thread::spawn(move || {
            let mut index = 0u64;
            let mut streamed = Duration::ZERO;
            while !stop.load(Ordering::SeqCst) && device_open.load(Ordering::SeqCst) {
                if disconnect_after.is_some_and(|after| streamed >= after) {
                    device_callback.on_disconnected();
                    return;
                }
                for (size, listener, open) in &sinks {
                    if open.load(Ordering::SeqCst) {
                        listener.on_image_available(synthetic_image(*size, index));
                        probe.images_produced.fetch_add(1, Ordering::SeqCst);
                    }
                }
                index += 1;
                thread::sleep(interval);
                streamed += interval;
            }
        }));
        Ok(())
    }

    fn close(&mut self) {
        self.probe.session_close_calls.fetch_add(1, Ordering::SeqCst);
        self.stop.store(true, Ordering::SeqCst);
        if let Some(producer) = self.producer.take() {
            if producer.join().is_err() {
                warn!("Virtual camera producer panicked");
            }
        }
    }
}

impl Drop for VirtualSession {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

/// Image number `index` of the virtual stream: a luma ramp that scrolls by
/// four columns per image, with chroma planes at `(w/2)*(h/2)` bytes each.
pub fn synthetic_image(size: Size, index: u64) -> YuvImage {
    let (w, h) = (size.width as usize, size.height as usize);
    let shift = (index * 4) as usize;

    let mut y = Vec::with_capacity(w * h);
    for _ in 0..h {
        y.extend((0..w).map(|x| ((x + shift) % 256) as u8));
    }
    let chroma = (w / 2) * (h / 2);
    let u = vec![(index % 256) as u8; chroma];
    let v = vec![(255 - index % 256) as u8; chroma];

    YuvImage::new(
        size.width,
        size.height,
        Plane::new(y),
        Plane::new(u),
        Plane::new(v),
    )
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
