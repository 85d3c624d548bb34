//! Single-callback frame delivery

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use crossbeam::utils::CachePadded;
use tracing::{debug, trace};

use crate::capture::Frame;

pub type FrameCallback = Box<dyn Fn(&Frame) + Send + Sync>;

/// Hands each produced frame to at most one registered consumer.
///
/// The callback runs synchronously on the worker context and only borrows the
/// frame. Registering a new callback replaces the old one. Without a callback
/// frames are dropped, never buffered.
#[derive(Clone, Default)]
pub struct FrameDelivery {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    callback: ArcSwapOption<FrameCallback>,
    stats: CachePadded<Stats>,
}

#[derive(Default)]
struct Stats {
    delivered: AtomicU64,
    dropped: AtomicU64,
    overwritten: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    /// Frames handed to a callback
    pub delivered: u64,
    /// Frames produced while no callback was registered
    pub dropped: u64,
    /// Camera images replaced by a newer one before they were converted
    pub overwritten: u64,
}

impl FrameDelivery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_callback<F>(&self, callback: F)
    where
        F: Fn(&Frame) + Send + Sync + 'static,
    {
        let boxed: FrameCallback = Box::new(callback);
        if self.inner.callback.swap(Some(Arc::new(boxed))).is_some() {
            debug!("Replaced frame callback");
        }
    }

    pub fn clear_callback(&self) {
        self.inner.callback.store(None);
    }

    pub fn has_callback(&self) -> bool {
        self.inner.callback.load().is_some()
    }

    /// Invoke the callback with `frame`. Returns whether anyone received it.
    pub fn deliver(&self, frame: &Frame) -> bool {
        let Some(callback) = self.inner.callback.load_full() else {
            self.inner.stats.dropped.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("frames_dropped_total").increment(1);
            trace!("No frame callback, dropping frame {}", frame.meta.sequence);
            return false;
        };

        (callback.as_ref())(frame);
        self.inner.stats.delivered.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("frames_delivered_total").increment(1);
        true
    }

    pub(crate) fn record_overwritten(&self) {
        self.inner.stats.overwritten.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("images_overwritten_total").increment(1);
    }

    pub fn stats(&self) -> DeliveryStats {
        let stats = &self.inner.stats;
        DeliveryStats {
            delivered: stats.delivered.load(Ordering::Relaxed),
            dropped: stats.dropped.load(Ordering::Relaxed),
            overwritten: stats.overwritten.load(Ordering::Relaxed),
        }
    }
}
