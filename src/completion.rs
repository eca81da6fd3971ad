//! One-shot delivery of render results.
//!
//! A [`Completion`] wraps the consumer of a single snapshot request. It is
//! fulfilled at most once by [`Completion::deliver`]; if it is dropped
//! unfulfilled (queue drained at shutdown, worker gone, message discarded)
//! the consumer receives [`Error::CancelledDelivery`] instead, so every
//! request gets exactly one result.

use crate::geo::Camera;
use crate::image::PremultipliedImage;
use crate::{Error, Result};
use std::panic::{catch_unwind, AssertUnwindSafe};

/// A successfully rendered still image
#[derive(Debug, Clone, PartialEq)]
pub struct MapSnapshot {
    pub image: PremultipliedImage,
    /// The camera the frame was rendered with
    pub camera: Camera,
    pub style_name: Option<String>,
    pub pixel_ratio: f32,
}

/// Outcome of one snapshot request
pub type RenderResult = Result<MapSnapshot>;

type Consumer = Box<dyn FnOnce(RenderResult) + Send + 'static>;

/// Single-use completion handle for one snapshot request.
pub struct Completion {
    consumer: Option<Consumer>,
}

impl Completion {
    pub fn new<F>(consumer: F) -> Self
    where
        F: FnOnce(RenderResult) + Send + 'static,
    {
        Self {
            consumer: Some(Box::new(consumer)),
        }
    }

    /// Completion forwarding into a tokio oneshot; a dropped receiver makes
    /// delivery a no-op.
    pub fn oneshot() -> (Self, tokio::sync::oneshot::Receiver<RenderResult>) {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let completion = Self::new(move |res| {
            let _ = tx.send(res);
        });
        (completion, rx)
    }

    /// Hand `result` to the consumer. A panicking consumer is contained and
    /// logged so the delivering thread keeps running.
    pub fn deliver(mut self, result: RenderResult) {
        if let Some(consumer) = self.consumer.take() {
            invoke(consumer, result);
        }
    }
}

fn invoke(consumer: Consumer, result: RenderResult) {
    if catch_unwind(AssertUnwindSafe(move || consumer(result))).is_err() {
        log::error!("snapshot consumer panicked; result discarded");
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if let Some(consumer) = self.consumer.take() {
            log::debug!("snapshot request dropped before completion; cancelling");
            invoke(consumer, Err(Error::CancelledDelivery));
        }
    }
}

impl std::fmt::Debug for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completion")
            .field("pending", &self.consumer.is_some())
            .finish()
    }
}
