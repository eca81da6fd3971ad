//! Public, thread-safe handle to a snapshot session.
//!
//! Every method turns into one message on the session's queue and returns
//! immediately. Nothing fails synchronously: bad input shows up as a failed
//! snapshot later.

use crate::actor::{self, ActorInit, Message};
use crate::completion::{Completion, RenderResult};
use crate::geo::{CameraOptions, LatLngBounds, Size};
use crate::style::{DefaultStyleLoader, StyleLoader};
use crate::surface::{HeadlessSurface, SurfaceFactory};
use crate::{Error, Result, SessionConfig};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, SendError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Builder for a [`Snapshotter`] with custom collaborators.
pub struct SnapshotterBuilder {
    config: SessionConfig,
    loader: Option<Arc<dyn StyleLoader>>,
    surface_factory: Option<SurfaceFactory>,
}

impl SnapshotterBuilder {
    /// Replace the default style loader.
    pub fn style_loader(mut self, loader: Arc<dyn StyleLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Replace the default [`HeadlessSurface`].
    pub fn surface_factory(mut self, factory: SurfaceFactory) -> Self {
        self.surface_factory = Some(factory);
        self
    }

    /// Spawn the session worker. Only thread creation can fail here; session
    /// construction failures are reported by later snapshots.
    pub fn build(self) -> Result<Snapshotter> {
        let loader = self
            .loader
            .unwrap_or_else(|| -> Arc<dyn StyleLoader> {
                Arc::new(DefaultStyleLoader::new(self.config.style_timeout_ms))
            });
        let surface_factory = self.surface_factory.unwrap_or_else(HeadlessSurface::factory);

        let (tx, rx) = mpsc::channel::<Message>();
        let closing = Arc::new(AtomicBool::new(false));
        let init = ActorInit {
            config: self.config,
            loader,
            surface_factory,
        };
        let worker = actor::spawn(init, rx, closing.clone()).map_err(|e| {
            Error::ConstructionFailure(format!("Failed to spawn session worker: {}", e))
        })?;

        Ok(Snapshotter {
            tx: Some(tx),
            closing,
            worker: Some(worker),
        })
    }
}

/// Handle to one snapshot session running on its own worker thread.
///
/// The handle is `Send + Sync`; share it with `Arc` to issue requests from
/// several threads. Requests from one thread are applied in the order that
/// thread issued them. Dropping the handle shuts the session down: queued
/// requests are cancelled and an in-flight render is either finished or
/// abandoned, and each pending snapshot still gets exactly one result.
pub struct Snapshotter {
    tx: Option<Sender<Message>>,
    closing: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl Snapshotter {
    /// Start a session with the default loader and surface.
    pub fn new(config: SessionConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn builder(config: SessionConfig) -> SnapshotterBuilder {
        SnapshotterBuilder {
            config,
            loader: None,
            surface_factory: None,
        }
    }

    fn send(&self, msg: Message) {
        let Some(tx) = &self.tx else {
            return;
        };
        if let Err(SendError(msg)) = tx.send(msg) {
            // Worker is gone; dropping the message cancels any snapshot in it.
            log::warn!("snapshot session is terminated; request dropped");
            drop(msg);
        }
    }

    /// Load a new style from `locator`.
    pub fn set_style(&self, locator: impl Into<String>) {
        self.send(Message::SetStyle(locator.into()));
    }

    /// Resize the output.
    pub fn set_size(&self, size: Size) {
        self.send(Message::SetSize(size));
    }

    /// Jump the camera; unset fields keep their values.
    pub fn set_camera_options(&self, camera: CameraOptions) {
        self.send(Message::SetCamera(camera));
    }

    /// Frame `bounds` in the current viewport.
    pub fn set_region(&self, bounds: LatLngBounds) {
        self.send(Message::SetRegion(bounds));
    }

    /// Request a snapshot. `consumer` is called exactly once, on the session
    /// worker (or on this thread if the session is already gone).
    pub fn snapshot<F>(&self, consumer: F)
    where
        F: FnOnce(RenderResult) + Send + 'static,
    {
        self.send(Message::Snapshot(Completion::new(consumer)));
    }

    /// Request a snapshot and await it. The request is queued now, not on
    /// first poll; dropping the future abandons only the wait.
    pub fn snapshot_async(&self) -> BoxFuture<'static, RenderResult> {
        let (completion, rx) = Completion::oneshot();
        self.send(Message::Snapshot(completion));
        async move { rx.await.unwrap_or(Err(Error::CancelledDelivery)) }.boxed()
    }

    /// Request a snapshot and block until it is delivered.
    ///
    /// Must not be called from inside a snapshot consumer: that consumer runs
    /// on the session worker, which would then wait on itself.
    pub fn snapshot_blocking(&self) -> RenderResult {
        let (tx, rx) = mpsc::channel();
        self.snapshot(move |res| {
            let _ = tx.send(res);
        });
        rx.recv().unwrap_or(Err(Error::CancelledDelivery))
    }

    /// Shut the session down and wait for the worker to exit.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.closing.store(true, Ordering::Release);
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Message::Shutdown);
        }
        if let Some(worker) = self.worker.take() {
            // Dropped from a consumer running on the worker itself.
            if worker.thread().id() == thread::current().id() {
                return;
            }
            if worker.join().is_err() {
                log::error!("snapshot session worker panicked");
            }
        }
    }
}

impl Drop for Snapshotter {
    fn drop(&mut self) {
        self.shutdown();
    }
}
