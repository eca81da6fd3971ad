//! The session actor: a dedicated worker thread that exclusively owns one
//! [`MapSession`] and applies queued messages to it one at a time.

use crate::completion::Completion;
use crate::geo::{CameraOptions, LatLngBounds, Size};
use crate::map::MapSession;
use crate::style::StyleLoader;
use crate::surface::SurfaceFactory;
use crate::{Error, SessionConfig};
use std::any::Any;
use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Commands accepted by the session worker
pub(crate) enum Message {
    SetStyle(String),
    SetSize(Size),
    SetCamera(CameraOptions),
    SetRegion(LatLngBounds),
    Snapshot(Completion),
    Shutdown,
}

impl Message {
    fn name(&self) -> &'static str {
        match self {
            Message::SetStyle(_) => "SetStyle",
            Message::SetSize(_) => "SetSize",
            Message::SetCamera(_) => "SetCamera",
            Message::SetRegion(_) => "SetRegion",
            Message::Snapshot(_) => "Snapshot",
            Message::Shutdown => "Shutdown",
        }
    }
}

/// Lifecycle of a session.
///
/// `Constructing → Ready ⇄ Rendering → ShuttingDown → Terminated`, with
/// `Failed` absorbing a session whose construction failed.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SessionState {
    Constructing,
    Ready,
    Rendering,
    Failed(Error),
    ShuttingDown,
    Terminated,
}

/// What the worker needs to build its session
pub(crate) struct ActorInit {
    pub config: SessionConfig,
    pub loader: Arc<dyn StyleLoader>,
    pub surface_factory: SurfaceFactory,
}

pub(crate) struct SessionActor {
    state: SessionState,
    session: Option<MapSession>,
    closing: Arc<AtomicBool>,
}

/// Spawn the worker thread; it constructs the session before reading the queue.
pub(crate) fn spawn(
    init: ActorInit,
    rx: Receiver<Message>,
    closing: Arc<AtomicBool>,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("map-snapshotter".into())
        .spawn(move || {
            let mut actor = SessionActor::construct(init, closing);
            actor.run(rx);
        })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".into())
}

impl SessionActor {
    pub(crate) fn construct(init: ActorInit, closing: Arc<AtomicBool>) -> Self {
        let mut actor = Self {
            state: SessionState::Constructing,
            session: None,
            closing: closing.clone(),
        };

        let ActorInit {
            config,
            loader,
            surface_factory,
        } = init;
        let built = catch_unwind(AssertUnwindSafe(|| {
            MapSession::new(&config, surface_factory, loader, closing)
        }))
        .unwrap_or_else(|p| Err(Error::ConstructionFailure(panic_message(p.as_ref()))));

        match built {
            Ok(session) => {
                log::info!(
                    "snapshot session ready ({}x{} @{}x)",
                    config.size.width,
                    config.size.height,
                    config.pixel_ratio
                );
                actor.session = Some(session);
                actor.state = SessionState::Ready;
            }
            Err(e) => {
                log::error!("snapshot session unusable: {}", e);
                actor.state = SessionState::Failed(e);
            }
        }
        actor
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> &SessionState {
        &self.state
    }

    /// Drain the queue until every sender is gone.
    pub(crate) fn run(&mut self, rx: Receiver<Message>) {
        while let Ok(msg) = rx.recv() {
            self.handle(msg);
        }
        self.terminate();
    }

    pub(crate) fn handle(&mut self, msg: Message) {
        if self.closing.load(Ordering::Acquire) {
            self.begin_shutdown();
        }

        match self.state {
            SessionState::ShuttingDown | SessionState::Terminated => {
                // Dropping a snapshot's completion cancels it.
                log::debug!("discarding {} after shutdown", msg.name());
                return;
            }
            _ => {}
        }
        log::debug!("handling {}", msg.name());

        if matches!(msg, Message::Shutdown) {
            self.begin_shutdown();
            return;
        }
        if let SessionState::Failed(e) = &self.state {
            if let Message::Snapshot(completion) = msg {
                completion.deliver(Err(e.clone()));
            }
            return;
        }
        let Some(session) = self.session.as_mut() else {
            return;
        };

        match msg {
            Message::SetStyle(locator) => guarded("SetStyle", || session.apply_style(&locator)),
            Message::SetSize(size) => guarded("SetSize", || session.apply_size(size)),
            Message::SetCamera(camera) => guarded("SetCamera", || session.apply_camera(&camera)),
            Message::SetRegion(bounds) => guarded("SetRegion", || session.apply_region(&bounds)),
            Message::Snapshot(completion) => {
                self.state = SessionState::Rendering;
                let result = catch_unwind(AssertUnwindSafe(|| session.render_once()))
                    .unwrap_or_else(|p| {
                        let cause = panic_message(p.as_ref());
                        log::error!("render panicked: {}", cause);
                        Err(Error::RenderFailure(cause))
                    });
                if let Err(ref e) = result {
                    log::warn!("snapshot failed: {}", e);
                }
                completion.deliver(result);
                self.state = SessionState::Ready;
            }
            Message::Shutdown => {}
        }
    }

    fn begin_shutdown(&mut self) {
        if !matches!(self.state, SessionState::ShuttingDown | SessionState::Terminated) {
            log::info!("snapshot session shutting down");
            self.state = SessionState::ShuttingDown;
        }
    }

    fn terminate(&mut self) {
        self.begin_shutdown();
        self.session = None;
        self.state = SessionState::Terminated;
        log::debug!("snapshot session terminated");
    }
}

fn guarded<F: FnOnce()>(what: &str, f: F) {
    if let Err(p) = catch_unwind(AssertUnwindSafe(f)) {
        log::error!("{} panicked: {}", what, panic_message(p.as_ref()));
    }
}
