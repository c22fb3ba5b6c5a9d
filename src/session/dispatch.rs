//! Asynchronous compile dispatch
//!
//! Moves `compile_string` off the caller's thread without giving up the
//! single-writer rule on the engine:
//!
//! ```text
//! caller ──compile_async(src, cb)──▶ PendingCompile { owned copy of src }
//!                                          │ rayon pool
//!                                          ▼
//!                               write lock → compile → unlock
//!                                          │
//!                    Delivery::Worker ─────┴───── Delivery::Queued
//!                    cb runs on worker            cb runs in deliver_completions()
//! ```
//!
//! Each completion runs exactly once and never on the thread that called
//! `compile_async` before it returns. Dispatch-layer failures travel in
//! [`CompileOutcome::dispatch`] with `result` left empty.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::error::DispatchError;
use super::Shared;
use crate::engine::{OutputMode, Status};

/// Where completion callbacks run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Delivery {
    /// On the pool worker, right after the write lock is released.
    #[default]
    Worker,
    /// On whichever thread calls [`Session::deliver_completions`](super::Session::deliver_completions).
    Queued,
}

/// Result of an asynchronous compile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOutcome {
    /// Engine status; `None` when the compile never ran.
    pub result: Option<Status>,
    /// Dispatch-layer status.
    pub dispatch: Result<(), DispatchError>,
}

impl CompileOutcome {
    /// `true` when the compile ran and the engine reported success.
    pub fn is_success(&self) -> bool {
        self.dispatch.is_ok() && self.result.is_some_and(Status::is_ok)
    }

    /// Split into the engine status, or the dispatch error when the compile
    /// never ran.
    pub fn into_status(self) -> Result<Status, DispatchError> {
        let CompileOutcome { result, dispatch } = self;
        dispatch.map(|()| result.unwrap_or(Status::FAILED))
    }

    pub(crate) fn rejected(error: DispatchError) -> Self {
        Self {
            result: None,
            dispatch: Err(error),
        }
    }
}

/// Single-shot completion handler.
pub type Completion = Box<dyn FnOnce(CompileOutcome) + Send + 'static>;

/// One queued compile: an owned copy of the source plus its completion.
pub(crate) struct PendingCompile {
    source: String,
    result: Option<Status>,
    completion: Completion,
}

impl PendingCompile {
    pub(crate) fn new(
        source: &str,
        completion: Completion,
    ) -> Self {
        Self {
            source: source.to_owned(),
            result: None,
            completion,
        }
    }

    /// Consume the unit, invoking its completion.
    fn complete(
        self,
        dispatch: Result<(), DispatchError>,
    ) {
        let outcome = CompileOutcome {
            result: if dispatch.is_ok() { self.result } else { None },
            dispatch,
        };
        (self.completion)(outcome);
    }
}

type Finished = (PendingCompile, Result<(), DispatchError>);

/// Worker pool plus the completion queue for one session.
pub(crate) struct Dispatcher {
    session_id: u64,
    pool: Result<rayon::ThreadPool, String>,
    delivery: Delivery,
    finished_tx: Sender<Finished>,
    finished_rx: Receiver<Finished>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("workers", &self.pool.as_ref().map(|p| p.current_num_threads()))
            .field("delivery", &self.delivery)
            .field("queued", &self.finished_rx.len())
            .finish()
    }
}

impl Dispatcher {
    /// Inspect-only sessions reject every async compile and get no pool.
    pub(crate) fn new(
        session_id: u64,
        mode: OutputMode,
        workers: usize,
        delivery: Delivery,
    ) -> Self {
        let pool = if mode.can_run() {
            rayon::ThreadPoolBuilder::new()
                .num_threads(workers.max(1))
                .thread_name(move |i| format!("tcc-compile-{}-{}", session_id, i))
                .panic_handler(move |_| warn!("session {}: compile job panicked", session_id))
                .build()
                .map_err(|e| {
                    warn!("session {}: compile pool unavailable: {}", session_id, e);
                    e.to_string()
                })
        } else {
            Err(format!("{} session has no compile pool", mode))
        };
        let (finished_tx, finished_rx) = channel::unbounded();
        Self {
            session_id,
            pool,
            delivery,
            finished_tx,
            finished_rx,
        }
    }

    pub(crate) fn delivery(&self) -> Delivery {
        self.delivery
    }

    /// Hand a unit to the pool, or reject it with a dispatch error.
    pub(crate) fn submit(
        &self,
        shared: &Arc<Shared>,
        unit: PendingCompile,
    ) {
        if !shared.mode.can_run() {
            self.reject(unit, DispatchError::InspectOnly);
            return;
        }

        let pool = match &self.pool {
            Ok(pool) => pool,
            Err(reason) => {
                self.reject(unit, DispatchError::PoolUnavailable(reason.clone()));
                return;
            }
        };

        let shared = Arc::clone(shared);
        let delivery = self.delivery;
        let finished_tx = self.finished_tx.clone();
        debug!("session {}: dispatching compile ({} bytes)", shared.id, unit.source.len());

        pool.spawn(move || {
            let mut unit = unit;
            let ran = panic::catch_unwind(AssertUnwindSafe(|| {
                shared.with_engine("compile_async", |engine| engine.compile_string(&unit.source))
            }));
            let dispatch = match ran {
                Ok(status) => {
                    unit.result = Some(status);
                    Ok(())
                }
                Err(_) => {
                    warn!("session {}: engine panicked during async compile", shared.id);
                    Err(DispatchError::WorkerPanicked)
                }
            };
            route(delivery, &finished_tx, unit, dispatch);
        });
    }

    /// Finish a unit that never reached the pool.
    ///
    /// The completion never runs on the submitting stack: queued delivery
    /// goes through the channel, worker delivery through a short-lived thread.
    fn reject(
        &self,
        unit: PendingCompile,
        error: DispatchError,
    ) {
        debug!("session {}: rejecting async compile: {}", self.session_id, error);
        if self.delivery == Delivery::Queued {
            route(Delivery::Queued, &self.finished_tx, unit, Err(error));
            return;
        }

        let slot = Arc::new(Mutex::new(Some((unit, error))));
        let detached = Arc::clone(&slot);
        let spawned = thread::Builder::new()
            .name(format!("tcc-deliver-{}", self.session_id))
            .spawn(move || {
                if let Some((unit, error)) = detached.lock().take() {
                    deliver(unit, Err(error));
                }
            });
        if let Err(e) = spawned {
            // Without a thread the only way to keep exactly-once is inline.
            warn!("session {}: cannot spawn delivery thread: {}", self.session_id, e);
            if let Some((unit, error)) = slot.lock().take() {
                deliver(unit, Err(error));
            }
        }
    }

    /// Run every queued completion on the calling thread.
    pub(crate) fn drain(&self) -> usize {
        let mut delivered = 0;
        for (unit, dispatch) in self.finished_rx.try_iter() {
            unit.complete(dispatch);
            delivered += 1;
        }
        delivered
    }

    /// Block up to `timeout` for one queued completion, then drain the rest.
    pub(crate) fn drain_timeout(
        &self,
        timeout: Duration,
    ) -> usize {
        match self.finished_rx.recv_timeout(timeout) {
            Ok((unit, dispatch)) => {
                unit.complete(dispatch);
                1 + self.drain()
            }
            Err(_) => 0,
        }
    }
}

fn route(
    delivery: Delivery,
    finished_tx: &Sender<Finished>,
    unit: PendingCompile,
    dispatch: Result<(), DispatchError>,
) {
    match delivery {
        Delivery::Worker => deliver(unit, dispatch),
        Delivery::Queued => {
            if let Err(channel::SendError((unit, dispatch))) = finished_tx.send((unit, dispatch)) {
                // Receiver is gone with the session; deliver here instead.
                deliver(unit, dispatch);
            }
        }
    }
}

/// Run a completion off the caller's stack. A panicking completion is logged
/// and does not take the thread down.
fn deliver(
    unit: PendingCompile,
    dispatch: Result<(), DispatchError>,
) {
    if panic::catch_unwind(AssertUnwindSafe(|| unit.complete(dispatch))).is_err() {
        warn!("async compile completion panicked");
    }
}
