//! Process-wide dispatcher.
//!
//! Most call sites just want "the" dispatcher. [`init`] builds it once from
//! the environment and every later call returns the same instance. Statics are
//! never dropped, so the drain is tied to initialization instead: the call
//! that builds the instance gets back an armed [`GlobalDispatcher`], and when
//! that handle goes out of scope the queue is drained and the slot cleared.
//! Keep it alive in `main`.
//!
//! ```rust,ignore
//! fn main() -> anyhow::Result<()> {
//!     let dispatcher = task_dispatcher::global::init(Arc::new(BrokerBackend::connect()?))?;
//!
//!     let _ = dispatcher.enqueue(TaskEnvelope::new("emails.send"));
//!     let _ = task_dispatcher::global::enqueue(TaskEnvelope::new("emails.digest"))?;
//!     Ok(())
//! } // `dispatcher` drops here: queued envelopes are flushed
//! ```

use std::ops::Deref;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{error, info};

use crate::config::DispatcherConfig;
use crate::core::{
    AppResult, DispatchError, DispatchSink, Dispatcher, EnqueueOutcome, TaskBackend,
    TaskEnvelope, TracingSink,
};
use crate::util::telemetry::init_tracing;

/// Holder for at most one shared dispatcher.
///
/// Initialization happens under the lock, so concurrent first callers build
/// exactly one instance. Unlike a `OnceLock`, the slot can be emptied again,
/// which is what [`DispatcherCell::shutdown`] and tests rely on.
pub struct DispatcherCell {
    slot: Mutex<Option<Arc<Dispatcher>>>,
}

impl DispatcherCell {
    /// Empty cell.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slot: parking_lot::const_mutex(None),
        }
    }

    /// Cached dispatcher, if any.
    #[must_use]
    pub fn get(&self) -> Option<Arc<Dispatcher>> {
        self.slot.lock().clone()
    }

    /// Cached dispatcher, building it with `init` on first use.
    ///
    /// # Errors
    ///
    /// Propagates the error from `init`; the cell stays empty in that case.
    pub fn get_or_try_init<F, E>(&self, init: F) -> Result<Arc<Dispatcher>, E>
    where
        F: FnOnce() -> Result<Dispatcher, E>,
    {
        self.get_or_create(init).map(|(dispatcher, _)| dispatcher)
    }

    /// Like [`DispatcherCell::get_or_try_init`], but returns a handle that
    /// drains the instance on drop when this call is the one that built it.
    ///
    /// # Errors
    ///
    /// Propagates the error from `init`; the cell stays empty in that case.
    pub fn init_guarded<F, E>(&'static self, init: F) -> Result<GlobalDispatcher, E>
    where
        F: FnOnce() -> Result<Dispatcher, E>,
    {
        let (dispatcher, created) = self.get_or_create(init)?;
        Ok(GlobalDispatcher {
            dispatcher,
            cell: self,
            armed: created,
        })
    }

    fn get_or_create<F, E>(&self, init: F) -> Result<(Arc<Dispatcher>, bool), E>
    where
        F: FnOnce() -> Result<Dispatcher, E>,
    {
        let mut slot = self.slot.lock();
        if let Some(existing) = slot.as_ref() {
            return Ok((Arc::clone(existing), false));
        }
        let dispatcher = Arc::new(init()?);
        *slot = Some(Arc::clone(&dispatcher));
        Ok((dispatcher, true))
    }

    /// Remove the cached dispatcher without joining it.
    pub fn take(&self) -> Option<Arc<Dispatcher>> {
        self.slot.lock().take()
    }

    /// Remove the cached dispatcher and drain it.
    ///
    /// # Errors
    ///
    /// Returns the join error if the consumer thread died.
    pub fn shutdown(&self) -> Result<(), DispatchError> {
        // Release the lock before joining; draining can take a while.
        let dispatcher = self.take();
        match dispatcher {
            Some(dispatcher) => dispatcher.join(),
            None => Ok(()),
        }
    }

    /// Clear the slot only if it still holds `dispatcher`.
    fn release(&self, dispatcher: &Arc<Dispatcher>) {
        let mut slot = self.slot.lock();
        if slot.as_ref().is_some_and(|cached| Arc::ptr_eq(cached, dispatcher)) {
            *slot = None;
        }
    }
}

impl Default for DispatcherCell {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DispatcherCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatcherCell")
            .field("initialized", &self.slot.lock().is_some())
            .finish()
    }
}

/// Handle to the process-wide dispatcher returned by [`init`] / [`init_with`].
///
/// Derefs to [`Dispatcher`]. The handle from the call that built the instance
/// is armed: dropping it clears the slot and drains the queue. Handles from
/// later calls only borrow the instance.
#[must_use = "dropping the initializing handle drains and clears the process-wide dispatcher"]
pub struct GlobalDispatcher {
    dispatcher: Arc<Dispatcher>,
    cell: &'static DispatcherCell,
    armed: bool,
}

impl GlobalDispatcher {
    /// Shared dispatcher behind this handle.
    #[must_use]
    pub const fn shared(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Whether dropping this handle drains the dispatcher.
    #[must_use]
    pub const fn owns_shutdown(&self) -> bool {
        self.armed
    }
}

impl Deref for GlobalDispatcher {
    type Target = Dispatcher;

    fn deref(&self) -> &Dispatcher {
        &self.dispatcher
    }
}

impl std::fmt::Debug for GlobalDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlobalDispatcher")
            .field("dispatcher", &self.dispatcher)
            .field("armed", &self.armed)
            .finish()
    }
}

impl Drop for GlobalDispatcher {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.cell.release(&self.dispatcher);
        match self.dispatcher.join() {
            Ok(()) => info!("Process-wide dispatcher drained"),
            Err(e) => error!(error = %e, "Process-wide dispatcher shutdown failed"),
        }
    }
}

static GLOBAL: DispatcherCell = DispatcherCell::new();

/// The process-wide cell.
#[must_use]
pub fn cell() -> &'static DispatcherCell {
    &GLOBAL
}

/// Build the process-wide dispatcher from the environment on first call;
/// return the cached instance afterwards (`backend` is then ignored).
///
/// Installs a default tracing subscriber honoring the `debug` flag and
/// reports events through [`TracingSink`]. Only the first call's handle is
/// armed; keep it alive for as long as the process dispatches.
///
/// # Errors
///
/// Fails when the environment holds invalid settings or the consumer cannot
/// start.
pub fn init(backend: Arc<dyn TaskBackend>) -> AppResult<GlobalDispatcher> {
    GLOBAL.init_guarded(|| {
        let config = DispatcherConfig::from_env()?;
        init_tracing(config.debug);
        Ok(Dispatcher::new(config, backend, Arc::new(TracingSink))?)
    })
}

/// Like [`init`] with explicit configuration and sink.
///
/// # Errors
///
/// Any error from [`Dispatcher::new`].
pub fn init_with(
    config: DispatcherConfig,
    backend: Arc<dyn TaskBackend>,
    sink: Arc<dyn DispatchSink>,
) -> Result<GlobalDispatcher, DispatchError> {
    GLOBAL.init_guarded(|| Dispatcher::new(config, backend, sink))
}

/// The process-wide dispatcher, if initialized.
#[must_use]
pub fn get() -> Option<Arc<Dispatcher>> {
    GLOBAL.get()
}

/// Enqueue on the process-wide dispatcher.
///
/// # Errors
///
/// `DispatchError::NotInitialized` before [`init`] / [`init_with`].
pub fn enqueue(envelope: TaskEnvelope) -> Result<EnqueueOutcome, DispatchError> {
    GLOBAL
        .get()
        .map(|dispatcher| dispatcher.enqueue(envelope))
        .ok_or(DispatchError::NotInitialized)
}

/// Drain and forget the process-wide dispatcher ahead of its handle. A later
/// [`init`] builds a fresh one.
///
/// # Errors
///
/// Returns the join error if the consumer thread died.
pub fn shutdown() -> Result<(), DispatchError> {
    GLOBAL.shutdown()
}
