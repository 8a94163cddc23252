//! Frame ticker
//!
//! One clock, many recurring threads. Each tick the ticker computes the delta
//! since the previous tick and calls every live thread with
//! `(delta_ms, elapsed_ms, &ThreadHandle)`.
//!
//! Dispatch iterates a snapshot of thread ids taken at the start of the tick
//! and never holds the ticker lock while a callback runs, so callbacks may add
//! or kill threads (including their own) freely:
//! - threads added during a tick first run on the next tick
//! - threads killed during a tick are skipped for the rest of it
//!
//! The ticker can be driven by the host's frame loop via [`Ticker::tick`] or
//! by its own background thread via [`Ticker::start_background`].

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, TryLockError, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use slotmap::{new_key_type, SlotMap};
use smallvec::SmallVec;

use crate::clock::{Clock, SystemClock};
use crate::error::TweenError;
use crate::lock;
use crate::registry::OverwriteRegistry;

// ============================================================================
// Global Ticker State
// ============================================================================

static GLOBAL_TICKER: OnceLock<TickerHandle> = OnceLock::new();

/// Set the process-wide ticker handle
///
/// Call once at startup, after creating the [`Ticker`] that drives the app.
///
/// # Panics
///
/// Panics if called more than once.
pub fn set_global_ticker(handle: TickerHandle) {
    if GLOBAL_TICKER.set(handle).is_err() {
        panic!("set_global_ticker() called more than once");
    }
}

/// Get the process-wide ticker handle
///
/// # Panics
///
/// Panics if `set_global_ticker()` has not been called.
pub fn get_ticker() -> TickerHandle {
    GLOBAL_TICKER
        .get()
        .expect("Ticker not initialized. Call set_global_ticker() at app startup.")
        .clone()
}

/// Try to get the global ticker (returns None if not initialized)
pub fn try_get_ticker() -> Option<TickerHandle> {
    GLOBAL_TICKER.get().cloned()
}

/// Check if the global ticker has been initialized
pub fn is_ticker_initialized() -> bool {
    GLOBAL_TICKER.get().is_some()
}

new_key_type! {
    /// Handle to a thread registered with a ticker
    pub struct ThreadId;
}

/// Per-tick callback: `(delta_ms, elapsed_ms, thread)`
pub type ThreadCallback = Box<dyn FnMut(f32, f32, &ThreadHandle) + Send>;

/// Run once for each thread still registered when [`Ticker::kill`] clears it
pub type ThreadTeardown = Box<dyn FnOnce() + Send>;

/// A thread that panics this many ticks in a row is killed
const MAX_CONSECUTIVE_FAULTS: u32 = 3;

/// Ticker configuration
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TickerConfig {
    /// Frame rate of the background loop
    pub target_fps: u32,
}

impl Default for TickerConfig {
    fn default() -> Self {
        Self { target_fps: 120 }
    }
}

impl TickerConfig {
    fn frame_duration(&self) -> Duration {
        Duration::from_micros(1_000_000 / u64::from(self.target_fps.max(1)))
    }
}

struct ThreadEntry {
    started_at: f64,
    callback: Arc<Mutex<ThreadCallback>>,
    teardown: Option<ThreadTeardown>,
    faults: u32,
}

/// Internal state of the ticker
struct TickerInner {
    threads: SlotMap<ThreadId, ThreadEntry>,
    last_tick: Option<f64>,
    clock: Arc<dyn Clock>,
}

type SharedInner = Arc<Mutex<TickerInner>>;

/// The shared per-frame scheduler
///
/// Owns every thread. Hand out [`TickerHandle`]s to code that needs to
/// register threads or create tweens.
///
/// ```ignore
/// let mut ticker = Ticker::new();
/// ticker.start_background(); // 120fps unless configured otherwise
///
/// let thread = ticker.add(|delta, elapsed, thread| {
///     if elapsed > 1000.0 {
///         thread.kill();
///     }
/// });
/// ```
pub struct Ticker {
    inner: SharedInner,
    registry: OverwriteRegistry,
    config: TickerConfig,
    /// Stop signal for background thread
    stop_flag: Arc<AtomicBool>,
    /// Background thread handle (if running)
    thread_handle: Option<JoinHandle<()>>,
}

impl Ticker {
    /// A ticker on the system clock
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock::new()))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self::with_config(TickerConfig::default(), clock)
    }

    pub fn with_config(config: TickerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(TickerInner {
                threads: SlotMap::with_key(),
                last_tick: None,
                clock,
            })),
            registry: OverwriteRegistry::new(),
            config,
            stop_flag: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
        }
    }

    pub fn config(&self) -> TickerConfig {
        self.config
    }

    /// Get a weak handle to this ticker for passing to tweens and components
    pub fn handle(&self) -> TickerHandle {
        TickerHandle {
            inner: Arc::downgrade(&self.inner),
            registry: self.registry.clone(),
        }
    }

    /// The overwrite registry shared by every tween on this ticker
    pub fn registry(&self) -> &OverwriteRegistry {
        &self.registry
    }

    /// Register a recurring thread
    pub fn add<F>(&self, callback: F) -> ThreadHandle
    where
        F: FnMut(f32, f32, &ThreadHandle) + Send + 'static,
    {
        insert_thread(&self.inner, Box::new(callback), None)
    }

    /// Dispatch one frame to every live thread
    ///
    /// Returns true if any threads remain registered afterwards.
    pub fn tick(&self) -> bool {
        dispatch(&self.inner)
    }

    /// Number of registered threads
    pub fn thread_count(&self) -> usize {
        lock(&self.inner).threads.len()
    }

    /// Remove every thread and stop the background loop
    ///
    /// Threads registered with a teardown have it run once, after the ticker
    /// lock is released. Threads killed through their own [`ThreadHandle`]
    /// never run theirs.
    pub fn kill(&mut self) {
        self.stop_background();
        let (killed, teardowns) = {
            let mut inner = lock(&self.inner);
            inner.last_tick = None;
            let killed = inner.threads.len();
            let teardowns: Vec<ThreadTeardown> = inner
                .threads
                .drain()
                .filter_map(|(_, entry)| entry.teardown)
                .collect();
            (killed, teardowns)
        };
        tracing::debug!(killed, "Ticker: killed all threads");

        for teardown in teardowns {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(teardown)) {
                let error = TweenError::callback_fault("thread teardown", payload);
                tracing::warn!(%error, "Ticker: teardown faulted");
            }
        }
    }

    /// Start ticking on a background thread at `target_fps`
    ///
    /// Does nothing if the background loop is already running.
    pub fn start_background(&mut self) {
        if self.thread_handle.is_some() {
            return;
        }

        let inner = Arc::clone(&self.inner);
        let stop_flag = Arc::clone(&self.stop_flag);
        let frame_duration = self.config.frame_duration();
        tracing::debug!(fps = self.config.target_fps, "Ticker: starting background loop");

        self.thread_handle = Some(thread::spawn(move || {
            while !stop_flag.load(Ordering::Relaxed) {
                let start = Instant::now();
                dispatch(&inner);

                // Sleep for remaining frame time
                let elapsed = start.elapsed();
                if elapsed < frame_duration {
                    thread::sleep(frame_duration - elapsed);
                }
            }
        }));
    }

    /// Stop the background thread
    pub fn stop_background(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
        self.stop_flag.store(false, Ordering::Relaxed);
    }

    pub fn is_background_running(&self) -> bool {
        self.thread_handle.is_some()
    }
}

impl Default for Ticker {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.stop_background();
    }
}

/// A weak handle to a ticker
///
/// Doesn't keep the ticker alive. Once the ticker is dropped every operation
/// is a no-op.
#[derive(Clone)]
pub struct TickerHandle {
    inner: Weak<Mutex<TickerInner>>,
    registry: OverwriteRegistry,
}

impl TickerHandle {
    /// A handle that was never attached to a ticker
    pub fn detached() -> Self {
        Self {
            inner: Weak::new(),
            registry: OverwriteRegistry::new(),
        }
    }

    /// Register a recurring thread, or `None` if the ticker is gone
    pub fn add<F>(&self, callback: F) -> Option<ThreadHandle>
    where
        F: FnMut(f32, f32, &ThreadHandle) + Send + 'static,
    {
        self.insert(Box::new(callback), None)
    }

    /// Like [`TickerHandle::add`], plus a `teardown` run if [`Ticker::kill`]
    /// removes the thread
    pub fn add_with_teardown<F, T>(&self, callback: F, teardown: T) -> Option<ThreadHandle>
    where
        F: FnMut(f32, f32, &ThreadHandle) + Send + 'static,
        T: FnOnce() + Send + 'static,
    {
        self.insert(Box::new(callback), Some(Box::new(teardown)))
    }

    fn insert(
        &self,
        callback: ThreadCallback,
        teardown: Option<ThreadTeardown>,
    ) -> Option<ThreadHandle> {
        match self.inner.upgrade() {
            Some(inner) => Some(insert_thread(&inner, callback, teardown)),
            None => {
                tracing::warn!(error = %TweenError::TickerUnavailable, "thread not registered");
                None
            }
        }
    }

    pub fn registry(&self) -> &OverwriteRegistry {
        &self.registry
    }

    /// Current clock time, if the ticker is still alive
    pub fn now_ms(&self) -> Option<f64> {
        self.inner
            .upgrade()
            .map(|inner| lock(&inner).clock.now_ms())
    }

    pub fn thread_count(&self) -> usize {
        self.inner
            .upgrade()
            .map_or(0, |inner| lock(&inner).threads.len())
    }

    /// Check if the ticker is still alive
    pub fn is_alive(&self) -> bool {
        self.inner.strong_count() > 0
    }
}

impl std::fmt::Debug for TickerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TickerHandle")
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// Kill switch for one registered thread
#[derive(Clone)]
pub struct ThreadHandle {
    id: ThreadId,
    ticker: Weak<Mutex<TickerInner>>,
}

impl ThreadHandle {
    pub fn id(&self) -> ThreadId {
        self.id
    }

    /// Remove the thread. Safe to call any number of times, from inside the
    /// thread's own callback or from anywhere else.
    pub fn kill(&self) {
        if let Some(inner) = self.ticker.upgrade() {
            if lock(&inner).threads.remove(self.id).is_some() {
                tracing::trace!(thread = ?self.id, "Ticker: thread killed");
            }
        }
    }

    /// Whether the thread will receive further ticks
    pub fn is_alive(&self) -> bool {
        self.ticker
            .upgrade()
            .is_some_and(|inner| lock(&inner).threads.contains_key(self.id))
    }
}

impl std::fmt::Debug for ThreadHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadHandle").field("id", &self.id).finish()
    }
}

fn insert_thread(
    inner: &SharedInner,
    callback: ThreadCallback,
    teardown: Option<ThreadTeardown>,
) -> ThreadHandle {
    let mut guard = lock(inner);
    // Starting from an empty set: the next tick measures no delta
    if guard.threads.is_empty() {
        guard.last_tick = None;
    }
    let started_at = guard.clock.now_ms();
    let id = guard.threads.insert(ThreadEntry {
        started_at,
        callback: Arc::new(Mutex::new(callback)),
        teardown,
        faults: 0,
    });
    tracing::trace!(thread = ?id, "Ticker: thread added");
    ThreadHandle {
        id,
        ticker: Arc::downgrade(inner),
    }
}

fn dispatch(inner: &SharedInner) -> bool {
    let (now, delta, batch) = {
        let mut guard = lock(inner);
        let now = guard.clock.now_ms();
        let delta = guard.last_tick.map_or(0.0, |last| (now - last).max(0.0));
        guard.last_tick = Some(now);
        let batch: SmallVec<[ThreadId; 16]> = guard.threads.keys().collect();
        (now, delta, batch)
    };

    for id in batch {
        // Killed earlier in this tick
        let Some((callback, started_at)) = lock(inner)
            .threads
            .get(id)
            .map(|entry| (Arc::clone(&entry.callback), entry.started_at))
        else {
            continue;
        };

        let elapsed = (now - started_at).max(0.0);
        // A thread never sees more time than it has existed for
        let thread_delta = delta.min(elapsed) as f32;
        let handle = ThreadHandle {
            id,
            ticker: Arc::downgrade(inner),
        };

        let outcome = {
            let mut guard = match callback.try_lock() {
                Ok(guard) => guard,
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                // Re-entrant tick from inside this very callback
                Err(TryLockError::WouldBlock) => continue,
            };
            let callback: &mut ThreadCallback = &mut guard;
            panic::catch_unwind(AssertUnwindSafe(|| {
                callback(thread_delta, elapsed as f32, &handle)
            }))
        };

        let mut guard = lock(inner);
        let Some(entry) = guard.threads.get_mut(id) else {
            continue;
        };
        match outcome {
            Ok(()) => entry.faults = 0,
            Err(payload) => {
                entry.faults += 1;
                let faults = entry.faults;
                let error = TweenError::callback_fault("ticker thread", payload);
                tracing::warn!(thread = ?id, faults, %error, "Ticker: thread callback faulted");
                if faults >= MAX_CONSECUTIVE_FAULTS {
                    guard.threads.remove(id);
                    tracing::warn!(thread = ?id, "Ticker: killed thread after repeated faults");
                }
            }
        }
    }

    !lock(inner).threads.is_empty()
}
