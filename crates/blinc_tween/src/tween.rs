//! Tweens
//!
//! A [`Tween`] moves the shared keys of a [`Target`] from their current
//! values to the values of a `to` [`Snapshot`] over `duration` milliseconds.
//! It registers a thread with the ticker only while it is delaying or active.
//!
//! All control methods are idempotent: calling `stop()` three times fires
//! `on_stop` once, calling `start()` on a running tween does nothing.
//!
//! # Example
//!
//! ```ignore
//! use blinc_tween::{tween, Snapshot, Target, TweenOptions};
//!
//! let target = Target::from_iter([("opacity", 0.0)]);
//! let fade = tween(
//!     &target,
//!     &Snapshot::new().with("opacity", 1.0),
//!     TweenOptions::new()
//!         .duration(250.0)
//!         .delay(100.0)
//!         .on_complete(|_, values| tracing::info!(?values, "faded in")),
//! );
//!
//! fade.pause();
//! fade.set_progress(0.5); // jump to the midpoint while paused
//! fade.start();
//! ```

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::easing::Easing;
use crate::error::TweenError;
use crate::lock;
use crate::registry::Claimant;
use crate::snapshot::{Interpolation, Snapshot, Target};
use crate::state::{TweenEvent, TweenEvents, TweenPhase, TweenState};
use crate::ticker::{try_get_ticker, ThreadHandle, TickerHandle};

static NEXT_TWEEN_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique tween identity
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TweenId(u64);

impl TweenId {
    pub(crate) fn next() -> Self {
        TweenId(NEXT_TWEEN_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

type Hook = Arc<dyn Fn(&Tween) + Send + Sync>;
type ValuesHook = Arc<dyn Fn(&Tween, &Snapshot) + Send + Sync>;
type DelayHook = Arc<dyn Fn(&Tween, f32) + Send + Sync>;

#[derive(Clone, Default)]
struct Callbacks {
    on_start: Option<Hook>,
    on_update: Option<ValuesHook>,
    on_delay: Option<DelayHook>,
    on_pause: Option<Hook>,
    on_reset: Option<Hook>,
    on_stop: Option<Hook>,
    on_overwrite: Option<Hook>,
    on_complete: Option<ValuesHook>,
}

// ============================================================================
// Options
// ============================================================================

/// Serializable tween settings
///
/// ```ignore
/// let config: TweenConfig = toml::from_str("duration = 300.0\nmutate = false")?;
/// let options = TweenOptions::from_config(config).on_update(|_, v| println!("{v:?}"));
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TweenConfig {
    /// Active phase length in milliseconds
    pub duration: f32,
    /// Wait before the active phase, in milliseconds
    pub delay: f32,
    /// Write interpolated values onto the target
    pub mutate: bool,
    /// Cancel older tweens driving the same target properties
    pub overwrite: bool,
    /// Wait for an explicit `start()`
    pub paused: bool,
}

impl Default for TweenConfig {
    fn default() -> Self {
        Self {
            duration: 0.0,
            delay: 0.0,
            mutate: true,
            overwrite: true,
            paused: false,
        }
    }
}

/// Builder for everything a tween accepts
#[derive(Clone, Default)]
pub struct TweenOptions {
    config: TweenConfig,
    easing: Easing,
    callbacks: Callbacks,
}

impl TweenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: TweenConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> TweenConfig {
        self.config
    }

    pub fn duration(mut self, ms: f32) -> Self {
        self.config.duration = ms;
        self
    }

    pub fn delay(mut self, ms: f32) -> Self {
        self.config.delay = ms;
        self
    }

    pub fn mutate(mut self, mutate: bool) -> Self {
        self.config.mutate = mutate;
        self
    }

    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.config.overwrite = overwrite;
        self
    }

    pub fn paused(mut self, paused: bool) -> Self {
        self.config.paused = paused;
        self
    }

    pub fn easing(mut self, easing: Easing) -> Self {
        self.easing = easing;
        self
    }

    /// Fired on every transition into a running phase
    pub fn on_start<F>(mut self, f: F) -> Self
    where
        F: Fn(&Tween) + Send + Sync + 'static,
    {
        self.callbacks.on_start = Some(Arc::new(f));
        self
    }

    /// Fired every active tick with the freshly interpolated values
    pub fn on_update<F>(mut self, f: F) -> Self
    where
        F: Fn(&Tween, &Snapshot) + Send + Sync + 'static,
    {
        self.callbacks.on_update = Some(Arc::new(f));
        self
    }

    /// Fired every tick spent in the delay, with the elapsed delay
    pub fn on_delay<F>(mut self, f: F) -> Self
    where
        F: Fn(&Tween, f32) + Send + Sync + 'static,
    {
        self.callbacks.on_delay = Some(Arc::new(f));
        self
    }

    pub fn on_pause<F>(mut self, f: F) -> Self
    where
        F: Fn(&Tween) + Send + Sync + 'static,
    {
        self.callbacks.on_pause = Some(Arc::new(f));
        self
    }

    pub fn on_reset<F>(mut self, f: F) -> Self
    where
        F: Fn(&Tween) + Send + Sync + 'static,
    {
        self.callbacks.on_reset = Some(Arc::new(f));
        self
    }

    pub fn on_stop<F>(mut self, f: F) -> Self
    where
        F: Fn(&Tween) + Send + Sync + 'static,
    {
        self.callbacks.on_stop = Some(Arc::new(f));
        self
    }

    /// Fired once if a newer tween takes over this tween's properties
    pub fn on_overwrite<F>(mut self, f: F) -> Self
    where
        F: Fn(&Tween) + Send + Sync + 'static,
    {
        self.callbacks.on_overwrite = Some(Arc::new(f));
        self
    }

    pub fn on_complete<F>(mut self, f: F) -> Self
    where
        F: Fn(&Tween, &Snapshot) + Send + Sync + 'static,
    {
        self.callbacks.on_complete = Some(Arc::new(f));
        self
    }
}

impl fmt::Debug for TweenOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TweenOptions")
            .field("config", &self.config)
            .field("easing", &self.easing)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tween
// ============================================================================

/// Tween `target` toward `to` on the global ticker
///
/// Without a global ticker the tween is created against a detached handle and
/// never advances.
pub fn tween(target: &Target, to: &Snapshot, options: TweenOptions) -> Tween {
    let ticker = try_get_ticker().unwrap_or_else(TickerHandle::detached);
    Tween::new(&ticker, target, to, options)
}

/// Handle to a running tween
///
/// Clones control the same tween. Dropping every handle does not stop it; a
/// running tween is kept alive by its ticker thread until it completes or is
/// stopped.
#[derive(Clone)]
pub struct Tween {
    shared: Arc<TweenShared>,
}

struct TweenShared {
    id: TweenId,
    ticker: TickerHandle,
    target: Target,
    interpolation: Interpolation,
    easing: Easing,
    mutate: bool,
    overwrite: bool,
    callbacks: Callbacks,
    inner: Mutex<TweenInner>,
}

struct TweenInner {
    state: TweenState,
    /// Latest interpolated values, written or not
    values: Snapshot,
    thread: Option<ThreadHandle>,
    /// Holds entries in the overwrite registry
    claimed: bool,
}

/// What a transition left to do once the tween lock is released
struct Outcome {
    events: TweenEvents,
    values: Snapshot,
    claim: bool,
    release: bool,
}

impl Tween {
    /// Create a tween from the target's current values to `to`.
    ///
    /// Only keys present on both sides are animated. Unless `paused` is set
    /// the tween starts immediately: it claims its properties (overwriting
    /// older tweens), fires `on_start` and registers a ticker thread.
    pub fn new(ticker: &TickerHandle, target: &Target, to: &Snapshot, options: TweenOptions) -> Self {
        let from = target.snapshot();
        for key in Interpolation::unmatched(&from, to) {
            let error = TweenError::ConfigurationMismatch {
                key: key.to_string(),
                target: target.id(),
            };
            tracing::trace!(%error, "Tween: skipping property");
        }
        let interpolation = Interpolation::between(&from, to);

        let TweenConfig {
            duration,
            delay,
            mutate,
            overwrite,
            paused,
        } = options.config;

        let shared = Arc::new(TweenShared {
            id: TweenId::next(),
            ticker: ticker.clone(),
            target: target.clone(),
            easing: options.easing,
            mutate,
            overwrite,
            callbacks: options.callbacks,
            inner: Mutex::new(TweenInner {
                state: TweenState::new(duration, delay, paused),
                values: interpolation.sample(0.0),
                thread: None,
                claimed: false,
            }),
            interpolation,
        });

        tracing::debug!(
            tween = ?shared.id,
            target_id = %target.id(),
            keys = shared.interpolation.len(),
            duration,
            delay,
            paused,
            "Tween: created"
        );

        if !paused {
            shared.transition(TweenState::start);
        }
        Tween { shared }
    }

    pub fn id(&self) -> TweenId {
        self.shared.id
    }

    /// Start or resume. No-op while already running or after it has ended.
    pub fn start(&self) {
        self.shared.transition(TweenState::start);
    }

    /// Suspend, keeping elapsed time. No-op unless running.
    pub fn pause(&self) {
        self.shared.transition(TweenState::pause);
    }

    /// Stop for good. `passed` keeps its value.
    pub fn stop(&self) {
        self.shared.transition(TweenState::stop);
    }

    /// Rewind to zero and re-arm the delay. The target is not restored.
    pub fn reset(&self) {
        self.shared.transition(TweenState::reset);
    }

    /// `passed / duration` in `[0, 1]`
    pub fn progress(&self) -> f32 {
        lock(&self.shared.inner).state.progress()
    }

    /// Jump to `progress` and write the interpolated values right away.
    ///
    /// Works in any phase, paused included. Does not change the phase or fire
    /// any callback.
    pub fn set_progress(&self, progress: f32) {
        let mut inner = lock(&self.shared.inner);
        inner.state.scrub(progress);
        self.shared.sample(&mut inner);
    }

    /// Milliseconds elapsed in the active phase
    pub fn passed(&self) -> f32 {
        lock(&self.shared.inner).state.passed()
    }

    pub fn duration(&self) -> f32 {
        lock(&self.shared.inner).state.duration()
    }

    pub fn delay(&self) -> f32 {
        lock(&self.shared.inner).state.delay()
    }

    pub fn phase(&self) -> TweenPhase {
        lock(&self.shared.inner).state.phase()
    }

    pub fn is_paused(&self) -> bool {
        self.phase() == TweenPhase::Paused
    }

    pub fn is_complete(&self) -> bool {
        self.phase() == TweenPhase::Complete
    }

    pub fn is_stopped(&self) -> bool {
        self.phase() == TweenPhase::Stopped
    }

    pub fn is_running(&self) -> bool {
        self.phase().is_running()
    }

    /// Latest interpolated values, including for `mutate(false)` tweens
    pub fn values(&self) -> Snapshot {
        lock(&self.shared.inner).values.clone()
    }

    pub fn target(&self) -> &Target {
        &self.shared.target
    }
}

impl fmt::Debug for Tween {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = lock(&self.shared.inner);
        f.debug_struct("Tween")
            .field("id", &self.shared.id)
            .field("target", &self.shared.target.id())
            .field("phase", &inner.state.phase())
            .field("passed", &inner.state.passed())
            .field("values", &inner.values)
            .finish()
    }
}

impl TweenShared {
    /// Apply a state transition, then settle thread, registry and callbacks.
    ///
    /// Registry work and callbacks run after the tween lock is released so
    /// they can call back into this or any other tween.
    fn transition<F>(self: &Arc<Self>, f: F)
    where
        F: FnOnce(&mut TweenState) -> TweenEvents,
    {
        let outcome = {
            let mut inner = lock(&self.inner);
            let events = f(&mut inner.state);
            if events.contains(&TweenEvent::Update) {
                self.sample(&mut inner);
            }
            self.sync_thread(&mut inner);

            let phase = inner.state.phase();
            let claim = self.overwrite && !inner.claimed && phase.is_running();
            let release = inner.claimed && phase.is_terminal();
            if claim {
                inner.claimed = true;
            } else if release {
                inner.claimed = false;
            }

            Outcome {
                events,
                values: inner.values.clone(),
                claim,
                release,
            }
        };

        let registry = self.ticker.registry();
        if outcome.claim {
            let claimant: Arc<dyn Claimant> = Arc::clone(self) as Arc<dyn Claimant>;
            registry.claim(self.target.id(), self.interpolation.keys(), &claimant);
            // A tick on another thread may have ended the tween, and released,
            // before these claims landed
            if lock(&self.inner).state.phase().is_terminal() {
                registry.release(self.target.id(), self.interpolation.keys(), self.id);
            }
        }
        if outcome.release {
            registry.release(self.target.id(), self.interpolation.keys(), self.id);
        }

        self.dispatch(&outcome.events, &outcome.values);
    }

    /// Recompute values at the current progress, writing them if mutating
    fn sample(&self, inner: &mut TweenInner) {
        let factor = self.easing.apply(inner.state.progress());
        inner.values = self.interpolation.sample(factor);
        if self.mutate {
            self.target.apply(&inner.values);
        }
    }

    /// Hold a ticker thread exactly while the phase needs ticks
    fn sync_thread(self: &Arc<Self>, inner: &mut TweenInner) {
        if inner.state.phase().is_running() {
            if !inner.thread.as_ref().is_some_and(ThreadHandle::is_alive) {
                let tween = Arc::clone(self);
                let orphan = Arc::clone(self);
                // Stopped if Ticker::kill clears the thread
                inner.thread = self.ticker.add_with_teardown(
                    move |delta, _elapsed, _thread| {
                        tween.transition(|state| state.advance(delta));
                    },
                    move || orphan.transition(TweenState::stop),
                );
            }
        } else if let Some(thread) = inner.thread.take() {
            thread.kill();
        }
    }

    fn dispatch(self: &Arc<Self>, events: &[TweenEvent], values: &Snapshot) {
        if events.is_empty() {
            return;
        }
        let tween = Tween {
            shared: Arc::clone(self),
        };
        let callbacks = &self.callbacks;

        for event in events {
            match *event {
                TweenEvent::Start => {
                    tracing::debug!(tween = ?self.id, "Tween: start");
                    self.fire("on_start", &callbacks.on_start, |hook| hook(&tween));
                }
                TweenEvent::Delay(passed) => {
                    tracing::trace!(tween = ?self.id, passed, "Tween: delay");
                    self.fire("on_delay", &callbacks.on_delay, |hook| hook(&tween, passed));
                }
                TweenEvent::Update => {
                    tracing::trace!(tween = ?self.id, ?values, "Tween: update");
                    self.fire("on_update", &callbacks.on_update, |hook| hook(&tween, values));
                }
                TweenEvent::Pause => {
                    tracing::debug!(tween = ?self.id, "Tween: pause");
                    self.fire("on_pause", &callbacks.on_pause, |hook| hook(&tween));
                }
                TweenEvent::Reset => {
                    tracing::debug!(tween = ?self.id, "Tween: reset");
                    self.fire("on_reset", &callbacks.on_reset, |hook| hook(&tween));
                }
                TweenEvent::Stop => {
                    tracing::debug!(tween = ?self.id, "Tween: stop");
                    self.fire("on_stop", &callbacks.on_stop, |hook| hook(&tween));
                }
                TweenEvent::Overwrite => {
                    tracing::debug!(tween = ?self.id, "Tween: overwritten");
                    self.fire("on_overwrite", &callbacks.on_overwrite, |hook| hook(&tween));
                }
                TweenEvent::Complete => {
                    tracing::debug!(tween = ?self.id, "Tween: complete");
                    self.fire("on_complete", &callbacks.on_complete, |hook| {
                        hook(&tween, values)
                    });
                }
            }
        }
    }

    /// Run one user callback, containing any panic
    fn fire<H, C>(&self, origin: &'static str, hook: &Option<Arc<H>>, call: C)
    where
        H: ?Sized,
        C: FnOnce(&H),
    {
        let Some(hook) = hook else {
            return;
        };
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| call(&**hook))) {
            let error = TweenError::callback_fault(origin, payload);
            tracing::warn!(tween = ?self.id, %error, "Tween: callback faulted");
        }
    }
}

impl Claimant for TweenShared {
    fn claimant_id(&self) -> TweenId {
        self.id
    }

    fn overwrite(self: Arc<Self>) {
        self.transition(TweenState::overwrite);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, SystemClock};
    use crate::ticker::{set_global_ticker, Ticker};
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::time::Duration;

    const FRAME_MS: f64 = 10.0;

    struct Harness {
        clock: Arc<ManualClock>,
        ticker: Ticker,
    }

    impl Harness {
        fn new() -> Self {
            // RUST_LOG=blinc_tween=trace to follow transitions
            let _ = tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .with_test_writer()
                .try_init();
            let clock = Arc::new(ManualClock::new());
            let ticker = Ticker::with_clock(clock.clone());
            Self { clock, ticker }
        }

        fn tween(&self, target: &Target, to: &Snapshot, options: TweenOptions) -> Tween {
            Tween::new(&self.ticker.handle(), target, to, options)
        }

        /// A tick without advancing time
        fn frame(&self) {
            self.ticker.tick();
        }

        /// Advance time in fixed frames, ticking after each one
        fn run_for(&self, ms: f64) {
            let mut remaining = ms;
            while remaining > 0.0 {
                let step = remaining.min(FRAME_MS);
                self.clock.advance(step);
                self.ticker.tick();
                remaining -= step;
            }
        }
    }

    fn counter() -> (Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        (count.clone(), count)
    }

    fn x(value: f32) -> Snapshot {
        Snapshot::new().with("x", value)
    }

    #[test]
    fn test_mutates_target_to_end_value() {
        let h = Harness::new();
        let target = Target::from_iter([("x", 0.0)]);
        let tween = h.tween(&target, &x(100.0), TweenOptions::new().duration(300.0));

        h.frame();
        h.run_for(150.0);
        let midway = target.get("x").unwrap();
        assert!(midway > 0.0 && midway < 100.0);

        h.run_for(350.0);
        assert_eq!(target.get("x"), Some(100.0));
        assert_eq!(tween.progress(), 1.0);
        assert!(tween.is_complete());
        assert_eq!(h.ticker.thread_count(), 0);
    }

    #[test]
    fn test_mutate_false_leaves_target_untouched() {
        let h = Harness::new();
        let target = Target::from_iter([("x", 0.0)]);
        let tween = h.tween(
            &target,
            &x(100.0),
            TweenOptions::new().duration(300.0).mutate(false),
        );

        h.frame();
        h.run_for(500.0);
        assert_eq!(target.get("x"), Some(0.0));
        assert_eq!(tween.values().get("x"), Some(100.0));
        assert!(tween.is_complete());
    }

    #[test]
    fn test_stop_halts_progress_and_fires_once() {
        let h = Harness::new();
        let (stops, stop_count) = counter();
        let target = Target::from_iter([("x", 0.0)]);
        let tween = h.tween(
            &target,
            &x(100.0),
            TweenOptions::new().duration(300.0).on_stop(move |_| {
                stops.fetch_add(1, Ordering::SeqCst);
            }),
        );

        h.frame();
        h.run_for(100.0);
        tween.stop();
        tween.stop();
        tween.stop();
        let stopped_at = target.get("x").unwrap();
        let passed = tween.passed();

        h.run_for(400.0);
        assert!(target.get("x").unwrap() < 100.0);
        assert_eq!(target.get("x"), Some(stopped_at));
        assert_eq!(tween.passed(), passed);
        assert_eq!(stop_count.load(Ordering::SeqCst), 1);
        assert!(tween.is_stopped());
        assert!(h.ticker.registry().is_empty());
    }

    #[test]
    fn test_zero_duration_to_same_value() {
        let h = Harness::new();
        let (completes, complete_count) = counter();
        let target = Target::from_iter([("x", 0.0)]);
        let tween = h.tween(
            &target,
            &x(0.0),
            TweenOptions::new().on_complete(move |_, _| {
                completes.fetch_add(1, Ordering::SeqCst);
            }),
        );

        h.frame();
        assert_eq!(target.get("x"), Some(0.0));
        assert!(tween.is_complete());
        assert_eq!(complete_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_zero_duration_jumps_to_end() {
        let h = Harness::new();
        let target = Target::from_iter([("x", 3.0)]);
        h.tween(&target, &x(9.0), TweenOptions::new());
        h.frame();
        assert_eq!(target.get("x"), Some(9.0));
    }

    #[test]
    fn test_mismatched_keys_are_ignored() {
        let h = Harness::new();
        let target = Target::from_iter([("y", 0.0)]);
        let tween = h.tween(&target, &x(0.0), TweenOptions::new().duration(20.0));

        h.frame();
        h.run_for(50.0);
        assert_eq!(target.get("y"), Some(0.0));
        assert_eq!(target.get("x"), None);
        assert!(tween.values().is_empty());
        assert!(tween.is_complete());
    }

    #[test]
    fn test_non_overwriting_tweens_run_independently() {
        let h = Harness::new();
        let target = Target::from_iter([("y", 0.0)]);
        let to = Snapshot::new().with("y", 50.0);
        let short = h.tween(
            &target,
            &to,
            TweenOptions::new().duration(20.0).overwrite(false),
        );
        let long = h.tween(
            &target,
            &to,
            TweenOptions::new().duration(50.0).overwrite(false),
        );

        h.frame();
        h.run_for(15.0);
        assert!(target.get("y").unwrap() < 50.0);

        h.run_for(135.0);
        assert_eq!(target.get("y"), Some(50.0));
        assert!(short.is_complete());
        assert!(long.is_complete());
        assert!(h.ticker.registry().is_empty());
    }

    #[test]
    fn test_update_callback_receives_values() {
        let h = Harness::new();
        let last = Arc::new(Mutex::new(None));
        let sink = last.clone();
        let target = Target::from_iter([("y", 0.0)]);
        h.tween(
            &target,
            &Snapshot::new().with("y", 50.0),
            TweenOptions::new().duration(100.0).on_update(move |_, values| {
                *sink.lock().unwrap() = values.get("y");
            }),
        );

        h.frame();
        h.run_for(50.0);
        assert_eq!(*last.lock().unwrap(), Some(25.0));
    }

    #[test]
    fn test_overwrite_stops_previous_tween() {
        let h = Harness::new();
        let (overwrites, overwrite_count) = counter();
        let first_completed = Arc::new(AtomicBool::new(false));
        let (completes, complete_count) = counter();
        let target = Target::from_iter([("x", 0.0)]);

        let on_overwrite = {
            let overwrites = overwrites.clone();
            move |_: &Tween| {
                overwrites.fetch_add(1, Ordering::SeqCst);
            }
        };

        let flag = first_completed.clone();
        let first = h.tween(
            &target,
            &x(100.0),
            TweenOptions::new()
                .duration(300.0)
                .on_overwrite(on_overwrite.clone())
                .on_complete(move |_, _| flag.store(true, Ordering::SeqCst)),
        );

        h.frame();
        h.run_for(100.0);
        assert_eq!(h.ticker.registry().claimant(target.id(), "x"), Some(first.id()));

        let second = h.tween(
            &target,
            &x(100.0),
            TweenOptions::new()
                .duration(200.0)
                .on_overwrite(on_overwrite)
                .on_complete(move |_, _| {
                    completes.fetch_add(1, Ordering::SeqCst);
                }),
        );
        assert!(first.is_stopped());
        assert_eq!(overwrite_count.load(Ordering::SeqCst), 1);
        assert_eq!(h.ticker.registry().claimant(target.id(), "x"), Some(second.id()));

        h.run_for(300.0);
        assert_eq!(target.get("x"), Some(100.0));
        assert_eq!(overwrite_count.load(Ordering::SeqCst), 1);
        assert_eq!(complete_count.load(Ordering::SeqCst), 1);
        assert!(!first_completed.load(Ordering::SeqCst));
        assert!(h.ticker.registry().is_empty());
    }

    #[test]
    fn test_overwrite_only_conflicting_targets() {
        let h = Harness::new();
        let (overwrites, overwrite_count) = counter();
        let a = Target::from_iter([("x", 0.0)]);
        let b = Target::from_iter([("x", 0.0)]);

        let first = h.tween(
            &a,
            &x(10.0),
            TweenOptions::new()
                .duration(100.0)
                .on_overwrite(move |_| {
                    overwrites.fetch_add(1, Ordering::SeqCst);
                }),
        );
        h.tween(&b, &x(10.0), TweenOptions::new().duration(100.0));

        assert!(first.is_running());
        assert_eq!(overwrite_count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_pause_and_resume() {
        let h = Harness::new();
        let (pauses, pause_count) = counter();
        let (starts, start_count) = counter();
        let (completes, complete_count) = counter();
        let tween = h.tween(
            &Target::from_iter([("x", 0.0)]),
            &x(200.0),
            TweenOptions::new()
                .duration(100.0)
                .on_pause(move |_| {
                    pauses.fetch_add(1, Ordering::SeqCst);
                })
                .on_start(move |_| {
                    starts.fetch_add(1, Ordering::SeqCst);
                })
                .on_complete(move |_, _| {
                    completes.fetch_add(1, Ordering::SeqCst);
                }),
        );

        h.frame();
        h.run_for(20.0);
        tween.pause();
        let passed = tween.passed();
        assert_eq!(h.ticker.thread_count(), 0);

        h.run_for(20.0);
        assert!(tween.progress() < 1.0);
        assert_eq!(tween.passed(), passed);

        tween.start();
        assert_eq!(pause_count.load(Ordering::SeqCst), 1);
        assert_eq!(start_count.load(Ordering::SeqCst), 2);

        h.run_for(120.0);
        assert!(tween.progress() >= 1.0);
        assert_eq!(complete_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_delay_runs_before_start() {
        let h = Harness::new();
        let (delays, delay_count) = counter();
        let tween = h.tween(
            &Target::from_iter([("x", 0.0)]),
            &x(100.0),
            TweenOptions::new().delay(100.0).on_delay(move |_, _| {
                delays.fetch_add(1, Ordering::SeqCst);
            }),
        );

        h.frame();
        h.run_for(50.0);
        assert_eq!(tween.phase(), TweenPhase::Delaying);
        assert_eq!(tween.progress(), 1.0);

        h.run_for(60.0);
        assert!(delay_count.load(Ordering::SeqCst) > 0);
        assert!(tween.is_complete());
    }

    #[test]
    fn test_paused_tween_does_not_start() {
        let h = Harness::new();
        let (starts, start_count) = counter();
        let (delays, delay_count) = counter();
        let tween = h.tween(
            &Target::from_iter([("x", 0.0)]),
            &x(100.0),
            TweenOptions::new()
                .paused(true)
                .delay(100.0)
                .duration(50.0)
                .on_start(move |_| {
                    starts.fetch_add(1, Ordering::SeqCst);
                })
                .on_delay(move |_, _| {
                    delays.fetch_add(1, Ordering::SeqCst);
                }),
        );

        assert_eq!(tween.progress(), 0.0);
        assert!(tween.is_paused());
        assert!(!tween.is_complete());
        assert_eq!(h.ticker.thread_count(), 0);

        h.frame();
        h.run_for(200.0);
        assert_eq!(tween.progress(), 0.0);
        assert!(tween.is_paused());
        assert!(!tween.is_complete());
        assert_eq!(start_count.load(Ordering::SeqCst), 0);
        assert_eq!(delay_count.load(Ordering::SeqCst), 0);
        assert!(h.ticker.registry().is_empty());
    }

    #[test]
    fn test_reset_during_delay_rearms_it() {
        let h = Harness::new();
        let delay_ms = Arc::new(Mutex::new(0.0_f32));
        let (resets, reset_count) = counter();
        let sink = delay_ms.clone();
        let tween = h.tween(
            &Target::from_iter([("x", 0.0)]),
            &x(100.0),
            TweenOptions::new()
                .delay(200.0)
                .duration(200.0)
                .on_reset(move |_| {
                    resets.fetch_add(1, Ordering::SeqCst);
                })
                .on_delay(move |_, passed| *sink.lock().unwrap() = passed),
        );

        h.frame();
        h.run_for(150.0);
        let observed = *delay_ms.lock().unwrap();
        assert!(observed > 90.0 && observed < 200.0);
        assert_eq!(tween.progress(), 0.0);

        tween.reset();
        // No delay callback from inside reset itself
        assert_eq!(*delay_ms.lock().unwrap(), observed);

        h.run_for(150.0);
        let observed = *delay_ms.lock().unwrap();
        assert!(observed > 90.0 && observed < 200.0);
        assert_eq!(tween.progress(), 0.0);
        assert_eq!(reset_count.load(Ordering::SeqCst), 1);

        tween.stop();
    }

    #[test]
    fn test_repeated_start_and_pause_fire_once() {
        let h = Harness::new();
        let (starts, start_count) = counter();
        let (pauses, pause_count) = counter();
        let tween = h.tween(
            &Target::from_iter([("x", 0.0)]),
            &x(100.0),
            TweenOptions::new()
                .delay(100.0)
                .paused(true)
                .duration(100.0)
                .on_start(move |_| {
                    starts.fetch_add(1, Ordering::SeqCst);
                })
                .on_pause(move |_| {
                    pauses.fetch_add(1, Ordering::SeqCst);
                }),
        );

        h.run_for(10.0);
        for _ in 0..4 {
            tween.start();
        }
        h.run_for(10.0);
        for _ in 0..4 {
            tween.pause();
        }

        assert_eq!(start_count.load(Ordering::SeqCst), 1);
        assert_eq!(pause_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reset_without_mutation() {
        let h = Harness::new();
        let target = Target::from_iter([("x", 0.0)]);
        let (completes, complete_count) = counter();
        let tween = h.tween(
            &target,
            &x(100.0),
            TweenOptions::new()
                .mutate(false)
                .duration(100.0)
                .on_complete(move |_, _| {
                    completes.fetch_add(1, Ordering::SeqCst);
                }),
        );

        h.frame();
        h.run_for(50.0);
        tween.reset();
        assert_eq!(tween.passed(), 0.0);

        h.run_for(150.0);
        assert_eq!(complete_count.load(Ordering::SeqCst), 1);
        assert_eq!(target.get("x"), Some(0.0));
    }

    #[test]
    fn test_reset_does_not_restore_target() {
        let h = Harness::new();
        let target = Target::from_iter([("x", 0.0)]);
        let tween = h.tween(&target, &x(100.0), TweenOptions::new().duration(100.0));

        h.frame();
        h.run_for(50.0);
        let before = target.get("x").unwrap();
        tween.reset();
        assert_eq!(target.get("x"), Some(before));
        assert_eq!(tween.progress(), 0.0);
    }

    #[test]
    fn test_set_progress_scrubs_while_paused() {
        let h = Harness::new();
        let (updates, update_count) = counter();
        let target = Target::from_iter([("x", 0.0)]);
        let tween = h.tween(
            &target,
            &x(100.0),
            TweenOptions::new()
                .duration(100.0)
                .paused(true)
                .on_update(move |_, _| {
                    updates.fetch_add(1, Ordering::SeqCst);
                }),
        );
        assert_eq!(tween.passed(), 0.0);

        h.run_for(50.0);
        tween.set_progress(0.5);
        assert_eq!(tween.passed(), 50.0);
        assert_eq!(target.get("x"), Some(50.0));
        assert!(tween.is_paused());
        assert_eq!(update_count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_easing_shapes_values() {
        let h = Harness::new();
        let target = Target::from_iter([("x", 0.0)]);
        let tween = h.tween(
            &target,
            &x(100.0),
            TweenOptions::new()
                .duration(100.0)
                .paused(true)
                .easing(Easing::EaseInQuad),
        );

        tween.set_progress(0.5);
        assert_eq!(target.get("x"), Some(25.0));
    }

    #[test]
    fn test_callback_can_stop_its_own_tween() {
        let h = Harness::new();
        let (stops, stop_count) = counter();
        let target = Target::from_iter([("x", 0.0)]);
        let tween = h.tween(
            &target,
            &x(100.0),
            TweenOptions::new()
                .duration(100.0)
                .on_update(|tween, values| {
                    if values.get("x").unwrap_or(0.0) >= 50.0 {
                        tween.stop();
                    }
                })
                .on_stop(move |_| {
                    stops.fetch_add(1, Ordering::SeqCst);
                }),
        );

        h.frame();
        h.run_for(200.0);
        assert!(tween.is_stopped());
        assert_eq!(target.get("x"), Some(50.0));
        assert_eq!(stop_count.load(Ordering::SeqCst), 1);
        assert_eq!(h.ticker.thread_count(), 0);
    }

    #[test]
    fn test_panicking_callback_is_contained() {
        let h = Harness::new();
        let (completes, complete_count) = counter();
        let target = Target::from_iter([("x", 0.0)]);
        let tween = h.tween(
            &target,
            &x(100.0),
            TweenOptions::new()
                .duration(50.0)
                .on_update(|_, _| panic!("update exploded"))
                .on_complete(move |_, _| {
                    completes.fetch_add(1, Ordering::SeqCst);
                }),
        );

        h.frame();
        h.run_for(100.0);
        assert!(tween.is_complete());
        assert_eq!(target.get("x"), Some(100.0));
        assert_eq!(complete_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_tween_outlives_its_handle() {
        let h = Harness::new();
        let target = Target::from_iter([("x", 0.0)]);
        drop(h.tween(&target, &x(10.0), TweenOptions::new().duration(30.0)));

        h.frame();
        h.run_for(50.0);
        assert_eq!(target.get("x"), Some(10.0));
        assert_eq!(h.ticker.thread_count(), 0);
    }

    #[test]
    fn test_detached_tween_never_advances() {
        let target = Target::from_iter([("x", 0.0)]);
        let tween = Tween::new(
            &TickerHandle::detached(),
            &target,
            &x(10.0),
            TweenOptions::new().duration(30.0),
        );
        assert!(tween.is_running());
        assert_eq!(tween.progress(), 0.0);
        tween.stop();
        assert!(tween.is_stopped());
    }

    #[test]
    fn test_config_from_json_and_toml() {
        let config: TweenConfig = serde_json::from_str(r#"{"duration": 300.0}"#).unwrap();
        assert_eq!(config.duration, 300.0);
        assert!(config.mutate);
        assert!(config.overwrite);
        assert!(!config.paused);

        let config: TweenConfig =
            toml::from_str("duration = 120.0\ndelay = 40.0\nmutate = false").unwrap();
        let options = TweenOptions::from_config(config);
        assert_eq!(options.config().delay, 40.0);
        assert!(!options.config().mutate);
    }

    #[test]
    fn test_mutate_false_with_delay_leaves_target_untouched() {
        let h = Harness::new();
        let target = Target::from_iter([("x", 0.0)]);
        let tween = h.tween(
            &target,
            &x(100.0),
            TweenOptions::new().delay(80.0).duration(120.0).mutate(false),
        );

        h.frame();
        h.run_for(50.0);
        assert_eq!(tween.phase(), TweenPhase::Delaying);
        assert_eq!(target.get("x"), Some(0.0));

        h.run_for(100.0);
        assert_eq!(tween.phase(), TweenPhase::Active);
        assert_eq!(target.get("x"), Some(0.0));

        h.run_for(100.0);
        assert!(tween.is_complete());
        assert_eq!(target.get("x"), Some(0.0));
        assert_eq!(tween.values().get("x"), Some(100.0));
    }

    #[test]
    fn test_claims_released_when_ticked_from_another_thread() {
        let h = Harness::new();
        let done = AtomicBool::new(false);
        let tweens: Vec<Tween> = std::thread::scope(|scope| {
            scope.spawn(|| {
                while !done.load(Ordering::SeqCst) {
                    h.ticker.tick();
                }
            });
            let tweens = (0..5_000)
                .map(|_| {
                    let target = Target::from_iter([("x", 0.0)]);
                    h.tween(&target, &x(1.0), TweenOptions::new())
                })
                .collect();
            done.store(true, Ordering::SeqCst);
            tweens
        });

        // Finish whatever the spinning thread didn't reach
        h.frame();
        assert!(tweens.iter().all(Tween::is_complete));
        assert_eq!(h.ticker.thread_count(), 0);
        assert!(h.ticker.registry().is_empty());
    }

    #[test]
    fn test_ticker_kill_stops_running_tweens() {
        let mut h = Harness::new();
        let (stops, stop_count) = counter();
        let target = Target::from_iter([("x", 0.0)]);
        let tween = h.tween(
            &target,
            &x(100.0),
            TweenOptions::new().duration(100.0).on_stop(move |_| {
                stops.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let paused = h.tween(
            &Target::from_iter([("y", 0.0)]),
            &Snapshot::new().with("y", 1.0),
            TweenOptions::new().duration(100.0).paused(true),
        );

        h.frame();
        h.run_for(30.0);
        assert_eq!(h.ticker.registry().claimant(target.id(), "x"), Some(tween.id()));

        h.ticker.kill();
        assert!(tween.is_stopped());
        assert_eq!(stop_count.load(Ordering::SeqCst), 1);
        assert!(h.ticker.registry().is_empty());
        // Paused tweens hold no thread and are left alone
        assert!(paused.is_paused());
    }

    #[test]
    fn test_tween_uses_global_ticker() {
        // The only test that installs the process-wide ticker
        let clock = Arc::new(ManualClock::new());
        let ticker: &'static Ticker = Box::leak(Box::new(Ticker::with_clock(clock.clone())));
        set_global_ticker(ticker.handle());
        assert!(try_get_ticker().is_some_and(|handle| handle.is_alive()));

        let target = Target::from_iter([("x", 0.0)]);
        let moving = tween(&target, &x(40.0), TweenOptions::new().duration(40.0));
        assert_eq!(ticker.thread_count(), 1);

        ticker.tick();
        clock.advance(20.0);
        ticker.tick();
        assert_eq!(target.get("x"), Some(20.0));

        clock.advance(20.0);
        ticker.tick();
        assert!(moving.is_complete());
        assert_eq!(target.get("x"), Some(40.0));
        assert!(ticker.registry().is_empty());
    }

    // Wall-clock scenarios against the background loop

    #[test]
    fn test_background_tween_reaches_end() {
        let mut ticker = Ticker::with_clock(Arc::new(SystemClock::new()));
        ticker.start_background();

        let target = Target::from_iter([("x", 0.0)]);
        Tween::new(
            &ticker.handle(),
            &target,
            &x(100.0),
            TweenOptions::new().duration(300.0),
        );

        std::thread::sleep(Duration::from_millis(500));
        assert_eq!(target.get("x"), Some(100.0));
        ticker.kill();
    }

    #[test]
    fn test_background_tween_stopped_early() {
        let mut ticker = Ticker::with_clock(Arc::new(SystemClock::new()));
        ticker.start_background();

        let target = Target::from_iter([("x", 0.0)]);
        let tween = Tween::new(
            &ticker.handle(),
            &target,
            &x(100.0),
            TweenOptions::new().duration(300.0),
        );

        std::thread::sleep(Duration::from_millis(100));
        tween.stop();
        std::thread::sleep(Duration::from_millis(400));
        assert!(target.get("x").unwrap() < 100.0);
        ticker.kill();
    }
}
