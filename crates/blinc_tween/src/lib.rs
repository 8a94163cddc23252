//! Blinc Tween Engine
//!
//! Time-based interpolation between value snapshots, driven by a shared
//! per-frame ticker.
//!
//! # Features
//!
//! - **Ticker**: One clock, many recurring threads, stable per-tick snapshots
//! - **Tweens**: Delay, pause/resume, reset, stop and direct progress scrubbing
//! - **Overwrite Registry**: A new tween cancels older tweens driving the same properties
//! - **Exactly-once callbacks**: Repeated control calls collapse into one transition
//! - **Virtual tweens**: `mutate(false)` computes values without touching the target
//!
//! # Example
//!
//! ```ignore
//! use blinc_tween::{Snapshot, Target, Ticker, Tween, TweenOptions};
//!
//! let mut ticker = Ticker::new();
//! ticker.start_background();
//!
//! let target = Target::from_iter([("x", 0.0)]);
//! let tween = Tween::new(
//!     &ticker.handle(),
//!     &target,
//!     &Snapshot::from_iter([("x", 100.0)]),
//!     TweenOptions::new().duration(300.0),
//! );
//! ```

pub mod clock;
pub mod easing;
pub mod error;
pub mod registry;
pub mod snapshot;
pub mod state;
pub mod ticker;
pub mod tween;

pub use clock::{Clock, ManualClock, SystemClock};
pub use easing::Easing;
pub use error::TweenError;
pub use registry::{Claimant, OverwriteRegistry};
pub use snapshot::{Interpolation, Snapshot, Target, TargetId};
pub use state::{TweenEvent, TweenEvents, TweenPhase, TweenState};
pub use ticker::{
    get_ticker, is_ticker_initialized, set_global_ticker, try_get_ticker, ThreadHandle, ThreadId,
    Ticker, TickerConfig, TickerHandle,
};
pub use tween::{tween, Tween, TweenConfig, TweenId, TweenOptions};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the guard if a panicking callback poisoned it.
pub(crate) fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
