//! Tween error types
//!
//! Nothing in the engine returns these to callers of `start`/`stop`/`pause`/`reset`.
//! They describe faults that are absorbed locally and reported through `tracing`.

use std::any::Any;

use thiserror::Error;

use crate::snapshot::TargetId;

/// Faults absorbed by the ticker and tweens
#[derive(Error, Debug)]
pub enum TweenError {
    /// A `to` key has no starting value on the target; the key is skipped
    #[error("property `{key}` has no starting value on target {target}")]
    ConfigurationMismatch { key: String, target: TargetId },

    /// A user callback panicked; delivery to everything else continues
    #[error("{origin} callback panicked: {message}")]
    CallbackFault {
        origin: &'static str,
        message: String,
    },

    /// The ticker backing a handle has been dropped
    #[error("ticker is no longer running")]
    TickerUnavailable,
}

impl TweenError {
    /// Build a `CallbackFault` from a caught panic payload
    pub(crate) fn callback_fault(origin: &'static str, payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        TweenError::CallbackFault { origin, message }
    }
}
