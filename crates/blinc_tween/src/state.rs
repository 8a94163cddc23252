//! Tween state machine
//!
//! [`TweenState`] is a plain record with transition methods. Each transition
//! returns the events it produced, in firing order; the caller decides how to
//! deliver them. Calling a transition that is already in effect returns no
//! events, which is what makes every callback fire at most once per edge.

use smallvec::SmallVec;

/// Lifecycle phase of a tween
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TweenPhase {
    /// Constructed, never started
    Idle,
    /// Started, waiting out the configured delay
    Delaying,
    /// Advancing toward the end values
    Active,
    /// Suspended; elapsed time is preserved
    Paused,
    /// Reached the end values (terminal)
    Complete,
    /// Stopped or overwritten (terminal)
    Stopped,
}

impl TweenPhase {
    /// Whether the phase needs per-frame ticks
    pub fn is_running(self) -> bool {
        matches!(self, TweenPhase::Delaying | TweenPhase::Active)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TweenPhase::Complete | TweenPhase::Stopped)
    }
}

/// Something a transition wants the outside world to observe
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TweenEvent {
    Start,
    /// Elapsed delay in milliseconds
    Delay(f32),
    Update,
    Pause,
    Reset,
    Stop,
    Overwrite,
    Complete,
}

/// Events produced by a single transition
pub type TweenEvents = SmallVec<[TweenEvent; 4]>;

/// Timing and phase of one tween
#[derive(Clone, Debug)]
pub struct TweenState {
    duration: f32,
    delay: f32,
    phase: TweenPhase,
    passed: f32,
    delay_passed: f32,
}

impl TweenState {
    /// A new state. `paused` tweens begin in [`TweenPhase::Paused`] and wait
    /// for an explicit start.
    pub fn new(duration: f32, delay: f32, paused: bool) -> Self {
        Self {
            duration: sanitize(duration),
            delay: sanitize(delay),
            phase: if paused {
                TweenPhase::Paused
            } else {
                TweenPhase::Idle
            },
            passed: 0.0,
            delay_passed: 0.0,
        }
    }

    pub fn phase(&self) -> TweenPhase {
        self.phase
    }

    pub fn duration(&self) -> f32 {
        self.duration
    }

    pub fn delay(&self) -> f32 {
        self.delay
    }

    /// Milliseconds elapsed in the active phase, delay excluded
    pub fn passed(&self) -> f32 {
        self.passed
    }

    /// Milliseconds of delay consumed so far
    pub fn delay_passed(&self) -> f32 {
        self.delay_passed
    }

    /// `passed / duration` clamped to `[0, 1]`; always 1 for zero-length tweens
    pub fn progress(&self) -> f32 {
        if self.duration > 0.0 {
            (self.passed / self.duration).clamp(0.0, 1.0)
        } else {
            1.0
        }
    }

    /// Idle/Paused -> Delaying or Active
    pub fn start(&mut self) -> TweenEvents {
        let mut events = TweenEvents::new();
        if matches!(self.phase, TweenPhase::Idle | TweenPhase::Paused) {
            self.phase = self.resume_phase();
            events.push(TweenEvent::Start);
        }
        events
    }

    /// Delaying/Active -> Paused
    pub fn pause(&mut self) -> TweenEvents {
        let mut events = TweenEvents::new();
        match self.phase {
            TweenPhase::Delaying | TweenPhase::Active => {
                self.phase = TweenPhase::Paused;
                events.push(TweenEvent::Pause);
            }
            TweenPhase::Idle => self.phase = TweenPhase::Paused,
            _ => {}
        }
        events
    }

    /// Any non-terminal phase -> Stopped. `passed` is kept.
    pub fn stop(&mut self) -> TweenEvents {
        let mut events = TweenEvents::new();
        if !self.phase.is_terminal() {
            self.phase = TweenPhase::Stopped;
            events.push(TweenEvent::Stop);
        }
        events
    }

    /// Stop caused by a newer claim on the same properties
    pub fn overwrite(&mut self) -> TweenEvents {
        let mut events = self.stop();
        if !events.is_empty() {
            events.push(TweenEvent::Overwrite);
        }
        events
    }

    /// Rewind to the beginning, re-arming the delay.
    ///
    /// A running tween keeps running from zero; a paused one stays paused.
    /// No delay event is fired here, the next tick reports it.
    pub fn reset(&mut self) -> TweenEvents {
        let mut events = TweenEvents::new();
        if self.phase.is_terminal() {
            return events;
        }
        self.passed = 0.0;
        self.delay_passed = 0.0;
        if self.phase.is_running() {
            self.phase = self.resume_phase();
        }
        events.push(TweenEvent::Reset);
        events
    }

    /// Advance by one tick of `delta` milliseconds
    pub fn advance(&mut self, delta: f32) -> TweenEvents {
        let mut events = TweenEvents::new();
        let mut delta = sanitize(delta);

        if self.phase == TweenPhase::Delaying {
            self.delay_passed += delta;
            if self.delay_passed < self.delay {
                events.push(TweenEvent::Delay(self.delay_passed));
                return events;
            }
            // Carry whatever overshot the delay into the active phase. The
            // crossing tick reports an update, not a delay.
            delta = self.delay_passed - self.delay;
            self.delay_passed = self.delay;
            self.phase = TweenPhase::Active;
        }

        if self.phase == TweenPhase::Active {
            self.passed = (self.passed + delta).min(self.duration);
            events.push(TweenEvent::Update);
            if self.passed >= self.duration {
                self.phase = TweenPhase::Complete;
                events.push(TweenEvent::Complete);
            }
        }
        events
    }

    /// Jump to `progress` without touching the phase or producing events
    pub fn scrub(&mut self, progress: f32) {
        let progress = if progress.is_nan() {
            0.0
        } else {
            progress.clamp(0.0, 1.0)
        };
        self.passed = progress * self.duration;
    }

    fn resume_phase(&self) -> TweenPhase {
        if self.delay_passed < self.delay {
            TweenPhase::Delaying
        } else {
            TweenPhase::Active
        }
    }
}

fn sanitize(ms: f32) -> f32 {
    if ms.is_finite() {
        ms.max(0.0)
    } else {
        0.0
    }
}
