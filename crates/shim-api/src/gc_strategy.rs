//! When the main loop collects garbage.
//!
//! [`DelayedGc`] collects once the loop has gone quiet for
//! `delayed_gc_timeout`, or every `periodic_gc_duration` while it stays
//! busy. The timer runs on a worker thread that only ever wakes the main
//! loop; the collection itself happens on the isolate thread the next time
//! the loop calls [`GcStrategy::handle`].

use crate::flags::Flags;
use crate::isolate::IsolateWrap;
use crate::main_loop;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::{Duration, Instant};

/// Collection policy driven by the main loop
pub trait GcStrategy {
    /// Whether a collection may be scheduled now
    fn can_schedule_gc(&self) -> bool;

    /// Called by the main loop before it blocks
    fn handle(&self, isolate: &IsolateWrap);
}

/// Put the VM in idle mode and collect. Skipped under `--off-idlegc`.
pub fn idle_gc(isolate: &IsolateWrap) {
    if !Flags::is_idle_gc_enabled() {
        tracing::debug!(target: "shim::gc", "idle gc disabled");
        return;
    }
    tracing::info!(target: "shim::gc", "IdleGC");
    isolate.vm().enter_idle_mode();
    isolate.collect_garbage();
}

/// Timer settings for [`DelayedGc`]
#[derive(Debug, Clone)]
pub struct DelayedGcConfig {
    /// Quiet period before a collection (default: 1500 ms)
    pub delayed_gc_timeout: Duration,
    /// Longest stretch without a collection while busy (default: 5000 ms)
    pub periodic_gc_duration: Duration,
}

impl Default for DelayedGcConfig {
    fn default() -> Self {
        Self {
            delayed_gc_timeout: Duration::from_millis(1500),
            periodic_gc_duration: Duration::from_millis(5000),
        }
    }
}

/// Timer state of [`DelayedGc`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DelayedGcState {
    /// Worker thread is sleeping
    TimerStart = 0,
    /// Main loop was woken; the next `handle` collects
    TaskScheduled = 1,
    /// Idle
    TimerEnd = 2,
}

impl DelayedGcState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => DelayedGcState::TimerStart,
            1 => DelayedGcState::TaskScheduled,
            _ => DelayedGcState::TimerEnd,
        }
    }
}

struct TimerShared {
    config: DelayedGcConfig,
    state: AtomicU8,
    last_call_checked: AtomicBool,
    last_checked_time: Mutex<Instant>,
}

impl TimerShared {
    fn state(&self) -> DelayedGcState {
        DelayedGcState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: DelayedGcState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn can_schedule_gc(&self) -> bool {
        if self.last_call_checked.load(Ordering::Acquire) {
            return true;
        }
        let mut last_checked = self.last_checked_time.lock();
        if last_checked.elapsed() > self.config.periodic_gc_duration {
            *last_checked = Instant::now();
            return true;
        }
        false
    }

    fn run_timer(&self) {
        *self.last_checked_time.lock() = Instant::now();
        loop {
            self.last_call_checked.store(true, Ordering::Release);
            std::thread::sleep(self.config.delayed_gc_timeout);
            if self.can_schedule_gc() {
                self.set_state(DelayedGcState::TaskScheduled);
                main_loop::wakeup_mainloop_once();
                return;
            }
        }
    }
}

/// Collect when the loop goes quiet, and periodically while it is busy
pub struct DelayedGc {
    shared: Arc<TimerShared>,
}

impl DelayedGc {
    /// Strategy with `config` timers
    pub fn new(config: DelayedGcConfig) -> Self {
        Self {
            shared: Arc::new(TimerShared {
                config,
                state: AtomicU8::new(DelayedGcState::TimerEnd as u8),
                last_call_checked: AtomicBool::new(true),
                last_checked_time: Mutex::new(Instant::now()),
            }),
        }
    }

    /// Current timer state
    pub fn state(&self) -> DelayedGcState {
        self.shared.state()
    }

    fn start_timer(&self) {
        self.shared.set_state(DelayedGcState::TimerStart);
        let shared = self.shared.clone();
        let spawned = std::thread::Builder::new()
            .name("shim-delayed-gc".to_string())
            .spawn(move || shared.run_timer());
        if let Err(e) = spawned {
            tracing::error!(target: "shim::gc", error = %e, "failed to start the delayed gc timer");
            self.shared.set_state(DelayedGcState::TimerEnd);
        }
    }
}

impl Default for DelayedGc {
    fn default() -> Self {
        Self::new(DelayedGcConfig::default())
    }
}

impl GcStrategy for DelayedGc {
    fn can_schedule_gc(&self) -> bool {
        self.shared.can_schedule_gc()
    }

    fn handle(&self, isolate: &IsolateWrap) {
        self.shared.last_call_checked.store(false, Ordering::Release);
        match self.shared.state() {
            DelayedGcState::TimerEnd => self.start_timer(),
            DelayedGcState::TaskScheduled => {
                idle_gc(isolate);
                self.shared.set_state(DelayedGcState::TimerEnd);
            }
            DelayedGcState::TimerStart => {}
        }
    }
}

impl std::fmt::Debug for DelayedGc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelayedGc")
            .field("config", &self.shared.config)
            .field("state", &self.state())
            .finish()
    }
}

/// Collect on every loop iteration
#[derive(Debug, Default, Clone, Copy)]
pub struct EveryTickGc;

impl GcStrategy for EveryTickGc {
    fn can_schedule_gc(&self) -> bool {
        true
    }

    fn handle(&self, isolate: &IsolateWrap) {
        idle_gc(isolate);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timers() {
        let config = DelayedGcConfig::default();
        assert_eq!(config.delayed_gc_timeout, Duration::from_millis(1500));
        assert_eq!(config.periodic_gc_duration, Duration::from_millis(5000));
    }

    #[test]
    fn test_state_round_trips_through_u8() {
        for state in [
            DelayedGcState::TimerStart,
            DelayedGcState::TaskScheduled,
            DelayedGcState::TimerEnd,
        ] {
            assert_eq!(DelayedGcState::from_u8(state as u8), state);
        }
    }

    #[test]
    fn test_periodic_condition() {
        let gc = DelayedGc::new(DelayedGcConfig {
            delayed_gc_timeout: Duration::from_millis(1),
            periodic_gc_duration: Duration::from_millis(0),
        });
        gc.shared.last_call_checked.store(false, Ordering::Release);
        std::thread::sleep(Duration::from_millis(2));
        assert!(gc.can_schedule_gc());
    }
}
