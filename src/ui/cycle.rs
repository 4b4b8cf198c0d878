//! Timed rotation between the printing sub-views.
//!
//! Both timers here are plain counters advanced from the UI tick; there is
//! no separate timer context, so start/stop can never race a tick.

use super::CycleMode;
use crate::config::LABEL_TOGGLE_MS;

/// Round-robin Progress → TemperatureGraph → ToolAnimation.
#[derive(Debug, Clone)]
pub struct CycleRotation {
    running: bool,
    mode: CycleMode,
    in_phase_ms: u64,
}

impl CycleRotation {
    pub const fn new() -> Self {
        Self {
            running: false,
            mode: CycleMode::Progress,
            in_phase_ms: 0,
        }
    }

    /// Start from Progress. Returns the mode to show, or `None` when the
    /// rotation was already running.
    pub fn start(&mut self) -> Option<CycleMode> {
        if self.running {
            return None;
        }
        self.running = true;
        self.mode = CycleMode::Progress;
        self.in_phase_ms = 0;
        info!("Cycle: started");
        Some(self.mode)
    }

    /// Idempotent.
    pub fn stop(&mut self) {
        if self.running {
            self.running = false;
            info!("Cycle: stopped");
        }
    }

    /// Advance by `elapsed_ms`. Returns the new mode when a phase boundary
    /// was crossed. Time past the boundary carries into the next phase.
    pub fn tick(&mut self, elapsed_ms: u64) -> Option<CycleMode> {
        if !self.running {
            return None;
        }
        self.in_phase_ms += elapsed_ms;
        let mut changed = false;
        while self.in_phase_ms >= self.mode.duration_ms() {
            self.in_phase_ms -= self.mode.duration_ms();
            self.mode = self.mode.next();
            changed = true;
        }
        if changed {
            debug!("Cycle: -> {:?}", self.mode);
            Some(self.mode)
        } else {
            None
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn mode(&self) -> CycleMode {
        self.mode
    }
}

impl Default for CycleRotation {
    fn default() -> Self {
        Self::new()
    }
}

/// Centre label alternating between percent and remaining time.
#[derive(Debug, Clone, Default)]
pub struct LabelToggle {
    elapsed_ms: u64,
    show_eta: bool,
}

impl LabelToggle {
    pub const fn new() -> Self {
        Self {
            elapsed_ms: 0,
            show_eta: false,
        }
    }

    /// Returns true when the label flipped.
    pub fn tick(&mut self, elapsed_ms: u64) -> bool {
        self.elapsed_ms += elapsed_ms;
        if self.elapsed_ms < LABEL_TOGGLE_MS {
            return false;
        }
        self.elapsed_ms %= LABEL_TOGGLE_MS;
        self.show_eta = !self.show_eta;
        true
    }

    pub fn shows_eta(&self) -> bool {
        self.show_eta
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }
}
