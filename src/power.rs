//! Power management module - display sleep synchronized with the printer.
//!
//! Implements:
//! - Manual mode (local inactivity timeouts, Active → Idle → Sleeping)
//! - Klipper sync (sleep a fixed delay after `idle_timeout` reports Idle)
//! - LED sync (follow an accessory's active flag)
//!
//! Sleeping only switches the backlight off. The panel keeps its contents,
//! so waking is a backlight restore plus a forced redraw.

use crate::config::{RuntimeConfig, SleepMode, DEFAULT_BACKLIGHT};
use crate::moonraker::{IdleTimeoutState, PrinterSnapshot};
use crate::power_logic::{self, ManualStep};

/// Display power state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SleepState {
    /// Backlight on, timers running.
    Active,
    /// Manual mode only - inactive, waiting for the sleep timeout.
    Idle,
    /// Backlight off.
    Sleeping,
}

/// Backlight hardware seam.
pub trait Backlight {
    fn level(&self) -> u8;
    fn set_level(&mut self, level: u8);
    /// Invalidate and repaint the whole screen.
    fn request_redraw(&mut self);
}

/// Activity source consulted before sleeping. Read twice per decision:
/// once to decide, once right before the backlight goes off.
pub trait ActivityProbe {
    fn printer_active(&self) -> bool;
    /// Moonraker reachable and Klipper ready.
    fn link_ok(&self) -> bool;
}

impl ActivityProbe for PrinterSnapshot {
    fn printer_active(&self) -> bool {
        power_logic::is_printer_active(self)
    }

    fn link_ok(&self) -> bool {
        self.connected && self.printer_ready
    }
}

/// Sleep controller tracks activity and drives the backlight.
pub struct SleepController<B: Backlight> {
    backlight: B,
    state: SleepState,
    mode: SleepMode,
    enabled: bool,
    last_activity_ms: u64,
    klipper: IdleTimeoutState,
    klipper_idle_since_ms: u64,
    accessory_active: bool,
    level_before_sleep: u8,
    idle_timeout_ms: u64,
    sleep_timeout_ms: u64,
    sync_delay_ms: u64,
}

impl<B: Backlight> SleepController<B> {
    pub fn new(backlight: B, cfg: &RuntimeConfig, now_ms: u64) -> Self {
        info!("Sleep: mode {}", cfg.sleep_mode.as_str());
        Self {
            backlight,
            state: SleepState::Active,
            mode: cfg.sleep_mode,
            enabled: cfg.sleep_enabled,
            last_activity_ms: now_ms,
            klipper: IdleTimeoutState::Ready,
            klipper_idle_since_ms: now_ms,
            accessory_active: true,
            level_before_sleep: DEFAULT_BACKLIGHT,
            idle_timeout_ms: cfg.idle_timeout_ms,
            sleep_timeout_ms: cfg.sleep_timeout_ms,
            sync_delay_ms: cfg.sync_sleep_delay_ms,
        }
    }

    /// Periodic tick.
    pub fn update<P: ActivityProbe>(&mut self, now_ms: u64, probe: &P) {
        if !self.enabled {
            return;
        }

        if probe.printer_active() {
            match self.state {
                SleepState::Active => {}
                SleepState::Sleeping => self.wake(now_ms),
                SleepState::Idle => {
                    self.state = SleepState::Active;
                    self.last_activity_ms = now_ms;
                }
            }
            return;
        }

        let should_sleep = match self.mode {
            SleepMode::Manual => {
                let inactive = now_ms.saturating_sub(self.last_activity_ms);
                match power_logic::manual_step(
                    self.state,
                    inactive,
                    self.idle_timeout_ms,
                    self.sleep_timeout_ms,
                ) {
                    ManualStep::Dim => {
                        info!("Sleep: Active -> Idle");
                        self.state = SleepState::Idle;
                        false
                    }
                    ManualStep::Sleep => true,
                    ManualStep::Stay => false,
                }
            }
            SleepMode::KlipperSync => power_logic::sync_should_sleep(
                probe.link_ok(),
                self.klipper,
                now_ms.saturating_sub(self.klipper_idle_since_ms),
                self.sync_delay_ms,
            ),
            SleepMode::LedSync => power_logic::accessory_should_sleep(self.accessory_active),
        };

        if should_sleep && self.state != SleepState::Sleeping {
            self.enter_sleep(probe);
        }
    }

    /// Switch the backlight off, unless the printer became active since the
    /// decision was made. Returns whether the display is now asleep.
    pub fn enter_sleep<P: ActivityProbe>(&mut self, probe: &P) -> bool {
        if self.state == SleepState::Sleeping {
            return true;
        }
        if probe.printer_active() {
            warn!("Sleep: blocked, printer active");
            return false;
        }

        let level = self.backlight.level();
        self.level_before_sleep = if level == 0 { DEFAULT_BACKLIGHT } else { level };
        self.backlight.set_level(0);
        self.state = SleepState::Sleeping;
        info!("Sleep: backlight off ({})", self.mode.as_str());
        true
    }

    /// Restore the backlight and repaint. No-op unless sleeping.
    pub fn wake(&mut self, now_ms: u64) {
        if self.state != SleepState::Sleeping {
            return;
        }
        self.backlight.set_level(self.level_before_sleep);
        self.backlight.request_redraw();
        self.state = SleepState::Active;
        self.last_activity_ms = now_ms;
        info!("Sleep: awake, backlight {}", self.level_before_sleep);
    }

    /// User touched the screen or pressed a button.
    pub fn record_interaction(&mut self, now_ms: u64) {
        self.last_activity_ms = now_ms;
        match self.state {
            SleepState::Sleeping => self.wake(now_ms),
            SleepState::Idle => {
                debug!("Sleep: Idle -> Active");
                self.state = SleepState::Active;
            }
            SleepState::Active => {}
        }
    }

    /// A printer status change wakes the display.
    pub fn check_wake_condition(&mut self, status_changed: bool, now_ms: u64) {
        if !status_changed {
            return;
        }
        match self.state {
            SleepState::Sleeping => {
                info!("Sleep: status change, waking");
                self.wake(now_ms);
            }
            SleepState::Idle => self.record_interaction(now_ms),
            SleepState::Active => {}
        }
    }

    /// Feed Klipper's `idle_timeout` state.
    pub fn update_idle_state(&mut self, state: IdleTimeoutState, now_ms: u64) {
        if self.klipper == state {
            return;
        }
        let old = self.klipper;
        self.klipper = state;
        info!("Sleep: klipper {:?} -> {:?}", old, state);

        if state == IdleTimeoutState::Idle {
            self.klipper_idle_since_ms = now_ms;
        }
        if old == IdleTimeoutState::Idle {
            self.record_interaction(now_ms);
        }
    }

    /// Klipper came back after a restart: restart the idle countdown so the
    /// display does not sleep straight away.
    pub fn reset_idle_timer(&mut self, now_ms: u64) {
        debug!("Sleep: idle countdown reset");
        self.klipper_idle_since_ms = now_ms;
        self.wake(now_ms);
    }

    /// Feed the accessory (LED strip) state.
    pub fn update_accessory<P: ActivityProbe>(&mut self, active: bool, now_ms: u64, probe: &P) {
        if self.accessory_active == active {
            return;
        }
        self.accessory_active = active;
        info!("Sleep: accessory {}", if active { "on" } else { "off" });

        if !active && self.mode == SleepMode::LedSync && self.enabled {
            self.enter_sleep(probe);
        } else if active {
            self.wake(now_ms);
        }
    }

    /// Switch sleep mode at runtime. Resets the inactivity timer.
    pub fn set_mode(&mut self, mode: SleepMode, now_ms: u64) {
        if self.mode == mode {
            return;
        }
        info!("Sleep: mode {} -> {}", self.mode.as_str(), mode.as_str());
        self.mode = mode;
        self.record_interaction(now_ms);
    }

    /// Disabling wakes the display and suppresses automatic sleep.
    pub fn set_enabled(&mut self, enabled: bool, now_ms: u64) {
        if self.enabled == enabled {
            return;
        }
        self.enabled = enabled;
        info!("Sleep: auto sleep {}", if enabled { "enabled" } else { "disabled" });
        if !enabled {
            self.wake(now_ms);
        }
    }

    pub fn state(&self) -> SleepState {
        self.state
    }

    pub fn is_sleeping(&self) -> bool {
        self.state == SleepState::Sleeping
    }

    pub fn mode(&self) -> SleepMode {
        self.mode
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn klipper_state(&self) -> IdleTimeoutState {
        self.klipper
    }

    pub fn backlight(&self) -> &B {
        &self.backlight
    }

    pub fn backlight_mut(&mut self) -> &mut B {
        &mut self.backlight
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::Cell;
    use proptest::prelude::*;

    #[derive(Default)]
    struct FakeBacklight {
        level: u8,
        redraws: u32,
    }

    impl Backlight for FakeBacklight {
        fn level(&self) -> u8 {
            self.level
        }
        fn set_level(&mut self, level: u8) {
            self.level = level;
        }
        fn request_redraw(&mut self) {
            self.redraws += 1;
        }
    }

    struct Probe {
        active: bool,
        link: bool,
    }

    impl ActivityProbe for Probe {
        fn printer_active(&self) -> bool {
            self.active
        }
        fn link_ok(&self) -> bool {
            self.link
        }
    }

    const QUIET: Probe = Probe {
        active: false,
        link: true,
    };

    const BUSY: Probe = Probe {
        active: true,
        link: true,
    };

    /// Reports idle on the first read and busy from then on.
    struct StartsDuringCheck {
        reads: Cell<u32>,
    }

    impl ActivityProbe for StartsDuringCheck {
        fn printer_active(&self) -> bool {
            let n = self.reads.get();
            self.reads.set(n + 1);
            n > 0
        }
        fn link_ok(&self) -> bool {
            true
        }
    }

    fn controller(mode: SleepMode) -> SleepController<FakeBacklight> {
        let cfg = RuntimeConfig {
            sleep_mode: mode,
            ..RuntimeConfig::default()
        };
        let bl = FakeBacklight {
            level: 12,
            redraws: 0,
        };
        SleepController::new(bl, &cfg, 0)
    }

    #[test]
    fn manual_mode_dims_then_sleeps() {
        let mut c = controller(SleepMode::Manual);
        c.update(59_999, &QUIET);
        assert_eq!(c.state(), SleepState::Active);
        c.update(60_000, &QUIET);
        assert_eq!(c.state(), SleepState::Idle);
        c.update(299_999, &QUIET);
        assert_eq!(c.state(), SleepState::Idle);
        c.update(300_000, &QUIET);
        assert_eq!(c.state(), SleepState::Sleeping);
        assert_eq!(c.backlight().level, 0);
    }

    #[test]
    fn interaction_restores_level_and_redraws() {
        let mut c = controller(SleepMode::Manual);
        c.update(60_000, &QUIET);
        c.update(300_000, &QUIET);
        c.record_interaction(300_500);
        assert_eq!(c.state(), SleepState::Active);
        assert_eq!(c.backlight().level, 12);
        assert_eq!(c.backlight().redraws, 1);
        // Timer restarted from the interaction.
        c.update(300_500 + 59_000, &QUIET);
        assert_eq!(c.state(), SleepState::Active);
    }

    #[test]
    fn zero_level_restores_default() {
        let mut c = controller(SleepMode::LedSync);
        c.backlight_mut().level = 0;
        c.update_accessory(false, 0, &QUIET);
        assert!(c.is_sleeping());
        c.update_accessory(true, 10, &QUIET);
        assert_eq!(c.backlight().level, DEFAULT_BACKLIGHT);
    }

    #[test]
    fn klipper_idle_sleeps_after_delay() {
        let mut c = controller(SleepMode::KlipperSync);
        c.update_idle_state(IdleTimeoutState::Idle, 1_000);
        c.update(10_999, &QUIET);
        assert!(!c.is_sleeping());
        c.update(11_000, &QUIET);
        assert!(c.is_sleeping());

        c.update_idle_state(IdleTimeoutState::Printing, 12_000);
        assert_eq!(c.state(), SleepState::Active);
    }

    #[test]
    fn klipper_sync_stays_awake_while_not_ready() {
        let mut c = controller(SleepMode::KlipperSync);
        c.update_idle_state(IdleTimeoutState::Idle, 0);
        let restarting = Probe {
            active: false,
            link: false,
        };
        c.update(60_000, &restarting);
        assert!(!c.is_sleeping());
    }

    #[test]
    fn ready_after_restart_restarts_countdown() {
        let mut c = controller(SleepMode::KlipperSync);
        c.update_idle_state(IdleTimeoutState::Idle, 0);
        c.reset_idle_timer(20_000);
        c.update(25_000, &QUIET);
        assert!(!c.is_sleeping());
        c.update(30_000, &QUIET);
        assert!(c.is_sleeping());
        c.reset_idle_timer(31_000);
        assert!(!c.is_sleeping());
    }

    #[test]
    fn activity_between_decision_and_commit_blocks_sleep() {
        let mut c = controller(SleepMode::LedSync);
        c.accessory_active = false;
        let probe = StartsDuringCheck {
            reads: Cell::new(0),
        };
        c.update(1_000, &probe);
        assert_eq!(probe.reads.get(), 2);
        assert_eq!(c.state(), SleepState::Active);
        assert_eq!(c.backlight().level, 12);
    }

    #[test]
    fn busy_printer_wakes_display() {
        let mut c = controller(SleepMode::LedSync);
        c.update_accessory(false, 0, &QUIET);
        assert!(c.is_sleeping());
        c.update(100, &BUSY);
        assert_eq!(c.state(), SleepState::Active);
        assert_eq!(c.backlight().redraws, 1);
    }

    #[test]
    fn status_change_wakes() {
        let mut c = controller(SleepMode::LedSync);
        c.update_accessory(false, 0, &QUIET);
        c.check_wake_condition(false, 10);
        assert!(c.is_sleeping());
        c.check_wake_condition(true, 20);
        assert!(!c.is_sleeping());
    }

    #[test]
    fn disabling_wakes_and_suppresses() {
        let mut c = controller(SleepMode::LedSync);
        c.update_accessory(false, 0, &QUIET);
        c.set_enabled(false, 5);
        assert!(!c.is_sleeping());
        c.update(10_000_000, &QUIET);
        assert!(!c.is_sleeping());
    }

    #[test]
    fn mode_change_resets_timer() {
        let mut c = controller(SleepMode::KlipperSync);
        c.set_mode(SleepMode::Manual, 50_000);
        c.update(100_000, &QUIET);
        assert_eq!(c.state(), SleepState::Active);
        c.update(110_000, &QUIET);
        assert_eq!(c.state(), SleepState::Idle);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Tick(u32),
        Interaction,
        Klipper(u8),
        Accessory(bool),
        ReadyAgain,
        StatusChange,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u32..400_000).prop_map(Op::Tick),
            Just(Op::Interaction),
            (0u8..3).prop_map(Op::Klipper),
            any::<bool>().prop_map(Op::Accessory),
            Just(Op::ReadyAgain),
            Just(Op::StatusChange),
        ]
    }

    fn mode() -> impl Strategy<Value = SleepMode> {
        prop_oneof![
            Just(SleepMode::Manual),
            Just(SleepMode::KlipperSync),
            Just(SleepMode::LedSync),
        ]
    }

    proptest! {
        #[test]
        fn never_falls_asleep_while_busy(
            mode in mode(),
            steps in proptest::collection::vec((op(), any::<bool>(), any::<bool>()), 1..60),
        ) {
            let mut c = controller(mode);
            let mut now = 0u64;
            for (op, busy, link) in steps {
                let probe = Probe { active: busy, link };
                let before = c.state();
                match op {
                    Op::Tick(dt) => {
                        now += u64::from(dt);
                        c.update(now, &probe);
                    }
                    Op::Interaction => c.record_interaction(now),
                    Op::Klipper(k) => {
                        let state = match k {
                            0 => IdleTimeoutState::Idle,
                            1 => IdleTimeoutState::Printing,
                            _ => IdleTimeoutState::Ready,
                        };
                        c.update_idle_state(state, now);
                    }
                    Op::Accessory(on) => c.update_accessory(on, now, &probe),
                    Op::ReadyAgain => c.reset_idle_timer(now),
                    Op::StatusChange => c.check_wake_condition(true, now),
                }
                if busy && before != SleepState::Sleeping {
                    prop_assert_ne!(c.state(), SleepState::Sleeping);
                }
                if busy && matches!(op, Op::Tick(_)) {
                    prop_assert_eq!(c.state(), SleepState::Active);
                }
            }
        }
    }
}
