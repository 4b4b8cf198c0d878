use crate::moonraker::{IdleTimeoutState, PrinterSnapshot};
use crate::power::SleepState;

/// Printer is doing something the user may be watching.
pub fn is_printer_active(s: &PrinterSnapshot) -> bool {
    s.printing
        || s.paused
        || s.homing
        || s.probing
        || s.leveling
        || s.nozzle_heating()
        || s.bed_heating()
}

/// Outcome of one manual-mode step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ManualStep {
    Stay,
    Dim,
    Sleep,
}

/// Manual mode: Active dims to Idle after `idle_timeout_ms`, Idle sleeps
/// after `sleep_timeout_ms`, both measured from the last interaction.
pub fn manual_step(
    state: SleepState,
    inactive_ms: u64,
    idle_timeout_ms: u64,
    sleep_timeout_ms: u64,
) -> ManualStep {
    match state {
        SleepState::Active if inactive_ms >= idle_timeout_ms => ManualStep::Dim,
        SleepState::Idle if inactive_ms >= sleep_timeout_ms => ManualStep::Sleep,
        _ => ManualStep::Stay,
    }
}

/// Klipper-synced mode: sleep once Klipper has been idle for the delay,
/// never while Klipper is restarting or unreachable.
pub fn sync_should_sleep(
    link_ok: bool,
    klipper: IdleTimeoutState,
    idle_for_ms: u64,
    delay_ms: u64,
) -> bool {
    link_ok && klipper == IdleTimeoutState::Idle && idle_for_ms >= delay_ms
}

/// Accessory-synced mode: sleep whenever the accessory is off.
pub fn accessory_should_sleep(accessory_active: bool) -> bool {
    !accessory_active
}
