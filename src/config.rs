//! Application-wide constants and runtime configuration.
//!
//! All timing parameters, thresholds and Moonraker protocol constants live
//! here so they can be tuned in one place. Knobs that may change while the
//! firmware runs are grouped in [`RuntimeConfig`].

// Moonraker polling

/// Status poll period (ms).
pub const STATUS_POLL_MS: u64 = 200;

/// Command queue drain period (ms).
pub const COMMAND_DRAIN_MS: u64 = 500;

/// Per-request HTTP timeout (ms).
pub const HTTP_TIMEOUT_MS: u64 = 2_000;

/// Receive buffer for a single Moonraker response (bytes).
pub const HTTP_RX_BUFFER: usize = 4096;

/// Bounded outbound command queue length.
pub const COMMAND_QUEUE_LEN: usize = 5;

/// Longest gcode script accepted by `Command::Gcode`.
pub const GCODE_MAX_LEN: usize = 96;

/// Longest request path produced for a queued command.
pub const COMMAND_PATH_MAX: usize = 160;

/// Tolerance (°C) between actual and target before a heater counts as heating.
pub const HEATER_ERROR_BAND: i16 = 3;

/// Readings outside this range are sensor noise and reported as 0.
pub const TEMP_VALID_MAX: f64 = 500.0;

/// Number of extruders tracked in the snapshot.
pub const EXTRUDER_COUNT: usize = 6;

// View selection

/// Progress (%) at or above which a finished print counts as complete.
pub const COMPLETION_THRESHOLD_PERCENT: f32 = 95.0;

/// Upper bound (%) of the "print just started" fallback signal.
pub const PRINT_START_FALLBACK_PERCENT: f32 = 1.0;

/// How long the print-complete view is held (ms).
pub const COMPLETE_DWELL_MS: u64 = 10_000;

// Printing screen

/// UI frame period (ms).
pub const UI_FRAME_MS: u64 = 5;

/// Cycle rotation tick (ms).
pub const CYCLE_TICK_MS: u64 = 200;

/// Phase durations (ms): Progress, TemperatureGraph, ToolAnimation.
pub const PHASE_PROGRESS_MS: u64 = 10_000;
pub const PHASE_TEMPERATURE_MS: u64 = 8_000;
pub const PHASE_TOOL_MS: u64 = 8_000;

/// Centre label alternates percent / remaining time at this interval (ms).
pub const LABEL_TOGGLE_MS: u64 = 3_000;

/// Samples kept for the temperature chart.
pub const TEMP_HISTORY_LEN: usize = 60;

/// Minimum spacing between two temperature samples (ms).
pub const TEMP_SAMPLE_INTERVAL_MS: u64 = 1_000;

/// Percent below which the remaining time is still "calculating".
pub const ETA_MIN_PERCENT: f32 = 2.0;

// Sleep

/// Manual mode: inactivity before dimming to Idle (ms).
pub const IDLE_TIMEOUT_MS: u64 = 60_000;

/// Manual mode: inactivity before the backlight goes off (ms).
pub const SLEEP_TIMEOUT_MS: u64 = 300_000;

/// Klipper-synced mode: delay after the printer reports idle (ms).
pub const SYNC_SLEEP_DELAY_MS: u64 = 10_000;

/// Backlight level restored when nothing better is known.
pub const DEFAULT_BACKLIGHT: u8 = 16;

/// Highest backlight level (full PWM duty).
pub const BACKLIGHT_MAX: u8 = 16;

// Button

/// Debounce delay after a button edge (ms).
pub const BUTTON_DEBOUNCE_MS: u64 = 30;

/// Press held at least this long counts as a hold (ms).
pub const BUTTON_HOLD_MS: u64 = 1_500;

// Rendering

/// Frame period of the built-in animations (ms).
pub const ANIMATION_FRAME_MS: u64 = 100;

/// Memory reserved per loaded animation (bytes).
pub const ASSET_BUFFER_BYTES: usize = 48 * 1024;

// Device identity

/// Tool displays supported on one printer (hostname suffix `-t0`..`-t5`).
pub const MAX_TOOLS: u8 = 6;

/// Default `/api/printer` temperature key read as the nozzle.
pub const DEFAULT_MOONRAKER_TOOL: &str = "tool0";

/// Which signal drives display sleep.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SleepMode {
    /// Local inactivity timeouts.
    Manual,
    /// Follows Klipper's `idle_timeout` object.
    #[default]
    KlipperSync,
    /// Follows an accessory's active flag (LED strip).
    LedSync,
}

impl SleepMode {
    /// Parse a mode by its configuration name.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim() {
            "manual" => Some(SleepMode::Manual),
            "klipper" => Some(SleepMode::KlipperSync),
            "led" => Some(SleepMode::LedSync),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SleepMode::Manual => "manual",
            SleepMode::KlipperSync => "klipper",
            SleepMode::LedSync => "led",
        }
    }
}

/// Knobs that can change at runtime.
#[derive(Clone, Debug, PartialEq)]
pub struct RuntimeConfig {
    pub sleep_mode: SleepMode,
    pub sleep_enabled: bool,
    pub tool_index: u8,
    pub idle_timeout_ms: u64,
    pub sleep_timeout_ms: u64,
    pub sync_sleep_delay_ms: u64,
    pub dwell_ms: u64,
    pub moonraker_tool: heapless::String<16>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        let mut moonraker_tool = heapless::String::new();
        let _ = moonraker_tool.push_str(DEFAULT_MOONRAKER_TOOL);
        Self {
            sleep_mode: SleepMode::default(),
            sleep_enabled: true,
            tool_index: 0,
            idle_timeout_ms: IDLE_TIMEOUT_MS,
            sleep_timeout_ms: SLEEP_TIMEOUT_MS,
            sync_sleep_delay_ms: SYNC_SLEEP_DELAY_MS,
            dwell_ms: COMPLETE_DWELL_MS,
            moonraker_tool,
        }
    }
}

impl RuntimeConfig {
    /// Defaults with the tool index taken from the device identity.
    pub fn for_identity(identity: &str) -> Self {
        Self {
            tool_index: detect_tool_index(identity),
            ..Self::default()
        }
    }
}

/// Tool index from a hostname ending in `-tN` (N in 0..=5), else 0.
///
/// Only the leading digits after the last `-t` count, so `knomi-t3b` is tool 3.
pub fn detect_tool_index(identity: &str) -> u8 {
    let Some(pos) = identity.rfind("-t") else {
        return 0;
    };
    let digits = identity[pos + 2..]
        .bytes()
        .take_while(u8::is_ascii_digit)
        .take(3);
    let n = digits.fold(0u16, |acc, d| acc * 10 + u16::from(d - b'0'));
    if n < u16::from(MAX_TOOLS) {
        n as u8
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_index_from_hostname_suffix() {
        assert_eq!(detect_tool_index("knomi-t0"), 0);
        assert_eq!(detect_tool_index("knomi-t3"), 3);
        assert_eq!(detect_tool_index("voron-knomi-t5"), 5);
        assert_eq!(detect_tool_index("knomi-t3b"), 3);
    }

    #[test]
    fn tool_index_falls_back_to_zero() {
        assert_eq!(detect_tool_index("knomi"), 0);
        assert_eq!(detect_tool_index("knomi-t6"), 0);
        assert_eq!(detect_tool_index("knomi-t12"), 0);
        assert_eq!(detect_tool_index("knomi-tx"), 0);
        assert_eq!(detect_tool_index(""), 0);
    }

    #[test]
    fn sleep_mode_names() {
        for mode in [SleepMode::Manual, SleepMode::KlipperSync, SleepMode::LedSync] {
            assert_eq!(SleepMode::parse(mode.as_str()), Some(mode));
        }
        assert_eq!(SleepMode::parse("bogus"), None);
    }

    #[test]
    fn runtime_defaults() {
        let cfg = RuntimeConfig::for_identity("knomi-t2");
        assert_eq!(cfg.tool_index, 2);
        assert_eq!(cfg.sleep_mode, SleepMode::KlipperSync);
        assert!(cfg.sleep_enabled);
        assert_eq!(cfg.moonraker_tool.as_str(), "tool0");
        assert_eq!(cfg.dwell_ms, COMPLETE_DWELL_MS);
    }
}
