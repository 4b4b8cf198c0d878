//! Print progress presentation: remaining time, percent text, temperature
//! history and the heat-mapped glow colour.

use core::fmt::Write;

use heapless::{HistoryBuffer, String};

use crate::config::{ETA_MIN_PERCENT, TEMP_HISTORY_LEN, TEMP_SAMPLE_INTERVAL_MS};

/// Estimated remaining print time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Eta {
    /// Too early to extrapolate.
    Calculating,
    /// Seconds left.
    Remaining(u32),
}

/// Extrapolate remaining time from elapsed print time.
///
/// The tail of a print (small top layers, cooling) runs slower than the
/// linear estimate, so the margin grows: 3% below 50%, 5% below 80%, 7% after.
pub fn estimate_eta(percent: f32, elapsed_secs: u32) -> Eta {
    if percent >= 100.0 {
        return Eta::Remaining(0);
    }
    if percent.is_nan() || percent < ETA_MIN_PERCENT {
        return Eta::Calculating;
    }

    let p = f64::from(percent);
    let elapsed = f64::from(elapsed_secs);
    let total = elapsed * 100.0 / p;
    let buffer = if p < 50.0 {
        1.03
    } else if p < 80.0 {
        1.05
    } else {
        1.07
    };
    let remaining = (total - elapsed) * buffer;
    if remaining <= 0.0 {
        return Eta::Remaining(0);
    }
    let secs = remaining + 0.5;
    Eta::Remaining(if secs >= f64::from(u32::MAX) {
        u32::MAX
    } else {
        secs as u32
    })
}

/// `---`, `Done!`, `1h 5m` or `42m`.
pub fn format_eta(eta: Eta) -> String<16> {
    let mut out = String::new();
    let _ = match eta {
        Eta::Calculating => out.write_str("---"),
        Eta::Remaining(0) => out.write_str("Done!"),
        Eta::Remaining(secs) => {
            let hours = secs / 3600;
            let mins = (secs % 3600) / 60;
            if hours > 0 {
                write!(out, "{}h {}m", hours, mins)
            } else {
                write!(out, "{}m", mins)
            }
        }
    };
    out
}

/// Whole percent, truncated: 99.9 shows as `99%`.
pub fn format_percent(percent: f32) -> String<8> {
    let whole = if percent > 0.0 {
        (percent.min(100.0)) as u32
    } else {
        0
    };
    let mut out = String::new();
    let _ = write!(out, "{}%", whole);
    out
}

/// Rolling window of tool temperatures for the chart.
pub struct TemperatureHistory {
    samples: HistoryBuffer<i16, TEMP_HISTORY_LEN>,
    last_sample_ms: Option<u64>,
}

impl TemperatureHistory {
    pub const fn new() -> Self {
        Self {
            samples: HistoryBuffer::new(),
            last_sample_ms: None,
        }
    }

    /// Record `temp` unless the previous sample is less than the sample
    /// interval old. Returns whether a sample was taken.
    pub fn sample(&mut self, now_ms: u64, temp: i16) -> bool {
        if let Some(last) = self.last_sample_ms {
            if now_ms.saturating_sub(last) < TEMP_SAMPLE_INTERVAL_MS {
                return false;
            }
        }
        self.samples.write(temp);
        self.last_sample_ms = Some(now_ms);
        true
    }

    /// Oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = i16> + '_ {
        self.samples.oldest_ordered().copied()
    }

    pub fn latest(&self) -> Option<i16> {
        self.samples.recent().copied()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.last_sample_ms = None;
    }
}

impl Default for TemperatureHistory {
    fn default() -> Self {
        Self::new()
    }
}

/// Colour in HSV: hue in degrees, saturation and value 0..=255.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Hsv {
    pub hue: u16,
    pub sat: u8,
    pub val: u8,
}

/// Heat map for the glow behind the progress ring: dim blue when cold,
/// through orange to full red at printing temperature.
pub fn temp_to_glow(temp: i16) -> Hsv {
    let t = i32::from(temp);
    let lerp = |from: i32, to: i32, lo: i32, hi: i32| from + (to - from) * (t - lo) / (hi - lo);
    let (hue, val) = match t {
        i32::MIN..=39 => (240, 80),
        40..=99 => (240, lerp(80, 200, 40, 100)),
        100..=159 => (lerp(240, 30, 100, 160), 220),
        160..=219 => (lerp(30, 0, 160, 220), 240),
        _ => (0, 255),
    };
    Hsv {
        hue: hue as u16,
        sat: 255,
        val: val as u8,
    }
}
