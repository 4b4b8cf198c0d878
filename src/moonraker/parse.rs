//! Moonraker response parsing.
//!
//! Every object is optional in the JSON; missing fields fall back to their
//! defaults the same way Klipper reports an object that is not configured.
//! Only bodies that are not JSON at all are rejected.

use alloc::collections::BTreeMap;
use alloc::string::String;

use heapless::String as FixedString;
use serde::Deserialize;
use serde_json::Value;

use super::IdleTimeoutState;
use crate::config::{EXTRUDER_COUNT, TEMP_VALID_MAX};
use crate::error::{Error, Result};

#[derive(Deserialize, Default)]
#[serde(default, bound(deserialize = "S: Deserialize<'de> + Default"))]
struct Query<S> {
    result: QueryResult<S>,
}

#[derive(Deserialize, Default)]
#[serde(default, bound(deserialize = "S: Deserialize<'de> + Default"))]
struct QueryResult<S> {
    status: S,
}

fn query<'a, S: Deserialize<'a> + Default>(body: &'a [u8]) -> Result<S> {
    serde_json::from_slice::<Query<S>>(body)
        .map(|q| q.result.status)
        .map_err(|_| Error::MalformedResponse)
}

// webhooks

#[derive(Deserialize, Default)]
#[serde(default)]
struct WebhooksStatus {
    webhooks: Webhooks,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct Webhooks {
    state: String,
}

/// `true` once Klipper reports `webhooks.state == "ready"`.
pub fn printer_ready(body: &[u8]) -> Result<bool> {
    let status: WebhooksStatus = query(body)?;
    Ok(status.webhooks.state == "ready")
}

// gcode_macro _KNOMI_STATUS

/// Variables exported by the `_KNOMI_STATUS` macro.
#[derive(Deserialize, Default, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct MacroFlags {
    pub homing: bool,
    pub probing: bool,
    pub qgling: bool,
    pub heating_nozzle: bool,
    pub heating_bed: bool,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct MacroStatus {
    #[serde(rename = "gcode_macro _KNOMI_STATUS")]
    knomi: MacroFlags,
}

pub fn macro_status(body: &[u8]) -> Result<MacroFlags> {
    let status: MacroStatus = query(body)?;
    Ok(status.knomi)
}

// /api/printer

#[derive(Deserialize, Default)]
#[serde(default)]
struct PrinterInfoBody {
    state: PrinterStateBody,
    temperature: BTreeMap<String, HeaterReading>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct PrinterStateBody {
    flags: StateFlags,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct StateFlags {
    printing: bool,
    paused: bool,
    pausing: bool,
    cancelling: bool,
}

#[derive(Deserialize, Default, Clone, Copy)]
#[serde(default)]
struct HeaterReading {
    actual: f64,
    target: f64,
}

/// Printer state flags and heater readings from `/api/printer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PrinterInfo {
    /// Printing, cancelling, pausing or paused.
    pub printing: bool,
    /// Pausing or paused.
    pub paused: bool,
    pub bed_actual: i16,
    pub bed_target: i16,
    pub nozzle_actual: i16,
    pub nozzle_target: i16,
}

pub fn printer_info(body: &[u8], tool_key: &str) -> Result<PrinterInfo> {
    let parsed: PrinterInfoBody =
        serde_json::from_slice(body).map_err(|_| Error::MalformedResponse)?;
    let flags = &parsed.state.flags;
    let paused = flags.pausing || flags.paused;
    let bed = parsed.temperature.get("bed").copied().unwrap_or_default();
    let tool = parsed.temperature.get(tool_key).copied().unwrap_or_default();
    Ok(PrinterInfo {
        printing: flags.printing || flags.cancelling || paused,
        paused,
        bed_actual: round_temp(bed.actual),
        bed_target: round_temp(bed.target),
        nozzle_actual: round_temp(tool.actual),
        nozzle_target: round_temp(tool.target),
    })
}

// idle_timeout

#[derive(Deserialize, Default)]
#[serde(default)]
struct IdleTimeoutStatus {
    idle_timeout: IdleTimeoutBody,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct IdleTimeoutBody {
    state: String,
}

/// Klipper idle state. An empty state is malformed.
pub fn idle_timeout(body: &[u8]) -> Result<IdleTimeoutState> {
    let status: IdleTimeoutStatus = query(body)?;
    if status.idle_timeout.state.is_empty() {
        return Err(Error::MalformedResponse);
    }
    Ok(IdleTimeoutState::from_klipper(&status.idle_timeout.state))
}

// progress query

#[derive(Deserialize, Default)]
#[serde(default)]
struct ProgressStatus {
    virtual_sdcard: VirtualSdcard,
    print_stats: PrintStats,
    toolhead: Toolhead,
    /// `extruder`, `extruder1`.. objects.
    #[serde(flatten)]
    objects: BTreeMap<String, Value>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct VirtualSdcard {
    progress: f64,
    file_path: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct PrintStats {
    print_duration: f64,
    total_duration: f64,
    info: Option<PrintInfo>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct PrintInfo {
    current_layer: Option<u32>,
    total_layer: Option<u32>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct Toolhead {
    extruder: String,
}

/// Job progress and per-extruder temperatures.
#[derive(Debug, Clone, PartialEq)]
pub struct Progress {
    pub progress_percent: f32,
    pub file_name: FixedString<32>,
    pub current_layer: u32,
    pub total_layers: u32,
    pub print_duration_secs: u32,
    pub estimated_total_secs: u32,
    pub active_tool_name: FixedString<16>,
    pub active_tool_index: u8,
    pub active_tool_temp: i16,
    pub extruder_temps: [i16; EXTRUDER_COUNT],
}

/// `nozzle_fallback` is used as the active tool temperature when the
/// active extruder object is missing from the response.
pub fn progress(body: &[u8], nozzle_fallback: i16) -> Result<Progress> {
    let status: ProgressStatus = query(body)?;

    let active_name = if status.toolhead.extruder.is_empty() {
        "extruder"
    } else {
        status.toolhead.extruder.as_str()
    };

    let active_tool_temp = match extruder_temperature(&status.objects, active_name) {
        Some(t) => sane_temp(t),
        None => sane_temp(f64::from(nozzle_fallback)),
    };

    let mut extruder_temps = [0i16; EXTRUDER_COUNT];
    for (i, slot) in extruder_temps.iter_mut().enumerate() {
        let mut key: FixedString<12> = FixedString::new();
        let _ = key.push_str("extruder");
        if i > 0 {
            let _ = key.push(char::from(b'0' + i as u8));
        }
        *slot = extruder_temperature(&status.objects, &key)
            .map(sane_temp)
            .unwrap_or(0);
    }

    let (current_layer, total_layers) = match status.print_stats.info {
        Some(info) => (
            info.current_layer.unwrap_or(0),
            info.total_layer.unwrap_or(0),
        ),
        None => (0, 0),
    };

    let file_path = status.virtual_sdcard.file_path.as_deref().unwrap_or("");

    Ok(Progress {
        progress_percent: (status.virtual_sdcard.progress * 100.0).clamp(0.0, 100.0) as f32,
        file_name: truncate(file_basename(file_path)),
        current_layer,
        total_layers,
        print_duration_secs: status.print_stats.print_duration.max(0.0) as u32,
        estimated_total_secs: status.print_stats.total_duration.max(0.0) as u32,
        active_tool_name: truncate(active_name),
        active_tool_index: tool_index_from_name(active_name),
        active_tool_temp,
        extruder_temps,
    })
}

fn extruder_temperature(objects: &BTreeMap<String, Value>, name: &str) -> Option<f64> {
    let obj = objects.get(name)?;
    if obj.is_null() {
        return None;
    }
    Some(obj.get("temperature").and_then(Value::as_f64).unwrap_or(0.0))
}

/// `"extruder"` is tool 0, `"extruderN"` is tool N.
pub fn tool_index_from_name(name: &str) -> u8 {
    name.strip_prefix("extruder")
        .and_then(|n| n.parse::<u8>().ok())
        .unwrap_or(0)
}

/// `"SD:/test/123.gcode"` → `"123.gcode"`.
pub fn file_basename(path: &str) -> &str {
    match path.rfind('/') {
        Some(pos) => &path[pos + 1..],
        None => path,
    }
}

/// Round half up like the printer firmware does.
fn round_temp(t: f64) -> i16 {
    (t + 0.5) as i16
}

/// Rounded reading, or 0 when outside the plausible sensor range.
fn sane_temp(t: f64) -> i16 {
    let rounded = round_temp(t);
    if rounded < 0 || f64::from(rounded) > TEMP_VALID_MAX {
        0
    } else {
        rounded
    }
}

/// Copy up to `N` bytes, never splitting a UTF-8 character.
fn truncate<const N: usize>(s: &str) -> FixedString<N> {
    let mut out = FixedString::new();
    for c in s.chars() {
        if out.push(c).is_err() {
            break;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_state() {
        let ready = br#"{"result":{"status":{"webhooks":{"state":"ready","state_message":"ok"}}}}"#;
        let shutdown = br#"{"result":{"status":{"webhooks":{"state":"shutdown"}}}}"#;
        assert_eq!(printer_ready(ready), Ok(true));
        assert_eq!(printer_ready(shutdown), Ok(false));
        assert_eq!(printer_ready(b"{}"), Ok(false));
        assert_eq!(printer_ready(b"not json"), Err(Error::MalformedResponse));
    }

    #[test]
    fn macro_flags() {
        let body = br#"{"result":{"status":{"gcode_macro _KNOMI_STATUS":{"homing":false,"probing":true,"qgling":true}}}}"#;
        let flags = macro_status(body).unwrap();
        assert!(flags.probing);
        assert!(flags.qgling);
        assert!(!flags.heating_bed);
    }

    #[test]
    fn printer_info_flags_and_rounding() {
        let body = br#"{"state":{"flags":{"printing":false,"pausing":true,"cancelling":false}},
            "temperature":{"bed":{"actual":59.5,"target":60.0},"tool0":{"actual":199.4,"target":200.0}}}"#;
        let info = printer_info(body, "tool0").unwrap();
        assert!(info.paused);
        assert!(info.printing);
        assert_eq!(info.bed_actual, 60);
        assert_eq!(info.nozzle_actual, 199);
        assert_eq!(info.nozzle_target, 200);
    }

    #[test]
    fn printer_info_cancelling_counts_as_printing() {
        let body = br#"{"state":{"flags":{"cancelling":true}},"temperature":{}}"#;
        let info = printer_info(body, "tool0").unwrap();
        assert!(info.printing);
        assert!(!info.paused);
        assert_eq!(info.nozzle_actual, 0);
    }

    #[test]
    fn idle_states() {
        let idle = br#"{"result":{"status":{"idle_timeout":{"state":"Idle","printing_time":0.0}}}}"#;
        let ready = br#"{"result":{"status":{"idle_timeout":{"state":"Ready"}}}}"#;
        assert_eq!(idle_timeout(idle), Ok(IdleTimeoutState::Idle));
        assert_eq!(idle_timeout(ready), Ok(IdleTimeoutState::Ready));
        assert_eq!(
            idle_timeout(br#"{"result":{"status":{}}}"#),
            Err(Error::MalformedResponse)
        );
    }

    #[test]
    fn progress_multi_tool() {
        let body = br#"{"result":{"status":{
            "virtual_sdcard":{"progress":0.1234,"file_path":"SD:/test/123.gcode"},
            "print_stats":{"print_duration":120.7,"total_duration":130.2},
            "toolhead":{"extruder":"extruder2"},
            "extruder":{"temperature":25.2},
            "extruder1":null,
            "extruder2":{"temperature":240.6},
            "extruder3":{"temperature":612.0}}}}"#;
        let p = progress(body, 0).unwrap();
        assert!((p.progress_percent - 12.34).abs() < 0.001);
        assert_eq!(p.file_name.as_str(), "123.gcode");
        assert_eq!((p.current_layer, p.total_layers), (0, 0));
        assert_eq!(p.print_duration_secs, 120);
        assert_eq!(p.active_tool_name.as_str(), "extruder2");
        assert_eq!(p.active_tool_index, 2);
        assert_eq!(p.active_tool_temp, 241);
        assert_eq!(p.extruder_temps, [25, 0, 241, 0, 0, 0]);
    }

    #[test]
    fn progress_defaults_active_tool() {
        let body = br#"{"result":{"status":{"print_stats":{"info":{"current_layer":3}}}}}"#;
        let p = progress(body, 187).unwrap();
        assert_eq!(p.active_tool_name.as_str(), "extruder");
        assert_eq!(p.active_tool_index, 0);
        assert_eq!(p.active_tool_temp, 187);
        assert_eq!((p.current_layer, p.total_layers), (3, 0));
    }

    #[test]
    fn long_file_names_are_truncated() {
        let name: FixedString<32> =
            truncate(file_basename("/gcodes/a_really_long_file_name_for_a_test_print.gcode"));
        assert_eq!(name.len(), 32);
    }

    #[test]
    fn tool_names() {
        assert_eq!(tool_index_from_name("extruder"), 0);
        assert_eq!(tool_index_from_name("extruder5"), 5);
        assert_eq!(tool_index_from_name("heater_bed"), 0);
    }
}
