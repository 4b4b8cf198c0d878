//! Moonraker client - polls printer state and sends queued commands.
//!
//! The poller owns the [`PrinterSnapshot`]; the UI only ever reads copies of
//! it. Failures never propagate out of [`StatusSource::poll`]: they are logged
//! and the snapshot keeps its last known values.

pub mod parse;
pub mod queue;

use alloc::vec;
use alloc::vec::Vec;

use heapless::String;

use crate::config::{self, HEATER_ERROR_BAND};
use crate::error::{Error, Result};

pub use queue::{drain_one, send_command, Command, CommandQueue};

/// Ready check, queried every poll.
pub const PATH_WEBHOOKS: &str = "/printer/objects/query?webhooks";
/// `_KNOMI_STATUS` macro variables (homing, probing, leveling, heating).
pub const PATH_MACRO_STATUS: &str = "/printer/objects/query?gcode_macro%20_KNOMI_STATUS";
/// OctoPrint-compatible printer state and temperatures.
pub const PATH_PRINTER_INFO: &str = "/api/printer";
/// Klipper's own idle timer.
pub const PATH_IDLE_TIMEOUT: &str = "/printer/objects/query?idle_timeout";
/// Print progress, only queried while printing.
pub const PATH_PROGRESS: &str = "/printer/objects/query?virtual_sdcard&print_stats&toolhead\
&extruder&extruder1&extruder2&extruder3&extruder4&extruder5";

/// HTTP seam. Implementations write the response body into `body` and
/// return its length.
///
/// Errors: [`Error::Transport`] when no response arrived, [`Error::Http`]
/// for non-success status codes, [`Error::BufferOverflow`] when the body
/// does not fit.
#[allow(async_fn_in_trait)]
pub trait HttpTransport {
    async fn get(&mut self, path: &str, body: &mut [u8]) -> Result<usize>;
    async fn post(&mut self, path: &str, body: &mut [u8]) -> Result<usize>;
}

/// Klipper `idle_timeout.state`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum IdleTimeoutState {
    Ready,
    Printing,
    Idle,
}

impl IdleTimeoutState {
    /// Anything Klipper reports besides `Idle` and `Printing` counts as ready.
    pub fn from_klipper(state: &str) -> Self {
        match state {
            "Idle" => IdleTimeoutState::Idle,
            "Printing" => IdleTimeoutState::Printing,
            _ => IdleTimeoutState::Ready,
        }
    }
}

/// Latest known printer state.
#[derive(Clone, Debug, PartialEq)]
pub struct PrinterSnapshot {
    // Reachability
    pub connected: bool,
    pub printer_ready: bool,

    // Activity flags
    pub printing: bool,
    pub paused: bool,
    pub homing: bool,
    pub probing: bool,
    pub leveling: bool,
    pub heating_nozzle: bool,
    pub heating_bed: bool,

    // Temperatures (°C, rounded)
    pub bed_actual: i16,
    pub bed_target: i16,
    pub nozzle_actual: i16,
    pub nozzle_target: i16,
    pub extruder_temps: [i16; config::EXTRUDER_COUNT],
    pub active_tool_temp: i16,
    pub active_tool_index: u8,
    pub active_tool_name: String<16>,

    // Job
    pub progress_percent: f32,
    pub current_layer: u32,
    pub total_layers: u32,
    pub print_duration_secs: u32,
    pub estimated_total_secs: u32,
    pub file_name: String<32>,
}

impl PrinterSnapshot {
    pub const fn new() -> Self {
        Self {
            connected: false,
            printer_ready: false,
            printing: false,
            paused: false,
            homing: false,
            probing: false,
            leveling: false,
            heating_nozzle: false,
            heating_bed: false,
            bed_actual: 0,
            bed_target: 0,
            nozzle_actual: 0,
            nozzle_target: 0,
            extruder_temps: [0; config::EXTRUDER_COUNT],
            active_tool_temp: 0,
            active_tool_index: 0,
            active_tool_name: String::new(),
            progress_percent: 0.0,
            current_layer: 0,
            total_layers: 0,
            print_duration_secs: 0,
            estimated_total_secs: 0,
            file_name: String::new(),
        }
    }

    /// Explicit macro flag, or actual/target outside the error band.
    pub fn nozzle_heating(&self) -> bool {
        self.heating_nozzle || heater_diverges(self.nozzle_actual, self.nozzle_target)
    }

    pub fn bed_heating(&self) -> bool {
        self.heating_bed || heater_diverges(self.bed_actual, self.bed_target)
    }

    /// Temperature of the tool this display is mounted on. Falls back to
    /// the nozzle reading until the first progress query has filled the
    /// per-extruder table.
    pub fn tool_temperature(&self, tool_index: u8) -> i16 {
        match self.extruder_temps.get(usize::from(tool_index)) {
            Some(&t) if t > 0 => t,
            _ => self.nozzle_actual,
        }
    }

    /// Bitmask of the flags that drive view selection and sleep.
    fn activity_bits(&self) -> u8 {
        [
            self.printing,
            self.paused,
            self.homing,
            self.probing,
            self.leveling,
            self.heating_nozzle,
            self.heating_bed,
        ]
        .iter()
        .enumerate()
        .fold(0, |acc, (i, &on)| acc | (u8::from(on) << i))
    }
}

impl Default for PrinterSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

/// Heating when below target by more than the band, or above a non-zero
/// target by more than the band.
pub fn heater_diverges(actual: i16, target: i16) -> bool {
    let actual = i32::from(actual);
    let target = i32::from(target);
    let band = i32::from(HEATER_ERROR_BAND);
    actual + band < target || (target != 0 && target + band < actual)
}

/// What changed during one poll; forwarded to the sleep controller.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PollReport {
    /// Printer went from not-ready to ready (firmware restart finished).
    pub became_ready: bool,
    /// `idle_timeout` state, when it could be read.
    pub idle_state: Option<IdleTimeoutState>,
    /// Any activity flag toggled.
    pub status_changed: bool,
}

/// Polls Moonraker and maintains the snapshot.
pub struct StatusSource {
    snapshot: PrinterSnapshot,
    moonraker_tool: String<16>,
    rx: Vec<u8>,
}

impl StatusSource {
    pub fn new(moonraker_tool: &str) -> Self {
        let mut tool = String::new();
        if tool.push_str(moonraker_tool).is_err() {
            warn!("Poll: tool key too long, using default");
            let _ = tool.push_str(config::DEFAULT_MOONRAKER_TOOL);
        }
        Self {
            snapshot: PrinterSnapshot::new(),
            moonraker_tool: tool,
            rx: vec![0; config::HTTP_RX_BUFFER],
        }
    }

    pub fn snapshot(&self) -> &PrinterSnapshot {
        &self.snapshot
    }

    /// One polling round. Never fails; see [`PollReport`].
    pub async fn poll<T: HttpTransport>(&mut self, transport: &mut T) -> PollReport {
        let before = self.snapshot.activity_bits();
        let was_ready = self.snapshot.printer_ready;
        let mut report = PollReport::default();

        match self.query_ready(transport).await {
            Ok(ready) => {
                self.snapshot.connected = true;
                self.snapshot.printer_ready = ready;
            }
            Err(e) => {
                if matches!(e, Error::MalformedResponse) {
                    warn!("Poll: webhooks response malformed");
                } else {
                    warn!("Poll: printer unreachable ({:?})", e);
                }
                self.snapshot.connected = false;
                self.snapshot.printer_ready = false;
                return report;
            }
        }

        if !self.snapshot.printer_ready {
            debug!("Poll: klipper not ready");
            return report;
        }

        if !was_ready {
            info!("Poll: klipper ready");
            report.became_ready = true;
        }

        // Macro flags first so busy flags are fresh before `printing` is.
        if let Err(e) = self.query_macro_status(transport).await {
            warn!("Poll: macro status failed ({:?})", e);
        }
        if let Err(e) = self.query_printer_info(transport).await {
            warn!("Poll: printer info failed ({:?})", e);
        }
        match self.query_idle_timeout(transport).await {
            Ok(state) => report.idle_state = Some(state),
            Err(e) => warn!("Poll: idle_timeout failed ({:?})", e),
        }
        if self.snapshot.printing {
            if let Err(e) = self.query_progress(transport).await {
                warn!("Poll: progress failed ({:?})", e);
            }
        }

        report.status_changed = before != self.snapshot.activity_bits();
        report
    }

    async fn query_ready<T: HttpTransport>(&mut self, transport: &mut T) -> Result<bool> {
        let body = fetch(transport, &mut self.rx, PATH_WEBHOOKS).await?;
        parse::printer_ready(body)
    }

    async fn query_macro_status<T: HttpTransport>(&mut self, transport: &mut T) -> Result<()> {
        let body = fetch(transport, &mut self.rx, PATH_MACRO_STATUS).await?;
        let flags = parse::macro_status(body)?;
        let s = &mut self.snapshot;
        s.homing = flags.homing;
        s.probing = flags.probing;
        s.leveling = flags.qgling;
        s.heating_nozzle = flags.heating_nozzle;
        s.heating_bed = flags.heating_bed;
        Ok(())
    }

    async fn query_printer_info<T: HttpTransport>(&mut self, transport: &mut T) -> Result<()> {
        let body = fetch(transport, &mut self.rx, PATH_PRINTER_INFO).await?;
        let info = parse::printer_info(body, &self.moonraker_tool)?;
        let s = &mut self.snapshot;
        s.paused = info.paused;
        s.printing = info.printing;
        s.bed_actual = info.bed_actual;
        s.bed_target = info.bed_target;
        s.nozzle_actual = info.nozzle_actual;
        s.nozzle_target = info.nozzle_target;
        Ok(())
    }

    async fn query_idle_timeout<T: HttpTransport>(
        &mut self,
        transport: &mut T,
    ) -> Result<IdleTimeoutState> {
        let body = fetch(transport, &mut self.rx, PATH_IDLE_TIMEOUT).await?;
        parse::idle_timeout(body)
    }

    async fn query_progress<T: HttpTransport>(&mut self, transport: &mut T) -> Result<()> {
        let body = fetch(transport, &mut self.rx, PATH_PROGRESS).await?;
        let p = parse::progress(body, self.snapshot.nozzle_actual)?;
        let s = &mut self.snapshot;
        s.progress_percent = p.progress_percent;
        s.file_name = p.file_name;
        s.current_layer = p.current_layer;
        s.total_layers = p.total_layers;
        s.print_duration_secs = p.print_duration_secs;
        s.estimated_total_secs = p.estimated_total_secs;
        s.active_tool_name = p.active_tool_name;
        s.active_tool_index = p.active_tool_index;
        s.active_tool_temp = p.active_tool_temp;
        s.extruder_temps = p.extruder_temps;
        trace!(
            "Poll: progress {} layer {}/{}",
            s.progress_percent,
            s.current_layer,
            s.total_layers
        );
        Ok(())
    }
}

async fn fetch<'b, T: HttpTransport>(
    transport: &mut T,
    buf: &'b mut [u8],
    path: &str,
) -> Result<&'b [u8]> {
    let len = transport.get(path, buf).await?;
    if len == 0 {
        return Err(Error::MalformedResponse);
    }
    buf.get(..len).ok_or(Error::BufferOverflow)
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::block_on;
    use std::collections::HashMap;

    /// Transport answering from a path → body table.
    #[derive(Default)]
    struct Scripted {
        routes: HashMap<&'static str, &'static str>,
        requests: std::vec::Vec<std::string::String>,
    }

    impl Scripted {
        fn route(mut self, path: &'static str, body: &'static str) -> Self {
            self.routes.insert(path, body);
            self
        }
    }

    impl HttpTransport for Scripted {
        async fn get(&mut self, path: &str, body: &mut [u8]) -> Result<usize> {
            self.requests.push(path.into());
            let reply = self.routes.get(path).ok_or(Error::Transport)?;
            let bytes = reply.as_bytes();
            body.get_mut(..bytes.len())
                .ok_or(Error::BufferOverflow)?
                .copy_from_slice(bytes);
            Ok(bytes.len())
        }

        async fn post(&mut self, path: &str, _body: &mut [u8]) -> Result<usize> {
            self.requests.push(path.into());
            Ok(0)
        }
    }

    const READY: &str = r#"{"result":{"status":{"webhooks":{"state":"ready"}}}}"#;
    const STARTUP: &str = r#"{"result":{"status":{"webhooks":{"state":"startup"}}}}"#;
    const MACRO_HOMING: &str = r#"{"result":{"status":{"gcode_macro _KNOMI_STATUS":
        {"homing":true,"probing":false,"qgling":false,"heating_nozzle":false,"heating_bed":false}}}}"#;
    const PRINTING: &str = r#"{"state":{"flags":{"printing":true,"paused":false}},
        "temperature":{"bed":{"actual":59.6,"target":60},"tool0":{"actual":214.4,"target":215}}}"#;
    const IDLE: &str = r#"{"result":{"status":{"idle_timeout":{"state":"Idle"}}}}"#;
    const PROGRESS: &str = r#"{"result":{"status":{
        "virtual_sdcard":{"progress":0.5,"file_path":"/home/pi/gcodes/benchy.gcode"},
        "print_stats":{"print_duration":600,"total_duration":640,"info":{"current_layer":10,"total_layer":100}},
        "toolhead":{"extruder":"extruder"},"extruder":{"temperature":214.6}}}}"#;

    #[test]
    fn heater_band() {
        assert!(!heater_diverges(200, 203));
        assert!(heater_diverges(200, 204));
        assert!(heater_diverges(210, 206));
        assert!(!heater_diverges(30, 0));
    }

    #[test]
    fn tool_temperature_falls_back_to_nozzle() {
        let mut s = PrinterSnapshot::new();
        s.nozzle_actual = 180;
        assert_eq!(s.tool_temperature(2), 180);
        s.extruder_temps[2] = 205;
        assert_eq!(s.tool_temperature(2), 205);
        assert_eq!(s.tool_temperature(9), 180);
    }

    #[test]
    fn unreachable_keeps_last_values() {
        let mut source = StatusSource::new("tool0");
        let mut ok = Scripted::default()
            .route(PATH_WEBHOOKS, READY)
            .route(PATH_MACRO_STATUS, MACRO_HOMING)
            .route(PATH_PRINTER_INFO, PRINTING)
            .route(PATH_IDLE_TIMEOUT, IDLE)
            .route(PATH_PROGRESS, PROGRESS);
        block_on(source.poll(&mut ok));
        assert!(source.snapshot().homing);

        let mut down = Scripted::default();
        let report = block_on(source.poll(&mut down));
        let s = source.snapshot();
        assert!(!s.connected);
        assert!(!s.printer_ready);
        assert!(s.homing);
        assert_eq!(s.bed_target, 60);
        assert!(!report.became_ready);
    }

    #[test]
    fn not_ready_only_checks_webhooks() {
        let mut source = StatusSource::new("tool0");
        let mut t = Scripted::default().route(PATH_WEBHOOKS, STARTUP);
        let report = block_on(source.poll(&mut t));
        assert_eq!(t.requests.len(), 1);
        assert!(source.snapshot().connected);
        assert!(!source.snapshot().printer_ready);
        assert_eq!(report, PollReport::default());
    }

    #[test]
    fn full_poll_while_printing() {
        let mut source = StatusSource::new("tool0");
        let mut t = Scripted::default()
            .route(PATH_WEBHOOKS, READY)
            .route(PATH_MACRO_STATUS, MACRO_HOMING)
            .route(PATH_PRINTER_INFO, PRINTING)
            .route(PATH_IDLE_TIMEOUT, IDLE)
            .route(PATH_PROGRESS, PROGRESS);
        let report = block_on(source.poll(&mut t));

        assert!(report.became_ready);
        assert!(report.status_changed);
        assert_eq!(report.idle_state, Some(IdleTimeoutState::Idle));
        assert_eq!(
            t.requests,
            [PATH_WEBHOOKS, PATH_MACRO_STATUS, PATH_PRINTER_INFO, PATH_IDLE_TIMEOUT, PATH_PROGRESS]
        );

        let s = source.snapshot();
        assert!(s.printing);
        assert_eq!(s.bed_actual, 60);
        assert_eq!(s.nozzle_actual, 214);
        assert_eq!(s.progress_percent, 50.0);
        assert_eq!(s.file_name.as_str(), "benchy.gcode");
        assert_eq!(s.total_layers, 100);
        assert_eq!(s.extruder_temps[0], 215);

        // Same answers again: nothing toggled, already ready.
        let again = block_on(source.poll(&mut t));
        assert!(!again.became_ready);
        assert!(!again.status_changed);
    }

    #[test]
    fn ready_again_after_restart() {
        let mut source = StatusSource::new("tool0");
        let mut ready = Scripted::default().route(PATH_WEBHOOKS, READY);
        assert!(block_on(source.poll(&mut ready)).became_ready);

        let mut restarting = Scripted::default().route(PATH_WEBHOOKS, STARTUP);
        block_on(source.poll(&mut restarting));
        assert!(block_on(source.poll(&mut ready)).became_ready);
    }

    #[test]
    fn malformed_webhooks_marks_unreachable() {
        let mut source = StatusSource::new("tool0");
        let mut t = Scripted::default().route(PATH_WEBHOOKS, "<html>502</html>");
        block_on(source.poll(&mut t));
        assert!(!source.snapshot().connected);
    }
}
