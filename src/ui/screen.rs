//! Per-tick UI driver: selector, cycle timers, estimator and compositor.

use heapless::Vec;

use super::compositor::{Compositor, ProgressFrame, SceneBackend};
use super::cycle::{CycleRotation, LabelToggle};
use super::selector::ViewSelector;
use super::{Transition, ViewState};
use crate::config::{RuntimeConfig, TEMP_HISTORY_LEN};
use crate::error::Result;
use crate::moonraker::PrinterSnapshot;
use crate::progress::{self, TemperatureHistory};

pub struct ScreenController<B: SceneBackend> {
    selector: ViewSelector,
    compositor: Compositor<B>,
    rotation: CycleRotation,
    label: LabelToggle,
    history: TemperatureHistory,
    tool_index: u8,
    last_tick_ms: Option<u64>,
}

impl<B: SceneBackend> ScreenController<B> {
    pub fn new(backend: B, cfg: &RuntimeConfig) -> Self {
        Self {
            selector: ViewSelector::new(cfg.dwell_ms),
            compositor: Compositor::new(backend, cfg.tool_index),
            rotation: CycleRotation::new(),
            label: LabelToggle::new(),
            history: TemperatureHistory::new(),
            tool_index: cfg.tool_index,
            last_tick_ms: None,
        }
    }

    /// Build the idle screen. An error here means the display cannot work.
    pub fn boot(&mut self) -> Result<()> {
        self.compositor.boot()
    }

    /// One UI tick. While the printer is unreachable or not ready the
    /// current view is held.
    pub fn tick(&mut self, s: &PrinterSnapshot, now_ms: u64) -> Option<Transition> {
        let dt = self
            .last_tick_ms
            .map_or(0, |last| now_ms.saturating_sub(last));
        self.last_tick_ms = Some(now_ms);

        let transition = if s.connected && s.printer_ready {
            self.selector.evaluate(s, now_ms)
        } else {
            None
        };
        if let Some(t) = transition {
            self.apply(t);
        }

        if self.selector.current() == ViewState::Printing {
            self.history.sample(now_ms, s.tool_temperature(self.tool_index));
            if let Some(mode) = self.rotation.tick(dt) {
                self.compositor.set_cycle_mode(mode);
            }
            self.label.tick(dt);
            self.render(s);
        }
        transition
    }

    fn apply(&mut self, t: Transition) {
        if t.to == ViewState::Printing {
            if matches!(t.from, ViewState::Idle | ViewState::PrintComplete) {
                self.history.clear();
            }
            if let Some(mode) = self.rotation.start() {
                self.label.reset();
                self.compositor.set_cycle_mode(mode);
            }
            return;
        }

        self.rotation.stop();
        self.compositor.stop_cycle();
        if let Err(e) = self.compositor.show_view(t.to) {
            warn!("View: {:?} not shown ({:?})", t.to, e);
        }
    }

    fn render(&mut self, s: &PrinterSnapshot) {
        let samples: Vec<i16, TEMP_HISTORY_LEN> = self.history.iter().collect();
        let frame = ProgressFrame {
            percent: s.progress_percent,
            tool_temp: s.tool_temperature(self.tool_index),
            eta: progress::estimate_eta(s.progress_percent, s.print_duration_secs),
            show_eta: self.label.shows_eta(),
            current_layer: s.current_layer,
            total_layers: s.total_layers,
            history: &samples,
        };
        if let Err(e) = self.compositor.update_progress(&frame) {
            warn!("Layers: frame skipped ({:?})", e);
        }
    }

    pub fn view(&self) -> ViewState {
        self.selector.current()
    }

    pub fn selector(&self) -> &ViewSelector {
        &self.selector
    }

    pub fn compositor(&self) -> &Compositor<B> {
        &self.compositor
    }

    pub fn compositor_mut(&mut self) -> &mut Compositor<B> {
        &mut self.compositor
    }

    pub fn rotation(&self) -> &CycleRotation {
        &self.rotation
    }

    pub fn history(&self) -> &TemperatureHistory {
        &self.history
    }
}
