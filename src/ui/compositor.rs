//! Layer compositor - owns every display object the UI creates.
//!
//! The compositor keeps its own registry of layer handles keyed by
//! [`LayerId`] and never walks the display tree. Creation is idempotent,
//! destroying a layer releases the asset it was created with, and the
//! z-order pass runs once per cycle-mode activation.

use core::fmt::Write;

use heapless::String;

use super::{AssetKey, CycleMode, LayerId, Screen, ViewState};
use crate::error::{Error, Result};
use crate::progress::{self, Eta, Hsv};

/// Backend-side display object.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LayerHandle(pub u16);

/// Loaded animation or image buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AssetHandle(pub u16);

/// Animation playback on a layer. Static layers ignore these.
pub trait Animation {
    fn pause(&mut self, layer: LayerHandle);
    fn resume(&mut self, layer: LayerHandle);
    fn restart(&mut self, layer: LayerHandle);
}

/// Rendering backend seam.
pub trait SceneBackend: Animation {
    /// Make `screen` the visible one.
    fn load_screen(&mut self, screen: Screen);
    /// Resolve and load an asset into memory.
    ///
    /// Errors: [`Error::AssetMissing`] or [`Error::AssetAlloc`].
    fn load_asset(&mut self, key: AssetKey) -> Result<AssetHandle>;
    fn release_asset(&mut self, asset: AssetHandle);
    /// Create the object for `id` on its screen.
    fn create_layer(&mut self, id: LayerId, asset: Option<AssetHandle>) -> Result<LayerHandle>;
    fn destroy_layer(&mut self, layer: LayerHandle);
    fn set_hidden(&mut self, layer: LayerHandle, hidden: bool);
    fn move_to_index(&mut self, layer: LayerHandle, index: u8);
    fn set_arc_angles(&mut self, layer: LayerHandle, start: u16, end: u16);
    fn set_text(&mut self, layer: LayerHandle, text: &str);
    fn set_glow(&mut self, layer: LayerHandle, color: Hsv);
    /// Replace the chart series, oldest first.
    fn set_chart(&mut self, layer: LayerHandle, samples: &[i16]);
    fn set_source(&mut self, layer: LayerHandle, asset: AssetHandle);
    fn set_clickable(&mut self, layer: LayerHandle, clickable: bool);
}

/// Values rendered on the printing screen each tick.
#[derive(Clone, Copy, Debug)]
pub struct ProgressFrame<'a> {
    pub percent: f32,
    pub tool_temp: i16,
    pub eta: Eta,
    /// Centre label shows remaining time instead of percent.
    pub show_eta: bool,
    pub current_layer: u32,
    pub total_layers: u32,
    /// Temperature history, oldest first.
    pub history: &'a [i16],
}

#[derive(Clone, Copy, Debug)]
struct Slot {
    handle: LayerHandle,
    asset: Option<AssetHandle>,
}

pub struct Compositor<B: SceneBackend> {
    backend: B,
    slots: [Option<Slot>; LayerId::COUNT],
    main_asset: Option<AssetKey>,
    screen: Screen,
    mode: Option<CycleMode>,
    layers_ordered: bool,
    temp_view: bool,
    last_pct: Option<f32>,
    tool_index: u8,
}

/// Arc covering the unfinished part of the ring, in degrees.
pub fn arc_angles(percent: f32) -> (u16, u16) {
    let pct = if percent > 0.0 { percent.min(100.0) } else { 0.0 };
    (450 + (pct * 3.6) as u16, 810)
}

impl<B: SceneBackend> Compositor<B> {
    pub fn new(backend: B, tool_index: u8) -> Self {
        Self {
            backend,
            slots: [None; LayerId::COUNT],
            main_asset: None,
            screen: Screen::Main,
            mode: None,
            layers_ordered: false,
            temp_view: false,
            last_pct: None,
            tool_index,
        }
    }

    /// Create the main animation showing the idle view. Failing to create
    /// the main layer is the one unrecoverable error.
    pub fn boot(&mut self) -> Result<()> {
        self.backend.load_screen(Screen::Main);
        self.screen = Screen::Main;

        let key = AssetKey::ToolIdle(self.tool_index);
        let asset = self.load(key).ok();
        let handle = match self.backend.create_layer(LayerId::MainGif, asset) {
            Ok(handle) => handle,
            Err(e) => {
                if let Some(asset) = asset {
                    self.backend.release_asset(asset);
                }
                error!("Layers: main animation could not be created ({:?})", e);
                return Err(Error::MissingObject(LayerId::MainGif));
            }
        };
        self.slots[LayerId::MainGif.index()] = Some(Slot { handle, asset });

        if asset.is_some() {
            self.main_asset = Some(key);
        } else {
            self.backend.set_hidden(handle, true);
            self.show_placeholder(LayerId::Placeholder, key)?;
        }
        self.backend.set_clickable(handle, true);
        info!("Layers: boot ok, tool {}", self.tool_index);
        Ok(())
    }

    /// Show a main-screen view. `Printing` is driven by
    /// [`set_cycle_mode`](Self::set_cycle_mode) instead.
    pub fn show_view(&mut self, view: ViewState) -> Result<()> {
        let Some(key) = view.asset(self.tool_index) else {
            return Ok(());
        };
        self.enter_screen(Screen::Main);
        let main = self.require(LayerId::MainGif)?;

        if self.main_asset != Some(key) {
            match self.load(key) {
                Ok(asset) => {
                    self.backend.set_source(main, asset);
                    let old = self.slots[LayerId::MainGif.index()]
                        .as_mut()
                        .and_then(|slot| slot.asset.replace(asset));
                    if let Some(old) = old {
                        self.backend.release_asset(old);
                    }
                    self.main_asset = Some(key);
                    self.destroy(LayerId::Placeholder);
                    self.backend.set_hidden(main, false);
                }
                Err(_) => {
                    self.main_asset = None;
                    self.backend.set_hidden(main, true);
                    self.show_placeholder(LayerId::Placeholder, key)?;
                }
            }
        }
        self.backend.restart(main);
        self.backend.set_clickable(main, view == ViewState::Idle);
        debug!("Layers: main shows {}", key.name().as_str());
        Ok(())
    }

    /// Switch the printing screen to `mode`. Tears down every other mode's
    /// layers before building this one's. No-op if already active.
    pub fn set_cycle_mode(&mut self, mode: CycleMode) {
        if self.mode == Some(mode) {
            return;
        }
        self.enter_screen(Screen::Printing);

        for id in LayerId::ALL {
            if matches!(id.owner(), Some(owner) if owner != mode) {
                self.destroy(id);
            }
        }

        for id in LayerId::ALL {
            if !id.is_built_for(mode) {
                continue;
            }
            match self.ensure_created(id) {
                Ok(handle) => {
                    if id == LayerId::TempTitle {
                        self.backend.set_text(handle, "Temperature");
                    }
                }
                Err(_) if id == LayerId::ToolGif => {
                    let key = AssetKey::ToolIdle(self.tool_index);
                    let _ = self.show_placeholder(LayerId::ToolPlaceholder, key);
                }
                Err(_) => {}
            }
        }

        if let Some(gif) = self.handle(LayerId::ToolGif) {
            self.backend.resume(gif);
        }
        self.mode = Some(mode);
        self.last_pct = None;
        self.layers_ordered = false;
        self.order_layers();
        self.set_temp_view(mode == CycleMode::TemperatureGraph);
        info!("Layers: mode {:?}", mode);
    }

    /// Leave the printing screen: drop the heavy background layers and
    /// pause its animations. Idempotent.
    pub fn stop_cycle(&mut self) {
        if self.mode.is_none() {
            return;
        }
        self.destroy(LayerId::BgGlow);
        self.destroy(LayerId::Ring);
        if let Some(gif) = self.handle(LayerId::ToolGif) {
            self.backend.pause(gif);
        }
        self.set_temp_view(false);
        self.mode = None;
        self.layers_ordered = false;
        self.last_pct = None;
        debug!("Layers: cycle stopped");
    }

    /// Show the temperature chart layers and hide the progress labels, or
    /// the reverse.
    pub fn set_temp_view(&mut self, on: bool) {
        if self.temp_view == on {
            return;
        }
        self.temp_view = on;
        for id in LayerId::TEMP_VIEW {
            if let Some(h) = self.handle(id) {
                self.backend.set_hidden(h, !on);
            }
        }
        for id in LayerId::PROGRESS_LABELS {
            if let Some(h) = self.handle(id) {
                self.backend.set_hidden(h, on);
            }
        }
    }

    /// Push one frame of values into the active mode's layers.
    ///
    /// Errors: [`Error::MissingObject`] when a layer the mode needs is
    /// absent; the caller logs and retries next tick.
    pub fn update_progress(&mut self, frame: &ProgressFrame<'_>) -> Result<()> {
        match self.mode {
            Some(CycleMode::Progress) => self.render_progress(frame),
            Some(CycleMode::TemperatureGraph) => self.render_temperature(frame),
            Some(CycleMode::ToolAnimation) | None => Ok(()),
        }
    }

    fn render_progress(&mut self, frame: &ProgressFrame<'_>) -> Result<()> {
        let arc = self.require(LayerId::ProgressArc)?;
        if self.last_pct != Some(frame.percent) {
            let (start, end) = arc_angles(frame.percent);
            self.backend.set_arc_angles(arc, start, end);
            self.last_pct = Some(frame.percent);
        }

        if let Some(glow) = self.handle(LayerId::GlowCircle) {
            self.backend.set_glow(glow, progress::temp_to_glow(frame.tool_temp));
        }

        let mut text: String<24> = String::new();
        let tool = self.require(LayerId::ToolLabel)?;
        let _ = write!(text, "{}°C", frame.tool_temp);
        self.backend.set_text(tool, &text);

        let center = self.require(LayerId::CenterLabel)?;
        if frame.show_eta {
            self.backend.set_text(center, &progress::format_eta(frame.eta));
        } else {
            self.backend.set_text(center, &progress::format_percent(frame.percent));
        }

        let layer = self.require(LayerId::LayerLabel)?;
        text.clear();
        let _ = if frame.total_layers > 0 {
            write!(text, "Layer {}/{}", frame.current_layer, frame.total_layers)
        } else {
            write!(text, "Layer {}", frame.current_layer)
        };
        self.backend.set_text(layer, &text);
        Ok(())
    }

    fn render_temperature(&mut self, frame: &ProgressFrame<'_>) -> Result<()> {
        let chart = self.require(LayerId::TempChart)?;
        self.backend.set_chart(chart, frame.history);

        let current = self.require(LayerId::TempCurrent)?;
        let mut text: String<24> = String::new();
        let _ = write!(text, "Current: {}°C", frame.tool_temp);
        self.backend.set_text(current, &text);
        Ok(())
    }

    /// Create `id` unless it exists. Returns its handle either way.
    pub fn ensure_created(&mut self, id: LayerId) -> Result<LayerHandle> {
        if let Some(slot) = self.slots[id.index()] {
            return Ok(slot.handle);
        }
        let asset = match self.layer_asset(id) {
            Some(key) => Some(self.load(key)?),
            None => None,
        };
        match self.backend.create_layer(id, asset) {
            Ok(handle) => {
                self.slots[id.index()] = Some(Slot { handle, asset });
                trace!("Layers: created {:?}", id);
                Ok(handle)
            }
            Err(e) => {
                if let Some(asset) = asset {
                    self.backend.release_asset(asset);
                }
                warn!("Layers: create {:?} failed ({:?})", id, e);
                Err(e)
            }
        }
    }

    /// Destroy `id` and release its asset. No-op if absent.
    pub fn destroy(&mut self, id: LayerId) {
        let Some(slot) = self.slots[id.index()].take() else {
            return;
        };
        if id == LayerId::ToolGif {
            self.backend.pause(slot.handle);
        }
        self.backend.destroy_layer(slot.handle);
        if let Some(asset) = slot.asset {
            self.backend.release_asset(asset);
        }
        if id == LayerId::MainGif {
            self.main_asset = None;
        }
        trace!("Layers: destroyed {:?}", id);
    }

    fn order_layers(&mut self) {
        if self.layers_ordered {
            return;
        }
        for id in LayerId::ALL {
            if id.screen() != Screen::Printing {
                continue;
            }
            if let Some(h) = self.handle(id) {
                self.backend.move_to_index(h, id.z_index());
            }
        }
        self.layers_ordered = true;
    }

    fn enter_screen(&mut self, screen: Screen) {
        if self.screen == screen {
            return;
        }
        if let Some(main) = self.handle(LayerId::MainGif) {
            match screen {
                Screen::Printing => self.backend.pause(main),
                Screen::Main => self.backend.resume(main),
            }
        }
        self.backend.load_screen(screen);
        self.screen = screen;
    }

    fn show_placeholder(&mut self, id: LayerId, key: AssetKey) -> Result<()> {
        let handle = self.ensure_created(id)?;
        let mut text: String<32> = String::new();
        let _ = match (id, key) {
            (LayerId::ToolPlaceholder, AssetKey::ToolIdle(n)) => write!(text, "Tool {}", n),
            (_, AssetKey::ToolIdle(n)) => write!(text, "GIF {}\nnot found", n),
            (_, other) => write!(text, "GIF {}\nnot found", other.name().as_str()),
        };
        self.backend.set_text(handle, &text);
        self.backend.set_hidden(handle, false);
        Ok(())
    }

    fn load(&mut self, key: AssetKey) -> Result<AssetHandle> {
        self.backend.load_asset(key).map_err(|e| {
            match e {
                Error::AssetAlloc => error!("Layers: out of memory for {}", key.path().as_str()),
                _ => warn!("Layers: {} unavailable ({:?})", key.path().as_str(), e),
            }
            e
        })
    }

    fn layer_asset(&self, id: LayerId) -> Option<AssetKey> {
        match id {
            LayerId::BgGlow => Some(AssetKey::ProgressGlow),
            LayerId::Ring => Some(AssetKey::ProgressRing),
            LayerId::ToolGif => Some(AssetKey::ToolIdle(self.tool_index)),
            _ => None,
        }
    }

    fn require(&self, id: LayerId) -> Result<LayerHandle> {
        self.handle(id).ok_or(Error::MissingObject(id))
    }

    pub fn handle(&self, id: LayerId) -> Option<LayerHandle> {
        self.slots[id.index()].map(|slot| slot.handle)
    }

    pub fn is_created(&self, id: LayerId) -> bool {
        self.slots[id.index()].is_some()
    }

    pub fn mode(&self) -> Option<CycleMode> {
        self.mode
    }

    pub fn screen(&self) -> Screen {
        self.screen
    }

    pub fn temp_view(&self) -> bool {
        self.temp_view
    }

    pub fn tool_index(&self) -> u8 {
        self.tool_index
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }
}

#[cfg(test)]
pub(crate) mod fake {
    //! Recording backend shared by the UI tests.

    use super::*;
    use std::collections::{BTreeMap, BTreeSet};
    use std::string::String as StdString;
    use std::vec::Vec;

    #[derive(Debug, Clone, PartialEq)]
    pub enum Call {
        Screen(Screen),
        Create(LayerId),
        Destroy(LayerId),
        Move(LayerId, u8),
        Arc(u16, u16),
        Pause(LayerId),
        Resume(LayerId),
        Restart(LayerId),
    }

    #[derive(Default)]
    pub struct FakeScene {
        pub next: u16,
        pub layers: BTreeMap<u16, LayerId>,
        pub hidden: BTreeSet<u16>,
        pub text: BTreeMap<u16, StdString>,
        pub clickable: BTreeMap<u16, bool>,
        pub chart: Vec<i16>,
        pub glow: Option<Hsv>,
        pub live_assets: BTreeSet<u16>,
        pub missing: Vec<AssetKey>,
        pub out_of_memory: bool,
        pub refuse: Vec<LayerId>,
        pub calls: Vec<Call>,
    }

    impl FakeScene {
        fn id(&self, h: LayerHandle) -> LayerId {
            self.layers[&h.0]
        }

        pub fn find(&self, id: LayerId) -> Option<u16> {
            self.layers.iter().find(|(_, l)| **l == id).map(|(h, _)| *h)
        }

        pub fn text_of(&self, id: LayerId) -> Option<&str> {
            self.find(id).and_then(|h| self.text.get(&h)).map(|s| s.as_str())
        }

        pub fn is_hidden(&self, id: LayerId) -> bool {
            self.find(id).is_some_and(|h| self.hidden.contains(&h))
        }

        pub fn count(&self, call: &Call) -> usize {
            self.calls.iter().filter(|c| *c == call).count()
        }
    }

    impl Animation for FakeScene {
        fn pause(&mut self, layer: LayerHandle) {
            let id = self.id(layer);
            self.calls.push(Call::Pause(id));
        }
        fn resume(&mut self, layer: LayerHandle) {
            let id = self.id(layer);
            self.calls.push(Call::Resume(id));
        }
        fn restart(&mut self, layer: LayerHandle) {
            let id = self.id(layer);
            self.calls.push(Call::Restart(id));
        }
    }

    impl SceneBackend for FakeScene {
        fn load_screen(&mut self, screen: Screen) {
            self.calls.push(Call::Screen(screen));
        }

        fn load_asset(&mut self, key: AssetKey) -> Result<AssetHandle> {
            if self.missing.contains(&key) {
                return Err(Error::AssetMissing);
            }
            if self.out_of_memory {
                return Err(Error::AssetAlloc);
            }
            self.next += 1;
            self.live_assets.insert(self.next);
            Ok(AssetHandle(self.next))
        }

        fn release_asset(&mut self, asset: AssetHandle) {
            assert!(self.live_assets.remove(&asset.0), "double release");
        }

        fn create_layer(&mut self, id: LayerId, _asset: Option<AssetHandle>) -> Result<LayerHandle> {
            if self.refuse.contains(&id) {
                return Err(Error::MissingObject(id));
            }
            self.next += 1;
            self.layers.insert(self.next, id);
            self.calls.push(Call::Create(id));
            Ok(LayerHandle(self.next))
        }

        fn destroy_layer(&mut self, layer: LayerHandle) {
            let id = self.layers.remove(&layer.0).expect("destroy of unknown layer");
            self.calls.push(Call::Destroy(id));
        }

        fn set_hidden(&mut self, layer: LayerHandle, hidden: bool) {
            if hidden {
                self.hidden.insert(layer.0);
            } else {
                self.hidden.remove(&layer.0);
            }
        }

        fn move_to_index(&mut self, layer: LayerHandle, index: u8) {
            let id = self.id(layer);
            self.calls.push(Call::Move(id, index));
        }

        fn set_arc_angles(&mut self, _layer: LayerHandle, start: u16, end: u16) {
            self.calls.push(Call::Arc(start, end));
        }

        fn set_text(&mut self, layer: LayerHandle, text: &str) {
            self.text.insert(layer.0, text.into());
        }

        fn set_glow(&mut self, _layer: LayerHandle, color: Hsv) {
            self.glow = Some(color);
        }

        fn set_chart(&mut self, _layer: LayerHandle, samples: &[i16]) {
            self.chart = samples.to_vec();
        }

        fn set_source(&mut self, _layer: LayerHandle, _asset: AssetHandle) {}

        fn set_clickable(&mut self, layer: LayerHandle, clickable: bool) {
            self.clickable.insert(layer.0, clickable);
        }
    }
}
