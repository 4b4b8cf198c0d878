//! GC9A01 round panel and the retained scene drawn on it.
//!
//! [`Scene`] implements the compositor's backend: it keeps every layer the
//! compositor creates, with its z-index, text, arc and chart data, and
//! repaints the visible screen back to front whenever something changed.
//! Animations are drawn procedurally; a loaded asset only pins its decode
//! buffer.

use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};

use defmt::{debug, error};
use embassy_time::Delay;
use embedded_graphics::mono_font::ascii::{FONT_10X20, FONT_6X10};
use embedded_graphics::mono_font::MonoTextStyle;
use embedded_graphics::pixelcolor::Rgb565;
use embedded_graphics::prelude::*;
use embedded_graphics::primitives::{Arc, Circle, Polyline, PrimitiveStyle};
use embedded_graphics::text::{Alignment, Text};
use embedded_hal_bus::spi::{ExclusiveDevice, NoDelay};
use esp_hal::gpio::Output;
use esp_hal::spi::master::Spi;
use esp_hal::Blocking;
use heapless::String;
use mipidsi::interface::SpiInterface;
use mipidsi::models::GC9A01;
use mipidsi::options::{ColorInversion, ColorOrder};
use mipidsi::Builder;

use toolhead_display::config::{
    ANIMATION_FRAME_MS, ASSET_BUFFER_BYTES, MAX_TOOLS, TEMP_HISTORY_LEN,
};
use toolhead_display::error::{Error, Result};
use toolhead_display::progress::Hsv;
use toolhead_display::ui::compositor::{
    Animation, AssetHandle, LayerHandle, SceneBackend,
};
use toolhead_display::ui::{AssetKey, LayerId, Screen};

pub const RESOLUTION: u32 = 240;
const CENTER: Point = Point::new(RESOLUTION as i32 / 2, RESOLUTION as i32 / 2);

/// Set when the whole panel must be repainted on the next frame.
pub static FORCE_REDRAW: AtomicBool = AtomicBool::new(true);

pub type Panel = mipidsi::Display<
    SpiInterface<
        'static,
        ExclusiveDevice<Spi<'static, Blocking>, Output<'static>, NoDelay>,
        Output<'static>,
    >,
    GC9A01,
    Output<'static>,
>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum PanelInitError {
    ChipSelect,
    Controller,
}

/// Bring up the panel. `buf` is the SPI interface's pixel batch buffer.
pub fn init(
    spi: Spi<'static, Blocking>,
    cs: Output<'static>,
    dc: Output<'static>,
    rst: Output<'static>,
    buf: &'static mut [u8],
) -> core::result::Result<Panel, PanelInitError> {
    let spi_dev =
        ExclusiveDevice::new(spi, cs, NoDelay).map_err(|_| PanelInitError::ChipSelect)?;
    let di = SpiInterface::new(spi_dev, dc, buf);
    let mut delay = Delay;
    let mut panel = Builder::new(GC9A01, di)
        .display_size(RESOLUTION as u16, RESOLUTION as u16)
        .invert_colors(ColorInversion::Inverted)
        .color_order(ColorOrder::Bgr)
        .reset_pin(rst)
        .init(&mut delay)
        .map_err(|_| PanelInitError::Controller)?;
    panel.clear(Rgb565::BLACK).map_err(|_| PanelInitError::Controller)?;
    Ok(panel)
}

/// 8-bit RGB to Rgb565.
const fn rgb(r: u8, g: u8, b: u8) -> Rgb565 {
    Rgb565::new(r >> 3, g >> 2, b >> 3)
}

const BG: Rgb565 = rgb(0, 0, 0);
const TEXT: Rgb565 = rgb(235, 235, 235);
const DIM: Rgb565 = rgb(60, 60, 70);
const RING: Rgb565 = rgb(0, 190, 170);
const GLOW_BG: Rgb565 = rgb(12, 14, 24);

/// Spinner dots per animation.
const FRAMES: u8 = 12;

/// Unit circle in thousandths, 30° apart.
const SPINNER: [(i32, i32); FRAMES as usize] = [
    (1000, 0),
    (866, 500),
    (500, 866),
    (0, 1000),
    (-500, 866),
    (-866, 500),
    (-1000, 0),
    (-866, -500),
    (-500, -866),
    (0, -1000),
    (500, -866),
    (866, -500),
];

fn hsv_to_rgb565(c: Hsv) -> Rgb565 {
    let h = u32::from(c.hue % 360);
    let s = u32::from(c.sat);
    let v = u32::from(c.val);
    let region = h / 60;
    let rem = (h % 60) * 255 / 60;
    let p = v * (255 - s) / 255;
    let q = v * (255 - s * rem / 255) / 255;
    let t = v * (255 - s * (255 - rem) / 255) / 255;
    let (r, g, b) = match region {
        0 => (v, t, p),
        1 => (q, v, p),
        2 => (p, v, t),
        3 => (p, q, v),
        4 => (t, p, v),
        _ => (v, p, q),
    };
    rgb(r as u8, g as u8, b as u8)
}

fn accent(key: AssetKey) -> Rgb565 {
    match key {
        AssetKey::Homing => rgb(80, 160, 255),
        AssetKey::Probing => rgb(180, 120, 255),
        AssetKey::Leveling => rgb(255, 210, 60),
        AssetKey::HeatingNozzle => rgb(255, 90, 30),
        AssetKey::HeatingBed => rgb(255, 140, 60),
        AssetKey::PrintComplete => rgb(60, 220, 110),
        AssetKey::ToolIdle(_) | AssetKey::ProgressGlow | AssetKey::ProgressRing => RING,
    }
}

struct LoadedAsset {
    key: AssetKey,
    _decode: Vec<u8>,
}

struct Layer {
    screen: Screen,
    asset: Option<AssetHandle>,
    z: u8,
    hidden: bool,
    playing: bool,
    frame: u8,
    clickable: bool,
    arc: (u16, u16),
    glow: Option<Hsv>,
    text: String<32>,
    chart: heapless::Vec<i16, TEMP_HISTORY_LEN>,
}

impl Layer {
    fn new(id: LayerId, asset: Option<AssetHandle>) -> Self {
        Self {
            screen: id.screen(),
            asset,
            z: id.z_index(),
            hidden: false,
            playing: true,
            frame: 0,
            clickable: false,
            arc: (0, 0),
            glow: None,
            text: String::new(),
            chart: heapless::Vec::new(),
        }
    }
}

pub struct Scene<D> {
    target: D,
    screen: Screen,
    layers: [Option<Layer>; LayerId::COUNT],
    assets: Vec<Option<LoadedAsset>>,
    dirty: bool,
    last_frame_ms: u64,
}

impl<D: DrawTarget<Color = Rgb565>> Scene<D> {
    pub fn new(target: D) -> Self {
        Self {
            target,
            screen: Screen::Main,
            layers: Default::default(),
            assets: Vec::new(),
            dirty: true,
            last_frame_ms: 0,
        }
    }

    fn layer_mut(&mut self, h: LayerHandle) -> Option<&mut Layer> {
        let layer = self.layers.get_mut(usize::from(h.0))?.as_mut();
        if layer.is_some() {
            self.dirty = true;
        }
        layer
    }

    fn asset_key(&self, h: AssetHandle) -> Option<AssetKey> {
        self.assets
            .get(usize::from(h.0))
            .and_then(Option::as_ref)
            .map(|a| a.key)
    }

    pub fn is_clickable(&self, id: LayerId) -> bool {
        self.layers[id.index()].as_ref().is_some_and(|l| l.clickable)
    }

    /// Step animations on the visible screen.
    pub fn advance(&mut self, now_ms: u64) {
        if now_ms.saturating_sub(self.last_frame_ms) < ANIMATION_FRAME_MS {
            return;
        }
        self.last_frame_ms = now_ms;
        let screen = self.screen;
        for layer in self.layers.iter_mut().flatten() {
            if layer.screen == screen && layer.playing && !layer.hidden && layer.asset.is_some() {
                layer.frame = (layer.frame + 1) % FRAMES;
                self.dirty = true;
            }
        }
    }

    /// Repaint if anything changed since the last frame.
    pub fn render(&mut self) -> core::result::Result<(), D::Error> {
        let forced = FORCE_REDRAW.swap(false, Ordering::AcqRel);
        if !self.dirty && !forced {
            return Ok(());
        }
        self.dirty = false;
        self.target.clear(BG)?;

        let mut order: heapless::Vec<(u8, usize), { LayerId::COUNT }> = heapless::Vec::new();
        for (i, layer) in self.layers.iter().enumerate() {
            if let Some(l) = layer {
                if l.screen == self.screen && !l.hidden {
                    let _ = order.push((l.z, i));
                }
            }
        }
        order.sort_unstable();

        for (_, i) in order {
            let id = LayerId::ALL[i];
            let key = self.layers[i]
                .as_ref()
                .and_then(|l| l.asset)
                .and_then(|h| self.asset_key(h));
            if let Some(layer) = &self.layers[i] {
                draw_layer(&mut self.target, id, layer, key)?;
            }
        }
        Ok(())
    }
}

fn text_anchor(id: LayerId) -> (Point, bool) {
    let y = |dy: i32| Point::new(CENTER.x, CENTER.y + dy);
    match id {
        LayerId::ToolLabel => (y(-42), false),
        LayerId::CenterLabel => (y(6), true),
        LayerId::LayerLabel => (y(44), false),
        LayerId::TempTitle => (y(-66), false),
        LayerId::TempCurrent => (y(70), false),
        _ => (CENTER, true),
    }
}

fn draw_text<D: DrawTarget<Color = Rgb565>>(
    target: &mut D,
    id: LayerId,
    text: &str,
) -> core::result::Result<(), D::Error> {
    let (at, large) = text_anchor(id);
    let style = if large {
        MonoTextStyle::new(&FONT_10X20, TEXT)
    } else {
        MonoTextStyle::new(&FONT_6X10, TEXT)
    };
    Text::with_alignment(text, at, style, Alignment::Center).draw(target)?;
    Ok(())
}

/// Ring of dots with one lit, turning one step per frame.
fn draw_spinner<D: DrawTarget<Color = Rgb565>>(
    target: &mut D,
    key: AssetKey,
    frame: u8,
    radius: i32,
) -> core::result::Result<(), D::Error> {
    let color = accent(key);
    for (i, &(cos, sin)) in SPINNER.iter().enumerate() {
        let at = CENTER + Point::new(cos * radius / 1000, sin * radius / 1000);
        let (style, d) = if i == usize::from(frame) {
            (PrimitiveStyle::with_fill(color), 16)
        } else {
            (PrimitiveStyle::with_fill(DIM), 10)
        };
        Circle::with_center(at, d).into_styled(style).draw(target)?;
    }
    if let AssetKey::ToolIdle(n) = key {
        let mut label: String<4> = String::new();
        let _ = core::fmt::write(&mut label, format_args!("T{}", n));
        Text::with_alignment(
            &label,
            CENTER + Point::new(0, 7),
            MonoTextStyle::new(&FONT_10X20, color),
            Alignment::Center,
        )
        .draw(target)?;
    }
    Ok(())
}

fn draw_chart<D: DrawTarget<Color = Rgb565>>(
    target: &mut D,
    samples: &[i16],
) -> core::result::Result<(), D::Error> {
    if samples.len() < 2 {
        return Ok(());
    }
    let (left, top, width, height) = (40, 70, 160, 90);
    let lo = samples.iter().copied().min().unwrap_or(0).saturating_sub(5);
    let hi = samples.iter().copied().max().unwrap_or(0).saturating_add(5);
    let span = i32::from(hi - lo).max(1);
    let step = width / (samples.len() as i32 - 1).max(1);

    let mut points: heapless::Vec<Point, TEMP_HISTORY_LEN> = heapless::Vec::new();
    for (i, &t) in samples.iter().enumerate() {
        let y = top + height - i32::from(t - lo) * height / span;
        let _ = points.push(Point::new(left + i as i32 * step, y));
    }
    Polyline::new(&points)
        .into_styled(PrimitiveStyle::with_stroke(rgb(255, 120, 40), 2))
        .draw(target)?;
    Ok(())
}

fn draw_layer<D: DrawTarget<Color = Rgb565>>(
    target: &mut D,
    id: LayerId,
    layer: &Layer,
    key: Option<AssetKey>,
) -> core::result::Result<(), D::Error> {
    match id {
        LayerId::MainGif => {
            if let Some(key) = key {
                draw_spinner(target, key, layer.frame, 90)?;
            }
        }
        LayerId::ToolGif => {
            if let Some(key) = key {
                draw_spinner(target, key, layer.frame, 70)?;
            }
        }
        LayerId::BgGlow => {
            Circle::with_center(CENTER, RESOLUTION)
                .into_styled(PrimitiveStyle::with_fill(GLOW_BG))
                .draw(target)?;
        }
        LayerId::Ring => {
            Circle::with_center(CENTER, 216)
                .into_styled(PrimitiveStyle::with_stroke(RING, 12))
                .draw(target)?;
        }
        LayerId::ProgressArc => {
            let (start, end) = layer.arc;
            let sweep = end.saturating_sub(start);
            if sweep > 0 {
                Arc::with_center(
                    CENTER,
                    216,
                    Angle::from_degrees(f32::from(start % 360)),
                    Angle::from_degrees(f32::from(sweep)),
                )
                .into_styled(PrimitiveStyle::with_stroke(DIM, 14))
                .draw(target)?;
            }
        }
        LayerId::GlowCircle => {
            if let Some(glow) = layer.glow {
                Circle::with_center(CENTER, 120)
                    .into_styled(PrimitiveStyle::with_fill(hsv_to_rgb565(glow)))
                    .draw(target)?;
            }
        }
        LayerId::TempChart => draw_chart(target, &layer.chart)?,
        _ => {
            if !layer.text.is_empty() {
                draw_text(target, id, &layer.text)?;
            }
        }
    }
    Ok(())
}

impl<D: DrawTarget<Color = Rgb565>> Animation for Scene<D> {
    fn pause(&mut self, layer: LayerHandle) {
        if let Some(l) = self.layer_mut(layer) {
            l.playing = false;
        }
    }

    fn resume(&mut self, layer: LayerHandle) {
        if let Some(l) = self.layer_mut(layer) {
            l.playing = true;
        }
    }

    fn restart(&mut self, layer: LayerHandle) {
        if let Some(l) = self.layer_mut(layer) {
            l.frame = 0;
            l.playing = true;
        }
    }
}

impl<D: DrawTarget<Color = Rgb565>> SceneBackend for Scene<D> {
    fn load_screen(&mut self, screen: Screen) {
        if self.screen != screen {
            debug!("Layers: screen {:?}", screen);
            self.screen = screen;
            self.dirty = true;
        }
    }

    fn load_asset(&mut self, key: AssetKey) -> Result<AssetHandle> {
        if let AssetKey::ToolIdle(n) = key {
            if n >= MAX_TOOLS {
                return Err(Error::AssetMissing);
            }
        }
        let mut decode = Vec::new();
        if decode.try_reserve_exact(ASSET_BUFFER_BYTES).is_err() {
            error!("Layers: no memory for {}", key.name().as_str());
            return Err(Error::AssetAlloc);
        }
        let asset = LoadedAsset { key, _decode: decode };
        let slot = match self.assets.iter().position(Option::is_none) {
            Some(free) => {
                self.assets[free] = Some(asset);
                free
            }
            None => {
                self.assets.push(Some(asset));
                self.assets.len() - 1
            }
        };
        Ok(AssetHandle(slot as u16))
    }

    fn release_asset(&mut self, asset: AssetHandle) {
        if let Some(slot) = self.assets.get_mut(usize::from(asset.0)) {
            *slot = None;
        }
    }

    fn create_layer(&mut self, id: LayerId, asset: Option<AssetHandle>) -> Result<LayerHandle> {
        self.layers[id.index()] = Some(Layer::new(id, asset));
        self.dirty = true;
        Ok(LayerHandle(id.index() as u16))
    }

    fn destroy_layer(&mut self, layer: LayerHandle) {
        if let Some(slot) = self.layers.get_mut(usize::from(layer.0)) {
            *slot = None;
            self.dirty = true;
        }
    }

    fn set_hidden(&mut self, layer: LayerHandle, hidden: bool) {
        if let Some(l) = self.layer_mut(layer) {
            l.hidden = hidden;
        }
    }

    fn move_to_index(&mut self, layer: LayerHandle, index: u8) {
        if let Some(l) = self.layer_mut(layer) {
            l.z = index;
        }
    }

    fn set_arc_angles(&mut self, layer: LayerHandle, start: u16, end: u16) {
        if let Some(l) = self.layer_mut(layer) {
            l.arc = (start, end);
        }
    }

    fn set_text(&mut self, layer: LayerHandle, text: &str) {
        if let Some(l) = self.layer_mut(layer) {
            l.text.clear();
            // Longer text is cut at the last char that fits.
            for c in text.chars() {
                if l.text.push(c).is_err() {
                    break;
                }
            }
        }
    }

    fn set_glow(&mut self, layer: LayerHandle, color: Hsv) {
        if let Some(l) = self.layer_mut(layer) {
            l.glow = Some(color);
        }
    }

    fn set_chart(&mut self, layer: LayerHandle, samples: &[i16]) {
        if let Some(l) = self.layer_mut(layer) {
            l.chart.clear();
            let newest = &samples[samples.len().saturating_sub(TEMP_HISTORY_LEN)..];
            let _ = l.chart.extend_from_slice(newest);
        }
    }

    fn set_source(&mut self, layer: LayerHandle, asset: AssetHandle) {
        if let Some(l) = self.layer_mut(layer) {
            l.asset = Some(asset);
            l.frame = 0;
        }
    }

    fn set_clickable(&mut self, layer: LayerHandle, clickable: bool) {
        if let Some(l) = self.layers.get_mut(usize::from(layer.0)).and_then(Option::as_mut) {
            l.clickable = clickable;
        }
    }
}
