//! User interface subsystem - round GC9A01 panel showing printer state.
//!
//! The UI task re-evaluates the view every tick from the latest
//! [`PrinterSnapshot`](crate::moonraker::PrinterSnapshot) and drives the
//! layer compositor.
//!
//! ## Components
//!
//! - **Selector**: priority cascade snapshot → [`ViewState`]
//! - **Cycle**: timed rotation between printing sub-views
//! - **Compositor**: layer registry, z-order, asset lifetime
//! - **Screen**: glue running all of the above once per tick

pub mod compositor;
pub mod cycle;
pub mod screen;
pub mod selector;

use core::fmt::{self, Write};

use heapless::String;

use crate::config;

/// Views the display can be in, highest priority first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ViewState {
    Homing,
    Probing,
    Leveling,
    HeatingNozzle,
    HeatingBed,
    Printing,
    PrintComplete,
    Idle,
}

impl ViewState {
    /// Views showing a single status animation on the main screen.
    pub fn is_busy(self) -> bool {
        matches!(
            self,
            ViewState::Homing
                | ViewState::Probing
                | ViewState::Leveling
                | ViewState::HeatingNozzle
                | ViewState::HeatingBed
        )
    }

    /// Animation shown by this view on the main screen.
    pub fn asset(self, tool_index: u8) -> Option<AssetKey> {
        match self {
            ViewState::Homing => Some(AssetKey::Homing),
            ViewState::Probing => Some(AssetKey::Probing),
            ViewState::Leveling => Some(AssetKey::Leveling),
            ViewState::HeatingNozzle => Some(AssetKey::HeatingNozzle),
            ViewState::HeatingBed => Some(AssetKey::HeatingBed),
            ViewState::PrintComplete => Some(AssetKey::PrintComplete),
            ViewState::Idle => Some(AssetKey::ToolIdle(tool_index)),
            ViewState::Printing => None,
        }
    }

    pub fn screen(self) -> Screen {
        match self {
            ViewState::Printing => Screen::Printing,
            _ => Screen::Main,
        }
    }
}

/// A view change emitted by the selector.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Transition {
    pub from: ViewState,
    pub to: ViewState,
}

/// Sub-views rotated while printing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CycleMode {
    Progress,
    TemperatureGraph,
    ToolAnimation,
}

impl CycleMode {
    pub const ALL: [CycleMode; 3] = [
        CycleMode::Progress,
        CycleMode::TemperatureGraph,
        CycleMode::ToolAnimation,
    ];

    pub fn next(self) -> Self {
        match self {
            CycleMode::Progress => CycleMode::TemperatureGraph,
            CycleMode::TemperatureGraph => CycleMode::ToolAnimation,
            CycleMode::ToolAnimation => CycleMode::Progress,
        }
    }

    pub fn duration_ms(self) -> u64 {
        match self {
            CycleMode::Progress => config::PHASE_PROGRESS_MS,
            CycleMode::TemperatureGraph => config::PHASE_TEMPERATURE_MS,
            CycleMode::ToolAnimation => config::PHASE_TOOL_MS,
        }
    }
}

/// Top-level screens. Busy, complete and idle views share the main screen.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Screen {
    Main,
    Printing,
}

/// Logical animation/image resources, resolved by the asset loader.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AssetKey {
    Homing,
    Probing,
    Leveling,
    HeatingNozzle,
    HeatingBed,
    ToolIdle(u8),
    PrintComplete,
    ProgressGlow,
    ProgressRing,
}

impl AssetKey {
    /// Logical name, e.g. `tool-idle-3`.
    pub fn name(self) -> String<24> {
        let mut out = String::new();
        let _ = match self {
            AssetKey::Homing => out.write_str("homing"),
            AssetKey::Probing => out.write_str("probing"),
            AssetKey::Leveling => out.write_str("leveling"),
            AssetKey::HeatingNozzle => out.write_str("heating-nozzle"),
            AssetKey::HeatingBed => out.write_str("heating-bed"),
            AssetKey::ToolIdle(n) => write!(out, "tool-idle-{}", n),
            AssetKey::PrintComplete => out.write_str("print-complete"),
            AssetKey::ProgressGlow => out.write_str("progress-glow"),
            AssetKey::ProgressRing => out.write_str("progress-ring"),
        };
        out
    }

    /// Path in the asset filesystem.
    pub fn path(self) -> String<40> {
        let mut out = String::new();
        let _ = match self {
            AssetKey::ToolIdle(n) => write!(out, "/gifs/tool_{}.gif", n),
            AssetKey::ProgressGlow => out.write_str("/gifs/print_progress_bg.gif"),
            AssetKey::ProgressRing => out.write_str("/img/progress_ring.png"),
            AssetKey::HeatingNozzle => out.write_str("/gifs/heating_nozzle.gif"),
            AssetKey::HeatingBed => out.write_str("/gifs/heating_bed.gif"),
            AssetKey::PrintComplete => out.write_str("/gifs/printed.gif"),
            other => write!(out, "/gifs/{}.gif", other.name()),
        };
        out
    }
}

impl fmt::Display for AssetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// Every display object the compositor knows about.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LayerId {
    // Main screen
    MainGif,
    Placeholder,
    // Progress sub-view, back to front
    BgGlow,
    Ring,
    ProgressArc,
    GlowCircle,
    ToolLabel,
    CenterLabel,
    LayerLabel,
    // Temperature sub-view
    TempChart,
    TempTitle,
    TempCurrent,
    // Tool animation sub-view
    ToolGif,
    ToolPlaceholder,
}

impl LayerId {
    pub const COUNT: usize = 14;

    pub const ALL: [LayerId; Self::COUNT] = [
        LayerId::MainGif,
        LayerId::Placeholder,
        LayerId::BgGlow,
        LayerId::Ring,
        LayerId::ProgressArc,
        LayerId::GlowCircle,
        LayerId::ToolLabel,
        LayerId::CenterLabel,
        LayerId::LayerLabel,
        LayerId::TempChart,
        LayerId::TempTitle,
        LayerId::TempCurrent,
        LayerId::ToolGif,
        LayerId::ToolPlaceholder,
    ];

    pub const PROGRESS_LABELS: [LayerId; 3] =
        [LayerId::ToolLabel, LayerId::CenterLabel, LayerId::LayerLabel];

    pub const TEMP_VIEW: [LayerId; 3] =
        [LayerId::TempChart, LayerId::TempTitle, LayerId::TempCurrent];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Back-to-front position on its screen.
    pub fn z_index(self) -> u8 {
        match self {
            LayerId::MainGif => 0,
            LayerId::Placeholder => 1,
            LayerId::BgGlow => 0,
            LayerId::Ring => 1,
            LayerId::ProgressArc => 2,
            LayerId::ToolGif | LayerId::ToolPlaceholder => 5,
            LayerId::GlowCircle => 10,
            LayerId::ToolLabel => 11,
            LayerId::CenterLabel => 12,
            LayerId::LayerLabel => 13,
            LayerId::TempChart => 20,
            LayerId::TempTitle => 21,
            LayerId::TempCurrent => 22,
        }
    }

    /// Cycle sub-view this layer belongs to; `None` for main-screen layers.
    pub fn owner(self) -> Option<CycleMode> {
        match self {
            LayerId::MainGif | LayerId::Placeholder => None,
            LayerId::BgGlow
            | LayerId::Ring
            | LayerId::ProgressArc
            | LayerId::GlowCircle
            | LayerId::ToolLabel
            | LayerId::CenterLabel
            | LayerId::LayerLabel => Some(CycleMode::Progress),
            LayerId::TempChart | LayerId::TempTitle | LayerId::TempCurrent => {
                Some(CycleMode::TemperatureGraph)
            }
            LayerId::ToolGif | LayerId::ToolPlaceholder => Some(CycleMode::ToolAnimation),
        }
    }

    pub fn screen(self) -> Screen {
        match self {
            LayerId::MainGif | LayerId::Placeholder => Screen::Main,
            _ => Screen::Printing,
        }
    }

    /// Layers built when a cycle sub-view is entered. Placeholders are
    /// only created on demand.
    pub fn is_built_for(self, mode: CycleMode) -> bool {
        self.owner() == Some(mode) && self != LayerId::ToolPlaceholder
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_priority_order() {
        assert!(ViewState::Homing < ViewState::Probing);
        assert!(ViewState::HeatingBed < ViewState::Printing);
        assert!(ViewState::PrintComplete < ViewState::Idle);
    }

    #[test]
    fn cycle_wraps_around() {
        let mut mode = CycleMode::Progress;
        for _ in 0..3 {
            mode = mode.next();
        }
        assert_eq!(mode, CycleMode::Progress);
        let total: u64 = CycleMode::ALL.iter().map(|m| m.duration_ms()).sum();
        assert_eq!(total, 26_000);
    }

    #[test]
    fn asset_names_and_paths() {
        assert_eq!(AssetKey::ToolIdle(3).name().as_str(), "tool-idle-3");
        assert_eq!(AssetKey::ToolIdle(3).path().as_str(), "/gifs/tool_3.gif");
        assert_eq!(
            AssetKey::ProgressGlow.path().as_str(),
            "/gifs/print_progress_bg.gif"
        );
        assert_eq!(AssetKey::Homing.path().as_str(), "/gifs/homing.gif");
    }

    #[test]
    fn layer_table_is_consistent() {
        for (i, id) in LayerId::ALL.iter().enumerate() {
            assert_eq!(id.index(), i);
        }
        assert!(LayerId::Ring.z_index() < LayerId::ProgressArc.z_index());
        assert!(LayerId::ProgressArc.z_index() < LayerId::GlowCircle.z_index());
        for label in LayerId::PROGRESS_LABELS {
            assert!(label.z_index() > LayerId::GlowCircle.z_index());
        }
    }

    #[test]
    fn sub_view_layers_are_disjoint() {
        for id in LayerId::ALL {
            let owners = CycleMode::ALL
                .iter()
                .filter(|m| id.owner() == Some(**m))
                .count();
            assert!(owners <= 1);
        }
    }
}
