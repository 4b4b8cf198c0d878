//! Host-testable library for toolhead-display.
//!
//! Everything that does not touch hardware lives here: the Moonraker
//! client and parser, the view selector, the printing-screen cycle, the
//! layer compositor, the estimator and the sleep controller.
//!
//! Usage: `cargo test` (default features, runs on the host)
//!
//! Note: The firmware binary uses main.rs with #![no_std] and #![no_main]
//! and adds the hardware modules (Wi-Fi transport, panel, backlight,
//! button) on top of this crate.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

#[macro_use]
mod fmt;

pub mod config;
pub mod error;
pub mod moonraker;
pub mod power;
pub mod power_logic;
pub mod progress;
pub mod ui;

// ═══════════════════════════════════════════════════════════════════════════
// Cross-module tests
// ═══════════════════════════════════════════════════════════════════════════
