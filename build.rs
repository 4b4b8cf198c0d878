//! Build script - forwards local secrets into the firmware build and adds
//! the esp-hal linker script for embedded builds.
//!
//! `secrets.local.env` (git-ignored) holds `KEY=value` lines. Values already
//! present in the build environment win over the file.

use std::env;
use std::fs;

const SECRETS_FILE: &str = "secrets.local.env";

const FORWARDED: &[&str] = &[
    "WIFI_SSID",
    "WIFI_PASS",
    "MOONRAKER_HOST",
    "MOONRAKER_PORT",
    "DEVICE_HOSTNAME",
    "SLEEP_MODE",
];

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed={}", SECRETS_FILE);
    for key in FORWARDED {
        println!("cargo:rerun-if-env-changed={}", key);
    }

    emit_local_secrets();

    // Only the firmware binary links against the esp-hal memory layout.
    if env::var_os("CARGO_FEATURE_EMBEDDED").is_some() {
        println!("cargo:rustc-link-arg-bins=-Tlinkall.x");
    }
}

fn emit_local_secrets() {
    let Ok(src) = fs::read_to_string(SECRETS_FILE) else {
        return;
    };

    for (key, value) in src.lines().filter_map(parse_line) {
        if !FORWARDED.contains(&key) || env::var_os(key).is_some() {
            continue;
        }
        println!("cargo:rustc-env={}={}", key, value);
    }
}

fn parse_line(line: &str) -> Option<(&str, &str)> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }
    let (key, value) = trimmed.split_once('=')?;
    let value = value.trim().trim_matches('"');
    Some((key.trim(), value))
}
