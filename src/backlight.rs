//! PWM backlight on the LEDC peripheral.

use core::sync::atomic::Ordering;

use defmt::warn;
use esp_hal::ledc::channel::{self, Channel, ChannelIFace};
use esp_hal::ledc::LowSpeed;

use toolhead_display::config::BACKLIGHT_MAX;
use toolhead_display::power::Backlight;

use crate::display::FORCE_REDRAW;

pub struct PwmBacklight {
    channel: Channel<'static, LowSpeed>,
    level: u8,
}

impl PwmBacklight {
    /// Takes a configured channel; the panel starts at full brightness.
    pub fn new(channel: Channel<'static, LowSpeed>) -> Self {
        let mut bl = Self { channel, level: 0 };
        bl.set_level(BACKLIGHT_MAX);
        bl
    }
}

fn duty_pct(level: u8) -> u8 {
    let level = level.min(BACKLIGHT_MAX);
    ((u16::from(level) * 100) / u16::from(BACKLIGHT_MAX)) as u8
}

impl Backlight for PwmBacklight {
    fn level(&self) -> u8 {
        self.level
    }

    fn set_level(&mut self, level: u8) {
        let level = level.min(BACKLIGHT_MAX);
        if let Err(e) = self.channel.set_duty(duty_pct(level)) {
            warn!("Sleep: backlight duty rejected ({:?})", e);
            return;
        }
        self.level = level;
    }

    fn request_redraw(&mut self) {
        FORCE_REDRAW.store(true, Ordering::Release);
    }
}

/// Channel config for the backlight pin, starting at full duty.
pub fn channel_config<'a>(
    timer: &'a dyn esp_hal::ledc::timer::TimerIFace<LowSpeed>,
) -> channel::config::Config<'a, LowSpeed> {
    channel::config::Config {
        timer,
        duty_pct: 100,
        pin_config: channel::config::PinConfig::PushPull,
    }
}
