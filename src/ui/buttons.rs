//! Push button with async debouncing.
//!
//! One active-low button with internal pull-up:
//!   - tap  - counts as user interaction (wakes the display)
//!   - hold - while printing, asks Moonraker to pause
//!
//! The task waits for a GPIO edge, debounces it, times the press and sends
//! a `ButtonEvent` to the UI channel.

use defmt::info;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Sender;
use embassy_time::{with_timeout, Duration, Timer};
use esp_hal::gpio::Input;

use toolhead_display::config::{BUTTON_DEBOUNCE_MS, BUTTON_HOLD_MS};

#[derive(Clone, Copy, Debug, PartialEq, Eq, defmt::Format)]
pub enum ButtonEvent {
    Tap,
    Hold,
}

pub type ButtonSender = Sender<'static, CriticalSectionRawMutex, ButtonEvent, 4>;

/// Run the button loop forever.
pub async fn button_task(mut btn: Input<'static>, tx: ButtonSender) -> ! {
    loop {
        // Falling edge = press (active-low).
        btn.wait_for_falling_edge().await;

        Timer::after(Duration::from_millis(BUTTON_DEBOUNCE_MS)).await;
        if !btn.is_low() {
            continue;
        }

        let released = with_timeout(
            Duration::from_millis(BUTTON_HOLD_MS),
            btn.wait_for_rising_edge(),
        )
        .await;
        let event = match released {
            Ok(()) => ButtonEvent::Tap,
            Err(_) => ButtonEvent::Hold,
        };
        info!("Button: {}", event);
        tx.send(event).await;

        // A hold is reported before release; wait it out to avoid repeats.
        if event == ButtonEvent::Hold {
            btn.wait_for_rising_edge().await;
        }
        Timer::after(Duration::from_millis(BUTTON_DEBOUNCE_MS)).await;
    }
}
