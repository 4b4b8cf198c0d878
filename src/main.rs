//! toolhead-display firmware - ESP32-S3 + GC9A01 round panel.
//!
//! Build-time environment (see `build.rs`):
//! - WIFI_SSID / WIFI_PASS: network credentials
//! - MOONRAKER_HOST / MOONRAKER_PORT: printer API endpoint
//! - DEVICE_HOSTNAME: DHCP hostname; a `-tN` suffix selects the tool
//! - SLEEP_MODE (optional): `manual`, `klipper` or `led`

#![no_std]
#![no_main]

extern crate alloc;

mod backlight;
#[path = "ui/buttons.rs"]
mod buttons;
#[path = "ui/display.rs"]
mod display;
mod net;

use core::cell::RefCell;

use defmt::{debug, error, info, warn};
use embassy_executor::Spawner;
use embassy_net::dns::DnsSocket;
use embassy_net::tcp::client::{TcpClient, TcpClientState};
use embassy_net::{DhcpConfig, Runner, Stack, StackResources};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::channel::Channel;
use embassy_sync::mutex::Mutex;
use embassy_time::{Duration, Instant, Ticker, Timer};
use esp_alloc as _;
use esp_backtrace as _;
use esp_hal::clock::CpuClock;
use esp_hal::gpio::{Input, InputConfig, Level, Output, OutputConfig, Pull};
use esp_hal::ledc::channel::ChannelIFace;
use esp_hal::ledc::timer::TimerIFace;
use esp_hal::ledc::{channel, timer, LSGlobalClkSource, Ledc, LowSpeed};
use esp_hal::ram;
use esp_hal::rng::Rng;
use esp_hal::spi::master::{Config as SpiConfig, Spi};
use esp_hal::spi::Mode;
use esp_hal::time::Rate;
use esp_hal::timer::timg::TimerGroup;
use esp_println as _;
use esp_radio::wifi::{
    ClientConfig, ModeConfig, WifiController, WifiDevice, WifiEvent, WifiStaState,
};
use esp_radio::Controller;

use toolhead_display::config::{
    RuntimeConfig, SleepMode, COMMAND_DRAIN_MS, CYCLE_TICK_MS, STATUS_POLL_MS, UI_FRAME_MS,
};
use toolhead_display::moonraker::{
    send_command, CommandQueue, PollReport, PrinterSnapshot, StatusSource,
};
use toolhead_display::power::{ActivityProbe, SleepController};
use toolhead_display::ui::compositor::Animation;
use toolhead_display::ui::screen::ScreenController;
use toolhead_display::ui::LayerId;

use crate::backlight::PwmBacklight;
use crate::buttons::ButtonEvent;
use crate::display::{Panel, Scene};
use crate::net::{MoonrakerHttp, Tcp, TCP_BUFFER, TCP_SOCKETS};

esp_bootloader_esp_idf::esp_app_desc!();

macro_rules! mk_static {
    ($t:ty,$val:expr) => {{
        static STATIC_CELL: static_cell::StaticCell<$t> = static_cell::StaticCell::new();
        #[deny(unused_attributes)]
        let x = STATIC_CELL.uninit().write(($val));
        x
    }};
}

const SSID: &str = env!("WIFI_SSID");
const PASSWORD: &str = env!("WIFI_PASS");
const HOSTNAME: &str = env!("DEVICE_HOSTNAME");
const MOONRAKER_URL: &str = concat!(
    "http://",
    env!("MOONRAKER_HOST"),
    ":",
    env!("MOONRAKER_PORT")
);

/// Latest snapshot, copied whole under the lock.
static SNAPSHOT: Mutex<CriticalSectionRawMutex, PrinterSnapshot> =
    Mutex::new(PrinterSnapshot::new());

/// Outbound commands; enqueueing never awaits.
static COMMANDS: BlockingMutex<CriticalSectionRawMutex, RefCell<CommandQueue>> =
    BlockingMutex::new(RefCell::new(CommandQueue::new()));

static POLL_EVENTS: Channel<CriticalSectionRawMutex, PollReport, 4> = Channel::new();
static BUTTONS: Channel<CriticalSectionRawMutex, ButtonEvent, 4> = Channel::new();

/// Pixel batch buffer for the SPI display interface.
const DISPLAY_BUF_LEN: usize = 512;

#[esp_rtos::main]
async fn main(spawner: Spawner) -> ! {
    let config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(config);

    esp_alloc::heap_allocator!(#[ram(reclaimed)] size: 64 * 1024);
    // Animation decode buffers live in PSRAM.
    esp_alloc::psram_allocator!(&peripherals.PSRAM, esp_hal::psram);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);
    info!("Boot: {}", HOSTNAME);

    let mut cfg = RuntimeConfig::for_identity(HOSTNAME);
    if let Some(mode) = option_env!("SLEEP_MODE").and_then(SleepMode::parse) {
        cfg.sleep_mode = mode;
    }
    info!(
        "Boot: tool {}, sleep mode {}",
        cfg.tool_index,
        cfg.sleep_mode.as_str()
    );

    // Backlight
    let mut ledc = Ledc::new(peripherals.LEDC);
    ledc.set_global_slow_clock(LSGlobalClkSource::APBClk);
    let bl_timer = mk_static!(
        timer::Timer<'static, LowSpeed>,
        ledc.timer::<LowSpeed>(timer::Number::Timer0)
    );
    let timer_cfg = timer::config::Config {
        duty: timer::config::Duty::Duty10Bit,
        clock_source: timer::LSClockSource::APBClk,
        frequency: Rate::from_khz(5),
    };
    if bl_timer.configure(timer_cfg).is_err() {
        halt("backlight timer").await;
    }
    let mut bl_channel = ledc.channel(channel::Number::Channel0, peripherals.GPIO13);
    if bl_channel
        .configure(backlight::channel_config(bl_timer))
        .is_err()
    {
        halt("backlight channel").await;
    }
    let backlight = PwmBacklight::new(bl_channel);

    // Panel
    let spi_cfg = SpiConfig::default()
        .with_frequency(Rate::from_mhz(40))
        .with_mode(Mode::_0);
    let spi = match Spi::new(peripherals.SPI2, spi_cfg) {
        Ok(spi) => spi.with_sck(peripherals.GPIO10).with_mosi(peripherals.GPIO11),
        Err(_) => halt("display spi").await,
    };
    let cs = Output::new(peripherals.GPIO9, Level::High, OutputConfig::default());
    let dc = Output::new(peripherals.GPIO8, Level::Low, OutputConfig::default());
    let rst = Output::new(peripherals.GPIO14, Level::High, OutputConfig::default());
    let buf = mk_static!([u8; DISPLAY_BUF_LEN], [0; DISPLAY_BUF_LEN]);
    let panel = match display::init(spi, cs, dc, rst, buf) {
        Ok(panel) => panel,
        Err(e) => {
            error!("Boot: panel init failed ({})", e);
            halt("display").await
        }
    };

    let mut screen = ScreenController::new(Scene::new(panel), &cfg);
    if let Err(e) = screen.boot() {
        error!("Boot: main animation unavailable ({})", e);
        halt("main animation").await;
    }
    let sleep = SleepController::new(backlight, &cfg, Instant::now().as_millis());

    // Wi-Fi
    let radio = &*mk_static!(
        Controller<'static>,
        match esp_radio::init() {
            Ok(radio) => radio,
            Err(_) => halt("radio").await,
        }
    );
    let (controller, interfaces) =
        match esp_radio::wifi::new(radio, peripherals.WIFI, Default::default()) {
            Ok(wifi) => wifi,
            Err(_) => halt("wifi").await,
        };

    let mut dhcp = DhcpConfig::default();
    dhcp.hostname = heapless::String::try_from(HOSTNAME).ok();
    let rng = Rng::new();
    let seed = (rng.random() as u64) << 32 | rng.random() as u64;
    let (stack, runner) = embassy_net::new(
        interfaces.sta,
        embassy_net::Config::dhcpv4(dhcp),
        mk_static!(StackResources<4>, StackResources::<4>::new()),
        seed,
    );

    let tcp_state = mk_static!(
        TcpClientState<TCP_SOCKETS, TCP_BUFFER, TCP_BUFFER>,
        TcpClientState::new()
    );
    let tcp: &'static Tcp = mk_static!(Tcp, TcpClient::new(stack, tcp_state));
    let dns = &*mk_static!(DnsSocket<'static>, DnsSocket::new(stack));

    let button = Input::new(
        peripherals.GPIO0,
        InputConfig::default().with_pull(Pull::Up),
    );

    spawner.spawn(net_task(runner)).ok();
    spawner.spawn(wifi_task(controller)).ok();
    spawner.spawn(button_task(button)).ok();
    spawner.spawn(ui_task(screen, sleep)).ok();

    wait_for_ip(stack).await;

    let source = StatusSource::new(&cfg.moonraker_tool);
    spawner
        .spawn(poll_task(source, MoonrakerHttp::new(tcp, dns, MOONRAKER_URL)))
        .ok();
    spawner
        .spawn(command_task(MoonrakerHttp::new(tcp, dns, MOONRAKER_URL)))
        .ok();

    loop {
        Timer::after(Duration::from_secs(60)).await;
        let dropped = COMMANDS.lock(|q| q.borrow().dropped());
        debug!("Boot: alive, {} commands dropped", dropped);
    }
}

/// Boot-time failure: log and park forever.
async fn halt(what: &str) -> ! {
    error!("Boot: {} failed, halting", what);
    loop {
        Timer::after(Duration::from_secs(3600)).await;
    }
}

async fn wait_for_ip(stack: Stack<'static>) {
    info!("Net: waiting for link");
    stack.wait_link_up().await;
    info!("Net: waiting for address");
    stack.wait_config_up().await;
    if let Some(config) = stack.config_v4() {
        info!("Net: got {}", config.address);
    }
}

#[embassy_executor::task]
async fn net_task(mut runner: Runner<'static, WifiDevice<'static>>) {
    runner.run().await
}

/// Keeps the station associated; reconnects after a drop.
#[embassy_executor::task]
async fn wifi_task(mut controller: WifiController<'static>) {
    loop {
        if esp_radio::wifi::sta_state() == WifiStaState::Connected {
            controller.wait_for_event(WifiEvent::StaDisconnected).await;
            warn!("Net: wifi dropped");
            Timer::after(Duration::from_secs(5)).await;
        }

        if !matches!(controller.is_started(), Ok(true)) {
            let client = ModeConfig::Client(
                ClientConfig::default()
                    .with_ssid(SSID.into())
                    .with_password(PASSWORD.into()),
            );
            if let Err(e) = controller.set_config(&client) {
                error!("Net: wifi config rejected ({:?})", e);
                Timer::after(Duration::from_secs(5)).await;
                continue;
            }
            if let Err(e) = controller.start_async().await {
                error!("Net: wifi start failed ({:?})", e);
                Timer::after(Duration::from_secs(5)).await;
                continue;
            }
        }

        match controller.connect_async().await {
            Ok(()) => info!("Net: connected to {}", SSID),
            Err(e) => {
                warn!("Net: connect failed ({:?}), retrying", e);
                Timer::after(Duration::from_secs(5)).await;
            }
        }
    }
}

#[embassy_executor::task]
async fn button_task(pin: Input<'static>) {
    buttons::button_task(pin, BUTTONS.sender()).await
}

/// Polls Moonraker and publishes the snapshot.
#[embassy_executor::task]
async fn poll_task(mut source: StatusSource, mut http: MoonrakerHttp) {
    let mut ticker = Ticker::every(Duration::from_millis(STATUS_POLL_MS));
    loop {
        let report = source.poll(&mut http).await;
        *SNAPSHOT.lock().await = source.snapshot().clone();
        if POLL_EVENTS.try_send(report).is_err() {
            debug!("Poll: report dropped, ui busy");
        }
        ticker.next().await;
    }
}

/// Sends one queued command per period.
#[embassy_executor::task]
async fn command_task(mut http: MoonrakerHttp) {
    let mut buf = [0u8; 256];
    let mut ticker = Ticker::every(Duration::from_millis(COMMAND_DRAIN_MS));
    loop {
        ticker.next().await;
        let next = COMMANDS.lock(|q| q.borrow_mut().pop());
        if let Some(cmd) = next {
            // Failures are logged by the sender and never retried.
            let _ = send_command(&cmd, &mut http, &mut buf).await;
        }
    }
}

/// Activity probe for the pre-sleep re-check: reads the live snapshot,
/// falling back to the tick's copy while the poller holds the lock.
struct LiveProbe<'a> {
    fallback: &'a PrinterSnapshot,
}

impl ActivityProbe for LiveProbe<'_> {
    fn printer_active(&self) -> bool {
        match SNAPSHOT.try_lock() {
            Ok(live) => live.printer_active(),
            Err(_) => self.fallback.printer_active(),
        }
    }

    fn link_ok(&self) -> bool {
        match SNAPSHOT.try_lock() {
            Ok(live) => live.link_ok(),
            Err(_) => self.fallback.link_ok(),
        }
    }
}

type UiScreen = ScreenController<Scene<Panel>>;

#[embassy_executor::task]
async fn ui_task(mut screen: UiScreen, mut sleep: SleepController<PwmBacklight>) {
    let mut snapshot = PrinterSnapshot::new();
    let mut last_cycle_ms = 0u64;
    let mut ticker = Ticker::every(Duration::from_millis(UI_FRAME_MS));
    loop {
        let now = Instant::now().as_millis();

        while let Ok(report) = POLL_EVENTS.try_receive() {
            if report.became_ready {
                sleep.reset_idle_timer(now);
            }
            if let Some(state) = report.idle_state {
                sleep.update_idle_state(state, now);
            }
            sleep.check_wake_condition(report.status_changed, now);
        }

        while let Ok(event) = BUTTONS.try_receive() {
            on_button(event, &snapshot, &mut screen, &mut sleep, now);
        }

        if now.saturating_sub(last_cycle_ms) >= CYCLE_TICK_MS {
            last_cycle_ms = now;
            snapshot = SNAPSHOT.lock().await.clone();
            screen.tick(&snapshot, now);
            sleep.update(now, &LiveProbe { fallback: &snapshot });
        }

        if !sleep.is_sleeping() {
            let scene = screen.compositor_mut().backend_mut();
            scene.advance(now);
            if scene.render().is_err() {
                warn!("Layers: panel write failed");
            }
        }
        ticker.next().await;
    }
}

fn on_button(
    event: ButtonEvent,
    snapshot: &PrinterSnapshot,
    screen: &mut UiScreen,
    sleep: &mut SleepController<PwmBacklight>,
    now: u64,
) {
    sleep.record_interaction(now);
    match event {
        ButtonEvent::Tap => {
            let main = screen.compositor().handle(LayerId::MainGif);
            let scene = screen.compositor_mut().backend_mut();
            if let Some(main) = main.filter(|_| scene.is_clickable(LayerId::MainGif)) {
                scene.restart(main);
            }
        }
        ButtonEvent::Hold => {
            if snapshot.printing && !snapshot.paused {
                if let Err(e) = COMMANDS.lock(|q| q.borrow_mut().pause()) {
                    warn!("Queue: pause not queued ({})", e);
                }
            }
        }
    }
}
