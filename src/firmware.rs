// Firmware Module
// ESP-IDF wiring: NVS-backed configuration, UART to the modem, GPIO outputs and the pipeline task

use std::thread;

use anyhow::{anyhow, Result};
use embassy_executor::Spawner;
use embassy_futures::select::{select, Either};
use embassy_time::{Duration, Ticker};
use esp_idf_svc::hal::delay::TickType;
use esp_idf_svc::hal::gpio::{AnyIOPin, AnyOutputPin, OutputPin, Output, PinDriver};
use esp_idf_svc::hal::peripherals::Peripherals;
use esp_idf_svc::hal::uart::{config::Config as UartConfig, UartDriver, UartRxDriver, UartTxDriver};
use esp_idf_svc::hal::units::Hertz;
use esp_idf_svc::nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault};
use log::{error, info, warn};

use crate::config::DeviceConfig;
use crate::modem::{Indicator, Indicators, ModemPort, PowerLine, SystemControl};
use crate::scheduler::Scheduler;
use crate::serial_inbox::LineError;
use crate::system_state::{RESPONSE_READY_SIGNAL, SERIAL_INBOX};

// NVS storage keys
const NVS_NAMESPACE: &str = "relay_link";
const DEVICE_CONFIG_KEY: &str = "device_cfg";
const CONFIG_BUFFER_SIZE: usize = 512;

const MODEM_BAUD_RATE: u32 = 115_200;
const TICK_PERIOD_MS: u64 = 100;
// Silence on the line for this long ends a response burst
const IDLE_GAP_MS: u64 = 20;
const READ_CHUNK_SIZE: usize = 64;
const UART_READER_STACK_SIZE: usize = 4096;

/// Device configuration persisted as a JSON blob in NVS
pub struct ConfigStorage {
    nvs: EspNvs<NvsDefault>,
}

impl ConfigStorage {
    pub fn new_with_partition(nvs_partition: EspDefaultNvsPartition) -> Result<Self> {
        let nvs = EspNvs::new(nvs_partition, NVS_NAMESPACE, true)
            .map_err(|e| anyhow!("Failed to open config NVS namespace: {}", e))?;
        Ok(Self { nvs })
    }

    pub fn load(&mut self) -> Result<Option<DeviceConfig>> {
        let mut buffer = [0u8; CONFIG_BUFFER_SIZE];
        let stored = self
            .nvs
            .get_str(DEVICE_CONFIG_KEY, &mut buffer)
            .map_err(|e| anyhow!("Failed to read device config: {}", e))?;

        match stored {
            Some(json) => Ok(Some(DeviceConfig::from_json(json)?)),
            None => Ok(None),
        }
    }

    pub fn store(&mut self, config: &DeviceConfig) -> Result<()> {
        config.validate()?;
        let json = config.to_json()?;
        self.nvs
            .set_str(DEVICE_CONFIG_KEY, &json)
            .map_err(|e| anyhow!("Failed to store device config: {}", e))?;
        info!("💾 Device config stored in NVS");
        Ok(())
    }

    /// Stored config, or the compile-time defaults (written back on first boot)
    pub fn load_or_default(&mut self) -> DeviceConfig {
        match self.load() {
            Ok(Some(config)) => {
                info!("📋 Loaded device config for AP '{}'", config.access_point_name);
                config
            }
            Ok(None) => {
                info!("📋 No stored device config, using defaults");
                let config = DeviceConfig::default();
                if let Err(e) = self.store(&config) {
                    warn!("⚠️ Could not persist default config: {}", e);
                }
                config
            }
            Err(e) => {
                warn!("⚠️ Stored device config unusable, using defaults: {}", e);
                DeviceConfig::default()
            }
        }
    }
}

/// The board as the scheduler sees it
pub struct DeviceBoard {
    tx: UartTxDriver<'static>,
    modem_power: PinDriver<'static, AnyOutputPin, Output>,
    network_led: PinDriver<'static, AnyOutputPin, Output>,
    server_led: PinDriver<'static, AnyOutputPin, Output>,
    relay: PinDriver<'static, AnyOutputPin, Output>,
}

impl ModemPort for DeviceBoard {
    fn transmit(&mut self, bytes: &[u8]) -> Result<()> {
        let mut remaining = bytes;
        while !remaining.is_empty() {
            let written = self
                .tx
                .write(remaining)
                .map_err(|e| anyhow!("UART write failed: {}", e))?;
            if written == 0 {
                return Err(anyhow!("UART accepted no bytes, {} left", remaining.len()));
            }
            remaining = &remaining[written..];
        }
        Ok(())
    }
}

impl PowerLine for DeviceBoard {
    fn set_enabled(&mut self, enabled: bool) {
        let result = if enabled {
            self.modem_power.set_high()
        } else {
            self.modem_power.set_low()
        };
        if let Err(e) = result {
            error!("❌ Failed to switch modem power: {:?}", e);
        }
    }

    fn is_enabled(&self) -> bool {
        self.modem_power.is_set_high()
    }
}

impl Indicators for DeviceBoard {
    fn set(&mut self, indicator: Indicator, on: bool) {
        let pin = match indicator {
            Indicator::Network => &mut self.network_led,
            Indicator::Server => &mut self.server_led,
            Indicator::Relay => &mut self.relay,
        };
        if on {
            pin.set_high().ok();
        } else {
            pin.set_low().ok();
        }
    }
}

impl SystemControl for DeviceBoard {
    fn restart(&mut self) {
        esp_idf_svc::hal::reset::restart();
    }
}

/// Bring up storage, UART and GPIO, then hand the board to the pipeline task
pub fn start(spawner: Spawner) -> Result<()> {
    let peripherals = Peripherals::take()?;
    let pins = peripherals.pins;

    let nvs_partition = EspDefaultNvsPartition::take()?;
    let config = ConfigStorage::new_with_partition(nvs_partition)?.load_or_default();

    let uart_config = UartConfig::new().baudrate(Hertz(MODEM_BAUD_RATE));
    let uart = UartDriver::new(
        peripherals.uart1,
        pins.gpio17,
        pins.gpio16,
        Option::<AnyIOPin>::None,
        Option::<AnyIOPin>::None,
        &uart_config,
    )?;
    let (tx, rx) = uart.into_split();
    info!("🔗 Modem UART up at {} baud (TX GPIO17, RX GPIO16)", MODEM_BAUD_RATE);

    thread::Builder::new()
        .name("uart-rx".to_string())
        .stack_size(UART_READER_STACK_SIZE)
        .spawn(move || uart_reader_loop(rx))
        .map_err(|e| anyhow!("Failed to start UART reader: {}", e))?;

    let board = DeviceBoard {
        tx,
        modem_power: PinDriver::output(pins.gpio23.downgrade_output())?,
        network_led: PinDriver::output(pins.gpio2.downgrade_output())?,
        server_led: PinDriver::output(pins.gpio4.downgrade_output())?,
        relay: PinDriver::output(pins.gpio5.downgrade_output())?,
    };
    info!("💡 Outputs: network LED GPIO2, server LED GPIO4, relay GPIO5, modem power GPIO23");

    spawner
        .spawn(pipeline_task(Scheduler::new(config), board))
        .map_err(|e| anyhow!("Failed to spawn pipeline task: {:?}", e))?;
    Ok(())
}

// Producer side of the serial inbox. A read that times out with nothing new
// is an idle gap.
fn uart_reader_loop(rx: UartRxDriver<'static>) {
    info!("📥 UART reader started");
    let gap = TickType::new_millis(IDLE_GAP_MS).ticks();
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    loop {
        match rx.read(&mut chunk, gap) {
            Ok(0) => {
                if SERIAL_INBOX.mark_idle_gap() {
                    RESPONSE_READY_SIGNAL.signal(());
                }
            }
            Ok(received) => SERIAL_INBOX.push_bytes(&chunk[..received]),
            Err(e) => {
                // the driver does not say which line error it was
                warn!("⚠️ UART read error: {:?}", e);
                SERIAL_INBOX.record_line_error(LineError::Noise);
            }
        }
    }
}

#[embassy_executor::task]
async fn pipeline_task(mut scheduler: Scheduler, mut board: DeviceBoard) {
    info!("🔁 Pipeline task started");
    scheduler.start(&mut board);

    let mut ticker = Ticker::every(Duration::from_millis(TICK_PERIOD_MS));
    loop {
        match select(ticker.next(), RESPONSE_READY_SIGNAL.wait()).await {
            Either::First(()) => scheduler.tick(&board),
            Either::Second(()) => {}
        }
        scheduler.run_once(&SERIAL_INBOX, &mut board);
    }
}
