//! Simulated Fixture
//!
//! A stand-in for the Connect112 hardware behind the [`DeviceDriver`]
//! interface. Manual reads pass at random; auto mode emits a `PASS` event
//! for every pin in order on a recurring tick.

use crate::core::device::{DeviceDriver, DeviceEvent};
use crate::core::session::TOTAL_PINS;
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Simulator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Name reported as the fixture port
    pub port_name: String,
    /// Chance that a manual read passes (0.0 - 1.0)
    pub pass_probability: f64,
    /// Delay applied to every command, in ms
    pub command_delay_ms: u64,
    /// Interval between auto-test passes, in ms
    pub tick_interval_ms: u64,
    /// Fixed RNG seed for reproducible runs
    pub seed: Option<u64>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            port_name: "SIM".to_string(),
            pass_probability: 0.5,
            command_delay_ms: 250,
            tick_interval_ms: 100,
            seed: None,
        }
    }
}

/// Simulated fixture
pub struct SimulatedDevice {
    config: SimulatorConfig,
    rng: Mutex<StdRng>,
    found: AtomicBool,
    open: AtomicBool,
    events: broadcast::Sender<DeviceEvent>,
    auto_run: Mutex<Option<CancellationToken>>,
}

impl SimulatedDevice {
    /// Create a simulator
    pub fn new(config: SimulatorConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let (events, _) = broadcast::channel(512);

        Self {
            config,
            rng: Mutex::new(rng),
            found: AtomicBool::new(false),
            open: AtomicBool::new(false),
            events,
            auto_run: Mutex::new(None),
        }
    }

    /// Whether the simulated port is open
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Whether the auto-test stream is running
    pub fn is_auto_running(&self) -> bool {
        self.auto_run
            .lock()
            .as_ref()
            .is_some_and(|token| !token.is_cancelled())
    }

    async fn command_delay(&self) {
        tokio::time::sleep(Duration::from_millis(self.config.command_delay_ms)).await;
    }

    fn stop_auto_run(&self) {
        if let Some(token) = self.auto_run.lock().take() {
            token.cancel();
        }
    }
}

#[async_trait]
impl DeviceDriver for SimulatedDevice {
    async fn initialize(&self) -> bool {
        self.command_delay().await;
        self.found.store(true, Ordering::Release);
        let _ = self.events.send(DeviceEvent::DeviceStatus(true));
        info!("Simulated fixture ready on {}", self.config.port_name);
        self.reset().await;
        true
    }

    fn is_device_found(&self) -> bool {
        self.found.load(Ordering::Acquire)
    }

    async fn open(&self) -> bool {
        self.open.store(true, Ordering::Release);
        true
    }

    async fn close(&self) {
        self.stop_auto_run();
        self.open.store(false, Ordering::Release);
    }

    async fn reset(&self) -> bool {
        self.command_delay().await;
        true
    }

    async fn test_pin(&self, pin: usize) -> bool {
        self.command_delay().await;
        let probability = self.config.pass_probability.clamp(0.0, 1.0);
        let passed = self.rng.lock().gen_bool(probability);
        debug!("Simulated read of pin {}: {}", pin, passed);
        passed
    }

    async fn auto_test_on(&self) -> bool {
        self.command_delay().await;
        self.stop_auto_run();

        let token = CancellationToken::new();
        *self.auto_run.lock() = Some(token.clone());

        let events = self.events.clone();
        let period = Duration::from_millis(self.config.tick_interval_ms.max(1));

        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            for pin in 0..TOTAL_PINS {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = ticker.tick() => {}
                }
                let _ = events.send(DeviceEvent::PinPassed(pin));
            }
            token.cancel();
            debug!("Simulated auto-test finished");
        });
        true
    }

    async fn auto_test_off(&self) -> bool {
        self.stop_auto_run();
        self.command_delay().await;
        true
    }

    fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.events.subscribe()
    }

    fn describe(&self) -> String {
        format!("{} (simulated)", self.config.port_name)
    }
}

impl Drop for SimulatedDevice {
    fn drop(&mut self) {
        self.stop_auto_run();
    }
}
