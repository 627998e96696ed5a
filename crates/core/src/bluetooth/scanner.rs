//! Device sweep loop: find robots, harvest each one once
//!
//! Every sweep scans for a while, stops scanning, then walks the robot-named
//! peripherals one at a time through [`attempt_device`]. Each attempt either
//! stores a record or reports a failure; it is never retried inside the sweep.

use anyhow::{anyhow, Result};
use btleplug::api::{Central, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::FutureExt;
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time;
use tracing::{debug, error, info, warn};

use super::attempt::{attempt_device, AttemptOutcome};
use super::constants::device;
use super::events::ScanEvent;
use super::link::BlePeerLink;
use crate::config::ScannerConfig;
use crate::error::ProtocolError;
use crate::registry::{DeviceAddress, DeviceRegistry};
use crate::storage::KeyValueStore;

const UNSET_ADDRESS: &str = "00:00:00:00:00:00";

/// Scans for robots and harvests the ones not yet in the registry
pub struct DeviceScanner<S: KeyValueStore> {
    config: ScannerConfig,
    adapter: Adapter,
    registry: DeviceRegistry<S>,
    event_sender: mpsc::UnboundedSender<ScanEvent>,
    event_receiver: Option<mpsc::UnboundedReceiver<ScanEvent>>,
}

impl<S: KeyValueStore> DeviceScanner<S> {
    /// Bind to the first Bluetooth adapter
    pub async fn new(config: ScannerConfig, registry: DeviceRegistry<S>) -> Result<Self> {
        config.validate().map_err(|e| anyhow!("Invalid scanner config: {}", e))?;

        let manager = Manager::new()
            .await
            .map_err(|e| anyhow!("Failed to create Bluetooth manager: {}. Is Bluetooth enabled?", e))?;

        let adapter = manager
            .adapters()
            .await
            .map_err(|e| anyhow!("Failed to get Bluetooth adapters: {}", e))?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("No Bluetooth adapters found"))?;

        match adapter.adapter_info().await {
            Ok(info) => info!("Using Bluetooth adapter: {}", info),
            Err(e) => debug!("Adapter info unavailable: {}", e),
        }

        let (event_sender, event_receiver) = mpsc::unbounded_channel();

        Ok(Self {
            config,
            adapter,
            registry,
            event_sender,
            event_receiver: Some(event_receiver),
        })
    }

    /// Get the event receiver (should be called once)
    pub fn take_event_receiver(&mut self) -> Option<mpsc::UnboundedReceiver<ScanEvent>> {
        self.event_receiver.take()
    }

    pub fn registry(&self) -> &DeviceRegistry<S> {
        &self.registry
    }

    /// Sweep repeatedly until `shutdown` completes.
    ///
    /// Shutdown interrupts the scan window and the rescan delay, but is only
    /// checked between robots, so a started attempt always disconnects.
    pub async fn run<F: Future<Output = ()>>(&mut self, shutdown: F) -> Result<()> {
        tokio::pin!(shutdown);
        info!(
            "🔍 Scanning for robots with prefixes {:?}",
            self.config.name_prefixes
        );

        'sweeps: loop {
            let discovered = tokio::select! {
                _ = &mut shutdown => break,
                result = self.discover() => result,
            };

            match discovered {
                Ok(candidates) => {
                    for (peripheral, address, name) in candidates {
                        if (&mut shutdown).now_or_never().is_some() {
                            break 'sweeps;
                        }
                        self.attempt(&peripheral, address, &name).await;
                    }
                }
                Err(e) => error!("Sweep failed: {}", e),
            }

            tokio::select! {
                _ = &mut shutdown => break,
                _ = time::sleep(self.config.rescan_delay()) => {}
            }
        }

        if let Err(e) = self.adapter.stop_scan().await {
            debug!("Error stopping scan: {}", e);
        }
        info!("Scanner stopped");
        Ok(())
    }

    /// Run one attempt and report how it went
    async fn attempt(&mut self, peripheral: &Peripheral, address: DeviceAddress, name: &str) {
        let timeout = self.config.connect_timeout();
        let connect = || connect_peer(peripheral, &address, timeout);

        let outcome = attempt_device(
            &mut self.registry,
            &address,
            connect,
            self.config.initiator_timeouts(),
            self.config.wifi.as_ref(),
        )
        .await;

        match outcome {
            Ok(AttemptOutcome::AlreadyKnown) => {
                debug!("{} ({}) already registered, skipping", name, address);
                self.emit_event(ScanEvent::AlreadyKnown { address });
            }
            Ok(AttemptOutcome::Harvested(record)) => {
                self.emit_event(ScanEvent::SerialHarvested { record });
            }
            Err(e) => {
                warn!("Attempt on {} ({}) failed: {}", name, address, e);
                self.emit_event(ScanEvent::AttemptFailed {
                    address,
                    error: e.to_string(),
                });
            }
        }
    }

    /// Scan for one window and collect robot-named peripherals
    async fn discover(&self) -> Result<Vec<(Peripheral, DeviceAddress, String)>> {
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| anyhow!("Failed to start scanning: {}", e))?;
        self.emit_event(ScanEvent::ScanningStateChanged { scanning: true });

        time::sleep(self.config.scan_duration()).await;

        let peripherals = self.adapter.peripherals().await;

        if let Err(e) = self.adapter.stop_scan().await {
            warn!("Error stopping scan: {}", e);
        }
        self.emit_event(ScanEvent::ScanningStateChanged { scanning: false });

        let peripherals = peripherals.map_err(|e| anyhow!("Error getting peripherals: {}", e))?;

        let mut candidates = Vec::new();
        for peripheral in peripherals {
            let properties = match peripheral.properties().await {
                Ok(Some(properties)) => properties,
                Ok(None) => continue,
                Err(e) => {
                    debug!("No properties for {}: {}", peripheral.id(), e);
                    continue;
                }
            };

            let Some(name) = properties.local_name else {
                continue;
            };
            if !device::matches_prefix(&name, &self.config.name_prefixes) {
                continue;
            }

            let address = peer_address(&properties.address.to_string(), &peripheral.id().to_string());
            info!("📡 Found {} ({}) RSSI {:?}", name, address, properties.rssi);
            self.emit_event(ScanEvent::DeviceDiscovered {
                address: address.clone(),
                name: name.clone(),
                rssi: properties.rssi,
            });

            candidates.push((peripheral, address, name));
        }

        Ok(candidates)
    }

    /// Emit an event
    fn emit_event(&self, event: ScanEvent) {
        if self.event_sender.send(event).is_err() {
            // Channel closed - this is fine during shutdown
        }
    }
}

/// Connect within `timeout` and attach to the robot service
async fn connect_peer(
    peripheral: &Peripheral,
    address: &DeviceAddress,
    timeout: Duration,
) -> crate::error::Result<BlePeerLink> {
    info!("🤖 Attempting {}", address);
    match time::timeout(timeout, peripheral.connect()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            return Err(ProtocolError::Connection(format!(
                "failed to connect to {}: {}",
                address, e
            )))
        }
        Err(_) => {
            return Err(ProtocolError::Connection(format!(
                "connection to {} timed out after {:?}",
                address, timeout
            )))
        }
    }

    match BlePeerLink::attach(peripheral.clone()).await {
        Ok(link) => Ok(link),
        Err(e) => {
            let _ = peripheral.disconnect().await;
            Err(e)
        }
    }
}

/// Hardware address when the platform exposes one, platform peripheral id otherwise
fn peer_address(hardware: &str, platform_id: &str) -> DeviceAddress {
    if hardware.is_empty() || hardware == UNSET_ADDRESS {
        DeviceAddress::new(platform_id)
    } else {
        DeviceAddress::new(hardware)
    }
}
