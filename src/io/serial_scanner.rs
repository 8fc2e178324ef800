//! Serial BLE scanner ingress
//!
//! A USB scanner dongle prints one line per sighting:
//! - `ADV <name> <rssi>` stamped with receive time
//! - `ADV <name> <rssi> <epoch_ms>` stamped by the scanner
//!
//! Anything else (boot banners, blank lines) is ignored.

use crate::domain::types::{epoch_ms, Advertisement};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::mqtt::AdvertForwarder;
use crate::services::navigator::NavCommand;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, error, info, warn};

/// Delay before reopening a port that failed or went away
const REOPEN_DELAY: Duration = Duration::from_secs(2);

/// Parse one scanner line
pub fn parse_scanner_line(line: &str, received_ms: u64) -> Option<Advertisement> {
    let mut parts = line.split_whitespace();
    if parts.next()? != "ADV" {
        return None;
    }
    let identity = parts.next()?;
    let rssi: i32 = parts.next()?.parse().ok()?;
    let timestamp = match parts.next() {
        Some(ts) => ts.parse().ok()?,
        None => received_ms,
    };
    if parts.next().is_some() {
        return None;
    }
    Some(Advertisement { identity: identity.to_string(), rssi, timestamp })
}

pub struct SerialScanner {
    device: String,
    baud: u32,
    forwarder: AdvertForwarder,
}

impl SerialScanner {
    pub fn new(config: &Config, nav_tx: mpsc::Sender<NavCommand>, metrics: Arc<Metrics>) -> Self {
        Self {
            device: config.scanner_device().to_string(),
            baud: config.scanner_baud(),
            forwarder: AdvertForwarder::new(nav_tx, metrics),
        }
    }

    /// Read lines until shutdown, reopening the port whenever it fails
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(device = %self.device, baud = %self.baud, "serial_scanner_started");

        loop {
            let port = match tokio_serial::new(&self.device, self.baud).open_native_async() {
                Ok(p) => {
                    info!(device = %self.device, "serial_port_opened");
                    p
                }
                Err(e) => {
                    error!(device = %self.device, error = %e, "serial_port_open_failed");
                    tokio::select! {
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() {
                                info!("serial_scanner_shutdown");
                                return;
                            }
                        }
                        _ = tokio::time::sleep(REOPEN_DELAY) => {}
                    }
                    continue;
                }
            };

            let mut lines = BufReader::new(port).lines();
            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            info!("serial_scanner_shutdown");
                            return;
                        }
                    }
                    line = lines.next_line() => {
                        match line {
                            Ok(Some(line)) => {
                                let line = line.trim();
                                match parse_scanner_line(line, epoch_ms()) {
                                    Some(advert) => {
                                        if !self.forwarder.forward(advert) {
                                            return;
                                        }
                                    }
                                    None if !line.is_empty() => {
                                        tracing::trace!(line = %line, "serial_line_ignored");
                                    }
                                    None => {}
                                }
                            }
                            Ok(None) => {
                                warn!(device = %self.device, "serial_port_closed");
                                break;
                            }
                            Err(e) => {
                                // non-UTF-8 noise shows up as InvalidData; keep reading
                                if e.kind() == std::io::ErrorKind::InvalidData {
                                    debug!(error = %e, "serial_line_invalid");
                                    continue;
                                }
                                warn!(device = %self.device, error = %e, "serial_read_error");
                                break;
                            }
                        }
                    }
                }
            }

            tokio::time::sleep(REOPEN_DELAY).await;
        }
    }
}
