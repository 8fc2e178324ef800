//! Wayfinder walk simulator
//!
//! Publishes scanner batches over MQTT for a scripted walk through the demo
//! campus, drives the control socket, and prints guidance as it comes back.
//!
//! Usage:
//!   cargo run --bin wayfinder-sim -- --scenario library

use clap::Parser;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde_json::json;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

const SCANNER_TOPIC: &str = "wayfinder/scanner/sim";

/// Batch publish period
const BATCH_PERIOD: Duration = Duration::from_millis(250);

#[derive(Parser, Debug)]
#[command(name = "wayfinder-sim")]
#[command(about = "Scripted beacon walk for local testing")]
struct Args {
    /// MQTT broker host
    #[arg(long, default_value = "localhost")]
    mqtt_host: String,

    /// MQTT broker port
    #[arg(long, default_value = "1883")]
    mqtt_port: u16,

    /// Control listener address
    #[arg(long, default_value = "127.0.0.1:7878")]
    control: String,

    /// Scenario: library, cafeteria, ask, lost
    #[arg(long, default_value = "library")]
    scenario: String,
}

#[derive(Debug, Clone)]
enum Step {
    /// Control request line sent verbatim
    Control(&'static str),
    /// Stand near a beacon: it reads strong, its neighbours weak
    Near(&'static str),
    /// Stop advertising entirely
    Silence,
    Wait(u64),
}

/// Beacon neighbours on the demo campus
fn neighbours(beacon: &str) -> &'static [&'static str] {
    match beacon {
        "ESP32_A" => &["ESP32_B"],
        "ESP32_B" => &["ESP32_A", "ESP32_C", "ESP32_D"],
        "ESP32_C" | "ESP32_D" => &["ESP32_B"],
        _ => &[],
    }
}

fn scenario(name: &str) -> Option<Vec<Step>> {
    let steps = match name {
        "library" => vec![
            Step::Control("START library"),
            Step::Near("ESP32_A"),
            Step::Wait(2000),
            Step::Near("ESP32_B"),
            Step::Wait(2000),
            Step::Near("ESP32_C"),
            Step::Wait(2000),
            Step::Control("STOP"),
        ],
        "cafeteria" => vec![
            Step::Control("START cafeteria"),
            Step::Control("HEADING 0"),
            Step::Near("ESP32_A"),
            Step::Wait(1500),
            // wrong turn toward the library
            Step::Near("ESP32_C"),
            Step::Wait(1500),
            Step::Near("ESP32_B"),
            Step::Wait(1500),
            Step::Near("ESP32_D"),
            Step::Wait(2000),
            Step::Control("STOP"),
        ],
        "ask" => vec![
            Step::Control("ASK where can I get a coffee"),
            Step::Near("ESP32_B"),
            Step::Wait(2000),
            Step::Near("ESP32_D"),
            Step::Wait(2000),
            Step::Control("STOP"),
        ],
        "lost" => vec![
            Step::Control("START library"),
            Step::Near("ESP32_A"),
            Step::Wait(1500),
            Step::Silence,
            Step::Wait(5000),
            Step::Near("ESP32_B"),
            Step::Wait(1500),
            Step::Control("STOP"),
        ],
        _ => return None,
    };
    Some(steps)
}

fn batch_for(beacon: &str, tick: u64) -> serde_json::Value {
    // a couple of dB of jitter so successive batches differ
    let jitter = (tick % 3) as i64;
    let mut adverts = vec![json!({ "name": beacon, "rssi": -55 - jitter })];
    for other in neighbours(beacon) {
        adverts.push(json!({ "name": other, "rssi": -78 + jitter }));
    }
    json!({ "scanner": "sim", "adverts": adverts })
}

async fn control_request(control: &str, line: &str) -> String {
    let mut stream = match TcpStream::connect(control).await {
        Ok(s) => s,
        Err(e) => return format!("connect failed: {}", e),
    };
    if let Err(e) = stream.write_all(format!("{}\n", line).as_bytes()).await {
        return format!("write failed: {}", e);
    }
    let mut reply = String::new();
    match BufReader::new(stream).read_line(&mut reply).await {
        Ok(_) => reply.trim().to_string(),
        Err(e) => format!("read failed: {}", e),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    let args = Args::parse();
    let Some(steps) = scenario(&args.scenario) else {
        return Err(format!("unknown scenario '{}'", args.scenario).into());
    };

    let mut mqtt_options = MqttOptions::new("wayfinder-sim", &args.mqtt_host, args.mqtt_port);
    mqtt_options.set_keep_alive(Duration::from_secs(30));
    let (client, mut eventloop) = AsyncClient::new(mqtt_options, 100);
    client.subscribe("wayfinder/guidance", QoS::AtLeastOnce).await?;
    client.subscribe("wayfinder/session", QoS::AtLeastOnce).await?;

    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => info!("sim_connected"),
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    if let Ok(payload) = std::str::from_utf8(&publish.payload) {
                        info!(topic = %publish.topic, payload = %payload, "sim_received");
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "sim_mqtt_error");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    });

    info!(scenario = %args.scenario, steps = %steps.len(), "sim_scenario_started");

    let mut near: Option<&'static str> = None;
    let mut tick = 0u64;
    for step in steps {
        match step {
            Step::Control(line) => {
                let reply = control_request(&args.control, line).await;
                info!(request = %line, reply = %reply, "sim_control");
            }
            Step::Near(beacon) => {
                info!(beacon = %beacon, "sim_near");
                near = Some(beacon);
            }
            Step::Silence => {
                info!("sim_silence");
                near = None;
            }
            Step::Wait(ms) => {
                let until = tokio::time::Instant::now() + Duration::from_millis(ms);
                while tokio::time::Instant::now() < until {
                    if let Some(beacon) = near {
                        let payload = batch_for(beacon, tick).to_string();
                        if let Err(e) =
                            client.publish(SCANNER_TOPIC, QoS::AtMostOnce, false, payload).await
                        {
                            warn!(error = %e, "sim_publish_failed");
                        }
                        tick += 1;
                    }
                    tokio::time::sleep(BATCH_PERIOD).await;
                }
            }
        }
    }

    // let the last guidance arrive
    tokio::time::sleep(Duration::from_millis(500)).await;
    info!(scenario = %args.scenario, "sim_scenario_complete");
    Ok(())
}
