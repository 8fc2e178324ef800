//! TCP control listener for navigation clients
//!
//! Line protocol, one request per line, one reply per request:
//! - `START <location>` start guidance to a known location
//! - `ASK <phrase>` classify free text into a destination, then start
//! - `STOP` end the active session
//! - `HEADING <degrees>` compass heading
//! - `ALPHA <degrees>` device-orientation alpha
//! - `RELOAD` reload the classifier model
//!
//! Replies are `OK ...` or `ERR <reason>`.

use crate::services::navigator::{Destination, NavCommand, StartAck};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

/// How long a client waits for the navigator to acknowledge a start
const START_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq)]
pub enum ControlRequest {
    Start(String),
    Ask(String),
    Stop,
    Heading(f64),
    Alpha(f64),
    Reload,
}

/// Parse one request line
pub fn parse_control_line(line: &str) -> Result<ControlRequest, String> {
    let line = line.trim();
    let (verb, rest) = match line.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (line, ""),
    };

    match verb.to_ascii_uppercase().as_str() {
        "START" if !rest.is_empty() => Ok(ControlRequest::Start(rest.to_string())),
        "ASK" if !rest.is_empty() => Ok(ControlRequest::Ask(rest.to_string())),
        "START" | "ASK" => Err(format!("{verb} needs an argument", verb = verb.to_ascii_uppercase())),
        "STOP" => Ok(ControlRequest::Stop),
        "RELOAD" => Ok(ControlRequest::Reload),
        "HEADING" | "ALPHA" => {
            let degrees: f64 =
                rest.parse().map_err(|_| format!("invalid degrees '{rest}'"))?;
            if !degrees.is_finite() {
                return Err(format!("invalid degrees '{rest}'"));
            }
            if verb.eq_ignore_ascii_case("HEADING") {
                Ok(ControlRequest::Heading(degrees))
            } else {
                Ok(ControlRequest::Alpha(degrees))
            }
        }
        "" => Err("empty request".to_string()),
        other => Err(format!("unknown command '{other}'")),
    }
}

fn format_ack(ack: &StartAck) -> String {
    match &ack.prediction {
        Some(p) => format!("OK {} {} score={:.3}", ack.session, ack.target, p.score),
        None => format!("OK {} {}", ack.session, ack.target),
    }
}

/// Start the control listener
pub async fn start_control_listener(
    port: u16,
    nav_tx: mpsc::Sender<NavCommand>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&addr).await?;

    info!(port = %port, "control_listener_started");

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("control_listener_shutdown");
                    return Ok(());
                }
            }
            result = listener.accept() => {
                match result {
                    Ok((socket, addr)) => {
                        let tx = nav_tx.clone();
                        tokio::spawn(async move {
                            handle_control_connection(socket, addr, tx).await;
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "control_accept_failed");
                    }
                }
            }
        }
    }
}

async fn handle_control_connection(
    socket: TcpStream,
    addr: SocketAddr,
    nav_tx: mpsc::Sender<NavCommand>,
) {
    let peer = addr.to_string();
    debug!(peer = %peer, "control_connection_accepted");

    let (reader, mut writer) = socket.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        let reply = match parse_control_line(&line) {
            Ok(request) => {
                debug!(peer = %peer, request = ?request, "control_request");
                execute(request, &nav_tx).await
            }
            Err(reason) => format!("ERR {reason}"),
        };

        if writer.write_all(format!("{reply}\n").as_bytes()).await.is_err() {
            break;
        }
    }

    debug!(peer = %peer, "control_connection_closed");
}

/// Forward a request to the navigator and build the reply line
pub async fn execute(request: ControlRequest, nav_tx: &mpsc::Sender<NavCommand>) -> String {
    let destination = match request {
        ControlRequest::Start(location) => Destination::Location(location),
        ControlRequest::Ask(phrase) => Destination::Phrase(phrase),
        other => {
            let cmd = match other {
                ControlRequest::Stop => NavCommand::Stop,
                ControlRequest::Heading(d) => NavCommand::Heading(d),
                ControlRequest::Alpha(d) => NavCommand::Alpha(d),
                _ => NavCommand::ReloadModel,
            };
            return match nav_tx.send(cmd).await {
                Ok(()) => "OK".to_string(),
                Err(_) => "ERR navigator unavailable".to_string(),
            };
        }
    };

    let (reply_tx, reply_rx) = oneshot::channel();
    let cmd = NavCommand::Start { destination, reply: Some(reply_tx) };
    if nav_tx.send(cmd).await.is_err() {
        return "ERR navigator unavailable".to_string();
    }

    match tokio::time::timeout(START_TIMEOUT, reply_rx).await {
        Ok(Ok(Ok(ack))) => format_ack(&ack),
        Ok(Ok(Err(e))) => format!("ERR {e}"),
        Ok(Err(_)) => "ERR navigator unavailable".to_string(),
        Err(_) => {
            warn!("control_start_timeout");
            "ERR timed out".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::guidance::GuidanceError;
    use crate::services::navigator::StartError;

    #[test]
    fn test_parse_requests() {
        assert_eq!(parse_control_line("START library"), Ok(ControlRequest::Start("library".into())));
        assert_eq!(
            parse_control_line("ask  where can I borrow a book "),
            Ok(ControlRequest::Ask("where can I borrow a book".into()))
        );
        assert_eq!(parse_control_line("STOP"), Ok(ControlRequest::Stop));
        assert_eq!(parse_control_line("HEADING 270.5"), Ok(ControlRequest::Heading(270.5)));
        assert_eq!(parse_control_line("ALPHA -10"), Ok(ControlRequest::Alpha(-10.0)));
        assert_eq!(parse_control_line("RELOAD\r"), Ok(ControlRequest::Reload));
    }

    #[test]
    fn test_parse_rejects_bad_requests() {
        assert!(parse_control_line("").is_err());
        assert!(parse_control_line("START").is_err());
        assert!(parse_control_line("ASK   ").is_err());
        assert!(parse_control_line("HEADING north").is_err());
        assert!(parse_control_line("HEADING NaN").is_err());
        assert!(parse_control_line("JUMP 3").is_err());

        assert_eq!(parse_control_line("start").unwrap_err(), "START needs an argument");
        assert_eq!(parse_control_line("HEADING north").unwrap_err(), "invalid degrees 'north'");
        assert_eq!(parse_control_line("JUMP 3").unwrap_err(), "unknown command 'JUMP'");
    }

    #[tokio::test]
    async fn test_execute_start_replies_with_session() {
        let (tx, mut rx) = mpsc::channel(4);
        let navigator = tokio::spawn(async move {
            if let Some(NavCommand::Start { destination, reply: Some(reply) }) = rx.recv().await {
                assert_eq!(destination, Destination::Location("library".into()));
                let _ = reply.send(Ok(StartAck {
                    session: "s1".into(),
                    target: "library".into(),
                    prediction: None,
                }));
            }
        });

        let reply = execute(ControlRequest::Start("library".into()), &tx).await;
        assert_eq!(reply, "OK s1 library");
        navigator.await.unwrap();
    }

    #[tokio::test]
    async fn test_execute_start_reports_rejection() {
        let (tx, mut rx) = mpsc::channel(4);
        tokio::spawn(async move {
            if let Some(NavCommand::Start { reply: Some(reply), .. }) = rx.recv().await {
                let _ = reply.send(Err(StartError::Guidance(GuidanceError::UnknownDestination(
                    "moon".into(),
                ))));
            }
        });

        let reply = execute(ControlRequest::Start("moon".into()), &tx).await;
        assert!(reply.starts_with("ERR "));
        assert!(reply.contains("moon"));
    }

    #[tokio::test]
    async fn test_execute_without_navigator() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        assert_eq!(execute(ControlRequest::Stop, &tx).await, "ERR navigator unavailable");
    }
}
