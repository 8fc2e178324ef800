//! Navigation session orchestration
//!
//! The Navigator is the single owner of all mutable navigation state:
//! - Signal store (latest observation per location)
//! - Guidance state machine (the active session)
//! - Intent classifier (free-text destinations)
//! - Recompute timer (periodic position estimates)
//!
//! Every mutation arrives as a `NavCommand` on one channel, and the recompute
//! tick runs on the same task, so nothing is applied after a stop.

mod handlers;

use crate::domain::topology::Topology;
use crate::domain::types::{epoch_ms, Advertisement};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::EgressSender;
use crate::services::guidance::{GuidanceError, GuidanceOutput, GuidanceStateMachine};
use crate::services::intent::{ClassifierError, ClassifierModel, IntentClassifier, Prediction};
use crate::services::model_loader::ModelLoader;
use crate::services::position::PositionEstimator;
use crate::services::signal_store::SignalStore;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{interval_at, Duration, Interval, MissedTickBehavior};
use tracing::info;

/// Where the user wants to go
#[derive(Debug, Clone, PartialEq)]
pub enum Destination {
    /// Location id from the topology
    Location(String),
    /// Free text resolved by the intent classifier
    Phrase(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct StartAck {
    pub session: String,
    pub target: String,
    pub prediction: Option<Prediction>,
}

#[derive(Debug, Error, PartialEq)]
pub enum StartError {
    #[error(transparent)]
    Guidance(#[from] GuidanceError),
    #[error(transparent)]
    Classifier(#[from] ClassifierError),
    #[error("predicted class '{0}' is not a location")]
    NotALocation(String),
}

pub type StartReply = oneshot::Sender<Result<StartAck, StartError>>;

/// Messages into the navigator task
#[derive(Debug)]
pub enum NavCommand {
    Advertisement(Advertisement),
    /// Compass heading in degrees
    Heading(f64),
    /// Device-orientation alpha angle in degrees
    Alpha(f64),
    Start { destination: Destination, reply: Option<StartReply> },
    Stop,
    InstallModel(ClassifierModel),
    ReloadModel,
}

/// Periodic recompute trigger. Disarmed, `tick` never completes.
pub(crate) struct RecomputeTimer {
    period: Duration,
    armed: bool,
    interval: Option<Interval>,
}

impl RecomputeTimer {
    pub(crate) fn new(period: Duration) -> Self {
        Self { period, armed: false, interval: None }
    }

    pub(crate) fn arm(&mut self) {
        self.armed = true;
        self.interval = None;
    }

    pub(crate) fn disarm(&mut self) {
        self.armed = false;
        self.interval = None;
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.armed
    }

    pub(crate) async fn tick(&mut self) {
        if !self.armed {
            return std::future::pending().await;
        }
        let period = self.period;
        let interval = self.interval.get_or_insert_with(|| {
            // first tick one period after arming, not immediately
            let mut interval = interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval
        });
        interval.tick().await;
    }
}

/// Owning task for the navigation pipeline
pub struct Navigator {
    pub(crate) topology: Arc<Topology>,
    pub(crate) store: SignalStore,
    pub(crate) estimator: PositionEstimator,
    pub(crate) guidance: GuidanceStateMachine,
    pub(crate) classifier: IntentClassifier,
    /// Latest compass heading, kept across sessions
    pub(crate) heading: Option<f64>,
    /// Last guidance pushed out, for change detection
    pub(crate) last_output: Option<GuidanceOutput>,
    pub(crate) timer: RecomputeTimer,
    pub(crate) metrics: Arc<Metrics>,
    pub(crate) egress_sender: Option<EgressSender>,
    pub(crate) loader: Option<ModelLoader>,
}

impl Navigator {
    pub fn new(
        config: &Config,
        topology: Arc<Topology>,
        metrics: Arc<Metrics>,
        egress_sender: Option<EgressSender>,
    ) -> Self {
        Self {
            store: SignalStore::with_staleness(topology.clone(), config.staleness_ms()),
            estimator: PositionEstimator::new(topology.clone(), config.min_node_rssi()),
            guidance: GuidanceStateMachine::new(topology.clone(), config.guidance_config()),
            classifier: IntentClassifier::new(),
            heading: None,
            last_output: None,
            timer: RecomputeTimer::new(Duration::from_millis(config.tick_ms().max(1))),
            topology,
            metrics,
            egress_sender,
            loader: None,
        }
    }

    /// Attach the loader used by `NavCommand::ReloadModel`
    pub fn with_loader(mut self, loader: ModelLoader) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Consume commands until the channel closes or shutdown is signalled
    pub async fn run(
        &mut self,
        mut cmd_rx: mpsc::Receiver<NavCommand>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(
            locations = %self.topology.locations().len(),
            beacons = %self.topology.beacon_count(),
            coordinates = %self.topology.has_coordinates(),
            "navigator_started"
        );

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => self.process_command(cmd),
                        None => break,
                    }
                }
                _ = self.timer.tick() => {
                    self.recompute(epoch_ms());
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.stop_session();
        info!("navigator_stopped");
    }

    /// Process a single command, recording latency
    pub fn process_command(&mut self, cmd: NavCommand) {
        let started = Instant::now();
        self.apply(cmd, epoch_ms());
        self.metrics.record_command_processed(started.elapsed().as_micros() as u64);
    }

    /// Latest guidance, as last pushed to egress
    pub fn output(&self) -> Option<&GuidanceOutput> {
        self.last_output.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.guidance.is_active()
    }

    pub fn classifier_ready(&self) -> bool {
        self.classifier.is_ready()
    }
}
