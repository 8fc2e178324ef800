//! Command handlers for the Navigator
//!
//! Each handler applies one command at a caller-supplied `now` (epoch ms),
//! so the whole pipeline can be driven deterministically in tests.

use super::{Destination, NavCommand, Navigator, StartAck, StartError, StartReply};
use crate::domain::types::{epoch_ms, heading_from_alpha, Advertisement};
use crate::io::{PositionPayload, SessionEventPayload};
use crate::services::guidance::{GuidanceError, Transition};
use crate::services::intent::ClassifierError;
use crate::services::position::Estimate;
use tracing::{debug, info, warn};

impl Navigator {
    pub fn apply(&mut self, cmd: NavCommand, now: u64) {
        match cmd {
            NavCommand::Advertisement(advert) => self.handle_advertisement(&advert, now),
            NavCommand::Heading(degrees) => self.handle_heading(degrees),
            NavCommand::Alpha(alpha) => self.handle_heading(heading_from_alpha(alpha)),
            NavCommand::Start { destination, reply } => self.handle_start(destination, reply, now),
            NavCommand::Stop => self.stop_session(),
            NavCommand::InstallModel(model) => {
                info!(
                    classes = %model.classes().len(),
                    vocabulary = %model.vocabulary_len(),
                    "classifier_ready"
                );
                self.classifier.install(model);
                self.metrics.record_model_installed();
            }
            NavCommand::ReloadModel => match self.loader.as_ref() {
                Some(loader) => {
                    info!("classifier_reload_requested");
                    loader.spawn_load();
                }
                None => warn!("classifier_reload_ignored: no model source configured"),
            },
        }
    }

    pub(crate) fn handle_advertisement(&mut self, advert: &Advertisement, now: u64) {
        self.metrics.record_advert_received();

        // detached from the advert stream while idle
        if !self.guidance.is_active() {
            self.metrics.record_advert_detached();
            return;
        }

        let Some(observation) = self.store.ingest(&advert.identity, advert.rssi, advert.timestamp)
        else {
            self.metrics.record_advert_ignored();
            return;
        };

        let transition = self.guidance.on_observation(&observation, now);
        self.note_transition(transition);

        // graph-only maps have no recompute tick; re-estimate on every sighting
        if !self.topology.has_coordinates() && self.guidance.is_active() {
            self.recompute(now);
        } else {
            self.publish_if_changed();
        }
    }

    fn handle_heading(&mut self, degrees: f64) {
        if !degrees.is_finite() {
            debug!(degrees = %degrees, "heading_rejected");
            return;
        }
        self.heading = Some(degrees.rem_euclid(360.0));
        self.publish_if_changed();
    }

    fn handle_start(&mut self, destination: Destination, reply: Option<StartReply>, now: u64) {
        let result = self.start_session(destination, now);
        if let Err(e) = &result {
            warn!(error = %e, "navigation_start_rejected");
        }
        if let Some(reply) = reply {
            let _ = reply.send(result);
        }
    }

    fn start_session(&mut self, destination: Destination, now: u64) -> Result<StartAck, StartError> {
        let (target, prediction, phrase) = match destination {
            Destination::Location(id) => (id, None, None),
            Destination::Phrase(text) => {
                let prediction = match self.classifier.predict(&text) {
                    Ok(p) => p,
                    Err(ClassifierError::NotReady) => {
                        self.metrics.record_prediction_not_ready();
                        return Err(ClassifierError::NotReady.into());
                    }
                };
                self.metrics.record_prediction(prediction.is_unsure());
                if prediction.is_unsure() {
                    warn!(phrase = %text, class = %prediction.class, "prediction_unsure");
                } else {
                    info!(
                        phrase = %text,
                        class = %prediction.class,
                        score = %prediction.score,
                        matched = %prediction.matched_tokens,
                        "destination_predicted"
                    );
                }
                if !self.topology.contains(prediction.class.as_str()) {
                    self.metrics.record_prediction_rejected();
                    return Err(StartError::NotALocation(prediction.class.to_string()));
                }
                (prediction.class.to_string(), Some(prediction), Some(text))
            }
        };

        // validate before tearing down the current session
        if !self.topology.contains(&target) {
            return Err(GuidanceError::UnknownDestination(target).into());
        }
        if self.guidance.is_active() {
            self.stop_session();
        }

        let session = self.guidance.start(&target, now)?;
        let ack = StartAck { session: session.id.clone(), target: target.clone(), prediction };

        self.metrics.record_session_started();
        self.metrics.set_session_state(self.guidance.session().map(|s| s.state));
        if self.topology.has_coordinates() {
            self.timer.arm();
        }
        if let Some(ref sender) = self.egress_sender {
            sender.send_session_event(SessionEventPayload {
                site: None,
                ts: now,
                t: "started".to_string(),
                session: ack.session.clone(),
                target: target.clone(),
                trigger: None,
                phrase,
            });
        }
        self.publish_if_changed();
        Ok(ack)
    }

    /// Tear down the session: disarm the timer, forget every observation.
    /// Idempotent.
    pub(crate) fn stop_session(&mut self) {
        self.timer.disarm();
        self.store.clear();

        let session = self.guidance.session().map(|s| (s.id.clone(), s.target.to_string()));
        if self.guidance.stop() {
            self.metrics.record_session_stopped();
            if let (Some(sender), Some((id, target))) = (self.egress_sender.as_ref(), session) {
                sender.send_session_event(SessionEventPayload {
                    site: None,
                    ts: epoch_ms(),
                    t: "stopped".to_string(),
                    session: id,
                    target,
                    trigger: None,
                    phrase: None,
                });
            }
        }
        self.last_output = None;
        self.metrics.set_session_state(None);
    }

    /// Re-derive the position estimate from the current visibility set
    pub(crate) fn recompute(&mut self, now: u64) {
        if !self.guidance.is_active() {
            return;
        }

        let visible = self.store.snapshot(now);
        self.metrics.record_recompute(visible.len());

        match self.estimator.estimate(&visible) {
            Some(estimate) => {
                let transition = self.guidance.on_position(&estimate);
                self.note_transition(transition);
                self.send_position(&estimate, visible.len(), now);
            }
            None => {
                let already_lost = self.guidance.session().is_some_and(|s| s.signal_lost);
                self.guidance.on_signal_lost();
                if !already_lost {
                    debug!(visible = %visible.len(), "signal_lost");
                    self.metrics.record_signal_lost();
                }
            }
        }

        self.publish_if_changed();
    }

    fn send_position(&self, estimate: &Estimate, visible: usize, now: u64) {
        let (Some(sender), Some(session)) = (self.egress_sender.as_ref(), self.guidance.session())
        else {
            return;
        };
        let (x, y, location) = match estimate {
            Estimate::Continuous { position, .. } => (Some(position.x), Some(position.y), None),
            Estimate::Node { location, .. } => (None, None, Some(location.to_string())),
        };
        sender.send_position(PositionPayload {
            site: None,
            ts: now,
            session: session.id.clone(),
            x,
            y,
            location,
            confidence: estimate.confidence(),
            visible,
        });
    }

    fn note_transition(&mut self, transition: Transition) {
        match transition {
            Transition::None => return,
            Transition::EnRoute => {}
            Transition::HopConfirmed(_) => self.metrics.record_hop_confirmed(),
            Transition::Approaching => self.metrics.record_weak_sighting(),
            Transition::PathUnclear => self.metrics.record_path_unclear(),
            Transition::Arrived(trigger) => {
                self.metrics.record_arrival(trigger);
                // terminal state; nothing left to recompute
                self.timer.disarm();
                if let (Some(sender), Some(session)) =
                    (self.egress_sender.as_ref(), self.guidance.session())
                {
                    sender.send_session_event(SessionEventPayload {
                        site: None,
                        ts: epoch_ms(),
                        t: "arrived".to_string(),
                        session: session.id.clone(),
                        target: session.target.to_string(),
                        trigger: Some(trigger.as_str().to_string()),
                        phrase: None,
                    });
                }
            }
        }
        self.metrics.set_session_state(self.guidance.session().map(|s| s.state));
    }

    /// Push guidance to egress when it differs from what was last sent
    fn publish_if_changed(&mut self) {
        let output = self.guidance.output(self.heading);
        if output == self.last_output {
            return;
        }

        if let Some(ref out) = output {
            debug!(
                instruction = %out.instruction,
                state = %out.state.as_str(),
                rotation = ?out.rotation,
                "guidance_updated"
            );
            if let Some(ref sender) = self.egress_sender {
                if !sender.send_guidance(out.clone()) {
                    self.metrics.record_egress_dropped();
                }
            }
        }
        self.last_output = output;
    }
}
