//! Conversation state machine for the emergency intake flow.
//!
//! Every recognized inbound event gets exactly one reaction: a step
//! advance with the next prompt, a re-prompt of the current step, or an
//! explicit ignore. The machine never drops a turn silently.

use std::sync::Arc;

use regex::Regex;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::config::IntakeConfig;
use crate::dedup::DedupCache;
use crate::directory::Directory;
use crate::error::{ConfigError, Result};
use crate::inbound::{InboundEvent, InboundMessage};
use crate::incident::{ActivationChannel, IncidentAssembler};
use crate::outbound::OutboundChannel;
use crate::prompts;
use crate::session::{ConversationState, Session, SessionStore, keys};

/// What the engine did with an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// At least one outbound message was sent.
    Replied,
    /// Recognized but deliberately not processed (reason is logged).
    Ignored(&'static str),
    /// Redelivery of an already-processed message id; no mutation.
    Duplicate,
}

/// Recognizes the two trigger surface forms: `MARKER:<ref>` and a bare
/// member reference starting with the configured prefix.
pub struct TriggerMatcher {
    marker: Regex,
    bare: Regex,
}

impl TriggerMatcher {
    pub fn new(config: &IntakeConfig) -> std::result::Result<Self, ConfigError> {
        let marker = Regex::new(&format!(
            r"(?i)^{}\s*:\s*(\S+)$",
            regex::escape(&config.trigger_marker)
        ))
        .map_err(|e| ConfigError::InvalidValue {
            key: "trigger_marker".into(),
            message: e.to_string(),
        })?;
        let bare = Regex::new(&format!(
            r"(?i)^{}[A-Z0-9][A-Z0-9-]*$",
            regex::escape(&config.member_ref_prefix)
        ))
        .map_err(|e| ConfigError::InvalidValue {
            key: "member_ref_prefix".into(),
            message: e.to_string(),
        })?;
        Ok(Self { marker, bare })
    }

    /// Extract the member reference from a trigger text, if it is one.
    pub fn extract(&self, text: &str) -> Option<String> {
        let text = text.trim();
        if let Some(captures) = self.marker.captures(text) {
            return Some(captures[1].to_uppercase());
        }
        if self.bare.is_match(text) {
            return Some(text.to_uppercase());
        }
        None
    }
}

/// Per-user session state machine over the conversational channel.
pub struct ConversationEngine {
    sessions: Arc<SessionStore>,
    dedup: Arc<DedupCache>,
    directory: Arc<dyn Directory>,
    outbound: Arc<dyn OutboundChannel>,
    assembler: Arc<IncidentAssembler>,
    trigger: TriggerMatcher,
    config: IntakeConfig,
}

impl ConversationEngine {
    pub fn new(
        sessions: Arc<SessionStore>,
        dedup: Arc<DedupCache>,
        directory: Arc<dyn Directory>,
        outbound: Arc<dyn OutboundChannel>,
        assembler: Arc<IncidentAssembler>,
        config: IntakeConfig,
    ) -> std::result::Result<Self, ConfigError> {
        let trigger = TriggerMatcher::new(&config)?;
        Ok(Self {
            sessions,
            dedup,
            directory,
            outbound,
            assembler,
            trigger,
            config,
        })
    }

    /// Process one normalized inbound message.
    pub async fn handle(&self, message: &InboundMessage) -> Result<Outcome> {
        if !self.dedup.check_and_insert(&message.id).await {
            return Ok(Outcome::Duplicate);
        }

        info!(
            message_id = %message.id,
            sender = %message.sender,
            kind = message.event.kind(),
            "Processing inbound message"
        );

        match &message.event {
            InboundEvent::Text { body } => {
                // A trigger always wins, even mid-flow: hard reset and
                // restart against the (possibly different) member.
                if let Some(member_ref) = self.trigger.extract(body) {
                    let mut session = self.sessions.acquire(&message.sender).await;
                    return self.start_flow(&mut session, &member_ref).await;
                }

                let mut session = self.sessions.acquire(&message.sender).await;
                if session.state.is_in_flow() {
                    self.step(&mut session, &message.event).await
                } else {
                    self.outbound
                        .send_text(
                            &message.sender,
                            &prompts::help_text(&self.config.service_name),
                        )
                        .await?;
                    Ok(Outcome::Replied)
                }
            }
            InboundEvent::ButtonReply { .. }
            | InboundEvent::ListReply { .. }
            | InboundEvent::Location { .. } => {
                let mut session = self.sessions.acquire(&message.sender).await;
                if session.state.is_in_flow() {
                    self.step(&mut session, &message.event).await
                } else {
                    info!(sender = %message.sender, kind = message.event.kind(), "No active flow, ignoring");
                    Ok(Outcome::Ignored("no active flow"))
                }
            }
            InboundEvent::Unsupported { kind } => {
                info!(sender = %message.sender, kind, "Unsupported message type, sending help");
                self.outbound
                    .send_text(
                        &message.sender,
                        &prompts::help_text(&self.config.service_name),
                    )
                    .await?;
                Ok(Outcome::Replied)
            }
        }
    }

    /// Trigger entry: reset the session, look the member up, and either
    /// halt with "not found" or start the question flow.
    async fn start_flow(&self, session: &mut Session, member_ref: &str) -> Result<Outcome> {
        let user_id = session.user_id.clone();
        session.reset();

        let member = match self.directory.find_member(member_ref).await {
            Ok(Some(member)) => member,
            Ok(None) => {
                warn!(member_ref, "Member not found, flow not started");
                self.outbound
                    .send_text(
                        &user_id,
                        &prompts::member_not_found(member_ref, &self.config.fallback_contact),
                    )
                    .await?;
                return Ok(Outcome::Replied);
            }
            Err(e) => {
                error!(member_ref, error = %e, "Member lookup failed, flow not started");
                self.outbound
                    .send_text(
                        &user_id,
                        &prompts::member_not_found(member_ref, &self.config.fallback_contact),
                    )
                    .await?;
                return Ok(Outcome::Replied);
            }
        };

        session.set_state(ConversationState::EmergencyTriggered);

        // Lapsed coverage warns but never gates the emergency flow.
        if member.active_tier.is_none() {
            warn!(member_ref, "Coverage lapsed, proceeding anyway");
            self.outbound
                .send_text(&user_id, &prompts::coverage_expired(&member.name))
                .await?;
        } else if let Some(tier) = &member.active_tier {
            session.set_data(keys::TIER, tier.as_str());
        }

        self.outbound
            .send_text(&user_id, &prompts::emergency_header(&member))
            .await?;
        session.member = Some(member);

        self.outbound
            .send_list(&user_id, &prompts::emergency_type_list())
            .await?;
        session.set_state(ConversationState::EmergencyType);
        Ok(Outcome::Replied)
    }

    /// Advance one step, or re-emit the current prompt when the input
    /// shape does not fit the state.
    async fn step(&self, session: &mut Session, event: &InboundEvent) -> Result<Outcome> {
        let user_id = session.user_id.clone();
        match (session.state, event) {
            (
                ConversationState::EmergencyTriggered | ConversationState::EmergencyType,
                InboundEvent::ListReply { id },
            ) => {
                session.set_data(keys::EMERGENCY_TYPE, id.as_str());
                session.set_state(ConversationState::EmergencyConscious);
                self.outbound
                    .send_buttons(&user_id, &prompts::conscious_buttons())
                    .await?;
                Ok(Outcome::Replied)
            }
            (ConversationState::EmergencyConscious, InboundEvent::ButtonReply { id }) => {
                session.set_data(keys::CONSCIOUS, canonical_conscious(id));
                session.set_state(ConversationState::EmergencyBreathing);
                self.outbound
                    .send_buttons(&user_id, &prompts::breathing_buttons())
                    .await?;
                Ok(Outcome::Replied)
            }
            (ConversationState::EmergencyBreathing, InboundEvent::ButtonReply { id }) => {
                session.set_data(keys::BREATHING, canonical_breathing(id));
                session.set_state(ConversationState::EmergencyVictimCount);
                self.outbound
                    .send_list(&user_id, &prompts::victim_count_list())
                    .await?;
                Ok(Outcome::Replied)
            }
            (ConversationState::EmergencyVictimCount, InboundEvent::ListReply { id }) => {
                session.set_data(keys::VICTIM_COUNT, canonical_victim_count(id));
                session.set_state(ConversationState::EmergencyScene);
                self.outbound
                    .send_buttons(&user_id, &prompts::scene_buttons())
                    .await?;
                Ok(Outcome::Replied)
            }
            (ConversationState::EmergencyScene, InboundEvent::ButtonReply { id })
                if id == prompts::SCENE_SKIP =>
            {
                session.set_data(keys::SCENE_DESCRIPTION, Value::Null);
                session.set_state(ConversationState::EmergencyLocation);
                self.outbound
                    .request_location(&user_id, &prompts::location_request())
                    .await?;
                Ok(Outcome::Replied)
            }
            (ConversationState::EmergencyScene, InboundEvent::ButtonReply { id })
                if id == prompts::SCENE_DESCRIBE =>
            {
                session.set_state(ConversationState::EmergencySceneInput);
                self.outbound
                    .send_text(&user_id, &prompts::scene_text_request())
                    .await?;
                Ok(Outcome::Replied)
            }
            (ConversationState::EmergencySceneInput, InboundEvent::Text { body }) => {
                session.set_data(keys::SCENE_DESCRIPTION, body.as_str());
                session.set_state(ConversationState::EmergencyLocation);
                self.outbound
                    .request_location(&user_id, &prompts::location_request())
                    .await?;
                Ok(Outcome::Replied)
            }
            (
                ConversationState::EmergencyLocation,
                InboundEvent::Location {
                    latitude,
                    longitude,
                    address,
                },
            ) => {
                session.set_data(keys::LATITUDE, *latitude);
                session.set_data(keys::LONGITUDE, *longitude);
                if let Some(address) = address {
                    session.set_data(keys::ADDRESS, address.as_str());
                }
                self.finalize(session).await
            }
            // Wrong input shape for the state: re-emit the current prompt.
            (state, event) => {
                info!(user_id = %user_id, %state, kind = event.kind(), "Unexpected input, re-prompting");
                self.reprompt(&user_id, state).await?;
                Ok(Outcome::Replied)
            }
        }
    }

    /// Terminal step: assemble and submit the incident, confirm to the
    /// bystander, notify the next of kin. On store failure the session is
    /// preserved so a location resend can retry.
    async fn finalize(&self, session: &mut Session) -> Result<Outcome> {
        let user_id = session.user_id.clone();
        let member_name = session
            .member
            .as_ref()
            .map(|m| m.name.clone())
            .unwrap_or_else(|| "Unknown".to_string());

        let draft = IncidentAssembler::draft_from_session(session, ActivationChannel::Chat);
        match self.assembler.submit_and_notify(draft).await {
            Ok(record) => {
                session.set_state(ConversationState::EmergencyConfirmed);
                self.outbound
                    .send_text(
                        &user_id,
                        &prompts::emergency_confirmed(
                            &record.incident_number,
                            &member_name,
                            &self.config.tracking_base_url,
                        ),
                    )
                    .await?;
                session.reset();
                Ok(Outcome::Replied)
            }
            Err(e) => {
                error!(user_id = %user_id, error = %e, "Incident creation failed, keeping session for retry");
                self.outbound
                    .send_text(
                        &user_id,
                        &prompts::dispatch_failed(&self.config.fallback_contact),
                    )
                    .await?;
                Ok(Outcome::Replied)
            }
        }
    }

    /// Re-emit the prompt belonging to the current step.
    async fn reprompt(&self, to: &str, state: ConversationState) -> Result<()> {
        match state {
            ConversationState::EmergencyTriggered | ConversationState::EmergencyType => {
                self.outbound
                    .send_list(to, &prompts::emergency_type_list())
                    .await?
            }
            ConversationState::EmergencyConscious => {
                self.outbound
                    .send_buttons(to, &prompts::conscious_buttons())
                    .await?
            }
            ConversationState::EmergencyBreathing => {
                self.outbound
                    .send_buttons(to, &prompts::breathing_buttons())
                    .await?
            }
            ConversationState::EmergencyVictimCount => {
                self.outbound
                    .send_list(to, &prompts::victim_count_list())
                    .await?
            }
            ConversationState::EmergencyScene => {
                self.outbound.send_buttons(to, &prompts::scene_buttons()).await?
            }
            ConversationState::EmergencySceneInput => {
                self.outbound.send_text(to, &prompts::scene_text_request()).await?
            }
            ConversationState::EmergencyLocation => {
                self.outbound
                    .request_location(to, &prompts::location_request())
                    .await?
            }
            ConversationState::Start
            | ConversationState::EmergencyConfirmed
            | ConversationState::Completed => {
                self.outbound
                    .send_text(to, &prompts::help_text(&self.config.service_name))
                    .await?
            }
        }
        Ok(())
    }
}

// ── Raw selection id → canonical value tables ───────────────────────
//
// Unmapped raw values pass through unchanged: a deliberate tolerance for
// forward-compatible client vocabularies.

fn canonical_conscious(raw: &str) -> &str {
    match raw {
        prompts::CONSCIOUS_YES => "yes",
        prompts::CONSCIOUS_NO => "no",
        prompts::CONSCIOUS_UNSURE => "unsure",
        other => other,
    }
}

fn canonical_breathing(raw: &str) -> &str {
    match raw {
        prompts::BREATHING_YES => "yes",
        prompts::BREATHING_STRUGGLING => "struggling",
        prompts::BREATHING_NO => "no",
        other => other,
    }
}

fn canonical_victim_count(raw: &str) -> &str {
    match raw {
        "victims_1" => "1",
        "victims_2" => "2",
        "victims_3" => "3",
        "victims_4plus" => "4+",
        other => other,
    }
}
