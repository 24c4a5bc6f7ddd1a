//! Incident assembly — maps completed intake data into the canonical
//! incident submission and notifies the next of kin.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::IntakeConfig;
use crate::directory::Directory;
use crate::error::IncidentError;
use crate::outbound::OutboundChannel;
use crate::prompts;
use crate::session::{Session, keys};

/// Which intake surface produced the activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationChannel {
    /// Multi-turn conversational intake.
    Chat,
    /// One-shot encrypted form submission.
    FlowForm,
}

impl std::fmt::Display for ActivationChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Chat => write!(f, "chat"),
            Self::FlowForm => write!(f, "flow_form"),
        }
    }
}

/// Canonical incident submission shape. Created once at the terminal intake
/// step; downstream status changes belong to the dispatch workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentDraft {
    pub incident_number: String,
    pub member_id: Option<String>,
    pub member_name: Option<String>,
    pub tier: Option<String>,
    pub emergency_type: Option<String>,
    pub patient_conscious: Option<bool>,
    pub patient_breathing: Option<bool>,
    pub victim_count: u32,
    pub scene_description: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub address: Option<String>,
    pub activated_by: String,
    pub activation_channel: ActivationChannel,
    pub status: String,
    pub activated_at: DateTime<Utc>,
}

/// The stored incident as acknowledged by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentRecord {
    pub id: Uuid,
    pub incident_number: String,
}

/// Incident persistence boundary.
#[async_trait]
pub trait IncidentStore: Send + Sync {
    /// Persist a new incident. Not retried here on failure.
    async fn create_incident(&self, draft: &IncidentDraft) -> Result<IncidentRecord, IncidentError>;
}

/// In-memory incident store for tests and for running without the external
/// database service.
#[derive(Default)]
pub struct MemoryIncidentStore {
    created: tokio::sync::Mutex<Vec<IncidentDraft>>,
}

impl MemoryIncidentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything created so far.
    pub async fn created(&self) -> Vec<IncidentDraft> {
        self.created.lock().await.clone()
    }
}

#[async_trait]
impl IncidentStore for MemoryIncidentStore {
    async fn create_incident(&self, draft: &IncidentDraft) -> Result<IncidentRecord, IncidentError> {
        let record = IncidentRecord {
            id: Uuid::new_v4(),
            incident_number: draft.incident_number.clone(),
        };
        self.created.lock().await.push(draft.clone());
        Ok(record)
    }
}

// ── Canonical value mapping ─────────────────────────────────────────

/// Tri-state mapping: `"yes"` → true, `"no"` → false, anything else
/// (including `"unsure"`, `"struggling"`, or absent) → unknown.
pub fn map_tri_state(raw: Option<&str>) -> Option<bool> {
    match raw {
        Some("yes") => Some(true),
        Some("no") => Some(false),
        _ => None,
    }
}

/// Victim count policy: the canonical `"4+"` token means four-or-more and
/// maps to 4; a pure digit token parses to its integer; anything else
/// (including unmapped raw selection ids) defaults to 1.
pub fn map_victim_count(raw: Option<&str>) -> u32 {
    match raw {
        Some("4+") => 4,
        Some(token) if !token.is_empty() && token.bytes().all(|b| b.is_ascii_digit()) => {
            token.parse().unwrap_or(1)
        }
        _ => 1,
    }
}

/// Generate a human-traceable incident number: timestamp plus a short
/// random suffix against same-second collisions.
pub fn generate_incident_number(now: DateTime<Utc>) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(rand::distributions::Alphanumeric)
        .take(4)
        .map(|b| (b as char).to_ascii_uppercase())
        .collect();
    format!("INC-{}-{}", now.format("%Y%m%d%H%M%S"), suffix)
}

// ── Assembler ───────────────────────────────────────────────────────

/// Builds incident drafts, writes them through the store, and fires the
/// next-of-kin notification.
pub struct IncidentAssembler {
    store: Arc<dyn IncidentStore>,
    directory: Arc<dyn Directory>,
    outbound: Arc<dyn OutboundChannel>,
    config: IntakeConfig,
}

impl IncidentAssembler {
    pub fn new(
        store: Arc<dyn IncidentStore>,
        directory: Arc<dyn Directory>,
        outbound: Arc<dyn OutboundChannel>,
        config: IntakeConfig,
    ) -> Self {
        Self {
            store,
            directory,
            outbound,
            config,
        }
    }

    /// Project a completed session into the canonical submission shape.
    pub fn draft_from_session(session: &Session, channel: ActivationChannel) -> IncidentDraft {
        let now = Utc::now();
        IncidentDraft {
            incident_number: generate_incident_number(now),
            member_id: session.member.as_ref().map(|m| m.id.clone()),
            member_name: session.member.as_ref().map(|m| m.name.clone()),
            tier: session.member.as_ref().and_then(|m| m.active_tier.clone()),
            emergency_type: session.get_str(keys::EMERGENCY_TYPE).map(str::to_string),
            patient_conscious: map_tri_state(session.get_str(keys::CONSCIOUS)),
            patient_breathing: map_tri_state(session.get_str(keys::BREATHING)),
            victim_count: map_victim_count(session.get_str(keys::VICTIM_COUNT)),
            scene_description: session.get_str(keys::SCENE_DESCRIPTION).map(str::to_string),
            latitude: session.get_f64(keys::LATITUDE),
            longitude: session.get_f64(keys::LONGITUDE),
            address: session.get_str(keys::ADDRESS).map(str::to_string),
            activated_by: session.user_id.clone(),
            activation_channel: channel,
            status: "activated".to_string(),
            activated_at: now,
        }
    }

    /// Write the incident and fire the next-of-kin alert.
    ///
    /// The store write is the primary path; notification failures (or a
    /// missing contact) are logged and never surfaced as an error.
    pub async fn submit_and_notify(
        &self,
        draft: IncidentDraft,
    ) -> Result<IncidentRecord, IncidentError> {
        let record = self.store.create_incident(&draft).await?;
        info!(
            incident_number = %record.incident_number,
            member_id = draft.member_id.as_deref().unwrap_or("unknown"),
            emergency_type = draft.emergency_type.as_deref().unwrap_or("unknown"),
            victim_count = draft.victim_count,
            channel = %draft.activation_channel,
            "Incident created"
        );
        self.notify_next_of_kin(&draft).await;
        Ok(record)
    }

    async fn notify_next_of_kin(&self, draft: &IncidentDraft) {
        let Some(member_id) = draft.member_id.as_deref() else {
            info!("No member linkage on incident; skipping next-of-kin alert");
            return;
        };

        let contact = match self.directory.primary_next_of_kin(member_id).await {
            Ok(Some(contact)) => contact,
            Ok(None) => {
                info!(member_id, "No primary next of kin on record; skipping alert");
                return;
            }
            Err(e) => {
                error!(member_id, error = %e, "Next-of-kin lookup failed");
                return;
            }
        };

        let alert = prompts::next_of_kin_alert(
            draft.member_name.as_deref().unwrap_or("A member"),
            &draft.incident_number,
            draft.address.as_deref(),
            &self.config.tracking_base_url,
        );
        if let Err(e) = self.outbound.send_text(&contact.phone, &alert).await {
            warn!(
                incident_number = %draft.incident_number,
                nok_phone = %contact.phone,
                error = %e,
                "Next-of-kin alert failed"
            );
        } else {
            info!(
                incident_number = %draft.incident_number,
                nok_name = %contact.name,
                "Next-of-kin alerted"
            );
        }
    }
}
