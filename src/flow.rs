//! Encrypted one-shot form routing.
//!
//! The form client speaks a small action protocol over the encrypted
//! channel: `ping` health checks, `INIT` when the form opens (we populate
//! the medical snapshot), `data_exchange` when the completed assessment is
//! submitted, and `BACK`. The form has a single screen; submission creates
//! the incident immediately, and the location arrives later over the
//! conversational channel.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{error, info, warn};

use crate::config::IntakeConfig;
use crate::directory::{Directory, MemberRecord};
use crate::error::{FlowError, Result};
use crate::incident::{
    ActivationChannel, IncidentAssembler, IncidentDraft, generate_incident_number,
    map_tri_state, map_victim_count,
};

/// The single assessment screen.
pub const EMERGENCY_SCREEN: &str = "EMERGENCY_SCREEN";
/// Terminal screen closing the form.
pub const SUCCESS_SCREEN: &str = "SUCCESS";

/// Form client actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum FlowAction {
    #[serde(rename = "ping")]
    Ping,
    #[serde(rename = "INIT")]
    Init,
    #[serde(rename = "data_exchange")]
    DataExchange,
    #[serde(rename = "BACK")]
    Back,
    #[serde(other)]
    Unknown,
}

/// Decrypted form request envelope.
#[derive(Debug, Deserialize)]
pub struct FlowRequest {
    #[serde(default)]
    pub version: Option<String>,
    pub action: FlowAction,
    #[serde(default)]
    pub screen: Option<String>,
    /// Opaque token minted at send time; carries the scanned member
    /// reference (`MARKER:<ref>` or the bare reference).
    #[serde(default)]
    pub flow_token: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
}

/// Routes decrypted form requests to their handlers.
pub struct FlowRouter {
    directory: Arc<dyn Directory>,
    assembler: Arc<IncidentAssembler>,
    config: IntakeConfig,
}

impl FlowRouter {
    pub fn new(
        directory: Arc<dyn Directory>,
        assembler: Arc<IncidentAssembler>,
        config: IntakeConfig,
    ) -> Self {
        Self {
            directory,
            assembler,
            config,
        }
    }

    /// Handle one decrypted request, producing the plaintext response to
    /// seal. Only a malformed envelope is an error; handler-level problems
    /// surface as in-protocol error screens.
    pub async fn route(&self, payload: Value) -> Result<Value> {
        let request: FlowRequest = serde_json::from_value(payload)
            .map_err(|e| FlowError::Payload(e.to_string()))?;

        match request.action {
            FlowAction::Ping => Ok(json!({
                "version": request.version,
                "data": { "status": "active" }
            })),
            FlowAction::Init => Ok(self.init(&request).await),
            FlowAction::DataExchange => Ok(self.data_exchange(&request).await),
            FlowAction::Back => Ok(json!({
                "version": request.version,
                "screen": EMERGENCY_SCREEN,
                "data": {}
            })),
            FlowAction::Unknown => Ok(json!({
                "version": request.version,
                "screen": "ERROR",
                "data": { "error_message": "Unknown action" }
            })),
        }
    }

    /// Form open: resolve the scanned member and populate the medical
    /// snapshot. Every field is always present; a failed or missing lookup
    /// falls back to placeholders so the form still renders.
    async fn init(&self, request: &FlowRequest) -> Value {
        let member = match self.member_from_token(request.flow_token.as_deref()).await {
            Some(member) => member,
            None => {
                warn!(
                    flow_token = request.flow_token.as_deref().unwrap_or(""),
                    "Form opened without a resolvable member"
                );
                return json!({
                    "version": request.version.as_deref(),
                    "screen": EMERGENCY_SCREEN,
                    "data": {
                        "member_name": "Unknown",
                        "member_id": "N/A",
                        "blood_type": "Unknown",
                        "allergies": "Unknown",
                        "conditions": "Unknown"
                    }
                });
            }
        };

        let allergies = member.allergies_text("None known");
        let conditions = member.conditions_text("None known");
        json!({
            "version": request.version.as_deref(),
            "screen": EMERGENCY_SCREEN,
            "data": {
                "member_name": member.name,
                "member_id": member.member_ref,
                "blood_type": member.blood_type.as_deref().unwrap_or("Unknown"),
                "allergies": allergies,
                "conditions": conditions
            }
        })
    }

    /// Assessment submission: build and store the incident in one shot,
    /// then close the form. The GPS location is collected afterwards over
    /// the conversational channel.
    async fn data_exchange(&self, request: &FlowRequest) -> Value {
        if request.screen.as_deref() != Some(EMERGENCY_SCREEN) {
            return json!({
                "version": request.version.as_deref(),
                "screen": request.screen.as_deref(),
                "data": {}
            });
        }

        let data = request.data.as_ref().cloned().unwrap_or_else(|| json!({}));
        let member_ref = data
            .get("member_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| self.member_ref_from_token(request.flow_token.as_deref()));

        let member = match &member_ref {
            Some(member_ref) => self.lookup(member_ref).await,
            None => None,
        };

        let scene = data
            .get("scene_description")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        let now = Utc::now();
        let draft = IncidentDraft {
            incident_number: generate_incident_number(now),
            member_id: member.as_ref().map(|m| m.id.clone()),
            member_name: member.as_ref().map(|m| m.name.clone()),
            tier: member.as_ref().and_then(|m| m.active_tier.clone()),
            emergency_type: data
                .get("emergency_type")
                .and_then(Value::as_str)
                .map(str::to_string),
            patient_conscious: map_tri_state(data.get("conscious").and_then(Value::as_str)),
            patient_breathing: map_tri_state(data.get("breathing").and_then(Value::as_str)),
            victim_count: map_victim_count(data.get("victim_count").and_then(Value::as_str)),
            scene_description: scene,
            latitude: None,
            longitude: None,
            address: None,
            activated_by: request
                .flow_token
                .clone()
                .unwrap_or_else(|| "flow_form".to_string()),
            activation_channel: ActivationChannel::FlowForm,
            status: "activated".to_string(),
            activated_at: now,
        };

        match self.assembler.submit_and_notify(draft).await {
            Ok(record) => {
                info!(
                    incident_number = %record.incident_number,
                    "Form submission registered"
                );
                json!({
                    "version": request.version.as_deref(),
                    "screen": SUCCESS_SCREEN,
                    "data": {
                        "extension_message_response": {
                            "params": {
                                "flow_token": request.flow_token.as_deref(),
                                "incident_id": record.incident_number
                            }
                        }
                    }
                })
            }
            Err(e) => {
                error!(error = %e, "Form submission could not be registered");
                json!({
                    "version": request.version.as_deref(),
                    "screen": "ERROR",
                    "data": {
                        "error_message": format!(
                            "Unable to register the emergency. Call {} directly.",
                            self.config.fallback_contact
                        )
                    }
                })
            }
        }
    }

    /// The token carries either `MARKER:<ref>` or the bare reference.
    fn member_ref_from_token(&self, flow_token: Option<&str>) -> Option<String> {
        let token = flow_token?.trim();
        if let Some((_, suffix)) = token.split_once(':') {
            return Some(suffix.trim().to_uppercase());
        }
        let prefix = self.config.member_ref_prefix.to_uppercase();
        if token.to_uppercase().starts_with(&prefix) {
            return Some(token.to_uppercase());
        }
        None
    }

    async fn member_from_token(&self, flow_token: Option<&str>) -> Option<MemberRecord> {
        let member_ref = self.member_ref_from_token(flow_token)?;
        self.lookup(&member_ref).await
    }

    async fn lookup(&self, member_ref: &str) -> Option<MemberRecord> {
        match self.directory.find_member(member_ref).await {
            Ok(found) => found,
            Err(e) => {
                error!(member_ref, error = %e, "Member lookup failed during form handling");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::result::Result;

    use async_trait::async_trait;

    use crate::directory::{NextOfKin, StaticDirectory};
    use crate::error::ChannelError;
    use crate::incident::MemoryIncidentStore;
    use crate::outbound::{ButtonPrompt, ListPrompt, OutboundChannel};

    struct NullChannel;

    #[async_trait]
    impl OutboundChannel for NullChannel {
        async fn send_text(&self, _: &str, _: &str) -> Result<(), ChannelError> {
            Ok(())
        }
        async fn send_buttons(&self, _: &str, _: &ButtonPrompt) -> Result<(), ChannelError> {
            Ok(())
        }
        async fn send_list(&self, _: &str, _: &ListPrompt) -> Result<(), ChannelError> {
            Ok(())
        }
        async fn request_location(&self, _: &str, _: &str) -> Result<(), ChannelError> {
            Ok(())
        }
    }

    fn member() -> MemberRecord {
        MemberRecord {
            id: "m-1".into(),
            member_ref: "LT-2025-A7X9K3".into(),
            name: "John Moyo".into(),
            blood_type: Some("O+".into()),
            allergies: vec!["Penicillin".into()],
            conditions: vec!["Diabetic".into()],
            active_tier: Some("Gold".into()),
        }
    }

    fn router() -> (FlowRouter, Arc<MemoryIncidentStore>) {
        let store = Arc::new(MemoryIncidentStore::new());
        let directory = Arc::new(StaticDirectory::new(vec![member()]).with_next_of_kin(
            "m-1",
            NextOfKin {
                name: "Grace".into(),
                phone: "263779999999".into(),
            },
        ));
        let config = IntakeConfig::default();
        let assembler = Arc::new(IncidentAssembler::new(
            store.clone(),
            directory.clone(),
            Arc::new(NullChannel),
            config.clone(),
        ));
        (FlowRouter::new(directory, assembler, config), store)
    }

    #[tokio::test]
    async fn ping_reports_active() {
        let (router, _) = router();
        let response = router
            .route(json!({ "action": "ping", "version": "3.0" }))
            .await
            .unwrap();
        assert_eq!(response["version"], "3.0");
        assert_eq!(response["data"]["status"], "active");
    }

    #[tokio::test]
    async fn init_populates_medical_snapshot() {
        let (router, _) = router();
        let response = router
            .route(json!({
                "action": "INIT",
                "version": "3.0",
                "flow_token": "EMERGENCY:LT-2025-A7X9K3"
            }))
            .await
            .unwrap();

        assert_eq!(response["screen"], EMERGENCY_SCREEN);
        assert_eq!(response["data"]["member_name"], "John Moyo");
        assert_eq!(response["data"]["member_id"], "LT-2025-A7X9K3");
        assert_eq!(response["data"]["blood_type"], "O+");
        assert_eq!(response["data"]["allergies"], "Penicillin");
        assert_eq!(response["data"]["conditions"], "Diabetic");
    }

    #[tokio::test]
    async fn init_with_unresolvable_token_still_renders() {
        let (router, _) = router();
        let response = router
            .route(json!({ "action": "INIT", "version": "3.0", "flow_token": "garbage" }))
            .await
            .unwrap();

        assert_eq!(response["screen"], EMERGENCY_SCREEN);
        assert_eq!(response["data"]["member_name"], "Unknown");
        assert_eq!(response["data"]["member_id"], "N/A");
        // Every field is present even without a member
        for field in ["blood_type", "allergies", "conditions"] {
            assert!(response["data"][field].is_string(), "missing {field}");
        }
    }

    #[tokio::test]
    async fn bare_reference_token_resolves() {
        let (router, _) = router();
        let response = router
            .route(json!({ "action": "INIT", "flow_token": "lt-2025-a7x9k3" }))
            .await
            .unwrap();
        assert_eq!(response["data"]["member_name"], "John Moyo");
    }

    #[tokio::test]
    async fn submission_creates_incident_and_closes_the_form() {
        let (router, store) = router();
        let response = router
            .route(json!({
                "action": "data_exchange",
                "version": "3.0",
                "screen": EMERGENCY_SCREEN,
                "flow_token": "EMERGENCY:LT-2025-A7X9K3",
                "data": {
                    "member_id": "LT-2025-A7X9K3",
                    "emergency_type": "road_accident",
                    "conscious": "no",
                    "breathing": "struggling",
                    "victim_count": "4+",
                    "scene_description": "  "
                }
            }))
            .await
            .unwrap();

        assert_eq!(response["screen"], SUCCESS_SCREEN);
        let incident_number = response["data"]["extension_message_response"]["params"]
            ["incident_id"]
            .as_str()
            .unwrap();
        assert!(incident_number.starts_with("INC-"));

        let created = store.created().await;
        assert_eq!(created.len(), 1);
        let draft = &created[0];
        assert_eq!(draft.member_id.as_deref(), Some("m-1"));
        assert_eq!(draft.emergency_type.as_deref(), Some("road_accident"));
        assert_eq!(draft.patient_conscious, Some(false));
        assert_eq!(draft.patient_breathing, None);
        assert_eq!(draft.victim_count, 4);
        // Whitespace-only description collapses to absent
        assert_eq!(draft.scene_description, None);
        assert_eq!(draft.activation_channel, ActivationChannel::FlowForm);
        assert_eq!(draft.latitude, None);
    }

    #[tokio::test]
    async fn submission_from_other_screen_echoes() {
        let (router, store) = router();
        let response = router
            .route(json!({
                "action": "data_exchange",
                "version": "3.0",
                "screen": "OTHER",
                "data": {}
            }))
            .await
            .unwrap();
        assert_eq!(response["screen"], "OTHER");
        assert!(store.created().await.is_empty());
    }

    #[tokio::test]
    async fn back_returns_the_assessment_screen() {
        let (router, _) = router();
        let response = router
            .route(json!({ "action": "BACK", "version": "3.0", "screen": EMERGENCY_SCREEN }))
            .await
            .unwrap();
        assert_eq!(response["screen"], EMERGENCY_SCREEN);
    }

    #[tokio::test]
    async fn unknown_action_yields_error_screen() {
        let (router, _) = router();
        let response = router
            .route(json!({ "action": "something_new", "version": "3.0" }))
            .await
            .unwrap();
        assert_eq!(response["screen"], "ERROR");
    }

    #[tokio::test]
    async fn envelope_without_action_is_a_payload_error() {
        let (router, _) = router();
        assert!(router.route(json!({ "version": "3.0" })).await.is_err());
    }
}
