//! Prompt catalogue for the emergency intake conversation.
//!
//! Pure builders; nothing here talks to a channel. Wording and the raw
//! selection vocabularies (button/row ids) are part of the external
//! contract with the client UI and must stay stable.

use crate::directory::MemberRecord;
use crate::outbound::{Button, ButtonPrompt, ListPrompt, ListRow, ListSection};

/// Raw selection ids for the consciousness step.
pub const CONSCIOUS_YES: &str = "conscious_yes";
pub const CONSCIOUS_NO: &str = "conscious_no";
pub const CONSCIOUS_UNSURE: &str = "conscious_unsure";

/// Raw selection ids for the breathing step.
pub const BREATHING_YES: &str = "breathing_yes";
pub const BREATHING_STRUGGLING: &str = "breathing_struggling";
pub const BREATHING_NO: &str = "breathing_no";

/// Raw selection ids for the scene step.
pub const SCENE_SKIP: &str = "scene_skip";
pub const SCENE_DESCRIBE: &str = "scene_describe";

/// Header text sent once at flow start, carrying the medical snapshot.
pub fn emergency_header(member: &MemberRecord) -> String {
    format!(
        "*EMERGENCY ACTIVATED*\n\n*Member:* {}\n*ID:* {}\n\n*Blood Type:* {}\n*Allergies:* {}\n*Conditions:* {}\n\nPlease answer the following questions to help us dispatch emergency services.",
        member.name,
        member.member_ref,
        member.blood_type.as_deref().unwrap_or("Unknown"),
        member.allergies_text("None known"),
        member.conditions_text("None known"),
    )
}

/// Emergency type selection list.
pub fn emergency_type_list() -> ListPrompt {
    ListPrompt {
        header: Some("What happened?".into()),
        body: "What type of emergency is this?".into(),
        button_label: "Select Emergency".into(),
        sections: vec![ListSection {
            title: "Emergency Type".into(),
            rows: vec![
                ListRow::new("road_accident", "Road Accident", "Vehicle collision or road incident"),
                ListRow::new("collapse", "Person Collapsed", "Sudden loss of consciousness"),
                ListRow::new("heart_attack", "Chest Pain", "Heart attack or cardiac emergency"),
                ListRow::new("breathing", "Breathing Difficulty", "Respiratory distress"),
                ListRow::new("injury", "Serious Injury", "Severe bleeding or trauma"),
                ListRow::new("seizure", "Seizure", "Convulsion or epileptic episode"),
                ListRow::new("burn", "Burn", "Fire or chemical burn"),
                ListRow::new("other", "Other Emergency", "Other medical emergency"),
            ],
        }],
    }
}

/// Consciousness check buttons.
pub fn conscious_buttons() -> ButtonPrompt {
    ButtonPrompt {
        header: Some("Consciousness Check".into()),
        body: "Is the person conscious and responsive?".into(),
        buttons: vec![
            Button::new(CONSCIOUS_YES, "Yes - Responsive"),
            Button::new(CONSCIOUS_NO, "No - Unconscious"),
            Button::new(CONSCIOUS_UNSURE, "Not Sure"),
        ],
    }
}

/// Breathing check buttons.
pub fn breathing_buttons() -> ButtonPrompt {
    ButtonPrompt {
        header: Some("Breathing Check".into()),
        body: "Is the person breathing?".into(),
        buttons: vec![
            Button::new(BREATHING_YES, "Yes - Normal"),
            Button::new(BREATHING_STRUGGLING, "Yes - Struggling"),
            Button::new(BREATHING_NO, "No"),
        ],
    }
}

/// Victim count selection list.
pub fn victim_count_list() -> ListPrompt {
    ListPrompt {
        header: Some("Victim Count".into()),
        body: "How many people need emergency help?".into(),
        button_label: "Select Count".into(),
        sections: vec![ListSection {
            title: "Number of Victims".into(),
            rows: vec![
                ListRow::new("victims_1", "1 person", "Single victim"),
                ListRow::new("victims_2", "2 people", "Two victims"),
                ListRow::new("victims_3", "3 people", "Three victims"),
                ListRow::new("victims_4plus", "4 or more", "Multiple casualties"),
            ],
        }],
    }
}

/// Optional scene description skip/describe buttons.
pub fn scene_buttons() -> ButtonPrompt {
    ButtonPrompt {
        header: Some("Scene Details (Optional)".into()),
        body: "Would you like to add any details about the scene that could help responders?\n\n(e.g., exact location landmarks, hazards, number of vehicles involved)".into(),
        buttons: vec![
            Button::new(SCENE_SKIP, "Skip"),
            Button::new(SCENE_DESCRIBE, "Add Details"),
        ],
    }
}

/// Free-text follow-up once the bystander chose to describe the scene.
pub fn scene_text_request() -> String {
    "Please describe the scene in a few words:".to_string()
}

/// Location request body for the terminal step.
pub fn location_request() -> String {
    "*IMPORTANT: Share your location now*\n\nTap the button below to share your current GPS location so we can dispatch the nearest ambulance immediately.\n\nThis is required to send help to you."
        .to_string()
}

/// Confirmation sent after the incident record is created.
pub fn emergency_confirmed(
    incident_number: &str,
    member_name: &str,
    tracking_base_url: &str,
) -> String {
    format!(
        "*EMERGENCY REGISTERED*\n\n*Incident #:* {incident_number}\n*Patient:* {member_name}\n\n*Status:* Dispatching nearest ambulance\n\nWe are processing your emergency request. An ambulance will be dispatched to your location shortly.\n\n*Next Steps:*\n1. Stay on the line\n2. Keep the patient calm\n3. Do not move the patient unless in danger\n4. Wait for ambulance crew instructions\n\n*Track live:* {tracking_base_url}/{incident_number}"
    )
}

/// Alert sent to the member's next of kin.
pub fn next_of_kin_alert(
    member_name: &str,
    incident_number: &str,
    location_description: Option<&str>,
    tracking_base_url: &str,
) -> String {
    let location_line = location_description
        .map(|loc| format!("\n*Location:* {loc}"))
        .unwrap_or_default();
    format!(
        "*EMERGENCY ALERT*\n\n{member_name} has had a medical emergency and an ambulance has been dispatched.\n{location_line}\n\n*Track live:* {tracking_base_url}/{incident_number}\n\nWe will keep you updated on the status."
    )
}

/// Sent when the scanned reference matches no member.
pub fn member_not_found(member_ref: &str, fallback_contact: &str) -> String {
    format!(
        "*MEMBER NOT FOUND*\n\nID: {member_ref}\n\nPlease verify the card and try again, or call emergency services directly:\n\n*Emergency line:* {fallback_contact}"
    )
}

/// Warning sent when the member has no active coverage tier. The flow still
/// proceeds; service is not gated on payment status.
pub fn coverage_expired(member_name: &str) -> String {
    format!(
        "*COVERAGE EXPIRED*\n\n*Member:* {member_name}\n\nEmergency services will still be dispatched, but coverage may not apply."
    )
}

/// Sent when incident creation fails; the session stays open for a retry.
pub fn dispatch_failed(fallback_contact: &str) -> String {
    format!(
        "We could not register the emergency automatically. Please resend your location to retry, or call emergency services directly:\n\n*Emergency line:* {fallback_contact}"
    )
}

/// Canned help response for messages outside any flow.
pub fn help_text(service_name: &str) -> String {
    format!(
        "*{service_name}*\n\nTo activate emergency services, tap the NFC card or scan the QR code on a member's card."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_list_carries_fixed_vocabulary() {
        let list = emergency_type_list();
        let ids: Vec<&str> = list.sections[0]
            .rows
            .iter()
            .map(|r| r.id.as_str())
            .collect();
        assert_eq!(
            ids,
            [
                "road_accident",
                "collapse",
                "heart_attack",
                "breathing",
                "injury",
                "seizure",
                "burn",
                "other"
            ]
        );
    }

    #[test]
    fn button_prompts_stay_within_three_buttons() {
        assert!(conscious_buttons().buttons.len() <= 3);
        assert!(breathing_buttons().buttons.len() <= 3);
        assert!(scene_buttons().buttons.len() <= 3);
    }

    #[test]
    fn header_defaults_missing_medical_fields() {
        let member = MemberRecord {
            id: "m-1".into(),
            member_ref: "LT-1".into(),
            name: "Mary Ncube".into(),
            blood_type: None,
            allergies: vec![],
            conditions: vec!["Asthma".into()],
            active_tier: None,
        };
        let header = emergency_header(&member);
        assert!(header.contains("*Blood Type:* Unknown"));
        assert!(header.contains("*Allergies:* None known"));
        assert!(header.contains("*Conditions:* Asthma"));
    }

    #[test]
    fn nok_alert_omits_location_line_when_unknown() {
        let with = next_of_kin_alert("John", "INC-1", Some("5th Ave"), "https://x/t");
        let without = next_of_kin_alert("John", "INC-1", None, "https://x/t");
        assert!(with.contains("*Location:* 5th Ave"));
        assert!(!without.contains("*Location:*"));
    }
}
