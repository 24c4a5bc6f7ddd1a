//! Member directory — the abstract lookup boundary.
//!
//! The real directory lives in an external database service; this core only
//! sees the trait. `StaticDirectory` provides an in-memory implementation
//! for tests and for running without the external service.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::DirectoryError;

/// Denormalized member snapshot returned by a lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberRecord {
    /// Internal member id (database key, used for incident linkage).
    pub id: String,
    /// Human-facing reference printed on the member's tag, e.g. `LT-2025-A7X9K3`.
    pub member_ref: String,
    /// Full name.
    pub name: String,
    /// Blood type, if on record.
    pub blood_type: Option<String>,
    /// Known allergies.
    #[serde(default)]
    pub allergies: Vec<String>,
    /// Chronic conditions.
    #[serde(default)]
    pub conditions: Vec<String>,
    /// Active coverage tier name; `None` means coverage has lapsed.
    pub active_tier: Option<String>,
}

impl MemberRecord {
    /// Comma-joined allergies, or the given placeholder when empty.
    pub fn allergies_text(&self, placeholder: &str) -> String {
        join_or(&self.allergies, placeholder)
    }

    /// Comma-joined conditions, or the given placeholder when empty.
    pub fn conditions_text(&self, placeholder: &str) -> String {
        join_or(&self.conditions, placeholder)
    }
}

fn join_or(items: &[String], placeholder: &str) -> String {
    if items.is_empty() {
        placeholder.to_string()
    } else {
        items.join(", ")
    }
}

/// A member's designated emergency contact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NextOfKin {
    pub name: String,
    pub phone: String,
}

/// Member lookup boundary.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Look up a member by their tag reference. `Ok(None)` means no match.
    async fn find_member(&self, member_ref: &str)
    -> Result<Option<MemberRecord>, DirectoryError>;

    /// Resolve the member's primary emergency contact, if one exists.
    async fn primary_next_of_kin(
        &self,
        member_id: &str,
    ) -> Result<Option<NextOfKin>, DirectoryError>;
}

/// In-memory directory backed by a fixed member list.
#[derive(Debug, Default)]
pub struct StaticDirectory {
    members: HashMap<String, MemberRecord>,
    next_of_kin: HashMap<String, NextOfKin>,
}

impl StaticDirectory {
    /// Build from a member list. References are matched case-insensitively.
    pub fn new(members: Vec<MemberRecord>) -> Self {
        let members = members
            .into_iter()
            .map(|m| (m.member_ref.to_uppercase(), m))
            .collect();
        Self {
            members,
            next_of_kin: HashMap::new(),
        }
    }

    /// Attach a primary next-of-kin contact for a member id.
    pub fn with_next_of_kin(mut self, member_id: &str, contact: NextOfKin) -> Self {
        self.next_of_kin.insert(member_id.to_string(), contact);
        self
    }

    /// Load a member list from a JSON file (array of `MemberRecord`).
    pub fn from_json_file(path: &std::path::Path) -> Result<Self, DirectoryError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| DirectoryError::Lookup(format!("read {}: {e}", path.display())))?;
        let members: Vec<MemberRecord> = serde_json::from_str(&raw)
            .map_err(|e| DirectoryError::Lookup(format!("parse {}: {e}", path.display())))?;
        Ok(Self::new(members))
    }
}

#[async_trait]
impl Directory for StaticDirectory {
    async fn find_member(
        &self,
        member_ref: &str,
    ) -> Result<Option<MemberRecord>, DirectoryError> {
        Ok(self.members.get(&member_ref.to_uppercase()).cloned())
    }

    async fn primary_next_of_kin(
        &self,
        member_id: &str,
    ) -> Result<Option<NextOfKin>, DirectoryError> {
        Ok(self.next_of_kin.get(member_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member() -> MemberRecord {
        MemberRecord {
            id: "m-1".into(),
            member_ref: "LT-2025-A7X9K3".into(),
            name: "John Moyo".into(),
            blood_type: Some("O+".into()),
            allergies: vec!["Penicillin".into()],
            conditions: vec![],
            active_tier: Some("Gold".into()),
        }
    }

    #[tokio::test]
    async fn lookup_is_case_insensitive() {
        let directory = StaticDirectory::new(vec![member()]);
        let found = directory.find_member("lt-2025-a7x9k3").await.unwrap();
        assert_eq!(found.unwrap().name, "John Moyo");
    }

    #[tokio::test]
    async fn unknown_ref_is_none_not_error() {
        let directory = StaticDirectory::new(vec![member()]);
        assert!(directory.find_member("LT-0000").await.unwrap().is_none());
    }

    #[test]
    fn list_text_uses_placeholder_when_empty() {
        let m = member();
        assert_eq!(m.allergies_text("None known"), "Penicillin");
        assert_eq!(m.conditions_text("None known"), "None known");
    }
}
