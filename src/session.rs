//! Per-user conversation sessions and their TTL-bound store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

use crate::directory::MemberRecord;

/// Session data keys written by the conversation steps.
pub mod keys {
    pub const EMERGENCY_TYPE: &str = "emergency_type";
    pub const CONSCIOUS: &str = "conscious";
    pub const BREATHING: &str = "breathing";
    pub const VICTIM_COUNT: &str = "victim_count";
    pub const SCENE_DESCRIPTION: &str = "scene_description";
    pub const LATITUDE: &str = "latitude";
    pub const LONGITUDE: &str = "longitude";
    pub const ADDRESS: &str = "address";
    pub const TIER: &str = "tier";
}

/// Conversation flow states, in step order. The only backward edge is the
/// explicit reset to `Start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationState {
    Start,
    EmergencyTriggered,
    EmergencyType,
    EmergencyConscious,
    EmergencyBreathing,
    EmergencyVictimCount,
    EmergencyScene,
    EmergencySceneInput,
    EmergencyLocation,
    EmergencyConfirmed,
    Completed,
}

impl ConversationState {
    /// Whether the user is inside an active emergency flow.
    pub fn is_in_flow(&self) -> bool {
        !matches!(
            self,
            Self::Start | Self::EmergencyConfirmed | Self::Completed
        )
    }
}

impl Default for ConversationState {
    fn default() -> Self {
        Self::Start
    }
}

impl std::fmt::Display for ConversationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Start => "start",
            Self::EmergencyTriggered => "emergency_triggered",
            Self::EmergencyType => "emergency_type",
            Self::EmergencyConscious => "emergency_conscious",
            Self::EmergencyBreathing => "emergency_breathing",
            Self::EmergencyVictimCount => "emergency_victim_count",
            Self::EmergencyScene => "emergency_scene",
            Self::EmergencySceneInput => "emergency_scene_input",
            Self::EmergencyLocation => "emergency_location",
            Self::EmergencyConfirmed => "emergency_confirmed",
            Self::Completed => "completed",
        };
        write!(f, "{s}")
    }
}

/// Conversation state and collected data for one end user.
#[derive(Debug, Clone)]
pub struct Session {
    /// Stable external identifier (phone number equivalent); store key.
    pub user_id: String,
    pub state: ConversationState,
    /// Scalar/collection values accumulated across steps.
    pub data: HashMap<String, Value>,
    /// Member snapshot taken once at flow start; absent if lookup failed.
    pub member: Option<MemberRecord>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl Session {
    pub fn new(user_id: &str) -> Self {
        let now = Utc::now();
        Self {
            user_id: user_id.to_string(),
            state: ConversationState::Start,
            data: HashMap::new(),
            member: None,
            created_at: now,
            last_activity: now,
        }
    }

    /// Update conversation state and refresh the activity timestamp.
    pub fn set_state(&mut self, state: ConversationState) {
        debug!(user_id = %self.user_id, from = %self.state, to = %state, "Session transition");
        self.state = state;
        self.touch();
    }

    /// Store a collected value and refresh the activity timestamp.
    pub fn set_data(&mut self, key: &str, value: impl Into<Value>) {
        self.data.insert(key.to_string(), value.into());
        self.touch();
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.data.get(key).and_then(Value::as_f64)
    }

    /// Reset to the initial state with cleared data and member snapshot.
    pub fn reset(&mut self) {
        self.state = ConversationState::Start;
        self.data.clear();
        self.member = None;
        self.touch();
    }

    /// Whether the session has been idle longer than `ttl`.
    pub fn is_expired(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero());
        now.signed_duration_since(self.last_activity) > ttl
    }

    fn touch(&mut self) {
        self.last_activity = Utc::now();
    }
}

/// Keyed, TTL-bound registry of sessions.
///
/// Per-user mutation is serialized by a per-session mutex held across the
/// whole step; the store-wide lock only guards map entry lookup and the
/// eviction sweep's enumeration, so different users never block each other.
pub struct SessionStore {
    inner: Mutex<HashMap<String, Entry>>,
    ttl: Duration,
    max_sessions: usize,
}

struct Entry {
    session: Arc<Mutex<Session>>,
    /// Last acquisition time, tracked outside the session lock so the sweep
    /// never has to wait on an in-flight step.
    touched: DateTime<Utc>,
}

impl SessionStore {
    pub fn new(ttl: Duration, max_sessions: usize) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            ttl,
            max_sessions,
        }
    }

    /// Lock the user's session for a read-modify-write step, creating it
    /// lazily. An expired session is reset before being handed out.
    pub async fn acquire(&self, user_id: &str) -> OwnedMutexGuard<Session> {
        let now = Utc::now();
        let handle = {
            let mut map = self.inner.lock().await;
            if map.len() >= self.max_sessions && !map.contains_key(user_id) {
                Self::evict_oldest(&mut map);
            }
            let entry = map.entry(user_id.to_string()).or_insert_with(|| {
                info!(user_id, "New session created");
                Entry {
                    session: Arc::new(Mutex::new(Session::new(user_id))),
                    touched: now,
                }
            });
            entry.touched = now;
            Arc::clone(&entry.session)
        };

        let mut session = handle.lock_owned().await;
        if session.is_expired(self.ttl, now) {
            info!(user_id, prior_state = %session.state, "Session expired, resetting");
            session.reset();
        }
        session
    }

    /// Remove sessions idle past the TTL and trim to the size cap,
    /// oldest-activity first. Safe to run concurrently with `acquire`.
    pub async fn sweep(&self) -> usize {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::zero());
        let mut map = self.inner.lock().await;

        let before = map.len();
        map.retain(|_, entry| now.signed_duration_since(entry.touched) <= ttl);
        while map.len() > self.max_sessions {
            Self::evict_oldest(&mut map);
        }
        let removed = before - map.len();
        if removed > 0 {
            info!(removed, "Swept idle sessions");
        }
        removed
    }

    /// Number of tracked sessions.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn evict_oldest(map: &mut HashMap<String, Entry>) {
        let oldest = map
            .iter()
            .min_by_key(|(_, entry)| entry.touched)
            .map(|(id, _)| id.clone());
        if let Some(id) = oldest {
            debug!(user_id = %id, "Session evicted (size cap)");
            map.remove(&id);
        }
    }

    /// Spawn a periodic sweep task.
    pub fn spawn_sweeper(store: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                store.sweep().await;
            }
        })
    }
}
