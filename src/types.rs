use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Numeric user id, also the suffix of `user<id>.json` and `users/user<id>/`
pub type UserId = u64;

/// Opaque session token carried in the session cookie
pub type SessionToken = String;

/// Who the current session belongs to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum UserSlot {
    /// No email entered yet
    #[default]
    Unassigned,
    /// Email entered but not present in the email index
    New,
    Assigned(UserId),
}

impl UserSlot {
    pub fn user_id(&self) -> Option<UserId> {
        match self {
            UserSlot::Assigned(id) => Some(*id),
            _ => None,
        }
    }
}

/// Profile fields plus the per-IP confirmation timestamps.
///
/// Stored as `admin/user<id>.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct UserRecord {
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub organization: String,
    #[serde(default)]
    pub location: String,
    /// IP address -> last successful confirmation from that address
    #[serde(default)]
    pub confirmation_time: BTreeMap<String, DateTime<Utc>>,
}

impl UserRecord {
    /// Last confirmation recorded for `ipaddr`, if any
    pub fn confirmed_at(&self, ipaddr: &str) -> Option<DateTime<Utc>> {
        self.confirmation_time.get(ipaddr).copied()
    }
}

/// Metadata sidecar written next to every stored upload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UploadRecord {
    /// Storage name under `uploads/user<id>/`
    pub stored_as: String,
    /// Filename as supplied by the client, kept only as metadata
    pub original_name: String,
    pub size: u64,
    pub sha256: String,
    pub uploaded_at: DateTime<Utc>,
    /// Problem selected at the time of upload
    #[serde(default)]
    pub problem: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_slot_serialization() {
        assert_eq!(
            serde_json::to_string(&UserSlot::Unassigned).unwrap(),
            "\"unassigned\""
        );
        assert_eq!(
            serde_json::to_string(&UserSlot::Assigned(7)).unwrap(),
            "{\"assigned\":7}"
        );
        assert_eq!(UserSlot::Assigned(7).user_id(), Some(7));
        assert_eq!(UserSlot::New.user_id(), None);
    }

    #[test]
    fn test_user_record_tolerates_missing_fields() {
        let record: UserRecord = serde_json::from_str(r#"{"full_name":"Ada Lovelace"}"#).unwrap();
        assert_eq!(record.full_name, "Ada Lovelace");
        assert!(record.organization.is_empty());
        assert!(record.confirmation_time.is_empty());
        assert!(record.confirmed_at("127.0.0.1").is_none());
    }
}
