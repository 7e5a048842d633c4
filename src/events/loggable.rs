use serde::{Deserialize, Serialize};

/// Severity levels for activity logs.
/// Controls retention policies and log filtering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Critical events: long-term retention, never auto-delete
    Critical,
    /// Important events: medium-term retention (default)
    #[default]
    Important,
    /// Noise events: aggressively trimmed
    Noise,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::Important => "important",
            Severity::Noise => "noise",
        }
    }
}

/// Trait for entities that can be logged in the activity log.
pub trait Loggable: Serialize + Send + Sync {
    /// The entity type name, used as the prefix in event names like "user_role.granted"
    fn entity_type() -> &'static str;

    /// The subject id (the user a grant belongs to, for instance)
    fn subject_id(&self) -> u64;

    fn severity(&self) -> Severity {
        Severity::Important
    }

    /// Override severity based on action
    fn severity_for_action(&self, action: &str) -> Severity {
        match action {
            "revoked" | "deleted" => Severity::Critical,
            "granted" | "created" | "updated" => self.severity(),
            _ => Severity::Important,
        }
    }
}
