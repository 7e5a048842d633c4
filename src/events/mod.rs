use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use tokio::sync::broadcast;
use uuid::Uuid;

pub mod loggable;
pub use loggable::{Loggable, Severity};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent<T> {
    pub id: Uuid,
    pub name: String,
    pub occurred_at: DateTime<Utc>,
    pub actor_id: Option<u64>,
    pub subject_id: Option<u64>,
    pub payload: T,
}

impl<T> DomainEvent<T> {
    pub fn new(name: impl Into<String>, actor_id: Option<u64>, subject_id: Option<u64>, payload: T) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            occurred_at: Utc::now(),
            actor_id,
            subject_id,
            payload,
        }
    }
}

pub type EventBus = broadcast::Sender<Value>;

pub fn init_event_bus() -> (EventBus, broadcast::Receiver<Value>) {
    broadcast::channel(1024)
}

/// Structured activity payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityPayload {
    /// The current/new state of the entity
    #[serde(rename = "new")]
    pub current: Value,
    /// The previous state, for updates and revocations
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old: Option<Value>,
    pub severity: Severity,
}

/// Publish an activity event for any entity implementing `Loggable`.
///
/// # Arguments
/// * `event_bus` - The event bus to send the event to.
/// * `action` - The action performed (e.g., "granted", "revoked").
/// * `actor_id` - The user who performed the action, when known.
/// * `entity` - The current/new entity state.
/// * `old_entity` - Optional previous entity state.
pub fn log_activity<T: Loggable>(
    event_bus: &EventBus,
    action: &str,
    actor_id: Option<u64>,
    entity: &T,
    old_entity: Option<&T>,
) {
    let event_name = format!("{}.{}", T::entity_type(), action);

    let payload = ActivityPayload {
        current: serde_json::to_value(entity).unwrap_or_default(),
        old: old_entity.map(|e| serde_json::to_value(e).unwrap_or_default()),
        severity: entity.severity_for_action(action),
    };

    let event = DomainEvent::new(
        event_name,
        actor_id,
        Some(entity.subject_id()),
        serde_json::to_value(&payload).unwrap_or_default(),
    );

    // Fire and forget: no listener is a normal state for embedded use.
    let _ = event_bus.send(serde_json::to_value(event).unwrap_or_default());
}

/// SHA-256 over the previous link and this payload.
pub fn chain_hash(prev_hash: Option<&str>, payload: &str) -> String {
    let mut hasher = Sha256::new();
    if let Some(ph) = prev_hash {
        hasher.update(ph.as_bytes());
    }
    hasher.update(payload.as_bytes());
    hex::encode(hasher.finalize())
}

/// Persist bus events into `activity_log` until every sender is dropped.
pub async fn start_activity_listener(mut rx: broadcast::Receiver<Value>, pool: SqlitePool) {
    tracing::info!("Activity listener started");
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "activity listener lagged behind the bus");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        let name = event.get("name").and_then(|v| v.as_str()).unwrap_or("unknown");
        let actor_id = event.get("actor_id").and_then(|v| v.as_i64());
        let subject_id = event.get("subject_id").and_then(|v| v.as_i64());
        let occurred_at = event
            .get("occurred_at")
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);
        let severity = event
            .get("payload")
            .and_then(|p| p.get("severity"))
            .and_then(|s| s.as_str())
            .unwrap_or("important");

        let payload_str = serde_json::to_string(&event).unwrap_or_default();

        let prev_hash: Option<String> = sqlx::query_scalar(
            "SELECT hash FROM activity_log ORDER BY seq DESC LIMIT 1"
        )
        .fetch_optional(&pool)
        .await
        .ok()
        .flatten();

        let hash = chain_hash(prev_hash.as_deref(), &payload_str);

        let result = sqlx::query(
            r#"
            INSERT INTO activity_log (id, event_name, actor_id, subject_id, occurred_at, payload, severity, prev_hash, hash)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#
        )
        .bind(Uuid::new_v4().to_string())
        .bind(name)
        .bind(actor_id)
        .bind(subject_id)
        .bind(occurred_at)
        .bind(&payload_str)
        .bind(severity)
        .bind(&prev_hash)
        .bind(&hash)
        .execute(&pool)
        .await;

        if let Err(e) = result {
            tracing::error!("Failed to save activity log: {}", e);
        }
    }
    tracing::info!("Activity listener stopped");
}
