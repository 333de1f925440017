use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::SystemTime;
use tracing::Subscriber;
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{Layer, layer::Context, registry::LookupSpan};

/// A log event captured by [`InMemoryEventLayer`]
#[derive(Debug, Clone, Serialize)]
pub struct CapturedEvent {
    pub level: String,
    pub target: String,
    /// The event's `message` field, empty if it had none
    pub message: String,
    pub fields: HashMap<String, serde_json::Value>,
    /// Nanoseconds since the Unix epoch
    pub timestamp: u128,
}

impl CapturedEvent {
    /// A field rendered as a string, if present
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(|v| v.as_str())
    }
}

/// Shared storage for captured events
#[derive(Debug, Clone, Default)]
pub struct SharedEventStorage {
    events: Arc<RwLock<Vec<CapturedEvent>>>,
    /// session id -> positions in `events`
    by_session: Arc<RwLock<HashMap<String, Vec<usize>>>>,
}

impl SharedEventStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_event(&self, event: CapturedEvent) {
        let Ok(mut events) = self.events.write() else { return };
        if let Some(session) = event.field("session.id") {
            if let Ok(mut by_session) = self.by_session.write() {
                by_session.entry(session.to_string()).or_default().push(events.len());
            }
        }
        events.push(event);
    }

    /// Every captured event in emission order
    pub fn events(&self) -> Vec<CapturedEvent> {
        self.events.read().map(|events| events.clone()).unwrap_or_default()
    }

    /// Events carrying `session.id = session_id`
    pub fn session_events(&self, session_id: &str) -> Vec<CapturedEvent> {
        let (Ok(events), Ok(by_session)) = (self.events.read(), self.by_session.read()) else {
            return Vec::new();
        };
        by_session
            .get(session_id)
            .map(|positions| positions.iter().filter_map(|&i| events.get(i).cloned()).collect())
            .unwrap_or_default()
    }

    /// Whether an event at `level` has a message containing `needle`
    pub fn contains(&self, level: &str, needle: &str) -> bool {
        self.events
            .read()
            .map(|events| {
                events.iter().any(|e| e.level.eq_ignore_ascii_case(level) && e.message.contains(needle))
            })
            .unwrap_or(false)
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.write() {
            events.clear();
        }
        if let Ok(mut by_session) = self.by_session.write() {
            by_session.clear();
        }
    }
}

/// A tracing layer that captures log events in memory
pub struct InMemoryEventLayer {
    storage: Arc<SharedEventStorage>,
}

impl InMemoryEventLayer {
    pub fn new(storage: Arc<SharedEventStorage>) -> Self {
        Self { storage }
    }
}

impl<S> Layer<S> for InMemoryEventLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = JsonVisitor::default();
        event.record(&mut visitor);
        let mut fields = visitor.0;

        let message = match fields.remove("message") {
            Some(serde_json::Value::String(s)) => s,
            Some(other) => other.to_string(),
            None => String::new(),
        };
        let timestamp = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();

        let metadata = event.metadata();
        self.storage.add_event(CapturedEvent {
            level: metadata.level().to_string(),
            target: metadata.target().to_string(),
            message,
            fields,
            timestamp,
        });
    }
}

/// Capture events emitted on the current thread until the guard is dropped
pub fn capture_events() -> (Arc<SharedEventStorage>, DefaultGuard) {
    let storage = Arc::new(SharedEventStorage::new());
    let subscriber =
        tracing_subscriber::registry().with(InMemoryEventLayer::new(storage.clone()));
    let guard = tracing::subscriber::set_default(subscriber);
    (storage, guard)
}

#[derive(Default)]
struct JsonVisitor(HashMap<String, serde_json::Value>);

impl tracing::field::Visit for JsonVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        self.0.insert(field.name().to_string(), serde_json::Value::String(format!("{:?}", value)));
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.0.insert(field.name().to_string(), serde_json::Value::String(value.to_string()));
    }

    fn record_bool(&mut self, field: &tracing::field::Field, value: bool) {
        self.0.insert(field.name().to_string(), serde_json::Value::Bool(value));
    }

    fn record_i64(&mut self, field: &tracing::field::Field, value: i64) {
        self.0.insert(field.name().to_string(), serde_json::json!(value));
    }

    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.0.insert(field.name().to_string(), serde_json::json!(value));
    }

    fn record_f64(&mut self, field: &tracing::field::Field, value: f64) {
        self.0.insert(field.name().to_string(), serde_json::json!(value));
    }
}
