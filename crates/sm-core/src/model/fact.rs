use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

// ---------------------------------------------------------------------------
// Scope
// ---------------------------------------------------------------------------

/// Addressing prefix for facts: `global` or `project:<name>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    Global,
    Project(String),
}

impl Scope {
    /// Build the conventional fact key `<scope>:<dotted.path>`.
    pub fn qualify(&self, path: &str) -> String {
        format!("{self}:{path}")
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Global => write!(f, "global"),
            Scope::Project(name) => write!(f, "project:{name}"),
        }
    }
}

impl FromStr for Scope {
    type Err = crate::SmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "global" {
            return Ok(Scope::Global);
        }
        match s.strip_prefix("project:") {
            Some(name) if !name.is_empty() => Ok(Scope::Project(name.to_string())),
            _ => Err(crate::SmError::InvalidInput(format!("invalid scope: {s}"))),
        }
    }
}

impl Serialize for Scope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Scope {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Fact
// ---------------------------------------------------------------------------

/// A single structured memory record.
///
/// `dirty` is a local-only flag and never crosses the wire; the serde skip
/// keeps it out of shard operations automatically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    pub id: String,
    pub scope: Scope,
    /// Unique primary lookup, conventionally `<scope>:<dotted.path>`.
    pub key: String,
    pub value: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_session: Option<String>,
    pub created: DateTime<Utc>,
    pub last_confirmed: DateTime<Utc>,
    #[serde(default)]
    pub access_count: u64,
    #[serde(skip)]
    pub dirty: bool,
}

fn default_confidence() -> f64 {
    1.0
}

impl Fact {
    pub fn new(scope: Scope, key: impl Into<String>, value: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            scope,
            key: key.into(),
            value: value.into(),
            tags: Vec::new(),
            confidence: 1.0,
            source_session: None,
            created: now,
            last_confirmed: now,
            access_count: 0,
            dirty: true,
        }
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    pub fn with_source_session(mut self, session: impl Into<String>) -> Self {
        self.source_session = Some(session.into());
        self
    }
}

/// Tombstone queued for the next push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingDelete {
    pub key: String,
    pub deleted_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_round_trips_through_text() {
        assert_eq!("global".parse::<Scope>().unwrap(), Scope::Global);
        assert_eq!(
            "project:api".parse::<Scope>().unwrap(),
            Scope::Project("api".into())
        );
        assert_eq!(Scope::Project("api".into()).to_string(), "project:api");
    }

    #[test]
    fn scope_rejects_garbage() {
        assert!("project:".parse::<Scope>().is_err());
        assert!("universe".parse::<Scope>().is_err());
    }

    #[test]
    fn qualify_builds_conventional_keys() {
        assert_eq!(Scope::Global.qualify("auth.strategy"), "global:auth.strategy");
        assert_eq!(
            Scope::Project("api".into()).qualify("db.port"),
            "project:api:db.port"
        );
    }

    #[test]
    fn dirty_flag_never_serialized() {
        let fact = Fact::new(Scope::Global, "global:a", "v");
        let json = serde_json::to_value(&fact).unwrap();
        assert!(json.get("dirty").is_none());

        // And deserializing always yields a clean fact.
        let back: Fact = serde_json::from_value(json).unwrap();
        assert!(!back.dirty);
    }

    #[test]
    fn fact_defaults_apply_on_sparse_json() {
        let fact: Fact = serde_json::from_value(serde_json::json!({
            "id": "x",
            "scope": "global",
            "key": "global:k",
            "value": "v",
            "created": "2026-01-01T00:00:00Z",
            "last_confirmed": "2026-01-01T00:00:00Z"
        }))
        .unwrap();
        assert_eq!(fact.confidence, 1.0);
        assert!(fact.tags.is_empty());
        assert_eq!(fact.access_count, 0);
    }
}
