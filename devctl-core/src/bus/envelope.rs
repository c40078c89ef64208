use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A typed message on the bus: a type tag and a JSON payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub at: DateTime<Utc>,
    #[serde(default)]
    pub payload: Value,
}

impl Envelope {
    /// Wraps `payload` under `kind`. The type tag must not be blank.
    pub fn new<T: Serialize>(kind: impl Into<String>, payload: &T) -> anyhow::Result<Self> {
        let kind = kind.into();
        if kind.trim().is_empty() {
            anyhow::bail!("envelope type is empty");
        }
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            at: Utc::now(),
            payload: serde_json::to_value(payload)?,
        })
    }

    /// Same payload under another type, with a fresh id.
    pub fn retag(&self, kind: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind: kind.into(),
            at: self.at,
            payload: self.payload.clone(),
        }
    }

    pub fn decode<T: DeserializeOwned>(&self) -> anyhow::Result<T> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn blank_type_is_rejected() {
        assert!(Envelope::new(" ", &json!({})).is_err());
    }

    #[test]
    fn retag_keeps_payload() {
        let env = Envelope::new("state.snapshot", &json!({"n": 1})).unwrap();
        let ui = env.retag("tui.state.snapshot");
        assert_eq!(ui.kind, "tui.state.snapshot");
        assert_eq!(ui.payload, env.payload);
        assert_ne!(ui.id, env.id);
        let back: serde_json::Map<String, Value> = ui.decode().unwrap();
        assert_eq!(back["n"], 1);
    }
}
