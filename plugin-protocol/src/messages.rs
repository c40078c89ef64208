use crate::model::Handshake;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Reserved event tag closing a stream.
pub const EVENT_END: &str = "end";

/// One line on the wire. The `type` field selects the variant.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    Handshake(Handshake),
    Request(Request),
    Response(Response),
    Event(Event),
}

impl Frame {
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Handshake(_) => "handshake",
            Frame::Request(_) => "request",
            Frame::Response(_) => "response",
            Frame::Event(_) => "event",
        }
    }
}

/// Host metadata attached to every request. Empty fields stay off the wire.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct RequestContext {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub repo_root: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cwd: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub deadline_ms: u64,
    #[serde(default, skip_serializing_if = "is_false")]
    pub dry_run: bool,
}

fn is_zero(v: &u64) -> bool {
    *v == 0
}

fn is_false(v: &bool) -> bool {
    !*v
}

/// A present field is `Some` even when it holds `null`; only an absent one
/// falls back to `None` through `#[serde(default)]`.
pub(crate) fn present<'de, D>(de: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(de).map(Some)
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Request {
    pub request_id: String,
    pub op: String,
    #[serde(default)]
    pub ctx: RequestContext,
    #[serde(default)]
    pub input: Value,
}

impl Request {
    pub fn new(request_id: impl Into<String>, op: impl Into<String>, input: Value) -> Self {
        Self {
            request_id: request_id.into(),
            op: op.into(),
            ctx: RequestContext::default(),
            input,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Note {
    pub level: String,
    pub message: String,
}

/// Structured failure carried by a response with `ok = false`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "present")]
    pub details: Option<Value>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Response {
    pub request_id: String,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "present")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<Note>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<Note>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Response {
    pub fn success(request_id: impl Into<String>, output: Value) -> Self {
        Self {
            request_id: request_id.into(),
            ok: true,
            output: Some(output),
            warnings: Vec::new(),
            notes: Vec::new(),
            error: None,
        }
    }

    pub fn failure(
        request_id: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            ok: false,
            output: None,
            warnings: Vec::new(),
            notes: Vec::new(),
            error: Some(ErrorBody {
                code: code.into(),
                message: message.into(),
                details: None,
            }),
        }
    }

    pub fn with_warning(mut self, message: impl Into<String>) -> Self {
        self.warnings.push(Note {
            level: "warn".to_string(),
            message: message.into(),
        });
        self
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Event {
    pub stream_id: String,
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ok: Option<bool>,
}

impl Event {
    pub fn new(stream_id: impl Into<String>, event: impl Into<String>) -> Self {
        Self {
            stream_id: stream_id.into(),
            event: event.into(),
            level: None,
            message: None,
            fields: None,
            ok: None,
        }
    }

    /// A `log` event carrying a single line of text.
    pub fn log(stream_id: impl Into<String>, level: &str, message: impl Into<String>) -> Self {
        let mut ev = Self::new(stream_id, "log");
        ev.level = Some(level.to_string());
        ev.message = Some(message.into());
        ev
    }

    pub fn end(stream_id: impl Into<String>, ok: bool) -> Self {
        let mut ev = Self::new(stream_id, EVENT_END);
        ev.ok = Some(ok);
        ev
    }

    pub fn is_end(&self) -> bool {
        self.event == EVENT_END
    }
}
