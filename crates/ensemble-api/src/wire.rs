//! Wire representation of mesh commands.
//!
//! Every frame on the websocket, in both directions, is a JSON-encoded
//! [`Command`]. Inbound commands are classified into [`Inbound`] by their
//! `action` discriminator before the broker acts on them.

use chrono::{DateTime, Utc};
use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::Error;

/// Unsolicited identity announcement from the proxy.
pub const ACTION_STATUS: &str = "status";
/// Successful completion of an earlier command.
pub const ACTION_REPLY: &str = "_reply";
/// Failed completion of an earlier command.
pub const ACTION_EXCEPTION: &str = "_exception";

/// Open key/value payload carried by every command.
pub type Args = Map<String, Value>;

// ── Follows ─────────────────────────────────────────────────────────

/// Correlation link from a message to the command it answers.
///
/// Encoded as the correlation id string, or the literal `false` for
/// unsolicited messages. Anything that is not a string decodes as
/// [`Follows::Unsolicited`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Follows {
    Command(String),
    #[default]
    Unsolicited,
}

impl Follows {
    pub fn as_id(&self) -> Option<&str> {
        match self {
            Self::Command(id) => Some(id),
            Self::Unsolicited => None,
        }
    }
}

impl Serialize for Follows {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Command(id) => serializer.serialize_str(id),
            Self::Unsolicited => serializer.serialize_bool(false),
        }
    }
}

impl<'de> Deserialize<'de> for Follows {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match Value::deserialize(deserializer)? {
            Value::String(id) => Self::Command(id),
            _ => Self::Unsolicited,
        })
    }
}

// ── Command ─────────────────────────────────────────────────────────

/// A single mesh command frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    #[serde(default)]
    pub id: String,

    /// Filled in by the websocket proxy on outbound commands.
    #[serde(default)]
    pub source: String,

    #[serde(default)]
    pub target: String,

    pub action: String,

    #[serde(default)]
    pub args: Args,

    /// Absolute expiry, seconds since the epoch.
    #[serde(default, deserialize_with = "de_expires")]
    pub expires: i64,

    #[serde(default)]
    pub follows: Follows,
}

impl Command {
    /// Build an outbound request with a fresh correlation id.
    ///
    /// Ids are random v4 UUIDs, so collisions among pending commands are
    /// not a practical concern at any realistic concurrency.
    pub fn request(
        target: impl Into<String>,
        action: impl Into<String>,
        args: Args,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source: String::new(),
            target: target.into(),
            action: action.into(),
            args,
            expires: expires_at.timestamp(),
            follows: Follows::Unsolicited,
        }
    }

    pub fn encode(&self) -> Result<String, Error> {
        serde_json::to_string(self).map_err(Error::Encode)
    }

    pub fn decode(frame: &str) -> Result<Self, Error> {
        serde_json::from_str(frame).map_err(|e| Error::Decode {
            message: e.to_string(),
            frame: frame.to_owned(),
        })
    }

    /// Classify an inbound command by its action and correlation link.
    pub fn classify(self) -> Inbound {
        if self.action == ACTION_STATUS {
            let handler_name = self
                .args
                .get("handlerName")
                .and_then(Value::as_str)
                .map(String::from);
            return Inbound::Status { handler_name };
        }

        let Some(follows) = self.follows.as_id().map(String::from) else {
            return Inbound::Orphan(self);
        };

        match self.action.as_str() {
            ACTION_REPLY => Inbound::Reply {
                follows,
                command: self,
            },
            ACTION_EXCEPTION => Inbound::Exception {
                follows,
                command: self,
            },
            _ => Inbound::Unsolicited {
                follows,
                command: self,
            },
        }
    }
}

/// Accept integer or fractional expiry values; anything else is zero.
fn de_expires<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    let value = Value::deserialize(deserializer)?;
    #[allow(clippy::cast_possible_truncation, clippy::as_conversions)]
    let expires = value
        .as_i64()
        .or_else(|| value.as_f64().map(|f| f.ceil() as i64))
        .unwrap_or_default();
    Ok(expires)
}

// ── Inbound ─────────────────────────────────────────────────────────

/// Typed view of an inbound command, keyed on `action`.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Identity announcement. `handler_name` is absent if the proxy
    /// sent a malformed status payload.
    Status { handler_name: Option<String> },
    /// `_reply` to a command this client may have sent.
    Reply { follows: String, command: Command },
    /// `_exception` for a command this client may have sent.
    Exception { follows: String, command: Command },
    /// Any other action carrying a correlation id. No defined behaviour.
    Unsolicited { follows: String, command: Command },
    /// Uncorrelated, non-status command.
    Orphan(Command),
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn request_frame_shape() {
        let at = Utc.timestamp_opt(1_700_000_060, 0).unwrap();
        let mut args = Args::new();
        args.insert("field".into(), json!("spa-temp"));
        let cmd = Command::request("global.context", "getContext", args, at);

        let encoded: Value = serde_json::from_str(&cmd.encode().unwrap()).unwrap();
        assert_eq!(encoded["source"], "");
        assert_eq!(encoded["target"], "global.context");
        assert_eq!(encoded["action"], "getContext");
        assert_eq!(encoded["args"]["field"], "spa-temp");
        assert_eq!(encoded["expires"], 1_700_000_060);
        assert_eq!(encoded["follows"], false);
        assert!(Uuid::parse_str(encoded["id"].as_str().unwrap()).is_ok());
    }

    #[test]
    fn request_ids_are_distinct() {
        let at = Utc::now();
        let a = Command::request("t", "a", Args::new(), at);
        let b = Command::request("t", "a", Args::new(), at);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn decode_tolerates_missing_optional_fields() {
        let cmd = Command::decode(r#"{"action":"status","args":{"handlerName":"proxy-1"}}"#)
            .unwrap();
        assert_eq!(cmd.follows, Follows::Unsolicited);
        assert_eq!(cmd.expires, 0);
        assert_eq!(
            cmd.classify(),
            Inbound::Status {
                handler_name: Some("proxy-1".into())
            }
        );
    }

    #[test]
    fn decode_fractional_expiry() {
        let cmd = Command::decode(r#"{"action":"x","expires":1700000000.2}"#).unwrap();
        assert_eq!(cmd.expires, 1_700_000_001);
    }

    #[test]
    fn decode_rejects_garbage() {
        let err = Command::decode("{not json").unwrap_err();
        assert!(matches!(err, Error::Decode { .. }));
    }

    #[test]
    fn classify_reply_and_exception() {
        let reply = Command::decode(r#"{"id":"9","action":"_reply","follows":"42","args":{}}"#)
            .unwrap()
            .classify();
        assert!(matches!(reply, Inbound::Reply { ref follows, .. } if follows == "42"));

        let exc = Command::decode(r#"{"id":"9","action":"_exception","follows":"42"}"#)
            .unwrap()
            .classify();
        assert!(matches!(exc, Inbound::Exception { ref follows, .. } if follows == "42"));
    }

    #[test]
    fn classify_false_follows_as_orphan() {
        let inbound = Command::decode(r#"{"action":"_reply","follows":false}"#)
            .unwrap()
            .classify();
        assert!(matches!(inbound, Inbound::Orphan(_)));
    }

    #[test]
    fn classify_other_action_with_follows() {
        let inbound = Command::decode(r#"{"action":"poke","follows":"7"}"#)
            .unwrap()
            .classify();
        assert!(matches!(inbound, Inbound::Unsolicited { ref follows, .. } if follows == "7"));
    }
}
