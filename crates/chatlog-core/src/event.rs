//! Logged events
//!
//! Two kinds of event are read back from the stores: text messages and
//! calls. Both carry a unix timestamp (seconds, UTC), the identifier of the
//! account they were logged under and the target entity of the
//! conversation.

use std::fmt::{self, Display};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::Entity;

/// Type of a text message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageType {
    #[default]
    Normal,
    Action,
    Notice,
    AutoReply,
    DeliveryReport,
}

impl MessageType {
    /// Parse the string stored in XML logs, defaulting to `Normal`
    pub fn from_log_str(s: &str) -> Self {
        match s {
            "action" => MessageType::Action,
            "notice" => MessageType::Notice,
            "auto-reply" => MessageType::AutoReply,
            "delivery-report" => MessageType::DeliveryReport,
            _ => MessageType::Normal,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Normal => "normal",
            MessageType::Action => "action",
            MessageType::Notice => "notice",
            MessageType::AutoReply => "auto-reply",
            MessageType::DeliveryReport => "delivery-report",
        }
    }
}

/// Why a call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CallEndReason {
    #[default]
    Unknown,
    ProgressMade,
    UserRequested,
    Forwarded,
    Rejected,
    NoAnswer,
    InvalidContact,
    PermissionDenied,
    Busy,
    InternalError,
    ServiceError,
    NetworkError,
    MediaError,
    ConnectivityError,
}

impl CallEndReason {
    const NAMES: [(&'static str, CallEndReason); 14] = [
        ("unknown", CallEndReason::Unknown),
        ("progress-made", CallEndReason::ProgressMade),
        ("user-requested", CallEndReason::UserRequested),
        ("forwarded", CallEndReason::Forwarded),
        ("rejected", CallEndReason::Rejected),
        ("no-answer", CallEndReason::NoAnswer),
        ("invalid-contact", CallEndReason::InvalidContact),
        ("permission-denied", CallEndReason::PermissionDenied),
        ("busy", CallEndReason::Busy),
        ("internal-error", CallEndReason::InternalError),
        ("service-error", CallEndReason::ServiceError),
        ("network-error", CallEndReason::NetworkError),
        ("media-error", CallEndReason::MediaError),
        ("connectivity-error", CallEndReason::ConnectivityError),
    ];

    /// Parse the string stored in XML logs, defaulting to `Unknown`
    pub fn from_log_str(s: &str) -> Self {
        // Older loggers wrote this one misspelled
        if s == "forwared" {
            return CallEndReason::Forwarded;
        }
        Self::NAMES
            .iter()
            .find(|(name, _)| *name == s)
            .map(|(_, reason)| *reason)
            .unwrap_or_default()
    }

    pub fn as_str(&self) -> &'static str {
        Self::NAMES
            .iter()
            .find(|(_, reason)| reason == self)
            .map(|(name, _)| *name)
            .unwrap_or("unknown")
    }
}

/// A logged text message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextEvent {
    /// Unix timestamp in seconds
    pub timestamp: i64,
    /// Account identifier the event was logged under
    pub account: String,
    /// Contact or room the conversation was with
    pub target: Entity,
    pub sender: Entity,
    /// Receiver, when the log format records it
    pub receiver: Option<Entity>,
    pub message: String,
    pub message_type: MessageType,
    /// Log token stored alongside the message, if any
    pub log_id: Option<String>,
}

/// A logged call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallEvent {
    /// Unix timestamp in seconds
    pub timestamp: i64,
    /// Account identifier the event was logged under
    pub account: String,
    /// Contact or room the call was with
    pub target: Entity,
    pub sender: Entity,
    /// Duration in seconds, 0 for calls that were never answered
    pub duration: i64,
    /// Who ended the call
    pub end_actor: Entity,
    pub end_reason: CallEndReason,
    pub detailed_end_reason: String,
}

/// Kind of an [`Event`], without its payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Text,
    Call,
}

/// A logged event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Event {
    Text(TextEvent),
    Call(CallEvent),
}

impl Event {
    /// Unix timestamp in seconds
    pub fn timestamp(&self) -> i64 {
        match self {
            Event::Text(e) => e.timestamp,
            Event::Call(e) => e.timestamp,
        }
    }

    /// Timestamp as a UTC date-time, if in range
    pub fn datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.timestamp(), 0)
    }

    pub fn account(&self) -> &str {
        match self {
            Event::Text(e) => &e.account,
            Event::Call(e) => &e.account,
        }
    }

    pub fn target(&self) -> &Entity {
        match self {
            Event::Text(e) => &e.target,
            Event::Call(e) => &e.target,
        }
    }

    pub fn sender(&self) -> &Entity {
        match self {
            Event::Text(e) => &e.sender,
            Event::Call(e) => &e.sender,
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Event::Text(_) => EventKind::Text,
            Event::Call(_) => EventKind::Call,
        }
    }

    pub fn as_text(&self) -> Option<&TextEvent> {
        match self {
            Event::Text(e) => Some(e),
            Event::Call(_) => None,
        }
    }

    pub fn as_call(&self) -> Option<&CallEvent> {
        match self {
            Event::Call(e) => Some(e),
            Event::Text(_) => None,
        }
    }
}

impl From<TextEvent> for Event {
    fn from(event: TextEvent) -> Self {
        Event::Text(event)
    }
}

impl From<CallEvent> for Event {
    fn from(event: CallEvent) -> Self {
        Event::Call(event)
    }
}

impl Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let when = self
            .datetime()
            .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| self.timestamp().to_string());
        match self {
            Event::Text(e) => match e.message_type {
                MessageType::Action => write!(f, "[{}] * {} {}", when, e.sender.alias(), e.message),
                _ => write!(f, "[{}] {}: {}", when, e.sender.alias(), e.message),
            },
            Event::Call(e) => write!(
                f,
                "[{}] call with {} ({}s, ended by {}: {})",
                when,
                e.target.alias(),
                e.duration,
                e.end_actor.alias(),
                e.end_reason.as_str()
            ),
        }
    }
}
