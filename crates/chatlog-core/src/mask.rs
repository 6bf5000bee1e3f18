//! Event type masks

use std::ops::{BitAnd, BitOr};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::event::{Event, EventKind};

/// Bitmask selecting which kinds of event a walk should consider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventMask(u32);

impl EventMask {
    pub const TEXT: EventMask = EventMask(1 << 0);
    pub const CALL: EventMask = EventMask(1 << 1);
    pub const ANY: EventMask = EventMask(0xffff);

    pub fn bits(&self) -> u32 {
        self.0
    }

    /// Whether any bit of `other` is set in this mask
    pub fn intersects(&self, other: EventMask) -> bool {
        self.0 & other.0 != 0
    }

    pub fn includes(&self, kind: EventKind) -> bool {
        self.intersects(Self::from(kind))
    }

    /// Whether `event` is of a kind selected by this mask
    pub fn matches(&self, event: &Event) -> bool {
        self.includes(event.kind())
    }
}

impl Default for EventMask {
    fn default() -> Self {
        Self::ANY
    }
}

impl From<EventKind> for EventMask {
    fn from(kind: EventKind) -> Self {
        match kind {
            EventKind::Text => Self::TEXT,
            EventKind::Call => Self::CALL,
        }
    }
}

impl BitOr for EventMask {
    type Output = EventMask;

    fn bitor(self, rhs: Self) -> Self::Output {
        EventMask(self.0 | rhs.0)
    }
}

impl BitAnd for EventMask {
    type Output = EventMask;

    fn bitand(self, rhs: Self) -> Self::Output {
        EventMask(self.0 & rhs.0)
    }
}

impl FromStr for EventMask {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::TEXT),
            "call" => Ok(Self::CALL),
            "any" => Ok(Self::ANY),
            other => Err(format!("unknown event mask '{}', expected text, call or any", other)),
        }
    }
}
