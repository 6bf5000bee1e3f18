//! Conversation participants
//!
//! An [`Entity`] is either a contact, a named chat room, or the owner of
//! the account being logged. Entities are plain values: two entities are
//! the same if identifier and type match, whatever their alias or avatar.

use std::fmt::{self, Display};
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Kind of conversation participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntityType {
    /// Type could not be determined from the log
    #[default]
    Unknown,
    /// A buddy, other than the account owner
    Contact,
    /// A named chat room
    Room,
    /// The owner of the logged account
    #[serde(rename = "self")]
    SelfContact,
}

impl EntityType {
    /// String form used by the on-disk log formats
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Unknown => "unknown",
            EntityType::Contact => "contact",
            EntityType::Room => "room",
            EntityType::SelfContact => "self",
        }
    }
}

impl Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unknown" => Ok(EntityType::Unknown),
            "contact" => Ok(EntityType::Contact),
            "room" => Ok(EntityType::Room),
            "self" => Ok(EntityType::SelfContact),
            other => Err(CoreError::UnknownEntityType(other.to_string())),
        }
    }
}

/// A contact or room identity associated with logged events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    identifier: String,
    entity_type: EntityType,
    alias: Option<String>,
    avatar_token: Option<String>,
}

impl Entity {
    /// Create a new entity
    ///
    /// Empty alias or avatar strings are stored as `None`.
    pub fn new(
        identifier: impl Into<String>,
        entity_type: EntityType,
        alias: Option<String>,
        avatar_token: Option<String>,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            entity_type,
            alias: alias.filter(|a| !a.is_empty()),
            avatar_token: avatar_token.filter(|t| !t.is_empty()),
        }
    }

    /// Create a contact entity with no alias or avatar
    pub fn contact(identifier: impl Into<String>) -> Self {
        Self::new(identifier, EntityType::Contact, None, None)
    }

    /// Create a room entity
    pub fn room(room_id: impl Into<String>) -> Self {
        Self::new(room_id, EntityType::Room, None, None)
    }

    /// Set the alias, returning the modified entity
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        let alias = alias.into();
        self.alias = (!alias.is_empty()).then_some(alias);
        self
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    /// Alias, falling back to the identifier when none was logged
    pub fn alias(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.identifier)
    }

    pub fn avatar_token(&self) -> Option<&str> {
        self.avatar_token.as_deref()
    }

    pub fn is_room(&self) -> bool {
        self.entity_type == EntityType::Room
    }
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        self.identifier == other.identifier && self.entity_type == other.entity_type
    }
}

impl Eq for Entity {}

impl Hash for Entity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identifier.hash(state);
        self.entity_type.hash(state);
    }
}

impl Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.identifier, self.entity_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_equality_ignores_alias_and_token() {
        let a = Entity::new(
            "user2@collabora.co.uk",
            EntityType::Contact,
            Some("User2".into()),
            Some("abc".into()),
        );
        let b = Entity::contact("user2@collabora.co.uk");
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn test_type_distinguishes_entities() {
        let contact = Entity::contact("meeting@conference.collabora.co.uk");
        let room = Entity::room("meeting@conference.collabora.co.uk");
        assert_ne!(contact, room);
        assert!(room.is_room());
    }

    #[test]
    fn test_alias_falls_back_to_identifier() {
        let entity = Entity::new("user4@collabora.co.uk", EntityType::Contact, Some(String::new()), None);
        assert_eq!(entity.alias(), "user4@collabora.co.uk");
        assert_eq!(entity.with_alias("User4").alias(), "User4");
    }

    #[test]
    fn test_entity_type_strings() {
        for ty in [
            EntityType::Unknown,
            EntityType::Contact,
            EntityType::Room,
            EntityType::SelfContact,
        ] {
            assert_eq!(ty.as_str().parse::<EntityType>().unwrap(), ty);
        }
        assert!("buddy".parse::<EntityType>().is_err());
    }
}
