//! Handles exchanged with a [`crate::MembershipDirectory`].

use {
    serde::{Deserialize, Serialize},
    std::fmt,
};

use crate::{Error, Result};

/// Stored `member_kind` for nested groups.
pub(crate) const GROUP_KIND: &str = "group";

/// Kind of entity that can be placed into directory groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    ChannelDefinition,
}

impl EntityKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ChannelDefinition => "channel_definition",
        }
    }

    pub fn parse(kind: &str) -> Result<Self> {
        match kind {
            "channel_definition" => Ok(Self::ChannelDefinition),
            other => Err(Error::UnknownKind {
                kind: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque reference to an entity, resolved from its key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityHandle {
    key: String,
    kind: EntityKind,
}

impl EntityHandle {
    pub(crate) fn new(key: impl Into<String>, kind: EntityKind) -> Self {
        Self {
            key: key.into(),
            kind,
        }
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[must_use]
    pub fn kind(&self) -> EntityKind {
        self.kind
    }
}

/// Reference to a group in the directory forest.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupHandle {
    key: String,
}

impl GroupHandle {
    /// Build a handle from a group key. The group is not checked for
    /// existence until the handle is used.
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for GroupHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

impl From<&str> for GroupHandle {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

/// A member yielded while walking a group: either a nested group or an entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupMember {
    Group(GroupHandle),
    Entity(EntityHandle),
}

impl GroupMember {
    #[must_use]
    pub fn is_group(&self) -> bool {
        matches!(self, Self::Group(_))
    }

    #[must_use]
    pub fn as_group(&self) -> Option<&GroupHandle> {
        match self {
            Self::Group(group) => Some(group),
            Self::Entity(_) => None,
        }
    }
}

/// A membership mutation staged against one group until it is committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum MembershipChange {
    Add(EntityHandle),
    Remove(EntityHandle),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_roundtrips_through_str() {
        let kind = EntityKind::ChannelDefinition;
        assert!(matches!(EntityKind::parse(kind.as_str()), Ok(EntityKind::ChannelDefinition)));
    }

    #[test]
    fn unknown_kind_is_rejected() {
        assert!(matches!(
            EntityKind::parse("person"),
            Err(Error::UnknownKind { kind }) if kind == "person"
        ));
    }

    #[test]
    fn member_group_predicate() {
        let group = GroupMember::Group(GroupHandle::new("news"));
        let entity =
            GroupMember::Entity(EntityHandle::new("42", EntityKind::ChannelDefinition));
        assert!(group.is_group());
        assert_eq!(group.as_group().map(GroupHandle::key), Some("news"));
        assert!(!entity.is_group());
        assert!(entity.as_group().is_none());
    }
}
