//! The directory interface the registry drives during category sync.

use async_trait::async_trait;

use crate::{
    Result,
    types::{EntityHandle, EntityKind, GroupHandle, GroupMember},
};

/// A forest of named groups holding entity references.
///
/// Membership mutations are staged per group and only become visible once
/// [`MembershipDirectory::commit_membership`] is called for that group.
/// Removing a non-member and adding an existing member are both no-ops.
#[async_trait]
pub trait MembershipDirectory: Send + Sync {
    async fn resolve_entity(&self, key: &str, kind: EntityKind) -> Result<EntityHandle>;

    /// The root group under which all groups for `kind` live.
    async fn distinguished_root(&self, kind: EntityKind) -> Result<GroupHandle>;

    /// Every member reachable from `group`, nested groups included.
    async fn all_descendants(&self, group: &GroupHandle) -> Result<Vec<GroupMember>>;

    async fn remove_member(&self, group: &GroupHandle, entity: &EntityHandle) -> Result<()>;

    async fn add_member(&self, group: &GroupHandle, entity: &EntityHandle) -> Result<()>;

    async fn commit_membership(&self, group: &GroupHandle) -> Result<()>;

    /// Groups that currently (committed state) contain `entity`, sorted by key.
    async fn containing_groups(&self, entity: &EntityHandle) -> Result<Vec<GroupHandle>>;
}
