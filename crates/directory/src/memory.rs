//! In-memory directory for tests and embedding.

use std::{
    collections::{BTreeSet, HashMap, HashSet},
    sync::Mutex,
};

use {async_trait::async_trait, tracing::debug};

use crate::{
    Error, Result,
    store::MembershipDirectory,
    types::{EntityHandle, EntityKind, GroupHandle, GroupMember, MembershipChange},
};

#[derive(Debug, Default)]
struct GroupNode {
    name: String,
    children: Vec<String>,
    entities: BTreeSet<EntityHandle>,
}

#[derive(Debug, Default)]
struct Forest {
    groups: HashMap<String, GroupNode>,
    pending: HashMap<String, Vec<MembershipChange>>,
}

/// Directory held entirely in process memory. No persistence.
pub struct InMemoryDirectory {
    root: GroupHandle,
    forest: Mutex<Forest>,
}

impl InMemoryDirectory {
    /// Create a directory whose channel-category root has key `root_key`.
    pub fn new(root_key: impl Into<String>) -> Self {
        let root = GroupHandle::new(root_key);
        let mut forest = Forest::default();
        forest.groups.insert(root.key().to_string(), GroupNode {
            name: root.key().to_string(),
            ..GroupNode::default()
        });
        Self {
            root,
            forest: Mutex::new(forest),
        }
    }

    /// Create a group under `parent` (the root when `None`).
    pub fn create_group(
        &self,
        parent: Option<&GroupHandle>,
        key: &str,
        name: &str,
    ) -> Result<GroupHandle> {
        let parent = parent.unwrap_or(&self.root);
        let mut forest = self.forest.lock().unwrap_or_else(|e| e.into_inner());
        if forest.groups.contains_key(key) {
            return Err(Error::group_exists(key));
        }
        let parent_node = forest
            .groups
            .get_mut(parent.key())
            .ok_or_else(|| Error::group_not_found(parent.key()))?;
        parent_node.children.push(key.to_string());
        forest.groups.insert(key.to_string(), GroupNode {
            name: name.to_string(),
            ..GroupNode::default()
        });
        Ok(GroupHandle::new(key))
    }

    /// Display name of a group.
    pub fn group_name(&self, group: &GroupHandle) -> Option<String> {
        let forest = self.forest.lock().unwrap_or_else(|e| e.into_inner());
        forest.groups.get(group.key()).map(|g| g.name.clone())
    }

    fn stage(&self, group: &GroupHandle, change: MembershipChange) -> Result<()> {
        let mut forest = self.forest.lock().unwrap_or_else(|e| e.into_inner());
        if !forest.groups.contains_key(group.key()) {
            return Err(Error::group_not_found(group.key()));
        }
        forest
            .pending
            .entry(group.key().to_string())
            .or_default()
            .push(change);
        Ok(())
    }
}

#[async_trait]
impl MembershipDirectory for InMemoryDirectory {
    async fn resolve_entity(&self, key: &str, kind: EntityKind) -> Result<EntityHandle> {
        if key.is_empty() {
            return Err(Error::message("entity key must not be empty"));
        }
        Ok(EntityHandle::new(key, kind))
    }

    async fn distinguished_root(&self, _kind: EntityKind) -> Result<GroupHandle> {
        Ok(self.root.clone())
    }

    async fn all_descendants(&self, group: &GroupHandle) -> Result<Vec<GroupMember>> {
        let forest = self.forest.lock().unwrap_or_else(|e| e.into_inner());
        if !forest.groups.contains_key(group.key()) {
            return Err(Error::group_not_found(group.key()));
        }

        let mut members = Vec::new();
        let mut seen = HashSet::from([group.key().to_string()]);
        let mut stack = vec![group.key().to_string()];
        while let Some(key) = stack.pop() {
            let Some(node) = forest.groups.get(&key) else {
                continue;
            };
            members.extend(node.entities.iter().cloned().map(GroupMember::Entity));
            for child in &node.children {
                if seen.insert(child.clone()) {
                    members.push(GroupMember::Group(GroupHandle::new(child.clone())));
                    stack.push(child.clone());
                }
            }
        }
        Ok(members)
    }

    async fn remove_member(&self, group: &GroupHandle, entity: &EntityHandle) -> Result<()> {
        self.stage(group, MembershipChange::Remove(entity.clone()))
    }

    async fn add_member(&self, group: &GroupHandle, entity: &EntityHandle) -> Result<()> {
        self.stage(group, MembershipChange::Add(entity.clone()))
    }

    async fn commit_membership(&self, group: &GroupHandle) -> Result<()> {
        let mut forest = self.forest.lock().unwrap_or_else(|e| e.into_inner());
        let changes = forest.pending.remove(group.key()).unwrap_or_default();
        let node = forest
            .groups
            .get_mut(group.key())
            .ok_or_else(|| Error::group_not_found(group.key()))?;
        for change in changes {
            match change {
                MembershipChange::Add(entity) => {
                    node.entities.insert(entity);
                },
                MembershipChange::Remove(entity) => {
                    node.entities.remove(&entity);
                },
            }
        }
        debug!(group = %group, "committed group membership");
        Ok(())
    }

    async fn containing_groups(&self, entity: &EntityHandle) -> Result<Vec<GroupHandle>> {
        let forest = self.forest.lock().unwrap_or_else(|e| e.into_inner());
        let mut groups: Vec<GroupHandle> = forest
            .groups
            .iter()
            .filter(|(_, node)| node.entities.contains(entity))
            .map(|(key, _)| GroupHandle::new(key.clone()))
            .collect();
        groups.sort();
        Ok(groups)
    }
}
