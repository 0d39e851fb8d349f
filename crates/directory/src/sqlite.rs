//! SQLite-backed directory using sqlx.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::Mutex,
};

use {
    async_trait::async_trait,
    sqlx::SqlitePool,
    tracing::{debug, warn},
};

use crate::{
    Error, Result,
    store::MembershipDirectory,
    types::{EntityHandle, EntityKind, GROUP_KIND, GroupHandle, GroupMember, MembershipChange},
};

/// Group forest persisted in the `dir_group` and `dir_membership` tables.
pub struct SqliteDirectory {
    pool: SqlitePool,
    root: GroupHandle,
    pending: Mutex<HashMap<String, Vec<MembershipChange>>>,
}

impl SqliteDirectory {
    /// Open the directory, creating the category root group if it is missing.
    ///
    /// Call [`crate::run_migrations`] before using this constructor.
    pub async fn open(pool: SqlitePool, root_key: &str) -> Result<Self> {
        sqlx::query("INSERT OR IGNORE INTO dir_group (group_key, name) VALUES (?, ?)")
            .bind(root_key)
            .bind(root_key)
            .execute(&pool)
            .await?;
        Ok(Self {
            pool,
            root: GroupHandle::new(root_key),
            pending: Mutex::new(HashMap::new()),
        })
    }

    /// Create a group under `parent` (the root when `None`).
    pub async fn create_group(
        &self,
        parent: Option<&GroupHandle>,
        key: &str,
        name: &str,
    ) -> Result<GroupHandle> {
        let parent = parent.unwrap_or(&self.root);
        self.ensure_group(parent).await?;

        let mut tx = self.pool.begin().await?;
        let inserted = sqlx::query("INSERT OR IGNORE INTO dir_group (group_key, name) VALUES (?, ?)")
            .bind(key)
            .bind(name)
            .execute(&mut *tx)
            .await?;
        if inserted.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(Error::group_exists(key));
        }
        sqlx::query(
            "INSERT INTO dir_membership (group_key, member_key, member_kind) VALUES (?, ?, ?)",
        )
        .bind(parent.key())
        .bind(key)
        .bind(GROUP_KIND)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        debug!(group = key, parent = %parent, "created group");
        Ok(GroupHandle::new(key))
    }

    async fn ensure_group(&self, group: &GroupHandle) -> Result<()> {
        let found = sqlx::query_scalar::<_, String>("SELECT group_key FROM dir_group WHERE group_key = ?")
            .bind(group.key())
            .fetch_optional(&self.pool)
            .await?;
        match found {
            Some(_) => Ok(()),
            None => Err(Error::group_not_found(group.key())),
        }
    }

    async fn stage(&self, group: &GroupHandle, change: MembershipChange) -> Result<()> {
        self.ensure_group(group).await?;
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.entry(group.key().to_string()).or_default().push(change);
        Ok(())
    }
}

#[async_trait]
impl MembershipDirectory for SqliteDirectory {
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
        self.ensure_group(group).await?;

        let mut members = Vec::new();
        let mut seen = HashSet::from([group.key().to_string()]);
        let mut queue = VecDeque::from([group.key().to_string()]);
        while let Some(key) = queue.pop_front() {
            let rows = sqlx::query_as::<_, (String, String)>(
                "SELECT member_key, member_kind FROM dir_membership
                 WHERE group_key = ?
                 ORDER BY member_kind, member_key",
            )
            .bind(&key)
            .fetch_all(&self.pool)
            .await?;

            for (member_key, member_kind) in rows {
                if member_kind == GROUP_KIND {
                    if seen.insert(member_key.clone()) {
                        members.push(GroupMember::Group(GroupHandle::new(member_key.clone())));
                        queue.push_back(member_key);
                    }
                } else {
                    let kind = EntityKind::parse(&member_kind)?;
                    members.push(GroupMember::Entity(EntityHandle::new(member_key, kind)));
                }
            }
        }
        Ok(members)
    }

    async fn remove_member(&self, group: &GroupHandle, entity: &EntityHandle) -> Result<()> {
        self.stage(group, MembershipChange::Remove(entity.clone()))
            .await
    }

    async fn add_member(&self, group: &GroupHandle, entity: &EntityHandle) -> Result<()> {
        self.stage(group, MembershipChange::Add(entity.clone()))
            .await
    }

    async fn commit_membership(&self, group: &GroupHandle) -> Result<()> {
        let changes = {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            pending.remove(group.key()).unwrap_or_default()
        };
        if changes.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for change in &changes {
            let result = match change {
                MembershipChange::Add(entity) => {
                    sqlx::query(
                        "INSERT OR IGNORE INTO dir_membership (group_key, member_key, member_kind)
                         VALUES (?, ?, ?)",
                    )
                    .bind(group.key())
                    .bind(entity.key())
                    .bind(entity.kind().as_str())
                    .execute(&mut *tx)
                    .await
                },
                MembershipChange::Remove(entity) => {
                    sqlx::query(
                        "DELETE FROM dir_membership
                         WHERE group_key = ? AND member_key = ? AND member_kind = ?",
                    )
                    .bind(group.key())
                    .bind(entity.key())
                    .bind(entity.kind().as_str())
                    .execute(&mut *tx)
                    .await
                },
            };
            if let Err(e) = result {
                warn!(group = %group, error = %e, "membership commit failed, discarding staged changes");
                tx.rollback().await?;
                return Err(e.into());
            }
        }
        tx.commit().await?;

        debug!(group = %group, changes = changes.len(), "committed group membership");
        Ok(())
    }

    async fn containing_groups(&self, entity: &EntityHandle) -> Result<Vec<GroupHandle>> {
        let keys = sqlx::query_scalar::<_, String>(
            "SELECT group_key FROM dir_membership
             WHERE member_key = ? AND member_kind = ?
             ORDER BY group_key",
        )
        .bind(entity.key())
        .bind(entity.kind().as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(keys.into_iter().map(GroupHandle::new).collect())
    }
}
