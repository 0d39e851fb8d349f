//! Category membership synchronization.
//!
//! Targets are checked against the directory before the relational
//! transaction opens. Synchronization itself runs after the commit and is not
//! covered by it. Every step is idempotent, so a failed run can be repeated
//! from the targets persisted in `up_channel_category`.

use {
    chanreg_directory::{EntityKind, GroupHandle, GroupMember, MembershipDirectory},
    sqlx::SqliteConnection,
    tracing::debug,
};

use crate::{Error, Result};

/// Fail with [`Error::UnknownCategory`] unless every target is a group under
/// the category root. Runs before the write transaction opens.
pub(crate) async fn check_targets(
    directory: &dyn MembershipDirectory,
    targets: &[GroupHandle],
) -> Result<()> {
    if targets.is_empty() {
        return Ok(());
    }
    let root = directory
        .distinguished_root(EntityKind::ChannelDefinition)
        .await?;
    let members = directory.all_descendants(&root).await?;
    let known: Vec<&GroupHandle> = members.iter().filter_map(GroupMember::as_group).collect();

    match targets.iter().find(|target| !known.contains(target)) {
        Some(unknown) => Err(Error::UnknownCategory {
            key: unknown.key().to_string(),
        }),
        None => Ok(()),
    }
}

/// Move the definition's entity out of every category group, then into
/// `targets`. Each group is committed as soon as it is changed.
pub(crate) async fn synchronize(
    directory: &dyn MembershipDirectory,
    publish_id: i64,
    targets: &[GroupHandle],
) -> chanreg_directory::Result<()> {
    let kind = EntityKind::ChannelDefinition;
    let entity = directory
        .resolve_entity(&publish_id.to_string(), kind)
        .await?;
    let root = directory.distinguished_root(kind).await?;

    let members = directory.all_descendants(&root).await?;
    let mut cleared = 0usize;
    for group in members.iter().filter_map(GroupMember::as_group) {
        directory.remove_member(group, &entity).await?;
        directory.commit_membership(group).await?;
        cleared += 1;
    }

    for target in targets {
        directory.add_member(target, &entity).await?;
        directory.commit_membership(target).await?;
    }

    debug!(
        publish_id,
        cleared,
        added = targets.len(),
        "synchronized category membership"
    );
    Ok(())
}

/// Replace the persisted target categories. Runs inside the write transaction.
pub(crate) async fn replace_targets(
    conn: &mut SqliteConnection,
    publish_id: i64,
    targets: &[GroupHandle],
) -> Result<()> {
    sqlx::query("DELETE FROM up_channel_category WHERE chan_id = ?")
        .bind(publish_id)
        .execute(&mut *conn)
        .await?;
    for (ord, target) in targets.iter().enumerate() {
        sqlx::query(
            "INSERT OR IGNORE INTO up_channel_category (chan_id, category_ord, category_key)
             VALUES (?, ?, ?)",
        )
        .bind(publish_id)
        .bind(ord as i64)
        .bind(target.key())
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

/// Targets in the order they were requested.
pub(crate) async fn load_targets(
    conn: &mut SqliteConnection,
    publish_id: i64,
) -> Result<Vec<GroupHandle>> {
    let keys = sqlx::query_scalar::<_, String>(
        "SELECT category_key FROM up_channel_category WHERE chan_id = ? ORDER BY category_ord",
    )
    .bind(publish_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(keys.into_iter().map(GroupHandle::new).collect())
}
