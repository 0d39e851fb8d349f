//! Channel definition registry store.

use std::{sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    chanreg_directory::{GroupHandle, MembershipDirectory},
    chrono::{DateTime, Utc},
    sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use chanreg_metrics::{counter, registry as registry_metrics};

use crate::{
    Error, Result,
    catalog::TypeCatalog,
    categories,
    read::{DefinitionReader, ReadStrategy},
    sequence::IdAllocator,
    types::{ChannelDefinition, ChannelType, db_flag, to_millis},
};

/// Persistence for channel definitions, their approval state, and the type
/// catalog.
#[async_trait]
pub trait ChannelRegistryStore: Send + Sync {
    /// The definition if it is live now, `None` otherwise.
    async fn get_definition(&self, publish_id: i64) -> Result<Option<ChannelDefinition>>;

    /// Live read keyed by the unique short name.
    async fn get_definition_by_fname(&self, fname: &str) -> Result<Option<ChannelDefinition>>;

    /// Insert or fully replace a definition and move it into `categories`.
    ///
    /// The write always leaves the definition unapproved. A failure after the
    /// relational commit is reported as [`Error::CategorySync`].
    async fn write_definition(
        &self,
        definition: &ChannelDefinition,
        categories: &[GroupHandle],
    ) -> Result<()>;

    /// Always fails with [`Error::Unsupported`].
    async fn delete_definition(&self, publish_id: i64) -> Result<()>;

    /// `approve_date` may be in the future; the definition goes live then.
    async fn approve_definition(
        &self,
        publish_id: i64,
        approver_id: i64,
        approve_date: DateTime<Utc>,
    ) -> Result<()>;

    /// Clear the approval date. The approver id is kept as history.
    async fn disapprove_definition(&self, publish_id: i64) -> Result<()>;

    async fn channel_types(&self) -> Result<Vec<ChannelType>>;

    async fn add_channel_type(&self, channel_type: &ChannelType) -> Result<i64>;

    /// Re-run category synchronization from the committed target categories.
    async fn reconcile_categories(&self, publish_id: i64) -> Result<()>;

    /// Target categories recorded by the last committed write.
    async fn categories_of(&self, publish_id: i64) -> Result<Vec<GroupHandle>>;
}

/// Construction-time settings for [`SqliteChannelRegistryStore`].
#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub read_strategy: ReadStrategy,
    /// Upper bound on the relational phase of a write.
    pub write_timeout: Option<Duration>,
    /// Allocator sequence for channel type ids.
    pub type_sequence: String,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            read_strategy: ReadStrategy::Joined,
            write_timeout: None,
            type_sequence: "UP_CHAN_TYPE".into(),
        }
    }
}

/// SQLite-backed registry store.
pub struct SqliteChannelRegistryStore {
    pool: SqlitePool,
    reader: Arc<dyn DefinitionReader>,
    directory: Arc<dyn MembershipDirectory>,
    catalog: TypeCatalog,
    write_timeout: Option<Duration>,
}

impl SqliteChannelRegistryStore {
    /// Migrations must already have been run on `pool`.
    pub fn new(
        pool: SqlitePool,
        directory: Arc<dyn MembershipDirectory>,
        allocator: Arc<dyn IdAllocator>,
        options: StoreOptions,
    ) -> Self {
        let catalog = TypeCatalog::new(pool.clone(), allocator, options.type_sequence);
        Self {
            reader: options.read_strategy.reader(),
            pool,
            directory,
            catalog,
            write_timeout: options.write_timeout,
        }
    }

    #[must_use]
    pub fn read_strategy(&self) -> ReadStrategy {
        self.reader.strategy()
    }

    /// Live read evaluated at `now` instead of the wall clock.
    pub async fn get_definition_at(
        &self,
        publish_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<ChannelDefinition>> {
        let mut conn = self.pool.acquire().await?;
        let definition = self.reader.read(&mut conn, publish_id, now).await?;

        #[cfg(feature = "metrics")]
        counter!(registry_metrics::DEFINITION_READS_TOTAL).increment(1);

        debug!(publish_id, found = definition.is_some(), "read channel definition");
        Ok(definition)
    }

    /// [`ChannelRegistryStore::write_definition`] that also stops when
    /// `cancel` fires before the relational commit.
    pub async fn write_definition_with(
        &self,
        definition: &ChannelDefinition,
        categories: &[GroupHandle],
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.write_relational(definition, categories, cancel).await?;
        self.apply_categories(definition.publish_id, categories)
            .await
    }

    async fn write_relational(
        &self,
        definition: &ChannelDefinition,
        categories: &[GroupHandle],
        cancel: &CancellationToken,
    ) -> Result<()> {
        let publish_id = definition.publish_id;
        // The directory may share this pool, so ask it before taking a connection.
        categories::check_targets(self.directory.as_ref(), categories).await?;

        let mut tx = self.pool.begin().await?;

        let outcome = {
            let steps = write_rows(&mut tx, definition, categories);
            let limit = self.write_timeout;
            let bounded = async move {
                match limit {
                    Some(limit) => tokio::time::timeout(limit, steps)
                        .await
                        .unwrap_or_else(|_| Err(Error::DeadlineExceeded(limit))),
                    None => steps.await,
                }
            };
            tokio::select! {
                biased;
                () = cancel.cancelled() => Err(Error::Cancelled),
                result = bounded => result,
            }
        };

        match outcome {
            Ok(()) if !cancel.is_cancelled() => {
                tx.commit().await?;

                #[cfg(feature = "metrics")]
                counter!(registry_metrics::DEFINITION_WRITES_TOTAL).increment(1);

                info!(
                    publish_id,
                    parameters = definition.parameters.len(),
                    "published channel definition"
                );
                Ok(())
            },
            Ok(()) => {
                rollback(tx, publish_id).await;
                Err(Error::Cancelled)
            },
            Err(e) => {
                rollback(tx, publish_id).await;
                warn!(publish_id, error = %e, "channel definition write rolled back");
                Err(e)
            },
        }
    }

    async fn apply_categories(&self, publish_id: i64, categories: &[GroupHandle]) -> Result<()> {
        match categories::synchronize(self.directory.as_ref(), publish_id, categories).await {
            Ok(()) => Ok(()),
            Err(source) => {
                #[cfg(feature = "metrics")]
                counter!(registry_metrics::CATEGORY_SYNC_FAILURES_TOTAL).increment(1);

                warn!(
                    publish_id,
                    error = %source,
                    "definition committed but category membership is inconsistent; reconcile to repair"
                );
                Err(Error::CategorySync { publish_id, source })
            },
        }
    }
}

async fn rollback(tx: Transaction<'_, Sqlite>, publish_id: i64) {
    #[cfg(feature = "metrics")]
    counter!(registry_metrics::WRITE_ROLLBACKS_TOTAL).increment(1);

    if let Err(e) = tx.rollback().await {
        warn!(publish_id, error = %e, "rollback failed");
    }
}

/// Steps of the relational write. The caller owns the transaction.
async fn write_rows(
    conn: &mut SqliteConnection,
    definition: &ChannelDefinition,
    categories: &[GroupHandle],
) -> Result<()> {
    let publish_id = definition.publish_id;
    let published_at = to_millis(Utc::now());

    let exists = sqlx::query_scalar::<_, i64>("SELECT chan_id FROM up_channel WHERE chan_id = ?")
        .bind(publish_id)
        .fetch_optional(&mut *conn)
        .await?
        .is_some();

    if exists {
        // Editing a definition always sends it back for approval.
        debug!(publish_id, "updating channel definition");
        sqlx::query(
            "UPDATE up_channel SET
               chan_title = ?, chan_desc = ?, chan_class = ?, chan_type_id = ?,
               chan_publ_id = ?, chan_publ_dt = ?, chan_apvl_id = NULL, chan_apvl_dt = NULL,
               chan_timeout = ?, chan_editable = ?, chan_has_help = ?, chan_has_about = ?,
               chan_name = ?, chan_fname = ?
             WHERE chan_id = ?",
        )
        .bind(&definition.title)
        .bind(&definition.description)
        .bind(&definition.class_name)
        .bind(definition.type_id)
        .bind(definition.publisher_id)
        .bind(published_at)
        .bind(definition.timeout_ms)
        .bind(db_flag(definition.editable))
        .bind(db_flag(definition.has_help))
        .bind(db_flag(definition.has_about))
        .bind(&definition.name)
        .bind(&definition.fname)
        .bind(publish_id)
        .execute(&mut *conn)
        .await?;
    } else {
        debug!(publish_id, "inserting channel definition");
        sqlx::query(
            "INSERT INTO up_channel (chan_id, chan_title, chan_desc, chan_class, chan_type_id,
               chan_publ_id, chan_publ_dt, chan_timeout, chan_editable, chan_has_help,
               chan_has_about, chan_name, chan_fname)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(publish_id)
        .bind(&definition.title)
        .bind(&definition.description)
        .bind(&definition.class_name)
        .bind(definition.type_id)
        .bind(definition.publisher_id)
        .bind(published_at)
        .bind(definition.timeout_ms)
        .bind(db_flag(definition.editable))
        .bind(db_flag(definition.has_help))
        .bind(db_flag(definition.has_about))
        .bind(&definition.name)
        .bind(&definition.fname)
        .execute(&mut *conn)
        .await?;
    }

    let removed = sqlx::query("DELETE FROM up_channel_param WHERE chan_id = ?")
        .bind(publish_id)
        .execute(&mut *conn)
        .await?
        .rows_affected();
    debug!(publish_id, removed, "cleared channel parameters");

    for (index, param) in definition.parameters.iter().enumerate() {
        let name = param.storable_name(index)?;
        sqlx::query(
            "INSERT INTO up_channel_param
               (chan_id, chan_parm_ord, chan_parm_nm, chan_parm_val, chan_parm_ovrd, chan_parm_desc)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(publish_id)
        .bind(index as i64)
        .bind(name)
        .bind(&param.value)
        .bind(db_flag(param.override_allowed))
        .bind(&param.description)
        .execute(&mut *conn)
        .await?;
    }

    categories::replace_targets(conn, publish_id, categories).await
}

#[async_trait]
impl ChannelRegistryStore for SqliteChannelRegistryStore {
    async fn get_definition(&self, publish_id: i64) -> Result<Option<ChannelDefinition>> {
        self.get_definition_at(publish_id, Utc::now()).await
    }

    async fn get_definition_by_fname(&self, fname: &str) -> Result<Option<ChannelDefinition>> {
        let mut conn = self.pool.acquire().await?;
        let Some(publish_id) =
            sqlx::query_scalar::<_, i64>("SELECT chan_id FROM up_channel WHERE chan_fname = ?")
                .bind(fname)
                .fetch_optional(&mut *conn)
                .await?
        else {
            return Ok(None);
        };
        self.reader.read(&mut conn, publish_id, Utc::now()).await
    }

    async fn write_definition(
        &self,
        definition: &ChannelDefinition,
        categories: &[GroupHandle],
    ) -> Result<()> {
        self.write_definition_with(definition, categories, &CancellationToken::new())
            .await
    }

    async fn delete_definition(&self, publish_id: i64) -> Result<()> {
        debug!(publish_id, "refusing to delete channel definition");
        Err(Error::unsupported("delete_definition"))
    }

    async fn approve_definition(
        &self,
        publish_id: i64,
        approver_id: i64,
        approve_date: DateTime<Utc>,
    ) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE up_channel SET chan_apvl_id = ?, chan_apvl_dt = ? WHERE chan_id = ?",
        )
        .bind(approver_id)
        .bind(to_millis(approve_date))
        .bind(publish_id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            debug!(publish_id, "approve matched no channel definition");
        } else {
            #[cfg(feature = "metrics")]
            counter!(registry_metrics::APPROVALS_TOTAL).increment(1);

            info!(publish_id, approver_id, %approve_date, "approved channel definition");
        }
        Ok(())
    }

    async fn disapprove_definition(&self, publish_id: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query("UPDATE up_channel SET chan_apvl_dt = NULL WHERE chan_id = ?")
            .bind(publish_id)
            .execute(&mut *tx)
            .await;
        match result {
            Ok(_) => {
                tx.commit().await?;
                info!(publish_id, "disapproved channel definition");
                Ok(())
            },
            Err(e) => {
                rollback(tx, publish_id).await;
                Err(e.into())
            },
        }
    }

    async fn channel_types(&self) -> Result<Vec<ChannelType>> {
        self.catalog.list().await
    }

    async fn add_channel_type(&self, channel_type: &ChannelType) -> Result<i64> {
        let id = self.catalog.add(channel_type).await?;

        #[cfg(feature = "metrics")]
        counter!(registry_metrics::CHANNEL_TYPES_ADDED_TOTAL).increment(1);

        Ok(id)
    }

    async fn reconcile_categories(&self, publish_id: i64) -> Result<()> {
        let targets = self.categories_of(publish_id).await?;
        info!(publish_id, targets = targets.len(), "reconciling category membership");
        self.apply_categories(publish_id, &targets).await
    }

    async fn categories_of(&self, publish_id: i64) -> Result<Vec<GroupHandle>> {
        let mut conn = self.pool.acquire().await?;
        categories::load_targets(&mut conn, publish_id).await
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use {
        super::*,
        crate::{
            ErrorKind, params::ChannelParameter, sequence::SqliteSequenceAllocator,
            types::Visibility,
        },
        chanreg_directory::{
            EntityHandle, EntityKind, GroupMember, InMemoryDirectory, SqliteDirectory,
        },
        chrono::Duration as ChronoDuration,
        sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    };

    /// Directory whose `add_member` can be made to fail.
    struct FlakyDirectory {
        inner: InMemoryDirectory,
        fail_adds: AtomicBool,
    }

    #[async_trait]
    impl MembershipDirectory for FlakyDirectory {
        async fn resolve_entity(
            &self,
            key: &str,
            kind: EntityKind,
        ) -> chanreg_directory::Result<EntityHandle> {
            self.inner.resolve_entity(key, kind).await
        }

        async fn distinguished_root(
            &self,
            kind: EntityKind,
        ) -> chanreg_directory::Result<GroupHandle> {
            self.inner.distinguished_root(kind).await
        }

        async fn all_descendants(
            &self,
            group: &GroupHandle,
        ) -> chanreg_directory::Result<Vec<GroupMember>> {
            self.inner.all_descendants(group).await
        }

        async fn remove_member(
            &self,
            group: &GroupHandle,
            entity: &EntityHandle,
        ) -> chanreg_directory::Result<()> {
            self.inner.remove_member(group, entity).await
        }

        async fn add_member(
            &self,
            group: &GroupHandle,
            entity: &EntityHandle,
        ) -> chanreg_directory::Result<()> {
            if self.fail_adds.load(Ordering::SeqCst) {
                return Err(chanreg_directory::Error::message("directory unavailable"));
            }
            self.inner.add_member(group, entity).await
        }

        async fn commit_membership(&self, group: &GroupHandle) -> chanreg_directory::Result<()> {
            self.inner.commit_membership(group).await
        }

        async fn containing_groups(
            &self,
            entity: &EntityHandle,
        ) -> chanreg_directory::Result<Vec<GroupHandle>> {
            self.inner.containing_groups(entity).await
        }
    }

    async fn make_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::run_migrations(&pool).await.unwrap();
        pool
    }

    fn make_store(
        pool: &SqlitePool,
        directory: Arc<dyn MembershipDirectory>,
        strategy: ReadStrategy,
    ) -> SqliteChannelRegistryStore {
        SqliteChannelRegistryStore::new(
            pool.clone(),
            directory,
            Arc::new(SqliteSequenceAllocator::new(pool.clone())),
            StoreOptions {
                read_strategy: strategy,
                ..StoreOptions::default()
            },
        )
    }

    fn categories() -> Arc<InMemoryDirectory> {
        let dir = InMemoryDirectory::new("categories");
        dir.create_group(None, "Utilities", "Utilities").unwrap();
        dir.create_group(None, "News", "News").unwrap();
        Arc::new(dir)
    }

    fn weather() -> ChannelDefinition {
        let mut def = ChannelDefinition::new(42, "weather-ch");
        def.title = "Weather".into();
        def.description = "Local forecast".into();
        def.class_name = "org.example.WeatherChannel".into();
        def.type_id = 3;
        def.publisher_id = 11;
        def.timeout_ms = 5000;
        def.editable = true;
        def.has_about = true;
        def.name = "Weather".into();
        def.parameters.add("units", "metric", false);
        def
    }

    fn an_hour_ago() -> DateTime<Utc> {
        Utc::now() - ChronoDuration::hours(1)
    }

    async fn row_counts(pool: &SqlitePool, publish_id: i64) -> (i64, i64) {
        let channels =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM up_channel WHERE chan_id = ?")
                .bind(publish_id)
                .fetch_one(pool)
                .await
                .unwrap();
        let params =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM up_channel_param WHERE chan_id = ?")
                .bind(publish_id)
                .fetch_one(pool)
                .await
                .unwrap();
        (channels, params)
    }

    #[tokio::test]
    async fn weather_scenario() {
        let pool = make_pool().await;
        let dir = categories();
        let store = make_store(&pool, dir.clone(), ReadStrategy::Joined);

        // Start out in a category the write should remove it from.
        let news = GroupHandle::new("News");
        let handle = dir
            .resolve_entity("42", EntityKind::ChannelDefinition)
            .await
            .unwrap();
        dir.add_member(&news, &handle).await.unwrap();
        dir.commit_membership(&news).await.unwrap();

        store
            .write_definition(&weather(), &[GroupHandle::new("Utilities")])
            .await
            .unwrap();
        store
            .approve_definition(42, 7, an_hour_ago())
            .await
            .unwrap();

        let read = store.get_definition(42).await.unwrap().unwrap();
        assert_eq!(read.title, "Weather");
        assert_eq!(read.fname, "weather-ch");
        assert_eq!(read.timeout_ms, 5000);
        assert_eq!(read.approver_id, 7);
        assert_eq!(read.parameters.as_slice(), &[ChannelParameter::new(
            "units", "metric", false
        )]);
        assert_eq!(read.visibility(Utc::now()), Visibility::Live);

        assert_eq!(dir.containing_groups(&handle).await.unwrap(), vec![
            GroupHandle::new("Utilities")
        ]);
    }

    #[tokio::test]
    async fn read_back_matches_submitted_content() {
        let pool = make_pool().await;
        let store = make_store(&pool, categories(), ReadStrategy::Split);

        let mut submitted = weather();
        submitted
            .parameters
            .add("refresh", "600", true)
            .description = Some("seconds between polls".into());
        submitted.parameters.push(ChannelParameter {
            name: Some("empty".into()),
            value: None,
            override_allowed: false,
            description: None,
        });
        store.write_definition(&submitted, &[]).await.unwrap();
        let approved_at = an_hour_ago();
        store.approve_definition(42, 9, approved_at).await.unwrap();

        let read = store.get_definition(42).await.unwrap().unwrap();
        assert!(read.publish_date.is_some());
        assert_eq!(
            read.approval_date.map(|d| d.timestamp_millis()),
            Some(approved_at.timestamp_millis())
        );

        let expected = ChannelDefinition {
            approver_id: 9,
            publish_date: read.publish_date,
            approval_date: read.approval_date,
            ..submitted
        };
        assert_eq!(read, expected);
    }

    #[tokio::test]
    async fn strategies_assemble_identical_definitions() {
        let pool = make_pool().await;
        let dir = categories();
        let joined = make_store(&pool, dir.clone(), ReadStrategy::Joined);
        let split = make_store(&pool, dir, ReadStrategy::Split);

        let mut with_params = weather();
        with_params.parameters.add("units", "imperial", true);
        with_params.parameters.add("zip", "90210", false);
        joined.write_definition(&with_params, &[]).await.unwrap();

        let mut bare = ChannelDefinition::new(43, "bare");
        bare.title = "No parameters".into();
        joined.write_definition(&bare, &[]).await.unwrap();

        for id in [42, 43] {
            joined.approve_definition(id, 1, an_hour_ago()).await.unwrap();
            let a = joined.get_definition(id).await.unwrap().unwrap();
            let b = split.get_definition(id).await.unwrap().unwrap();
            assert_eq!(a, b);
        }

        let bare_read = split.get_definition(43).await.unwrap().unwrap();
        assert!(bare_read.parameters.is_empty());
        let full_read = joined.get_definition(42).await.unwrap().unwrap();
        let values: Vec<_> = full_read
            .parameters
            .iter()
            .map(|p| p.value.as_deref().unwrap())
            .collect();
        assert_eq!(values, ["metric", "imperial", "90210"]);
    }

    #[tokio::test]
    async fn unapproved_and_missing_definitions_are_absent() {
        let pool = make_pool().await;
        let store = make_store(&pool, categories(), ReadStrategy::Joined);

        assert!(store.get_definition(42).await.unwrap().is_none());
        store.write_definition(&weather(), &[]).await.unwrap();
        assert!(store.get_definition(42).await.unwrap().is_none());
        assert!(
            store
                .get_definition_by_fname("weather-ch")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn future_approval_goes_live_on_schedule() {
        let pool = make_pool().await;
        let store = make_store(&pool, categories(), ReadStrategy::Split);
        store.write_definition(&weather(), &[]).await.unwrap();

        let now = Utc::now();
        let go_live = now + ChronoDuration::hours(1);
        store.approve_definition(42, 7, go_live).await.unwrap();

        assert!(store.get_definition(42).await.unwrap().is_none());
        assert!(store.get_definition_at(42, now).await.unwrap().is_none());
        let later = store
            .get_definition_at(42, go_live + ChronoDuration::seconds(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(later.visibility(later.approval_date.unwrap()), Visibility::Live);
    }

    #[tokio::test]
    async fn rewrite_clears_approval() {
        let pool = make_pool().await;
        let store = make_store(&pool, categories(), ReadStrategy::Joined);
        store.write_definition(&weather(), &[]).await.unwrap();
        store.approve_definition(42, 7, an_hour_ago()).await.unwrap();
        assert!(store.get_definition(42).await.unwrap().is_some());

        let mut edited = weather();
        edited.title = "Weather (edited)".into();
        store.write_definition(&edited, &[]).await.unwrap();

        assert!(store.get_definition(42).await.unwrap().is_none());
        let approver = sqlx::query_scalar::<_, Option<i64>>(
            "SELECT chan_apvl_id FROM up_channel WHERE chan_id = 42",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(approver, None);

        store.approve_definition(42, 8, an_hour_ago()).await.unwrap();
        let read = store.get_definition(42).await.unwrap().unwrap();
        assert_eq!(read.title, "Weather (edited)");
        assert_eq!(read.approver_id, 8);
    }

    #[tokio::test]
    async fn disapprove_then_approve() {
        let pool = make_pool().await;
        let store = make_store(&pool, categories(), ReadStrategy::Joined);
        store.write_definition(&weather(), &[]).await.unwrap();
        store.approve_definition(42, 7, an_hour_ago()).await.unwrap();

        store.disapprove_definition(42).await.unwrap();
        assert!(store.get_definition(42).await.unwrap().is_none());
        let approver = sqlx::query_scalar::<_, Option<i64>>(
            "SELECT chan_apvl_id FROM up_channel WHERE chan_id = 42",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(approver, Some(7));

        store.approve_definition(42, 7, an_hour_ago()).await.unwrap();
        assert!(store.get_definition(42).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn invalid_parameter_leaves_nothing_behind() {
        let pool = make_pool().await;
        let store = make_store(&pool, categories(), ReadStrategy::Joined);

        let mut def = weather();
        def.parameters.push(ChannelParameter::default());
        let err = store
            .write_definition(&def, &[GroupHandle::new("News")])
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(matches!(err, Error::InvalidParameter { index: 1, .. }));
        assert_eq!(row_counts(&pool, 42).await, (0, 0));
        assert!(store.categories_of(42).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalid_parameter_keeps_previous_version() {
        let pool = make_pool().await;
        let store = make_store(&pool, categories(), ReadStrategy::Split);
        store.write_definition(&weather(), &[]).await.unwrap();
        store.approve_definition(42, 7, an_hour_ago()).await.unwrap();

        let mut broken = weather();
        broken.title = "Broken".into();
        broken.parameters.replace([ChannelParameter {
            value: Some("orphan".into()),
            ..ChannelParameter::default()
        }]);
        let err = store.write_definition(&broken, &[]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        let read = store.get_definition(42).await.unwrap().unwrap();
        assert_eq!(read.title, "Weather");
        assert_eq!(read.approver_id, 7);
        assert_eq!(read.parameters, weather().parameters);
    }

    #[tokio::test]
    async fn null_columns_read_as_zero() {
        let pool = make_pool().await;
        let approved = an_hour_ago().timestamp_millis();
        sqlx::query("INSERT INTO up_channel (chan_id, chan_apvl_dt, chan_fname) VALUES (5, ?, 'legacy')")
            .bind(approved)
            .execute(&pool)
            .await
            .unwrap();

        for strategy in [ReadStrategy::Joined, ReadStrategy::Split] {
            let store = make_store(&pool, categories(), strategy);
            let read = store.get_definition(5).await.unwrap().unwrap();
            assert_eq!(
                (read.type_id, read.publisher_id, read.approver_id, read.timeout_ms),
                (0, 0, 0, 0)
            );
            assert_eq!(read.title, "");
            assert!(!read.editable);
            assert_eq!(read.publish_date, None);
            assert_eq!(read.visibility(Utc::now()), Visibility::Live);
        }
    }

    #[tokio::test]
    async fn lookup_by_fname() {
        let pool = make_pool().await;
        let store = make_store(&pool, categories(), ReadStrategy::Joined);
        store.write_definition(&weather(), &[]).await.unwrap();
        store.approve_definition(42, 7, an_hour_ago()).await.unwrap();

        let read = store
            .get_definition_by_fname("weather-ch")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(read.publish_id, 42);
        assert!(store.get_definition_by_fname("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_is_unsupported() {
        let pool = make_pool().await;
        let store = make_store(&pool, categories(), ReadStrategy::Joined);
        let err = store.delete_definition(42).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
    }

    #[tokio::test]
    async fn cancelled_write_skips_both_phases() {
        let pool = make_pool().await;
        let dir = categories();
        let store = make_store(&pool, dir.clone(), ReadStrategy::Joined);

        let news = GroupHandle::new("News");
        let handle = dir
            .resolve_entity("42", EntityKind::ChannelDefinition)
            .await
            .unwrap();
        dir.add_member(&news, &handle).await.unwrap();
        dir.commit_membership(&news).await.unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = store
            .write_definition_with(&weather(), &[GroupHandle::new("Utilities")], &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Cancelled));
        assert_eq!(row_counts(&pool, 42).await, (0, 0));
        assert_eq!(dir.containing_groups(&handle).await.unwrap(), vec![news]);
    }

    #[tokio::test]
    async fn category_failure_is_partial_and_reconcilable() {
        let pool = make_pool().await;
        let inner = InMemoryDirectory::new("categories");
        inner.create_group(None, "Utilities", "Utilities").unwrap();
        let dir = Arc::new(FlakyDirectory {
            inner,
            fail_adds: AtomicBool::new(true),
        });
        let store = make_store(&pool, dir.clone(), ReadStrategy::Joined);
        let utilities = GroupHandle::new("Utilities");

        let err = store
            .write_definition(&weather(), std::slice::from_ref(&utilities))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PartialConsistency);
        assert!(matches!(err, Error::CategorySync { publish_id: 42, .. }));

        // The relational write stands.
        assert_eq!(row_counts(&pool, 42).await, (1, 1));
        assert_eq!(store.categories_of(42).await.unwrap(), vec![utilities.clone()]);
        let handle = dir
            .resolve_entity("42", EntityKind::ChannelDefinition)
            .await
            .unwrap();
        assert!(dir.containing_groups(&handle).await.unwrap().is_empty());

        dir.fail_adds.store(false, Ordering::SeqCst);
        store.reconcile_categories(42).await.unwrap();
        store.reconcile_categories(42).await.unwrap();
        assert_eq!(dir.containing_groups(&handle).await.unwrap(), vec![utilities]);
    }

    #[tokio::test]
    async fn unknown_category_rejects_the_whole_write() {
        let pool = make_pool().await;
        let dir = categories();
        let store = make_store(&pool, dir.clone(), ReadStrategy::Joined);
        let news = GroupHandle::new("News");
        store
            .write_definition(&weather(), std::slice::from_ref(&news))
            .await
            .unwrap();

        let mut edited = weather();
        edited.title = "Weather (edited)".into();
        let err = store
            .write_definition(&edited, &[GroupHandle::new("Nwes")])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(matches!(err, Error::UnknownCategory { ref key } if key == "Nwes"));

        let title = sqlx::query_scalar::<_, String>(
            "SELECT chan_title FROM up_channel WHERE chan_id = 42",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(title, "Weather");
        assert_eq!(store.categories_of(42).await.unwrap(), vec![news.clone()]);
        let handle = dir
            .resolve_entity("42", EntityKind::ChannelDefinition)
            .await
            .unwrap();
        assert_eq!(dir.containing_groups(&handle).await.unwrap(), vec![
            news.clone()
        ]);

        // Nothing bad was recorded, so reconcile still works.
        store.reconcile_categories(42).await.unwrap();
        assert_eq!(dir.containing_groups(&handle).await.unwrap(), vec![news]);

        let fresh = ChannelDefinition::new(43, "fresh");
        let err = store
            .write_definition(&fresh, &[GroupHandle::new("Nwes")])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert_eq!(row_counts(&pool, 43).await, (0, 0));
    }

    #[tokio::test]
    async fn deadline_rolls_back_the_write() {
        let tmp = tempfile::tempdir().unwrap();
        let options = SqliteConnectOptions::new()
            .filename(tmp.path().join("registry.db"))
            .create_if_missing(true)
            .busy_timeout(Duration::from_millis(500));
        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await
            .unwrap();
        crate::run_migrations(&pool).await.unwrap();

        let limit = Duration::from_millis(50);
        let store = SqliteChannelRegistryStore::new(
            pool.clone(),
            categories(),
            Arc::new(SqliteSequenceAllocator::new(pool.clone())),
            StoreOptions {
                write_timeout: Some(limit),
                ..StoreOptions::default()
            },
        );

        // Hold the database lock for longer than the deadline.
        let mut holder = pool.acquire().await.unwrap();
        sqlx::query("BEGIN EXCLUSIVE")
            .execute(&mut *holder)
            .await
            .unwrap();

        let err = store
            .write_definition(&weather(), &[GroupHandle::new("Utilities")])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DeadlineExceeded(d) if d == limit));
        assert_eq!(err.kind(), ErrorKind::Cancelled);

        sqlx::query("ROLLBACK").execute(&mut *holder).await.unwrap();
        drop(holder);

        assert_eq!(row_counts(&pool, 42).await, (0, 0));
        assert!(store.categories_of(42).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn storage_failure_mid_write_rolls_back() {
        let pool = make_pool().await;
        let dir = categories();
        let store = make_store(&pool, dir.clone(), ReadStrategy::Split);
        store.write_definition(&weather(), &[]).await.unwrap();

        // Same fname under another publish id violates the unique index.
        let mut clash = ChannelDefinition::new(2, "weather-ch");
        clash.parameters.add("units", "imperial", false);
        let err = store
            .write_definition(&clash, &[GroupHandle::new("News")])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Storage);
        assert!(matches!(err, Error::Sqlx(_)));

        assert_eq!(row_counts(&pool, 2).await, (0, 0));
        assert!(store.categories_of(2).await.unwrap().is_empty());
        let handle = dir
            .resolve_entity("2", EntityKind::ChannelDefinition)
            .await
            .unwrap();
        assert!(dir.containing_groups(&handle).await.unwrap().is_empty());
        assert_eq!(row_counts(&pool, 42).await, (1, 1));
    }

    #[tokio::test]
    async fn failed_disapprove_rolls_back() {
        let pool = make_pool().await;
        let store = make_store(&pool, categories(), ReadStrategy::Joined);
        store.write_definition(&weather(), &[]).await.unwrap();
        store.approve_definition(42, 7, an_hour_ago()).await.unwrap();

        sqlx::query(
            "CREATE TRIGGER keep_approval BEFORE UPDATE OF chan_apvl_dt ON up_channel
             WHEN NEW.chan_apvl_dt IS NULL
             BEGIN SELECT RAISE(ABORT, 'approval is locked'); END",
        )
        .execute(&pool)
        .await
        .unwrap();

        let err = store.disapprove_definition(42).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Storage);

        // Still live, and the single pooled connection was handed back.
        let read = store.get_definition(42).await.unwrap().unwrap();
        assert_eq!(read.approver_id, 7);
    }

    #[tokio::test]
    async fn sqlite_directory_follows_rewrites() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        chanreg_directory::run_migrations(&pool).await.unwrap();
        crate::run_migrations(&pool).await.unwrap();

        let dir = Arc::new(SqliteDirectory::open(pool.clone(), "categories").await.unwrap());
        let news = dir.create_group(None, "News", "News").await.unwrap();
        let utilities = dir
            .create_group(None, "Utilities", "Utilities")
            .await
            .unwrap();
        let store = make_store(&pool, dir.clone(), ReadStrategy::Joined);
        let handle = dir
            .resolve_entity("42", EntityKind::ChannelDefinition)
            .await
            .unwrap();

        store
            .write_definition(&weather(), std::slice::from_ref(&news))
            .await
            .unwrap();
        assert_eq!(dir.containing_groups(&handle).await.unwrap(), vec![news]);

        store
            .write_definition(&weather(), std::slice::from_ref(&utilities))
            .await
            .unwrap();
        assert_eq!(dir.containing_groups(&handle).await.unwrap(), vec![
            utilities.clone()
        ]);

        let err = store
            .write_definition(&weather(), &[GroupHandle::new("Nwes")])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert_eq!(dir.containing_groups(&handle).await.unwrap(), vec![utilities]);
    }

    #[tokio::test]
    async fn channel_types_through_the_store() {
        let pool = make_pool().await;
        let store = make_store(&pool, categories(), ReadStrategy::Joined);
        assert!(store.channel_types().await.unwrap().is_empty());

        let id = store
            .add_channel_type(&ChannelType {
                class_name: "x.Y".into(),
                name: "RSS".into(),
                description: "Feed".into(),
                definition_uri: "u".into(),
                ..ChannelType::default()
            })
            .await
            .unwrap();
        let types = store.channel_types().await.unwrap();
        assert_eq!(types.len(), 1);
        assert_eq!(types[0].id, id);
        assert_eq!(types[0].name, "RSS");
    }
}
