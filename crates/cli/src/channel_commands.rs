use std::path::{Path, PathBuf};

use {
    anyhow::Context,
    chanreg_directory::GroupHandle,
    chanreg_registry::{ChannelDefinition, ChannelRegistryStore, ErrorKind},
    chrono::{DateTime, Utc},
    clap::Subcommand,
    tokio_util::sync::CancellationToken,
    tracing::warn,
};

use crate::App;

#[derive(Subcommand)]
pub enum ChannelAction {
    /// Print a live channel definition as JSON.
    Get { id: i64 },
    /// Print a live channel definition looked up by its short name.
    GetFname { fname: String },
    /// Publish (insert or replace) a definition from a JSON file.
    ///
    /// The definition is left unapproved.
    Publish {
        file: PathBuf,
        /// Target category key. Repeat for several categories.
        #[arg(long = "category")]
        categories: Vec<String>,
    },
    /// Approve a definition, effective now or at `--at`.
    Approve {
        id: i64,
        #[arg(long)]
        approver: i64,
        /// RFC 3339 timestamp; may be in the future.
        #[arg(long, value_parser = parse_rfc3339)]
        at: Option<DateTime<Utc>>,
    },
    /// Withdraw approval of a definition.
    Disapprove { id: i64 },
    /// Delete a definition (not supported by the registry).
    Delete { id: i64 },
    /// Repair category membership from the last committed publish.
    Reconcile { id: i64 },
}

pub async fn handle_channel(action: ChannelAction, app: &App) -> anyhow::Result<()> {
    match action {
        ChannelAction::Get { id } => {
            let definition = app.store.get_definition(id).await?;
            print_definition(definition, &id.to_string())
        },
        ChannelAction::GetFname { fname } => {
            let definition = app.store.get_definition_by_fname(&fname).await?;
            print_definition(definition, &fname)
        },
        ChannelAction::Publish { file, categories } => publish(app, &file, categories).await,
        ChannelAction::Approve { id, approver, at } => {
            let at = at.unwrap_or_else(Utc::now);
            app.store.approve_definition(id, approver, at).await?;
            println!("Approved channel {id} effective {}.", at.to_rfc3339());
            Ok(())
        },
        ChannelAction::Disapprove { id } => {
            app.store.disapprove_definition(id).await?;
            println!("Withdrew approval of channel {id}.");
            Ok(())
        },
        ChannelAction::Delete { id } => {
            app.store.delete_definition(id).await?;
            Ok(())
        },
        ChannelAction::Reconcile { id } => {
            app.store.reconcile_categories(id).await?;
            println!("Category membership of channel {id} reconciled.");
            Ok(())
        },
    }
}

fn print_definition(definition: Option<ChannelDefinition>, key: &str) -> anyhow::Result<()> {
    match definition {
        Some(definition) => {
            println!("{}", serde_json::to_string_pretty(&definition)?);
            Ok(())
        },
        None => anyhow::bail!("no live channel definition for '{key}'"),
    }
}

async fn publish(app: &App, file: &Path, categories: Vec<String>) -> anyhow::Result<()> {
    let definition = read_definition(file)?;
    let categories: Vec<GroupHandle> = categories.into_iter().map(GroupHandle::new).collect();
    let publish_id = definition.publish_id;

    // Ctrl-C before the commit abandons the whole write.
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let result = app
        .store
        .write_definition_with(&definition, &categories, &cancel)
        .await;
    watcher.abort();

    match result {
        Ok(()) => {
            println!(
                "Published channel {publish_id} ({} parameters), awaiting approval.",
                definition.parameters.len()
            );
            Ok(())
        },
        Err(e) if e.kind() == ErrorKind::PartialConsistency => {
            warn!(publish_id, error = %e, "category membership not updated");
            eprintln!(
                "Channel {publish_id} was saved but its categories were not updated.\n\
                 Run `chanreg channel reconcile {publish_id}` to repair."
            );
            Err(e.into())
        },
        Err(e) => Err(e.into()),
    }
}

fn read_definition(file: &Path) -> anyhow::Result<ChannelDefinition> {
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid definition in {}", file.display()))
}

fn parse_rfc3339(s: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| format!("expected an RFC 3339 timestamp: {e}"))
}
