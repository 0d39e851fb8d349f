use {
    chanreg_directory::{EntityKind, GroupHandle, MembershipDirectory},
    chanreg_registry::ChannelRegistryStore,
    clap::Subcommand,
};

use crate::App;

#[derive(Subcommand)]
pub enum CategoryAction {
    /// Create a category under `--parent` (the category root by default).
    Create {
        key: String,
        #[arg(long)]
        parent: Option<String>,
        /// Display name; defaults to the key.
        #[arg(long)]
        name: Option<String>,
    },
    /// Show the categories a channel definition belongs to.
    MembersOf {
        /// Publish id of the channel definition.
        id: i64,
    },
}

pub async fn handle_category(action: CategoryAction, app: &App) -> anyhow::Result<()> {
    match action {
        CategoryAction::Create { key, parent, name } => {
            let parent = parent.map(GroupHandle::new);
            let group = app
                .directory
                .create_group(parent.as_ref(), &key, name.as_deref().unwrap_or(&key))
                .await?;
            println!("Created category '{group}'.");
        },
        CategoryAction::MembersOf { id } => {
            let recorded = app.store.categories_of(id).await?;
            let entity = app
                .directory
                .resolve_entity(&id.to_string(), EntityKind::ChannelDefinition)
                .await?;
            let actual = app.directory.containing_groups(&entity).await?;

            for group in &actual {
                println!("{group}");
            }
            let mut missing = recorded.iter().filter(|g| !actual.contains(g)).peekable();
            if missing.peek().is_some() {
                eprintln!("Membership is behind the last publish; missing:");
                for group in missing {
                    eprintln!("  {group}");
                }
                eprintln!("Run `chanreg channel reconcile {id}` to repair.");
            }
        },
    }
    Ok(())
}
