use {
    chanreg_registry::{ChannelRegistryStore, ChannelType},
    clap::Subcommand,
};

use crate::App;

#[derive(Subcommand)]
pub enum TypeAction {
    /// List the channel type catalog.
    List,
    /// Register a channel type. Prints the allocated id.
    Add {
        /// Implementation class rendering channels of this type.
        #[arg(long = "class")]
        class_name: String,
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "")]
        description: String,
        /// URI of the channel publishing document.
        #[arg(long)]
        uri: String,
    },
}

pub async fn handle_types(action: TypeAction, app: &App) -> anyhow::Result<()> {
    match action {
        TypeAction::List => {
            let types = app.store.channel_types().await?;
            if types.is_empty() {
                println!("No channel types registered.");
            }
            for t in &types {
                println!("{:>6}  {}  {}  {}", t.id, t.name, t.class_name, t.definition_uri);
                if !t.description.is_empty() {
                    println!("        {}", t.description);
                }
            }
        },
        TypeAction::Add {
            class_name,
            name,
            description,
            uri,
        } => {
            let channel_type = ChannelType {
                id: 0,
                class_name,
                name,
                description,
                definition_uri: uri,
            };
            let id = app.store.add_channel_type(&channel_type).await?;
            println!("{id}");
        },
    }
    Ok(())
}
