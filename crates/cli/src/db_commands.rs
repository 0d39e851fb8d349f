use {chanreg_config::ChanregConfig, clap::Subcommand};

#[derive(Subcommand)]
pub enum DbAction {
    /// Run all pending database migrations.
    Migrate,
}

pub async fn handle_db(action: DbAction, config: &ChanregConfig) -> anyhow::Result<()> {
    match action {
        DbAction::Migrate => run_migrations(config).await,
    }
}

/// Run database migrations for the directory and registry tables.
async fn run_migrations(config: &ChanregConfig) -> anyhow::Result<()> {
    println!("Running migrations on {}...", config.database.url);
    let pool = crate::connect(config).await?;
    pool.close().await;
    println!("Migrations complete.");
    Ok(())
}
