use std::path::{Path, PathBuf};

use {
    anyhow::{Result, bail},
    clap::Subcommand,
};

use herald_config::HeraldConfig;

use crate::runtime;

#[derive(Subcommand)]
pub enum DbAction {
    /// Delete the database file. Campaigns, jobs and known chats are lost.
    Reset,
    /// Run all pending database migrations.
    Migrate,
}

pub async fn handle_db(config: &HeraldConfig, action: DbAction) -> Result<()> {
    match action {
        DbAction::Reset => {
            if config.database.url.is_some() {
                bail!("reset only manages the default database; remove the configured one by hand");
            }
            reset(&default_db_path())
        },
        DbAction::Migrate => {
            let pool = runtime::open_database(config).await?;
            pool.close().await;
            println!("All migrations complete.");
            Ok(())
        },
    }
}

fn default_db_path() -> PathBuf {
    herald_config::data_dir().join("herald.db")
}

/// Delete the database along with the WAL and SHM files SQLite may have left.
fn reset(db: &Path) -> Result<()> {
    let mut deleted = false;
    for suffix in ["", "-wal", "-shm"] {
        let path = if suffix.is_empty() {
            db.to_path_buf()
        } else {
            db.with_extension(format!("db{suffix}"))
        };
        if path.exists() {
            std::fs::remove_file(&path)?;
            println!("Deleted: {}", path.display());
            deleted = true;
        }
    }

    if deleted {
        println!("Database deleted. Run `herald db migrate` to recreate it.");
    } else {
        println!("No database files found.");
    }
    Ok(())
}
