//! Telegram transport for herald.
//!
//! Long-polls the Bot API, records every chat that produces traffic, fans
//! inbound messages out to broadcast listeners and answers operator
//! commands. [`outbound::TelegramOutbound`] is the broadcast delivery
//! adapter and [`chats::ChatDirectory`] its target resolver.

pub mod access;
pub mod bot;
pub mod chats;
pub mod error;
pub mod handlers;
pub mod outbound;

pub use {
    access::Operators,
    chats::ChatDirectory,
    error::{Context, Error, Result},
    handlers::{MessageContext, OperatorCommands},
    outbound::TelegramOutbound,
};

/// Run database migrations for the telegram crate.
///
/// This creates the `telegram_chats` table.
pub async fn run_migrations(pool: &sqlx::SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .set_ignore_missing(true)
        .run(pool)
        .await?;
    Ok(())
}
