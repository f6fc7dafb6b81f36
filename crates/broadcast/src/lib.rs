//! Resumable broadcast delivery.
//!
//! A campaign fans one payload out to a shrinking set of targets. Delivery
//! piggybacks on inbound traffic: when a target produces an event, the
//! coordinator retires it from the persisted campaign and hands the payload
//! to the delivery adapter. Campaign state lives only in the
//! [`store::CampaignStore`], so a restarted process picks up where it left
//! off with [`coordinator::BroadcastCoordinator::resume`].

pub mod commands;
pub mod coordinator;
pub mod delivery;
pub mod error;
pub mod events;
pub mod jobs;
pub mod store;
pub mod store_memory;
pub mod store_sqlite;
pub mod types;

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod testing;

pub use {
    commands::BroadcastCommands,
    coordinator::BroadcastCoordinator,
    delivery::{DeliveryAdapter, StaticTargets, TargetResolver},
    error::{Context, Error, Result},
    events::{EventListener, EventSource, InboundEvent, ListenerRegistry, Subscription},
    types::{BroadcastPayload, BroadcastStatus, Campaign, CampaignSlot, EventOutcome, TargetId},
};

/// Run database migrations for the broadcast crate.
///
/// This creates the `broadcast_campaigns` and `broadcast_targets` tables.
pub async fn run_migrations(pool: &sqlx::SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .set_ignore_missing(true)
        .run(pool)
        .await?;
    Ok(())
}
