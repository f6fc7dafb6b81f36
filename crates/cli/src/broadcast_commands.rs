use {anyhow::Result, clap::Subcommand};

use {
    herald_broadcast::{CampaignSlot, store::CampaignStore, store_sqlite::SqliteCampaignStore},
    herald_config::HeraldConfig,
};

use crate::runtime;

#[derive(Subcommand)]
pub enum BroadcastAction {
    /// Show the persisted campaign.
    Status,
    /// Delete the persisted campaign. A running bot stops delivering it on
    /// the next inbound message.
    Stop,
}

pub async fn handle_broadcast(config: &HeraldConfig, action: BroadcastAction) -> Result<()> {
    let pool = runtime::open_database(config).await?;
    let store = SqliteCampaignStore::with_pool(pool.clone());

    match action {
        BroadcastAction::Status => match store.slot().await? {
            CampaignSlot::Empty => println!("No active broadcast."),
            CampaignSlot::Active(campaign) => {
                println!("Campaign:  {}", campaign.id);
                println!("Started:   {}", crate::format_ms(campaign.created_at_ms));
                println!(
                    "Delivered: {} of {}",
                    campaign.delivered_count, campaign.total_targets
                );
                println!("Remaining: {}", campaign.remaining());
                println!("Message:\n{}", campaign.payload.text);
            },
        },
        BroadcastAction::Stop => match store.take().await? {
            CampaignSlot::Empty => println!("No active broadcast."),
            CampaignSlot::Active(campaign) => println!(
                "Broadcast stopped. It was sent to {} chats.",
                campaign.delivered_count
            ),
        },
    }

    pool.close().await;
    Ok(())
}
