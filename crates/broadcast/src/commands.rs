//! Operator command surface.
//!
//! Each command returns the reply text for the operator. A missing campaign
//! is an ordinary answer, not an error; store failures propagate.

use std::sync::Arc;

use crate::{
    Error, Result,
    coordinator::BroadcastCoordinator,
    delivery::TargetResolver,
    types::BroadcastPayload,
};

const NO_CAMPAIGN: &str = "There is no active broadcast.";

pub struct BroadcastCommands {
    coordinator: Arc<BroadcastCoordinator>,
    resolver: Arc<dyn TargetResolver>,
}

impl BroadcastCommands {
    pub fn new(coordinator: Arc<BroadcastCoordinator>, resolver: Arc<dyn TargetResolver>) -> Self {
        Self {
            coordinator,
            resolver,
        }
    }

    pub fn coordinator(&self) -> &Arc<BroadcastCoordinator> {
        &self.coordinator
    }

    pub async fn start(&self, text: &str) -> Result<String> {
        let text = text.trim();
        if text.is_empty() {
            return Ok("Usage: /sbroadcast <message>".to_string());
        }
        let campaign = self
            .coordinator
            .start(BroadcastPayload::text(text), self.resolver.as_ref())
            .await?;
        Ok(format!(
            "Smart broadcast planned for {} chats.",
            campaign.total_targets
        ))
    }

    pub async fn stop(&self) -> Result<String> {
        match self.coordinator.stop().await {
            Ok(delivered) => Ok(format!(
                "Smart broadcast stopped. It was sent to {delivered} chats."
            )),
            Err(Error::NoActiveCampaign) => Ok(NO_CAMPAIGN.to_string()),
            Err(e) => Err(e),
        }
    }

    pub async fn resume(&self) -> Result<String> {
        match self.coordinator.resume().await {
            Ok(campaign) => Ok(format!(
                "Broadcast resumed: {} of {} chats still waiting.",
                campaign.remaining(),
                campaign.total_targets
            )),
            Err(Error::NoActiveCampaign) => Ok(NO_CAMPAIGN.to_string()),
            Err(e) => Err(e),
        }
    }

    pub async fn status(&self) -> Result<String> {
        let status = self.coordinator.status().await?;
        let Some(progress) = status.campaign else {
            return Ok(NO_CAMPAIGN.to_string());
        };
        Ok(format!(
            "Broadcast {}: sent to {} of {} chats, {} waiting. Listener {}.",
            progress.id,
            progress.delivered_count,
            progress.total_targets,
            progress.remaining,
            if status.subscribed { "active" } else { "paused" },
        ))
    }
}
