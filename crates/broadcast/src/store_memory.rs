//! In-memory campaign store for tests and ephemeral setups.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::{
    Result,
    store::CampaignStore,
    types::{Campaign, CampaignSlot, ClaimedTarget, TargetId},
};

/// Campaign register behind a mutex. Nothing survives a restart.
#[derive(Default)]
pub struct InMemoryCampaignStore {
    slot: Mutex<CampaignSlot>,
}

impl InMemoryCampaignStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CampaignStore for InMemoryCampaignStore {
    async fn replace(&self, campaign: &Campaign) -> Result<()> {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        *slot = CampaignSlot::Active(campaign.clone());
        Ok(())
    }

    async fn slot(&self) -> Result<CampaignSlot> {
        let slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        Ok(slot.clone())
    }

    async fn contains(&self, target: TargetId) -> Result<bool> {
        let slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        Ok(slot.active().is_some_and(|c| c.targets.contains(&target)))
    }

    async fn claim(&self, target: TargetId) -> Result<Option<ClaimedTarget>> {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        let CampaignSlot::Active(campaign) = &mut *slot else {
            return Ok(None);
        };
        if !campaign.targets.remove(&target) {
            return Ok(None);
        }
        campaign.delivered_count += 1;
        Ok(Some(ClaimedTarget {
            campaign_id: campaign.id.clone(),
            payload: campaign.payload.clone(),
            delivered_count: campaign.delivered_count,
            remaining: campaign.remaining(),
        }))
    }

    async fn take(&self) -> Result<CampaignSlot> {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        Ok(std::mem::take(&mut *slot))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, crate::types::BroadcastPayload};

    #[tokio::test]
    async fn claim_is_conditional() {
        let store = InMemoryCampaignStore::new();
        assert!(store.claim(TargetId(1)).await.unwrap().is_none());

        let campaign = Campaign::new(BroadcastPayload::text("hi"), [TargetId(1), TargetId(2)], 0);
        store.replace(&campaign).await.unwrap();

        let claimed = store.claim(TargetId(1)).await.unwrap().unwrap();
        assert_eq!(claimed.delivered_count, 1);
        assert_eq!(claimed.remaining, 1);
        assert!(store.claim(TargetId(1)).await.unwrap().is_none());
        assert!(!store.contains(TargetId(1)).await.unwrap());
        assert!(store.contains(TargetId(2)).await.unwrap());
    }

    #[tokio::test]
    async fn take_empties_the_slot() {
        let store = InMemoryCampaignStore::new();
        let campaign = Campaign::new(BroadcastPayload::text("hi"), [TargetId(1)], 0);
        store.replace(&campaign).await.unwrap();

        assert_eq!(store.take().await.unwrap(), CampaignSlot::Active(campaign));
        assert_eq!(store.take().await.unwrap(), CampaignSlot::Empty);
        assert_eq!(store.slot().await.unwrap(), CampaignSlot::Empty);
    }
}
