//! Persistence trait for the campaign register.

use async_trait::async_trait;

use crate::{
    Result,
    types::{Campaign, CampaignSlot, ClaimedTarget, TargetId},
};

/// Durable single-slot campaign storage.
///
/// Each method is one atomic operation against the backend. The coordinator
/// keeps no copy of the campaign and goes through this trait for every read
/// and mutation.
#[async_trait]
pub trait CampaignStore: Send + Sync {
    /// Discard whatever the slot holds and store `campaign`.
    async fn replace(&self, campaign: &Campaign) -> Result<()>;

    async fn slot(&self) -> Result<CampaignSlot>;

    /// Whether `target` is still waiting in the active campaign. Must be
    /// cheap: it runs for every inbound event.
    async fn contains(&self, target: TargetId) -> Result<bool>;

    /// Remove `target` and increment the delivered counter in one step, if
    /// and only if `target` is still a member. `None` means someone else
    /// retired it first, or there is no campaign.
    async fn claim(&self, target: TargetId) -> Result<Option<ClaimedTarget>>;

    /// Read and delete the campaign in one step. Of two concurrent calls,
    /// at most one sees the campaign.
    async fn take(&self) -> Result<CampaignSlot>;
}
