//! Capabilities the coordinator needs from the transport.

use async_trait::async_trait;

use crate::{
    Result,
    types::{BroadcastPayload, TargetId},
};

/// Send the payload to one target.
///
/// Failures are reported back as [`Error::DeliveryFailure`](crate::Error::DeliveryFailure);
/// the coordinator never retries.
#[async_trait]
pub trait DeliveryAdapter: Send + Sync {
    async fn deliver(&self, target: TargetId, payload: &BroadcastPayload) -> Result<()>;
}

/// Resolve the full target set for a new campaign.
#[async_trait]
pub trait TargetResolver: Send + Sync {
    async fn resolve_targets(&self) -> Result<Vec<TargetId>>;
}

/// Fixed target list.
pub struct StaticTargets(pub Vec<TargetId>);

#[async_trait]
impl TargetResolver for StaticTargets {
    async fn resolve_targets(&self) -> Result<Vec<TargetId>> {
        Ok(self.0.clone())
    }
}
