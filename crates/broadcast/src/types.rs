//! Campaign data model.

use std::{collections::BTreeSet, fmt};

use serde::{Deserialize, Serialize};

/// Address of one delivery target (a chat id on Telegram).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TargetId(pub i64);

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for TargetId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Message content delivered to every target. Opaque to the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastPayload {
    pub text: String,
}

impl BroadcastPayload {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// One broadcast operation's persisted state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Campaign {
    pub id: String,
    pub payload: BroadcastPayload,
    /// Targets not yet attempted. Only ever shrinks.
    pub targets: BTreeSet<TargetId>,
    /// Size of the resolved target set at creation.
    pub total_targets: u64,
    pub delivered_count: u64,
    pub created_at_ms: u64,
}

impl Campaign {
    /// New campaign over `targets`; duplicates collapse.
    pub fn new(
        payload: BroadcastPayload,
        targets: impl IntoIterator<Item = TargetId>,
        created_at_ms: u64,
    ) -> Self {
        let targets: BTreeSet<TargetId> = targets.into_iter().collect();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            payload,
            total_targets: targets.len() as u64,
            targets,
            delivered_count: 0,
            created_at_ms,
        }
    }

    #[must_use]
    pub fn remaining(&self) -> u64 {
        self.targets.len() as u64
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.targets.is_empty()
    }

    /// `delivered_count + |targets| == total_targets`.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.delivered_count + self.remaining() == self.total_targets
    }
}

/// The single campaign register.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CampaignSlot {
    #[default]
    Empty,
    Active(Campaign),
}

impl CampaignSlot {
    #[must_use]
    pub fn active(&self) -> Option<&Campaign> {
        match self {
            Self::Active(campaign) => Some(campaign),
            Self::Empty => None,
        }
    }

    #[must_use]
    pub fn into_active(self) -> Option<Campaign> {
        match self {
            Self::Active(campaign) => Some(campaign),
            Self::Empty => None,
        }
    }
}

impl From<Option<Campaign>> for CampaignSlot {
    fn from(campaign: Option<Campaign>) -> Self {
        campaign.map_or(Self::Empty, Self::Active)
    }
}

/// Result of atomically retiring a target from the active campaign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimedTarget {
    pub campaign_id: String,
    pub payload: BroadcastPayload,
    /// Counter value after this claim.
    pub delivered_count: u64,
    pub remaining: u64,
}

/// What the hot path did with one inbound event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// Origin not in the campaign (or no campaign).
    Ignored,
    Delivered,
    /// Target retired, but the adapter reported an error. Not retried.
    Failed,
}

/// Progress snapshot of the active campaign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignProgress {
    pub id: String,
    pub total_targets: u64,
    pub delivered_count: u64,
    pub remaining: u64,
    pub created_at_ms: u64,
}

impl From<&Campaign> for CampaignProgress {
    fn from(c: &Campaign) -> Self {
        Self {
            id: c.id.clone(),
            total_targets: c.total_targets,
            delivered_count: c.delivered_count,
            remaining: c.remaining(),
            created_at_ms: c.created_at_ms,
        }
    }
}

/// Coordinator status for operators.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastStatus {
    /// Whether the coordinator currently listens to inbound events.
    pub subscribed: bool,
    pub campaign: Option<CampaignProgress>,
}
