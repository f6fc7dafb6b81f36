//! Broadcast coordinator: campaign lifecycle and the inbound-event hot path.

use std::{
    sync::{Arc, Mutex, Weak},
    time::{SystemTime, UNIX_EPOCH},
};

use {
    async_trait::async_trait,
    herald_common::Reportable,
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use herald_metrics::{broadcast as broadcast_metrics, counter, gauge};

use crate::{
    Error, Result,
    delivery::{DeliveryAdapter, TargetResolver},
    events::{EventListener, EventSource, InboundEvent, Subscription},
    store::CampaignStore,
    types::{BroadcastPayload, BroadcastStatus, Campaign, CampaignProgress, EventOutcome},
};

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Owns the lifecycle of the single active campaign.
///
/// Campaign state lives only in the [`CampaignStore`]; the coordinator holds
/// its event subscription and nothing else.
pub struct BroadcastCoordinator {
    store: Arc<dyn CampaignStore>,
    delivery: Arc<dyn DeliveryAdapter>,
    source: Arc<dyn EventSource>,
    subscription: Mutex<Option<Subscription>>,
    this: Weak<Self>,
}

impl BroadcastCoordinator {
    pub fn new(
        store: Arc<dyn CampaignStore>,
        delivery: Arc<dyn DeliveryAdapter>,
        source: Arc<dyn EventSource>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            store,
            delivery,
            source,
            subscription: Mutex::new(None),
            this: this.clone(),
        })
    }

    /// Discard any existing campaign, persist a new one over the resolved
    /// targets and listen for inbound events.
    pub async fn start(
        &self,
        payload: BroadcastPayload,
        resolver: &dyn TargetResolver,
    ) -> Result<Campaign> {
        let targets = resolver.resolve_targets().await?;
        let campaign = Campaign::new(payload, targets, now_ms());
        self.store.replace(&campaign).await?;
        self.ensure_subscribed();

        #[cfg(feature = "metrics")]
        {
            counter!(broadcast_metrics::CAMPAIGNS_STARTED_TOTAL).increment(1);
            gauge!(broadcast_metrics::TARGETS_REMAINING).set(campaign.total_targets as f64);
        }

        info!(id = %campaign.id, targets = campaign.total_targets, "broadcast started");
        Ok(campaign)
    }

    /// Stop listening, then read and delete the campaign. Returns how many
    /// targets were served.
    pub async fn stop(&self) -> Result<u64> {
        self.unsubscribe();
        let campaign = self
            .store
            .take()
            .await?
            .into_active()
            .ok_or(Error::NoActiveCampaign)?;

        #[cfg(feature = "metrics")]
        gauge!(broadcast_metrics::TARGETS_REMAINING).set(0.0);

        info!(
            id = %campaign.id,
            delivered = campaign.delivered_count,
            remaining = campaign.remaining(),
            "broadcast stopped"
        );
        Ok(campaign.delivered_count)
    }

    /// Listen again for the persisted campaign, without re-resolving targets.
    pub async fn resume(&self) -> Result<Campaign> {
        let campaign = self
            .store
            .slot()
            .await?
            .into_active()
            .ok_or(Error::NoActiveCampaign)?;
        self.ensure_subscribed();

        #[cfg(feature = "metrics")]
        gauge!(broadcast_metrics::TARGETS_REMAINING).set(campaign.remaining() as f64);

        info!(
            id = %campaign.id,
            delivered = campaign.delivered_count,
            remaining = campaign.remaining(),
            "broadcast resumed"
        );
        Ok(campaign)
    }

    /// Hot path, run for every inbound event while subscribed.
    ///
    /// The target is retired (removed and counted) before the adapter is
    /// called, so two events from the same origin can never both deliver.
    pub async fn on_inbound_event(&self, event: &InboundEvent) -> Result<EventOutcome> {
        let target = event.origin;

        #[cfg(feature = "metrics")]
        counter!(broadcast_metrics::EVENTS_CHECKED_TOTAL).increment(1);

        if !self.store.contains(target).await? {
            return Ok(EventOutcome::Ignored);
        }
        let Some(claimed) = self.store.claim(target).await? else {
            debug!(%target, "target already retired by a concurrent event");
            return Ok(EventOutcome::Ignored);
        };

        #[cfg(feature = "metrics")]
        {
            counter!(broadcast_metrics::DELIVERIES_TOTAL).increment(1);
            gauge!(broadcast_metrics::TARGETS_REMAINING).set(claimed.remaining as f64);
        }

        let outcome = match self.delivery.deliver(target, &claimed.payload).await {
            Ok(()) => {
                debug!(%target, campaign = %claimed.campaign_id, "broadcast delivered");
                EventOutcome::Delivered
            },
            Err(e) => {
                #[cfg(feature = "metrics")]
                counter!(broadcast_metrics::DELIVERY_FAILURES_TOTAL).increment(1);
                warn!(%target, campaign = %claimed.campaign_id, error = %e, "broadcast delivery failed, not retrying");
                EventOutcome::Failed
            },
        };

        if claimed.remaining == 0 {
            info!(
                campaign = %claimed.campaign_id,
                delivered = claimed.delivered_count,
                "broadcast reached every target"
            );
        }
        Ok(outcome)
    }

    pub async fn status(&self) -> Result<BroadcastStatus> {
        let slot = self.store.slot().await?;
        Ok(BroadcastStatus {
            subscribed: self.is_subscribed(),
            campaign: slot.active().map(CampaignProgress::from),
        })
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(Subscription::is_active)
    }

    /// Subscribe unless a live subscription is already held.
    fn ensure_subscribed(&self) {
        let mut subscription = self.subscription.lock().unwrap_or_else(|e| e.into_inner());
        if subscription.as_ref().is_some_and(Subscription::is_active) {
            return;
        }
        let listener = Arc::new(CampaignListener {
            coordinator: self.this.clone(),
        });
        *subscription = Some(Arc::clone(&self.source).subscribe(listener));
        debug!("broadcast listener subscribed");
    }

    fn unsubscribe(&self) {
        let previous = self
            .subscription
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(subscription) = previous {
            subscription.cancel();
            debug!("broadcast listener unsubscribed");
        }
    }
}

/// Subscribed on the coordinator's behalf. Holds it weakly so the event
/// source does not keep the coordinator alive.
struct CampaignListener {
    coordinator: Weak<BroadcastCoordinator>,
}

#[async_trait]
impl EventListener for CampaignListener {
    fn name(&self) -> &str {
        "broadcast"
    }

    async fn on_event(&self, event: &InboundEvent) -> Result<()> {
        let Some(coordinator) = self.coordinator.upgrade() else {
            return Ok(());
        };
        coordinator.on_inbound_event(event).await.map(|_| ())
    }
}

#[async_trait]
impl Reportable for BroadcastCoordinator {
    fn name(&self) -> &'static str {
        "broadcast"
    }

    async fn report(&self) -> herald_common::Result<Vec<String>> {
        let status = self
            .status()
            .await
            .map_err(|e| herald_common::Error::external("broadcast status", e))?;
        let Some(progress) = status.campaign else {
            return Ok(vec!["Broadcast: none".to_string()]);
        };
        Ok(vec![format!(
            "Broadcast: {} of {} delivered, {} remaining ({})",
            progress.delivered_count,
            progress.total_targets,
            progress.remaining,
            if status.subscribed { "listening" } else { "paused" },
        )])
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            delivery::StaticTargets,
            events::ListenerRegistry,
            store_memory::InMemoryCampaignStore,
            store_sqlite::SqliteCampaignStore,
            testing::RecordingDelivery,
            types::TargetId,
        },
        rstest::rstest,
    };

    struct Harness {
        coordinator: Arc<BroadcastCoordinator>,
        store: Arc<dyn CampaignStore>,
        delivery: Arc<RecordingDelivery>,
        events: Arc<ListenerRegistry>,
    }

    impl Harness {
        fn with(store: Arc<dyn CampaignStore>, delivery: Arc<RecordingDelivery>) -> Self {
            let events = ListenerRegistry::new();
            let coordinator = BroadcastCoordinator::new(
                Arc::clone(&store),
                Arc::clone(&delivery) as Arc<dyn DeliveryAdapter>,
                Arc::clone(&events) as Arc<dyn EventSource>,
            );
            Self {
                coordinator,
                store,
                delivery,
                events,
            }
        }

        fn new() -> Self {
            Self::with(Arc::new(InMemoryCampaignStore::new()), RecordingDelivery::new())
        }

        async fn event(&self, origin: i64) {
            self.events
                .dispatch(&InboundEvent::from_origin(TargetId(origin)))
                .await;
        }

        async fn campaign(&self) -> Option<Campaign> {
            self.store.slot().await.unwrap().into_active()
        }
    }

    fn targets(ids: &[i64]) -> StaticTargets {
        StaticTargets(ids.iter().copied().map(TargetId).collect())
    }

    #[tokio::test]
    async fn start_deliver_stop() {
        let h = Harness::new();
        let campaign = h
            .coordinator
            .start(BroadcastPayload::text("news"), &targets(&[1, 2]))
            .await
            .unwrap();
        assert_eq!(campaign.total_targets, 2);

        h.event(1).await;
        let current = h.campaign().await.unwrap();
        assert_eq!(current.targets.iter().copied().collect::<Vec<_>>(), vec![TargetId(2)]);
        assert_eq!(current.delivered_count, 1);
        assert_eq!(h.delivery.calls_for(TargetId(1)), 1);

        assert_eq!(h.coordinator.stop().await.unwrap(), 1);
        assert!(h.campaign().await.is_none());
        assert!(matches!(
            h.coordinator.stop().await.unwrap_err(),
            Error::NoActiveCampaign
        ));
    }

    #[tokio::test]
    async fn repeated_events_deliver_once() {
        let h = Harness::new();
        h.coordinator
            .start(BroadcastPayload::text("once"), &targets(&[7, 8]))
            .await
            .unwrap();

        for _ in 0..5 {
            h.event(7).await;
        }
        // Concurrent duplicates as well.
        futures::future::join_all((0..5).map(|_| h.event(7))).await;

        assert_eq!(h.delivery.calls_for(TargetId(7)), 1);
        let current = h.campaign().await.unwrap();
        assert_eq!(current.delivered_count, 1);
        assert!(current.is_consistent());
    }

    #[rstest]
    #[case::memory(false)]
    #[case::sqlite(true)]
    #[tokio::test]
    async fn concurrent_distinct_events_lose_no_updates(#[case] sqlite: bool) {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn CampaignStore> = if sqlite {
            let url = format!("sqlite://{}?mode=rwc", dir.path().join("b.db").display());
            Arc::new(SqliteCampaignStore::new(&url).await.unwrap())
        } else {
            Arc::new(InMemoryCampaignStore::new())
        };
        let h = Harness::with(store, RecordingDelivery::new());

        let ids: Vec<i64> = (100..125).collect();
        h.coordinator
            .start(BroadcastPayload::text("fanout"), &targets(&ids))
            .await
            .unwrap();

        futures::future::join_all(ids.iter().map(|id| h.event(*id))).await;

        let current = h.campaign().await.unwrap();
        assert_eq!(current.delivered_count, 25);
        assert!(current.targets.is_empty());
        assert!(current.is_consistent());
        assert_eq!(h.delivery.total_calls(), 25);
    }

    #[tokio::test]
    async fn invariant_holds_through_lifecycle() {
        let h = Harness::new();
        h.coordinator
            .start(BroadcastPayload::text("x"), &targets(&[1, 2, 3, 4]))
            .await
            .unwrap();

        for origin in [9, 1, 1, 3, 42, 4] {
            h.event(origin).await;
            assert!(h.campaign().await.unwrap().is_consistent());
        }
        assert_eq!(h.campaign().await.unwrap().delivered_count, 3);
    }

    #[tokio::test]
    async fn resume_after_restart_continues_campaign() {
        let store: Arc<dyn CampaignStore> = Arc::new(InMemoryCampaignStore::new());
        let mut persisted = Campaign::new(
            BroadcastPayload::text("again"),
            [TargetId(1), TargetId(2), TargetId(3)],
            0,
        );
        persisted.total_targets = 5;
        persisted.delivered_count = 2;
        store.replace(&persisted).await.unwrap();

        let h = Harness::with(store, RecordingDelivery::new());
        assert!(!h.coordinator.is_subscribed());
        h.coordinator.resume().await.unwrap();

        h.event(1).await;
        let current = h.campaign().await.unwrap();
        assert_eq!(
            current.targets.into_iter().collect::<Vec<_>>(),
            vec![TargetId(2), TargetId(3)]
        );
        assert_eq!(current.delivered_count, 3);
        assert_eq!(current.total_targets, 5);
    }

    #[tokio::test]
    async fn resume_is_idempotent() {
        let h = Harness::new();
        h.coordinator
            .start(BroadcastPayload::text("x"), &targets(&[1]))
            .await
            .unwrap();
        assert_eq!(h.events.listener_count(), 1);

        h.coordinator.resume().await.unwrap();
        h.coordinator.resume().await.unwrap();
        assert_eq!(h.events.listener_count(), 1);
        assert!(h.coordinator.is_subscribed());
    }

    #[tokio::test]
    async fn restart_replaces_campaign_without_duplicate_listener() {
        let h = Harness::new();
        h.coordinator
            .start(BroadcastPayload::text("first"), &targets(&[1, 2]))
            .await
            .unwrap();
        h.event(1).await;

        let second = h
            .coordinator
            .start(BroadcastPayload::text("second"), &targets(&[1, 3]))
            .await
            .unwrap();
        assert_eq!(h.events.listener_count(), 1);

        let current = h.campaign().await.unwrap();
        assert_eq!(current.id, second.id);
        assert_eq!(current.delivered_count, 0);

        h.event(1).await;
        assert_eq!(h.delivery.calls_for(TargetId(1)), 2);
    }

    #[tokio::test]
    async fn resume_without_campaign_fails() {
        let h = Harness::new();
        assert!(matches!(
            h.coordinator.resume().await.unwrap_err(),
            Error::NoActiveCampaign
        ));
        assert!(!h.coordinator.is_subscribed());
    }

    #[tokio::test]
    async fn failed_delivery_still_retires_target() {
        let h = Harness::with(
            Arc::new(InMemoryCampaignStore::new()),
            RecordingDelivery::failing_for([TargetId(5)]),
        );
        h.coordinator
            .start(BroadcastPayload::text("x"), &targets(&[5, 6]))
            .await
            .unwrap();

        let outcome = h
            .coordinator
            .on_inbound_event(&InboundEvent::from_origin(TargetId(5)))
            .await
            .unwrap();
        assert_eq!(outcome, EventOutcome::Failed);

        h.event(5).await;
        assert_eq!(h.delivery.calls_for(TargetId(5)), 1);
        let current = h.campaign().await.unwrap();
        assert_eq!(current.delivered_count, 1);
        assert!(!current.targets.contains(&TargetId(5)));
    }

    #[tokio::test]
    async fn stop_unsubscribes_but_resume_after_stop_fails() {
        let h = Harness::new();
        h.coordinator
            .start(BroadcastPayload::text("x"), &targets(&[1, 2]))
            .await
            .unwrap();
        h.coordinator.stop().await.unwrap();
        assert_eq!(h.events.listener_count(), 0);

        h.event(1).await;
        assert_eq!(h.delivery.total_calls(), 0);
        assert!(h.coordinator.resume().await.is_err());
    }

    #[tokio::test]
    async fn concurrent_stops_report_once() {
        let h = Harness::new();
        h.coordinator
            .start(BroadcastPayload::text("x"), &targets(&[1, 2]))
            .await
            .unwrap();
        h.event(2).await;

        let (a, b) = tokio::join!(h.coordinator.stop(), h.coordinator.stop());
        let reported: Vec<u64> = [a, b].into_iter().filter_map(Result::ok).collect();
        assert_eq!(reported, vec![1]);
    }

    #[tokio::test]
    async fn events_without_campaign_are_ignored() {
        let h = Harness::new();
        let outcome = h
            .coordinator
            .on_inbound_event(&InboundEvent::from_origin(TargetId(1)))
            .await
            .unwrap();
        assert_eq!(outcome, EventOutcome::Ignored);
        assert_eq!(h.delivery.total_calls(), 0);
    }

    #[tokio::test]
    async fn status_and_report() {
        let h = Harness::new();
        assert_eq!(h.coordinator.report().await.unwrap(), vec!["Broadcast: none"]);

        h.coordinator
            .start(BroadcastPayload::text("x"), &targets(&[1, 2, 3]))
            .await
            .unwrap();
        h.event(3).await;

        let status = h.coordinator.status().await.unwrap();
        assert!(status.subscribed);
        let progress = status.campaign.unwrap();
        assert_eq!((progress.delivered_count, progress.remaining), (1, 2));

        let lines = h.coordinator.report().await.unwrap();
        assert_eq!(lines, vec!["Broadcast: 1 of 3 delivered, 2 remaining (listening)"]);
    }
}
