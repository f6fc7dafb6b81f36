//! Scheduler job handlers provided by the broadcast crate.

use std::sync::Arc;

use {
    async_trait::async_trait,
    herald_cron::{
        HandlerRegistry, JobContext, JobHandler, SchedulerService,
        types::{JobCreate, JobPatch, Trigger},
    },
    serde::Deserialize,
    tracing::info,
};

use crate::{
    coordinator::BroadcastCoordinator,
    delivery::DeliveryAdapter,
    types::{BroadcastPayload, TargetId},
};

/// Deliver a payload to one target at the scheduled time.
pub const MESSAGE_SEND: &str = "message.send";
/// Log progress of the active campaign.
pub const BROADCAST_REPORT: &str = "broadcast.report";
/// Id of the recurring progress-report job.
pub const PROGRESS_JOB_ID: &str = "broadcast-progress";

#[derive(Debug, Deserialize)]
struct SendArgs {
    target: TargetId,
    text: String,
}

struct SendMessageJob {
    delivery: Arc<dyn DeliveryAdapter>,
}

#[async_trait]
impl JobHandler for SendMessageJob {
    async fn run(&self, ctx: JobContext) -> herald_cron::Result<Option<String>> {
        let args: SendArgs = serde_json::from_value(ctx.args)?;
        self.delivery
            .deliver(args.target, &BroadcastPayload::text(args.text))
            .await
            .map_err(|e| herald_cron::Error::external("scheduled delivery failed", e))?;
        Ok(Some(format!("sent to {}", args.target)))
    }
}

struct ProgressReportJob {
    coordinator: Arc<BroadcastCoordinator>,
}

#[async_trait]
impl JobHandler for ProgressReportJob {
    async fn run(&self, _ctx: JobContext) -> herald_cron::Result<Option<String>> {
        let status = self
            .coordinator
            .status()
            .await
            .map_err(|e| herald_cron::Error::external("broadcast status", e))?;
        let line = match status.campaign {
            Some(p) => {
                info!(
                    campaign = %p.id,
                    delivered = p.delivered_count,
                    remaining = p.remaining,
                    subscribed = status.subscribed,
                    "broadcast progress"
                );
                format!("{} of {} delivered", p.delivered_count, p.total_targets)
            },
            None => "no active broadcast".to_string(),
        };
        Ok(Some(line))
    }
}

/// Register the broadcast handlers under their well-known names.
pub fn register_handlers(
    registry: &HandlerRegistry,
    coordinator: Arc<BroadcastCoordinator>,
    delivery: Arc<dyn DeliveryAdapter>,
) {
    registry.register(MESSAGE_SEND, Arc::new(SendMessageJob { delivery }));
    registry.register(BROADCAST_REPORT, Arc::new(ProgressReportJob { coordinator }));
}

/// Make sure the recurring progress report runs every `every_ms`.
pub async fn ensure_progress_report(
    scheduler: &SchedulerService,
    every_ms: u64,
) -> herald_cron::Result<()> {
    let trigger = Trigger::Every {
        every_ms,
        anchor_ms: None,
    };
    match scheduler.get(PROGRESS_JOB_ID).await {
        Some(job) if matches!(job.trigger, Trigger::Every { every_ms: e, .. } if e == every_ms) => {
            Ok(())
        },
        Some(_) => {
            scheduler
                .update(PROGRESS_JOB_ID, JobPatch {
                    trigger: Some(trigger),
                    ..JobPatch::default()
                })
                .await?;
            Ok(())
        },
        None => {
            scheduler
                .schedule(
                    JobCreate::new("broadcast progress", BROADCAST_REPORT, trigger)
                        .with_id(PROGRESS_JOB_ID)
                        .with_max_instances(1)
                        .with_coalesce(true),
                )
                .await?;
            Ok(())
        },
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            delivery::StaticTargets,
            events::{EventSource, ListenerRegistry},
            store_memory::InMemoryCampaignStore,
            testing::RecordingDelivery,
        },
        herald_cron::{SchedulerOptions, store_memory::InMemoryStore},
    };

    fn setup() -> (Arc<HandlerRegistry>, Arc<BroadcastCoordinator>, Arc<RecordingDelivery>) {
        let delivery = RecordingDelivery::new();
        let coordinator = BroadcastCoordinator::new(
            Arc::new(InMemoryCampaignStore::new()),
            Arc::clone(&delivery) as Arc<dyn DeliveryAdapter>,
            ListenerRegistry::new() as Arc<dyn EventSource>,
        );
        let registry = Arc::new(HandlerRegistry::new());
        register_handlers(
            &registry,
            Arc::clone(&coordinator),
            Arc::clone(&delivery) as Arc<dyn DeliveryAdapter>,
        );
        (registry, coordinator, delivery)
    }

    fn ctx(args: serde_json::Value) -> JobContext {
        JobContext {
            job_id: "j".into(),
            job_name: "n".into(),
            args,
            scheduled_for_ms: 0,
        }
    }

    #[tokio::test]
    async fn message_send_delivers() {
        let (registry, _coordinator, delivery) = setup();
        let handler = registry.get(MESSAGE_SEND).unwrap();

        let out = handler
            .run(ctx(serde_json::json!({ "target": -42, "text": "reminder" })))
            .await
            .unwrap();
        assert_eq!(out.as_deref(), Some("sent to -42"));
        assert_eq!(delivery.calls_for(TargetId(-42)), 1);

        assert!(handler.run(ctx(serde_json::json!({}))).await.is_err());
    }

    #[tokio::test]
    async fn progress_report_reads_campaign() {
        let (registry, coordinator, _delivery) = setup();
        let handler = registry.get(BROADCAST_REPORT).unwrap();
        assert_eq!(
            handler.run(ctx(serde_json::Value::Null)).await.unwrap().as_deref(),
            Some("no active broadcast")
        );

        coordinator
            .start(
                BroadcastPayload::text("x"),
                &StaticTargets(vec![TargetId(1), TargetId(2)]),
            )
            .await
            .unwrap();
        assert_eq!(
            handler.run(ctx(serde_json::Value::Null)).await.unwrap().as_deref(),
            Some("0 of 2 delivered")
        );
    }

    #[tokio::test]
    async fn progress_job_is_scheduled_once() {
        let (registry, _coordinator, _delivery) = setup();
        let scheduler = SchedulerService::new(
            Arc::new(InMemoryStore::new()),
            registry,
            SchedulerOptions::default(),
        );

        ensure_progress_report(&scheduler, 60_000).await.unwrap();
        ensure_progress_report(&scheduler, 60_000).await.unwrap();
        assert_eq!(scheduler.list().await.len(), 1);

        ensure_progress_report(&scheduler, 120_000).await.unwrap();
        let job = scheduler.get(PROGRESS_JOB_ID).await.unwrap();
        assert!(matches!(job.trigger, Trigger::Every { every_ms: 120_000, .. }));
        assert!(job.coalesce);
    }
}
