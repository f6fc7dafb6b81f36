//! `herald run`: the long-running bot process.

use std::sync::Arc;

use {
    anyhow::{Result, bail},
    herald_broadcast::BroadcastCommands,
    herald_common::ReportRegistry,
    herald_config::{HeraldConfig, Severity},
    herald_metrics::{MetricsRecorderConfig, init_metrics},
    herald_telegram::{MessageContext, OperatorCommands, Operators, bot},
    tracing::{debug, error, info, warn},
};

use crate::runtime::{Runtime, write_textfile};

pub async fn run(config: HeraldConfig) -> Result<()> {
    let validation = herald_config::validate(&config);
    for d in &validation.diagnostics {
        match d.severity {
            Severity::Error => error!(path = %d.path, "{}", d.message),
            Severity::Warning => warn!(path = %d.path, "{}", d.message),
        }
    }
    if validation.has_errors() {
        bail!("invalid configuration (see `herald config check`)");
    }

    let metrics = init_metrics(MetricsRecorderConfig {
        enabled: config.metrics.enabled,
        global_labels: vec![("service".into(), "herald".into())],
    })?;
    let runtime = Runtime::build(&config, config.metrics.enabled.then(|| metrics.clone())).await?;

    let connected = bot::connect(runtime.outbound.bot()).await?;

    runtime.scheduler.start().await?;
    runtime.reconcile_jobs(&config).await?;

    if config.broadcast.resume_on_boot {
        match runtime.coordinator.resume().await {
            Ok(campaign) => info!(
                campaign = %campaign.id,
                delivered = campaign.delivered_count,
                remaining = campaign.remaining(),
                "resumed persisted broadcast"
            ),
            Err(herald_broadcast::Error::NoActiveCampaign) => debug!("no broadcast to resume"),
            Err(e) => return Err(e.into()),
        }
    }

    let reports = ReportRegistry::new()
        .with(runtime.scheduler.clone())
        .with(runtime.coordinator.clone())
        .with(runtime.chats.clone());
    let commands = Arc::new(OperatorCommands::new(
        BroadcastCommands::new(Arc::clone(&runtime.coordinator), runtime.chats.clone()),
        Arc::clone(&runtime.scheduler),
        reports,
    ));
    let ctx = Arc::new(MessageContext {
        bot_username: connected.username,
        operators: Operators::new(config.telegram.operators.iter().copied()),
        chats: Arc::clone(&runtime.chats),
        events: Arc::clone(&runtime.events),
        commands,
    });
    let polling = bot::start_polling(
        connected.bot,
        config.telegram.poll_timeout_secs,
        ctx,
        Arc::clone(&runtime.outbound),
    );

    info!("herald running");
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!(error = %e, "failed to listen for ctrl-c");
            }
            info!("shutdown requested");
        },
        () = polling.cancelled() => warn!("telegram polling ended"),
    }

    polling.cancel();
    runtime.scheduler.stop().await;
    if let Some(path) = &config.metrics.textfile
        && config.metrics.enabled
        && let Err(e) = write_textfile(path, &metrics.render()).await
    {
        warn!(path = %path.display(), error = %e, "final metrics export failed");
    }
    runtime.pool.close().await;
    info!("herald stopped");
    Ok(())
}
