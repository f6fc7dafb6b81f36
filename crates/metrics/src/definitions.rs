//! Metric name definitions.
//!
//! All metric names used throughout herald live here so the set of exported
//! series is documented in one place.

/// Job scheduler metrics
pub mod cron {
    /// Number of scheduled jobs
    pub const JOBS_SCHEDULED: &str = "herald_cron_jobs_scheduled";
    /// Total job executions started
    pub const EXECUTIONS_TOTAL: &str = "herald_cron_executions_total";
    /// Job execution duration in seconds
    pub const EXECUTION_DURATION_SECONDS: &str = "herald_cron_execution_duration_seconds";
    /// Job executions that returned an error
    pub const ERRORS_TOTAL: &str = "herald_cron_errors_total";
    /// Fires skipped because the job was at its instance cap or past its grace time
    pub const SKIPPED_TOTAL: &str = "herald_cron_skipped_total";
    /// Running instances released after exceeding the stuck threshold
    pub const STUCK_JOBS_CLEARED_TOTAL: &str = "herald_cron_stuck_jobs_cleared_total";
    /// Delay from due time to execution start in seconds
    pub const TIMER_LOOP_LATENCY_SECONDS: &str = "herald_cron_timer_loop_latency_seconds";
}

/// Broadcast campaign metrics
pub mod broadcast {
    /// Campaigns started
    pub const CAMPAIGNS_STARTED_TOTAL: &str = "herald_broadcast_campaigns_started_total";
    /// Delivery attempts (successful or not)
    pub const DELIVERIES_TOTAL: &str = "herald_broadcast_deliveries_total";
    /// Delivery attempts that failed
    pub const DELIVERY_FAILURES_TOTAL: &str = "herald_broadcast_delivery_failures_total";
    /// Targets still waiting for delivery in the active campaign
    pub const TARGETS_REMAINING: &str = "herald_broadcast_targets_remaining";
    /// Inbound events checked against the campaign
    pub const EVENTS_CHECKED_TOTAL: &str = "herald_broadcast_events_checked_total";
}

/// Telegram transport metrics
pub mod telegram {
    /// Updates received from getUpdates
    pub const UPDATES_RECEIVED_TOTAL: &str = "herald_telegram_updates_received_total";
    /// Messages sent through the Bot API
    pub const MESSAGES_SENT_TOTAL: &str = "herald_telegram_messages_sent_total";
    /// Operator commands handled
    pub const COMMANDS_TOTAL: &str = "herald_telegram_commands_total";
    /// Polling errors
    pub const POLL_ERRORS_TOTAL: &str = "herald_telegram_poll_errors_total";
}

/// Histogram bucket boundaries.
pub mod buckets {
    /// Job execution durations, 10ms to 10 minutes.
    pub const JOB_DURATION: &[f64] = &[
        0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0,
    ];

    /// Scheduler latency, 1ms to 30s.
    pub const TIMER_LATENCY: &[f64] = &[
        0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
    ];
}
