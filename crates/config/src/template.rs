//! Default configuration template with all options documented.
//!
//! Written by `herald config init`. Every option is listed with its default
//! so operators can see what exists without reading the source.

/// The default `herald.toml`.
pub fn default_config_template() -> String {
    r##"# Herald Configuration
# ====================
# Changes require a restart to take effect.
#
# Environment variable substitution is supported: ${ENV_VAR}
# Example: token = "${HERALD_TELEGRAM_TOKEN}"

[database]
# SQLite URL. Defaults to <data_dir>/herald.db.
# url = "sqlite://herald.db?mode=rwc"

[telegram]
token = "${HERALD_TELEGRAM_TOKEN}"   # Bot token from @BotFather
operators = []                       # User ids allowed to run operator commands
poll_timeout_secs = 30               # getUpdates long-polling timeout

[scheduler]
max_workers = 16                     # Job executions running at once, across all jobs
default_max_instances = 3            # Per-job concurrent instance cap
coalesce = false                     # Merge missed fires into one run
# misfire_grace_ms = 60000           # Skip fires later than this past due
stuck_threshold_ms = 7200000         # Release instances running longer than this
max_catchup = 10                     # Missed fires replayed per job per tick
# jobs_file = "/var/lib/herald/jobs.json"  # Keep jobs in a JSON file instead of the database

[broadcast]
resume_on_boot = true                # Resume a persisted campaign at startup
# progress_report_every_ms = 600000  # Log campaign progress on a schedule

[metrics]
enabled = false
# textfile = "/var/lib/node_exporter/herald.prom"
export_every_ms = 60000
"##
    .to_string()
}
