//! Inbound message handling and the operator command set.

use std::{sync::Arc, time::Duration};

use {
    herald_broadcast::{BroadcastCommands, InboundEvent, ListenerRegistry, TargetId},
    herald_common::report::ReportRegistry,
    herald_cron::{SchedulerService, types::Job},
    teloxide::types::Message,
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use herald_metrics::{counter, telegram as tg_metrics};

use crate::{
    Result,
    access::Operators,
    chats::{ChatDirectory, SeenChat},
};

/// Operator commands, as registered with Telegram for autocomplete.
pub const BOT_COMMANDS: &[(&str, &str)] = &[
    ("sbroadcast", "Broadcast a message to every known chat"),
    ("stopsbroadcast", "Stop the running broadcast"),
    ("continuebroadcast", "Resume the persisted broadcast"),
    ("broadcaststatus", "Show broadcast progress"),
    ("stats", "Show bot statistics"),
    ("jobs", "List scheduled jobs"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    StartBroadcast(String),
    StopBroadcast,
    ContinueBroadcast,
    BroadcastStatus,
    Stats,
    Jobs,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Self::StartBroadcast(_) => "sbroadcast",
            Self::StopBroadcast => "stopsbroadcast",
            Self::ContinueBroadcast => "continuebroadcast",
            Self::BroadcastStatus => "broadcaststatus",
            Self::Stats => "stats",
            Self::Jobs => "jobs",
        }
    }
}

/// Parse `/command[@bot] [args]`. Commands addressed to another bot are
/// ignored.
pub fn parse_command(text: &str, bot_username: Option<&str>) -> Option<Command> {
    let text = text.trim_start();
    let rest = text.strip_prefix('/')?;
    let (head, args) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
    let (name, addressee) = match head.split_once('@') {
        Some((name, bot)) => (name, Some(bot)),
        None => (head, None),
    };
    if let (Some(addressee), Some(me)) = (addressee, bot_username)
        && !addressee.eq_ignore_ascii_case(me)
    {
        return None;
    }

    let command = match name.to_ascii_lowercase().as_str() {
        "sbroadcast" => Command::StartBroadcast(args.trim().to_string()),
        "stopsbroadcast" => Command::StopBroadcast,
        "continuebroadcast" => Command::ContinueBroadcast,
        "broadcaststatus" => Command::BroadcastStatus,
        "stats" => Command::Stats,
        "jobs" => Command::Jobs,
        _ => return None,
    };
    Some(command)
}

/// Executes operator commands and renders the reply text.
pub struct OperatorCommands {
    broadcast: BroadcastCommands,
    scheduler: Arc<SchedulerService>,
    reports: ReportRegistry,
}

impl OperatorCommands {
    pub fn new(
        broadcast: BroadcastCommands,
        scheduler: Arc<SchedulerService>,
        reports: ReportRegistry,
    ) -> Self {
        Self {
            broadcast,
            scheduler,
            reports,
        }
    }

    /// Failures become the reply; the operator always gets an answer.
    pub async fn execute(&self, command: Command) -> String {
        let name = command.name();
        match self.run(command).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(command = name, error = %e, "operator command failed");
                format!("Command failed: {e}")
            },
        }
    }

    async fn run(&self, command: Command) -> Result<String> {
        Ok(match command {
            Command::StartBroadcast(text) => self.broadcast.start(&text).await?,
            Command::StopBroadcast => self.broadcast.stop().await?,
            Command::ContinueBroadcast => self.broadcast.resume().await?,
            Command::BroadcastStatus => self.broadcast.status().await?,
            Command::Stats => self.reports.render("Stats").await,
            Command::Jobs => format_jobs(&self.scheduler.list().await, now_ms()),
        })
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn format_jobs(jobs: &[Job], now_ms: u64) -> String {
    if jobs.is_empty() {
        return "No scheduled jobs.".to_string();
    }
    let mut jobs: Vec<&Job> = jobs.iter().collect();
    jobs.sort_by_key(|j| j.state.next_run_at_ms.unwrap_or(u64::MAX));

    let mut text = String::from("Scheduled jobs:\n");
    for job in jobs {
        let when = match (job.enabled, job.state.next_run_at_ms) {
            (false, _) => "paused".to_string(),
            (true, Some(next)) => format!(
                "next in {}",
                format_delay(Duration::from_millis(next.saturating_sub(now_ms)))
            ),
            (true, None) => "not scheduled".to_string(),
        };
        text.push_str(&format!(
            "* {} [{}] {}: {when}\n",
            job.name, job.id, job.handler
        ));
    }
    text
}

fn format_delay(delay: Duration) -> String {
    let secs = delay.as_secs();
    match secs {
        0..60 => format!("{secs}s"),
        60..3_600 => format!("{}m", secs / 60),
        3_600..86_400 => format!("{}h", secs / 3_600),
        _ => format!("{}d", secs / 86_400),
    }
}

/// What the bot layer needs from one Telegram message.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub chat: SeenChat,
    pub sender_id: Option<i64>,
    pub text: Option<String>,
}

impl From<&Message> for IncomingMessage {
    fn from(msg: &Message) -> Self {
        Self {
            chat: SeenChat::from(&msg.chat),
            sender_id: msg.from.as_ref().map(|u| u.id.0 as i64),
            text: msg.text().or_else(|| msg.caption()).map(str::to_string),
        }
    }
}

/// Everything message handling needs, shared by the polling task.
pub struct MessageContext {
    pub bot_username: Option<String>,
    pub operators: Operators,
    pub chats: Arc<ChatDirectory>,
    pub events: Arc<ListenerRegistry>,
    pub commands: Arc<OperatorCommands>,
}

/// Record the chat, fan the event out to listeners, then run an operator
/// command if there is one. Returns the reply to send back, if any.
pub async fn handle_message(ctx: &MessageContext, msg: &IncomingMessage) -> Option<String> {
    let chat_id = msg.chat.chat_id;
    if let Err(e) = ctx.chats.record(&msg.chat, now_ms()).await {
        warn!(chat_id, error = %e, "failed to record chat");
    }

    let event = InboundEvent {
        origin: TargetId(chat_id),
        sender_id: msg.sender_id,
        text: msg.text.clone(),
    };
    ctx.events.dispatch(&event).await;

    let command = msg
        .text
        .as_deref()
        .and_then(|t| parse_command(t, ctx.bot_username.as_deref()))?;
    if let Err(reason) = ctx.operators.check(msg.sender_id) {
        debug!(chat_id, sender_id = ?msg.sender_id, %reason, command = command.name(), "ignoring command");
        return None;
    }

    #[cfg(feature = "metrics")]
    counter!(tg_metrics::COMMANDS_TOTAL, "command" => command.name()).increment(1);

    info!(chat_id, sender_id = ?msg.sender_id, command = command.name(), "operator command");
    Some(ctx.commands.execute(command).await)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use {
        super::*,
        crate::chats::ChatKind,
        async_trait::async_trait,
        herald_broadcast::{
            BroadcastCoordinator, BroadcastPayload, DeliveryAdapter, EventSource,
            store_memory::InMemoryCampaignStore,
        },
        herald_cron::{
            HandlerRegistry, SchedulerOptions, handler_fn, store_memory::InMemoryStore,
            types::{JobCreate, Trigger},
        },
        rstest::rstest,
    };

    #[derive(Default)]
    struct Recording(Mutex<Vec<(i64, String)>>);

    #[async_trait]
    impl DeliveryAdapter for Recording {
        async fn deliver(
            &self,
            target: TargetId,
            payload: &BroadcastPayload,
        ) -> herald_broadcast::Result<()> {
            self.0.lock().unwrap().push((target.0, payload.text.clone()));
            Ok(())
        }
    }

    struct Fixture {
        ctx: MessageContext,
        delivery: Arc<Recording>,
        scheduler: Arc<SchedulerService>,
    }

    async fn fixture() -> Fixture {
        let chats = Arc::new(ChatDirectory::new("sqlite::memory:").await.unwrap());
        let events = ListenerRegistry::new();
        let delivery = Arc::new(Recording::default());
        let coordinator = BroadcastCoordinator::new(
            Arc::new(InMemoryCampaignStore::new()),
            delivery.clone(),
            events.clone() as Arc<dyn EventSource>,
        );
        let handlers = Arc::new(HandlerRegistry::new());
        handlers.register("noop", handler_fn(|_| async { Ok(None) }));
        let scheduler = SchedulerService::new(
            Arc::new(InMemoryStore::new()),
            handlers,
            SchedulerOptions::default(),
        );
        let reports = ReportRegistry::new()
            .with(coordinator.clone())
            .with(chats.clone());
        let commands = Arc::new(OperatorCommands::new(
            BroadcastCommands::new(coordinator, chats.clone()),
            scheduler.clone(),
            reports,
        ));
        Fixture {
            ctx: MessageContext {
                bot_username: Some("herald_bot".into()),
                operators: Operators::new([1]),
                chats,
                events,
                commands,
            },
            delivery,
            scheduler,
        }
    }

    fn message(chat_id: i64, sender_id: i64, text: &str) -> IncomingMessage {
        IncomingMessage {
            chat: SeenChat {
                chat_id,
                kind: ChatKind::Group,
                title: None,
            },
            sender_id: Some(sender_id),
            text: Some(text.to_string()),
        }
    }

    #[rstest]
    #[case("/sbroadcast hello world", Some(Command::StartBroadcast("hello world".into())))]
    #[case("/sbroadcast@herald_bot  multi\nline ", Some(Command::StartBroadcast("multi\nline".into())))]
    #[case("/sbroadcast", Some(Command::StartBroadcast(String::new())))]
    #[case("/stopsbroadcast", Some(Command::StopBroadcast))]
    #[case("/ContinueBroadcast", Some(Command::ContinueBroadcast))]
    #[case("/broadcaststatus", Some(Command::BroadcastStatus))]
    #[case("/stats@HERALD_BOT", Some(Command::Stats))]
    #[case("/jobs", Some(Command::Jobs))]
    #[case("/stats@other_bot", None)]
    #[case("/unknown", None)]
    #[case("stats", None)]
    #[case("", None)]
    fn parses_commands(#[case] text: &str, #[case] expected: Option<Command>) {
        assert_eq!(parse_command(text, Some("herald_bot")), expected);
    }

    #[rstest]
    #[case(5, "5s")]
    #[case(90, "1m")]
    #[case(7_200, "2h")]
    #[case(200_000, "2d")]
    fn delays_are_humanized(#[case] secs: u64, #[case] expected: &str) {
        assert_eq!(format_delay(Duration::from_secs(secs)), expected);
    }

    #[tokio::test]
    async fn traffic_delivers_broadcast_to_known_chats() {
        let f = fixture().await;
        // Two chats become known.
        assert!(handle_message(&f.ctx, &message(-10, 5, "hi")).await.is_none());
        assert!(handle_message(&f.ctx, &message(-20, 6, "hey")).await.is_none());

        let reply = handle_message(&f.ctx, &message(100, 1, "/sbroadcast news"))
            .await
            .unwrap();
        assert_eq!(reply, "Smart broadcast planned for 3 chats.");

        handle_message(&f.ctx, &message(-10, 5, "again")).await;
        handle_message(&f.ctx, &message(-10, 5, "and again")).await;
        assert_eq!(*f.delivery.0.lock().unwrap(), vec![(-10, "news".to_string())]);

        let status = handle_message(&f.ctx, &message(100, 1, "/broadcaststatus"))
            .await
            .unwrap();
        assert!(status.contains("sent to 1 of 3 chats"), "{status}");
    }

    #[tokio::test]
    async fn non_operators_are_ignored() {
        let f = fixture().await;
        assert!(
            handle_message(&f.ctx, &message(7, 99, "/sbroadcast spam"))
                .await
                .is_none()
        );
        let reply = handle_message(&f.ctx, &message(7, 1, "/stopsbroadcast"))
            .await
            .unwrap();
        assert_eq!(reply, "There is no active broadcast.");
        // The ignored command still made the chat known.
        assert_eq!(f.ctx.chats.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn stats_and_jobs_render() {
        let f = fixture().await;
        f.scheduler
            .schedule(JobCreate::new(
                "digest",
                "noop",
                Trigger::At {
                    at_ms: now_ms() + 3_600_000,
                },
            ))
            .await
            .unwrap();

        let stats = handle_message(&f.ctx, &message(1, 1, "/stats")).await.unwrap();
        assert!(stats.starts_with("Stats\n"));
        assert!(stats.contains("* Broadcast: none"));
        assert!(stats.contains("* Chats: 1 known"));

        let jobs = handle_message(&f.ctx, &message(1, 1, "/jobs")).await.unwrap();
        assert!(jobs.contains("digest"), "{jobs}");
        assert!(jobs.contains("noop"));
    }

    #[test]
    fn empty_job_list() {
        assert_eq!(format_jobs(&[], 0), "No scheduled jobs.");
    }
}
