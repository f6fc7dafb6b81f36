use std::{sync::Arc, time::Duration};

use {
    secrecy::ExposeSecret,
    teloxide::{
        ApiError, RequestError,
        prelude::*,
        types::{AllowedUpdate, BotCommand, UpdateKind},
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info, warn},
};

#[cfg(feature = "metrics")]
use herald_metrics::{counter, telegram as tg_metrics};

use crate::{
    Result,
    handlers::{self, BOT_COMMANDS, IncomingMessage, MessageContext},
    outbound::TelegramOutbound,
};

/// Build a bot whose HTTP timeout outlasts the long-polling timeout, so the
/// client does not abort a request before Telegram answers.
pub fn build_bot(config: &herald_config::TelegramConfig) -> Result<Bot> {
    let client = teloxide::net::default_reqwest_settings()
        .timeout(Duration::from_secs(u64::from(config.poll_timeout_secs) + 15))
        .build()?;
    Ok(Bot::with_client(config.token.expose_secret(), client))
}

/// Bot identity returned by [`connect`].
pub struct Connected {
    pub bot: Bot,
    pub username: Option<String>,
}

/// Verify credentials, clear any webhook and register the command list.
pub async fn connect(bot: Bot) -> Result<Connected> {
    let me = bot.get_me().await?;
    let username = me.username.clone();

    bot.delete_webhook().send().await?;

    let commands: Vec<BotCommand> = BOT_COMMANDS
        .iter()
        .map(|(name, description)| BotCommand::new(*name, *description))
        .collect();
    if let Err(e) = bot.set_my_commands(commands).await {
        warn!("failed to register bot commands: {e}");
    }

    info!(username = ?username, "telegram bot connected (webhook cleared)");
    Ok(Connected { bot, username })
}

/// Spawn the long-polling loop. It runs until the returned token is
/// cancelled or another instance takes over the token.
pub fn start_polling(
    bot: Bot,
    poll_timeout_secs: u32,
    ctx: Arc<MessageContext>,
    outbound: Arc<TelegramOutbound>,
) -> CancellationToken {
    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();

    tokio::spawn(async move {
        info!("starting telegram polling loop");
        let mut offset: i32 = 0;

        loop {
            let request = bot
                .get_updates()
                .offset(offset)
                .timeout(poll_timeout_secs)
                .allowed_updates(vec![AllowedUpdate::Message, AllowedUpdate::ChannelPost]);

            let result = tokio::select! {
                () = cancel_clone.cancelled() => {
                    info!("telegram polling stopped");
                    break;
                },
                result = request.send() => result,
            };

            match result {
                Ok(updates) => {
                    debug!(count = updates.len(), "got telegram updates");
                    for update in updates {
                        offset = update.id.as_offset();

                        #[cfg(feature = "metrics")]
                        counter!(tg_metrics::UPDATES_RECEIVED_TOTAL).increment(1);

                        match update.kind {
                            UpdateKind::Message(msg) | UpdateKind::ChannelPost(msg) => {
                                debug!(chat_id = msg.chat.id.0, "received telegram message");
                                let incoming = IncomingMessage::from(&msg);
                                let Some(reply) = handlers::handle_message(&ctx, &incoming).await
                                else {
                                    continue;
                                };
                                if let Err(e) = outbound.send_text(msg.chat.id.0, &reply).await {
                                    error!(
                                        chat_id = msg.chat.id.0,
                                        error = %e,
                                        "failed to send command reply"
                                    );
                                }
                            },
                            other => {
                                debug!("ignoring non-message update: {other:?}");
                            },
                        }
                    }
                },
                Err(e) => {
                    #[cfg(feature = "metrics")]
                    counter!(tg_metrics::POLL_ERRORS_TOTAL).increment(1);

                    if is_conflict(&e) {
                        warn!(
                            "telegram polling disabled: another instance is already running with this token"
                        );
                        cancel_clone.cancel();
                        break;
                    }

                    warn!(error = %e, "telegram getUpdates failed");
                    tokio::select! {
                        () = cancel_clone.cancelled() => break,
                        () = tokio::time::sleep(Duration::from_secs(5)) => {},
                    }
                },
            }
        }
    });

    cancel
}

fn is_conflict(error: &RequestError) -> bool {
    matches!(error, RequestError::Api(ApiError::TerminatedByOtherGetUpdates))
}
