use std::{future::Future, sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    herald_broadcast::{BroadcastPayload, DeliveryAdapter, TargetId},
    teloxide::{
        ApiError, RequestError,
        prelude::*,
        types::{ChatId, MessageId},
    },
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use herald_metrics::{counter, telegram as tg_metrics};

use crate::{Result, chats::ChatDirectory};

pub const TELEGRAM_MAX_MESSAGE_LEN: usize = 4096;

const TELEGRAM_RETRY_AFTER_MAX_RETRIES: usize = 4;

/// Outbound message sender for Telegram.
///
/// Doubles as the broadcast [`DeliveryAdapter`]. When a chat turns out to be
/// unreachable for good, it is dropped from the chat directory so later
/// campaigns do not target it.
pub struct TelegramOutbound {
    bot: Bot,
    chats: Option<Arc<ChatDirectory>>,
}

impl TelegramOutbound {
    pub fn new(bot: Bot) -> Self {
        Self { bot, chats: None }
    }

    pub fn bot(&self) -> Bot {
        self.bot.clone()
    }

    #[must_use]
    pub fn with_chat_directory(mut self, chats: Arc<ChatDirectory>) -> Self {
        self.chats = Some(chats);
        self
    }

    /// Send plain text, split into as many messages as needed.
    pub async fn send_text(&self, chat_id: i64, text: &str) -> Result<Vec<MessageId>> {
        let mut ids = Vec::new();
        for chunk in chunk_message(text, TELEGRAM_MAX_MESSAGE_LEN) {
            let message = run_telegram_request_with_retry(chat_id, "send message", || {
                let req = self.bot.send_message(ChatId(chat_id), chunk.as_str());
                async move { req.await }
            })
            .await?;
            ids.push(message.id);

            #[cfg(feature = "metrics")]
            counter!(tg_metrics::MESSAGES_SENT_TOTAL).increment(1);
        }
        Ok(ids)
    }
}

#[async_trait]
impl DeliveryAdapter for TelegramOutbound {
    async fn deliver(
        &self,
        target: TargetId,
        payload: &BroadcastPayload,
    ) -> herald_broadcast::Result<()> {
        match self.send_text(target.0, &payload.text).await {
            Ok(_) => {
                debug!(chat_id = target.0, "broadcast delivered");
                Ok(())
            },
            Err(crate::Error::Telegram(err)) => {
                Err(failed_delivery(self.chats.as_deref(), target, &err).await)
            },
            Err(e) => Err(herald_broadcast::Error::delivery_failure(
                target,
                e.to_string(),
            )),
        }
    }
}

/// Map a send error to a delivery failure, dropping the chat from the
/// directory first when Telegram says it is gone for good.
async fn failed_delivery(
    chats: Option<&ChatDirectory>,
    target: TargetId,
    err: &RequestError,
) -> herald_broadcast::Error {
    if is_chat_gone(err)
        && let Some(chats) = chats
    {
        match chats.forget(target.0).await {
            Ok(true) => info!(chat_id = target.0, "removed unreachable chat"),
            Ok(false) => {},
            Err(e) => warn!(chat_id = target.0, error = %e, "failed to forget chat"),
        }
    }
    herald_broadcast::Error::delivery_failure(target, err.to_string())
}

async fn run_telegram_request_with_retry<T, F, Fut>(
    chat_id: i64,
    operation: &'static str,
    mut request: F,
) -> std::result::Result<T, RequestError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, RequestError>>,
{
    let mut retries = 0usize;

    loop {
        match request().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let Some(wait) = retry_after_duration(&err) else {
                    return Err(err);
                };

                if retries >= TELEGRAM_RETRY_AFTER_MAX_RETRIES {
                    warn!(
                        chat_id,
                        operation,
                        retries,
                        max_retries = TELEGRAM_RETRY_AFTER_MAX_RETRIES,
                        retry_after_secs = wait.as_secs(),
                        "telegram rate limit persisted after retries"
                    );
                    return Err(err);
                }

                retries += 1;
                warn!(
                    chat_id,
                    operation,
                    retries,
                    max_retries = TELEGRAM_RETRY_AFTER_MAX_RETRIES,
                    retry_after_secs = wait.as_secs(),
                    "telegram rate limited, waiting before retry"
                );
                tokio::time::sleep(wait).await;
            },
        }
    }
}

fn retry_after_duration(error: &RequestError) -> Option<Duration> {
    match error {
        RequestError::RetryAfter(wait) => Some(wait.duration()),
        _ => None,
    }
}

/// Errors after which the chat will never accept a message from this bot.
fn is_chat_gone(error: &RequestError) -> bool {
    matches!(
        error,
        RequestError::Api(
            ApiError::BotBlocked
                | ApiError::ChatNotFound
                | ApiError::BotKicked
                | ApiError::BotKickedFromSupergroup
                | ApiError::UserDeactivated
        )
    )
}

/// Split text into chunks of at most `max_len` bytes, preferring line breaks,
/// then spaces, never cutting inside a UTF-8 character.
pub fn chunk_message(text: &str, max_len: usize) -> Vec<String> {
    if max_len == 0 {
        return Vec::new();
    }
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.len() <= max_len {
            chunks.push(remaining.to_string());
            break;
        }

        let mut window = remaining.floor_char_boundary(max_len);
        if window == 0 {
            window = remaining
                .chars()
                .next()
                .map(char::len_utf8)
                .unwrap_or(remaining.len());
        }

        let slice = &remaining[..window];
        let split_at = match slice.rfind('\n').or_else(|| slice.rfind(' ')) {
            Some(0) | None => window,
            Some(i) => i,
        };

        chunks.push(remaining[..split_at].to_string());
        remaining = &remaining[split_at..];
        if let Some(rest) = remaining
            .strip_prefix('\n')
            .or_else(|| remaining.strip_prefix(' '))
        {
            remaining = rest;
        }
    }

    chunks
}
