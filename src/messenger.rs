//! Messenger seam: the narrow interface the pipeline uses to talk to the
//! chat platform, plus the real Telegram implementation.

use crate::actions;
use crate::model::{Item, Subscriber};
use anyhow::{Context, Result};
use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup, InputFile};
use teloxide::{ApiError, RequestError};
use thiserror::Error;
use uuid::Uuid;

/// Inline suppress button attached to a direct message.
#[derive(Debug, Clone)]
pub struct ActionButton {
    pub label: String,
    pub token: Uuid,
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The subscriber never opened a chat with the bot, or blocked it.
    #[error("subscriber unreachable over direct message")]
    Forbidden,
    #[error("transport error: {0}")]
    Transport(String),
}

#[async_trait]
pub trait Messenger: Send + Sync {
    /// One announcement to the shared channel.
    async fn broadcast(&self, item: &Item) -> Result<()>;

    /// Plain operator notice to the shared channel.
    async fn notice(&self, text: &str) -> Result<()>;

    async fn direct_message(
        &self,
        subscriber: &Subscriber,
        item: &Item,
        action: Option<ActionButton>,
    ) -> Result<(), DeliveryError>;

    /// Every non-bot member of the audience.
    async fn roster(&self) -> Result<Vec<Subscriber>>;
}

/// Message body shared by broadcasts and direct messages.
pub fn notice_text(item: &Item) -> String {
    format!("{} (ID: {})\n{}", item.name, item.id, item.url)
}

fn suppress_keyboard(action: &ActionButton) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new([[InlineKeyboardButton::callback(
        action.label.clone(),
        actions::callback_data(&action.token),
    )]])
}

pub struct TelegramMessenger {
    bot: Bot,
    channel: ChatId,
}

impl TelegramMessenger {
    pub fn new(bot: Bot, channel_id: i64) -> Self {
        Self {
            bot,
            channel: ChatId(channel_id),
        }
    }
}

#[async_trait]
impl Messenger for TelegramMessenger {
    async fn broadcast(&self, item: &Item) -> Result<()> {
        let text = notice_text(item);
        // Render as a photo with caption when the item has a usable image.
        let photo = item
            .image_url
            .as_deref()
            .and_then(|raw| reqwest::Url::parse(raw).ok());
        match photo {
            Some(url) => {
                self.bot
                    .send_photo(self.channel, InputFile::url(url))
                    .caption(text)
                    .await
                    .context("failed to broadcast photo")?;
            }
            None => {
                self.bot
                    .send_message(self.channel, text)
                    .await
                    .context("failed to broadcast message")?;
            }
        }
        Ok(())
    }

    async fn notice(&self, text: &str) -> Result<()> {
        self.bot
            .send_message(self.channel, text)
            .await
            .context("failed to send operator notice")?;
        Ok(())
    }

    async fn direct_message(
        &self,
        subscriber: &Subscriber,
        item: &Item,
        action: Option<ActionButton>,
    ) -> Result<(), DeliveryError> {
        let mut request = self.bot.send_message(ChatId(subscriber.id), notice_text(item));
        if let Some(action) = &action {
            request = request.reply_markup(suppress_keyboard(action));
        }
        match request.await {
            Ok(_) => Ok(()),
            Err(RequestError::Api(
                ApiError::BotBlocked
                | ApiError::UserDeactivated
                | ApiError::CantInitiateConversation
                | ApiError::CantTalkWithBots,
            )) => Err(DeliveryError::Forbidden),
            Err(err) => Err(DeliveryError::Transport(err.to_string())),
        }
    }

    async fn roster(&self) -> Result<Vec<Subscriber>> {
        // The Bot API cannot enumerate arbitrary chat members; the audience
        // is the announcement channel's non-bot administrators.
        let members = self
            .bot
            .get_chat_administrators(self.channel)
            .await
            .context("failed to resolve the announcement channel roster")?;
        Ok(members
            .into_iter()
            .filter(|member| !member.user.is_bot)
            .map(|member| {
                let user = member.user;
                Subscriber {
                    id: user.id.0 as i64,
                    username: user.username,
                }
            })
            .collect())
    }
}
