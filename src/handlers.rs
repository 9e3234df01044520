//! Subscriber-facing command and callback handlers.

use crate::actions::{self, ActionRegistry, SuppressAction};
use crate::db::{self, Pool};
use anyhow::Result;
use std::sync::Arc;
use teloxide::prelude::*;
use tokio::sync::Mutex;
use tracing::{info, instrument};
use uuid::Uuid;

/// Entries per page for the catalog and snapshot listings.
const PAGE_SIZE: usize = 25;

const NOT_IN_CATALOG: &str =
    "Item ID not found in the all-time catalog. Please check the ID and try again.";

#[instrument(skip_all)]
pub async fn handle_message(bot: &Bot, pool: &Pool, msg: &Message) -> Result<()> {
    let Some(user) = msg.from() else {
        return Ok(());
    };
    let subscriber_id = user.id.0 as i64;
    let Some(text) = msg.text() else {
        return Ok(());
    };
    let Some((command, arg)) = parse_command(text) else {
        return Ok(());
    };

    match command {
        "/start" => {}
        "/ping" => {
            let _ = bot.send_message(msg.chat.id, "PONG").await;
        }
        "/suppress_add" => suppress_add(bot, pool, msg, subscriber_id, arg).await?,
        "/suppress_remove" => suppress_remove(bot, pool, msg, subscriber_id, arg).await?,
        "/suppress_list" => suppress_list(bot, pool, msg, subscriber_id).await?,
        "/catalog_list" => {
            let lines: Vec<String> = db::list_catalog(pool)
                .await?
                .iter()
                .map(|entry| format_line(&entry.name, &entry.id))
                .collect();
            send_listing(bot, msg.chat.id, "No items in the catalog yet.", &lines).await;
        }
        "/snapshot_list" => {
            let lines: Vec<String> = db::list_snapshot(pool)
                .await?
                .iter()
                .map(|item| format_line(&item.name, &item.id))
                .collect();
            send_listing(bot, msg.chat.id, "No items currently available.", &lines).await;
        }
        _ => {
            let _ = bot.send_message(msg.chat.id, "Unknown command.").await;
        }
    }

    Ok(())
}

async fn suppress_add(
    bot: &Bot,
    pool: &Pool,
    msg: &Message,
    subscriber_id: i64,
    arg: Option<&str>,
) -> Result<()> {
    let Some(item_id) = arg else {
        let _ = bot
            .send_message(msg.chat.id, "Usage: /suppress_add <item_id>")
            .await;
        return Ok(());
    };
    // The all-time catalog is the one source of truth for item ids.
    match db::catalog_name(pool, item_id).await? {
        None => {
            let _ = bot.send_message(msg.chat.id, NOT_IN_CATALOG).await;
        }
        Some(name) => {
            db::insert_suppression(pool, subscriber_id, item_id).await?;
            info!(subscriber_id, item_id, "suppression added");
            let _ = bot
                .send_message(
                    msg.chat.id,
                    format!("{name} has been added to your suppression list."),
                )
                .await;
        }
    }
    Ok(())
}

async fn suppress_remove(
    bot: &Bot,
    pool: &Pool,
    msg: &Message,
    subscriber_id: i64,
    arg: Option<&str>,
) -> Result<()> {
    let Some(item_id) = arg else {
        let _ = bot
            .send_message(msg.chat.id, "Usage: /suppress_remove <item_id>")
            .await;
        return Ok(());
    };
    // Validated against the catalog, not the snapshot: a suppression stays
    // removable after the item rotates out of current availability.
    match db::catalog_name(pool, item_id).await? {
        None => {
            let _ = bot.send_message(msg.chat.id, NOT_IN_CATALOG).await;
        }
        Some(name) => {
            let removed = db::delete_suppression(pool, subscriber_id, item_id).await?;
            let reply = if removed {
                info!(subscriber_id, item_id, "suppression removed");
                format!("{name} has been removed from your suppression list.")
            } else {
                format!("{name} was not on your suppression list.")
            };
            let _ = bot.send_message(msg.chat.id, reply).await;
        }
    }
    Ok(())
}

async fn suppress_list(bot: &Bot, pool: &Pool, msg: &Message, subscriber_id: i64) -> Result<()> {
    let names = db::list_suppressed_names(pool, subscriber_id).await?;
    if names.is_empty() {
        let _ = bot
            .send_message(msg.chat.id, "Your suppression list is empty.")
            .await;
        return Ok(());
    }
    let lines: Vec<String> = names.iter().map(|name| format!("• {name}")).collect();
    let _ = bot
        .send_message(
            msg.chat.id,
            format!("Your suppressed items:\n{}", lines.join("\n")),
        )
        .await;
    Ok(())
}

async fn send_listing(bot: &Bot, chat_id: ChatId, empty_reply: &str, lines: &[String]) {
    if lines.is_empty() {
        let _ = bot.send_message(chat_id, empty_reply).await;
        return;
    }
    for page in paginate(lines, PAGE_SIZE) {
        let _ = bot.send_message(chat_id, page).await;
    }
}

#[derive(Debug, PartialEq)]
enum Verdict {
    Expired,
    NotYours,
    Activate(SuppressAction),
}

/// Decide what a button activation does. Unknown or expired tokens read as
/// expired; a wrong activator is rejected and the token stays live for the
/// intended subscriber; only that subscriber consumes it.
fn decide_activation(registry: &mut ActionRegistry, token: &Uuid, activator: i64) -> Verdict {
    match registry.get(token) {
        None => Verdict::Expired,
        Some(action) if action.subscriber_id != activator => Verdict::NotYours,
        Some(_) => match registry.consume(token) {
            Some(action) => Verdict::Activate(action),
            None => Verdict::Expired,
        },
    }
}

/// Activation of an inline suppress button. The token must identify a live
/// registry entry and the activator must be the intended subscriber; wrong
/// activators are rejected without consuming the token.
#[instrument(skip_all)]
pub async fn handle_callback(
    bot: &Bot,
    pool: &Pool,
    registry: &Arc<Mutex<ActionRegistry>>,
    query: &CallbackQuery,
) -> Result<()> {
    let token = query.data.as_deref().and_then(actions::parse_callback_data);
    let Some(token) = token else {
        let _ = bot
            .answer_callback_query(query.id.clone())
            .text("This button has expired.")
            .await;
        return Ok(());
    };
    let caller = query.from.id.0 as i64;

    // Decide under the lock, act after releasing it: the registry lock is
    // never held across a Telegram call.
    let verdict = {
        let mut registry = registry.lock().await;
        decide_activation(&mut registry, &token, caller)
    };

    match verdict {
        Verdict::Expired => {
            let _ = bot
                .answer_callback_query(query.id.clone())
                .text("This button has expired.")
                .await;
        }
        Verdict::NotYours => {
            let _ = bot
                .answer_callback_query(query.id.clone())
                .text("This button is not for you!")
                .await;
        }
        Verdict::Activate(action) => {
            db::insert_suppression(pool, action.subscriber_id, &action.item_id).await?;
            info!(
                subscriber_id = action.subscriber_id,
                item_id = %action.item_id,
                "suppression added via button"
            );
            let _ = bot
                .answer_callback_query(query.id.clone())
                .text(format!(
                    "{} has been added to your suppression list.",
                    action.item_name
                ))
                .await;
            // Clear the keyboard so repeated taps are a no-op.
            if let Some(message) = &query.message {
                let _ = bot
                    .edit_message_reply_markup(message.chat.id, message.id)
                    .await;
            }
        }
    }

    Ok(())
}

fn format_line(name: &str, id: &str) -> String {
    format!("• {name} (ID: {id})")
}

/// Split listing lines into messages of at most `page_size` lines each.
fn paginate(lines: &[String], page_size: usize) -> Vec<String> {
    lines
        .chunks(page_size)
        .map(|chunk| chunk.join("\n"))
        .collect()
}

/// `/command arg` → `("/command", Some("arg"))`. A `@BotName` suffix on the
/// command (Telegram appends one in group chats) is stripped. Non-commands
/// yield None.
fn parse_command(text: &str) -> Option<(&str, Option<&str>)> {
    let trimmed = text.trim();
    if !trimmed.starts_with('/') {
        return None;
    }
    let mut parts = trimmed.splitn(2, char::is_whitespace);
    let command = parts.next()?;
    let command = command.split_once('@').map_or(command, |(cmd, _)| cmd);
    let arg = parts.next().map(str::trim).filter(|arg| !arg.is_empty());
    Some((command, arg))
}
