//! Notification fanout: broadcast every new item to the shared channel, then
//! deliver each subscriber's non-suppressed subset as direct messages with an
//! inline suppress button.

use crate::actions::{ActionRegistry, SuppressAction};
use crate::db::{self, Pool};
use crate::messenger::{ActionButton, DeliveryError, Messenger};
use crate::model::Item;
use anyhow::{Context, Result};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, instrument, warn};

const SUPPRESS_LABEL: &str = "🚫 Suppress this item";

/// Fan one run's new items out to the channel and to subscribers.
///
/// All broadcasts complete before the first DM — the channel is the canonical
/// first notice. A failure loading suppressions degrades to "no subscriber is
/// suppressed"; a delivery failure for one recipient never stops the rest.
/// Consecutive sends are spaced by `send_delay` for the platform rate limit.
#[instrument(skip_all, fields(new_items = new_items.len()))]
pub async fn notify_new_items(
    pool: &Pool,
    messenger: &dyn Messenger,
    registry: &Arc<Mutex<ActionRegistry>>,
    new_items: &[Item],
    send_delay: Duration,
) -> Result<()> {
    if new_items.is_empty() {
        return Ok(());
    }

    // One delay between each pair of consecutive sends, broadcasts and DMs
    // alike; no delay before the first send or after the last.
    let mut sent_any = false;

    for item in new_items {
        if sent_any {
            tokio::time::sleep(send_delay).await;
        }
        sent_any = true;
        if let Err(err) = messenger.broadcast(item).await {
            error!(?err, id = %item.id, "failed to broadcast new item");
        }
    }

    // Broadcasts have already gone out; a roster failure only costs this
    // run's DMs.
    let roster = messenger
        .roster()
        .await
        .context("failed to resolve subscriber roster")?;

    let new_ids: Vec<String> = new_items.iter().map(|item| item.id.clone()).collect();
    let suppressed = match db::suppressions_for_items(pool, &new_ids).await {
        Ok(grouped) => grouped,
        Err(err) => {
            warn!(?err, "failed to load suppressions; delivering unfiltered");
            HashMap::new()
        }
    };
    let none_suppressed = HashSet::new();

    for subscriber in &roster {
        let suppressed_for = suppressed.get(&subscriber.id).unwrap_or(&none_suppressed);
        let deliverable: Vec<&Item> = new_items
            .iter()
            .filter(|item| !suppressed_for.contains(&item.id))
            .collect();
        if deliverable.is_empty() {
            continue;
        }

        for item in deliverable {
            if sent_any {
                tokio::time::sleep(send_delay).await;
            }
            sent_any = true;
            let token = registry.lock().await.issue(SuppressAction {
                subscriber_id: subscriber.id,
                item_id: item.id.clone(),
                item_name: item.name.clone(),
            });
            let button = ActionButton {
                label: SUPPRESS_LABEL.to_string(),
                token,
            };
            match messenger.direct_message(subscriber, item, Some(button)).await {
                Ok(()) => {}
                Err(DeliveryError::Forbidden) => {
                    warn!(subscriber = subscriber.id, "subscriber unreachable over DM; skipping")
                }
                Err(err) => {
                    error!(?err, subscriber = subscriber.id, id = %item.id, "failed to deliver direct message")
                }
            }
        }
    }

    Ok(())
}
