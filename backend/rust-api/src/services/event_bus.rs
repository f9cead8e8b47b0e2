use anyhow::{anyhow, Context, Result};
use futures::StreamExt;
use redis::aio::ConnectionManager;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::GatewaySettings;
use crate::error::ArenaError;
use crate::metrics::track_cache_operation;
use crate::models::room_event::{EventOutcome, GameState};
use crate::services::event_gateway::{EventGateway, PendingOutcome};

/// Bridges Redis pub/sub and the gateway: reads the inbound channel and
/// publishes each changed room snapshot on `{outbound_prefix}{roomId}`.
pub struct RedisEventBus {
    client: redis::Client,
    publisher: ConnectionManager,
    settings: GatewaySettings,
}

impl RedisEventBus {
    pub fn new(
        client: redis::Client,
        publisher: ConnectionManager,
        settings: GatewaySettings,
    ) -> Self {
        Self {
            client,
            publisher,
            settings,
        }
    }

    pub fn outbound_channel(&self, room_id: &str) -> String {
        format!("{}{}", self.settings.outbound_prefix, room_id)
    }

    /// Runs until the subscription drops. Messages are submitted in arrival
    /// order; waiting for results happens off the read loop.
    pub async fn run(&self, gateway: Arc<EventGateway>) -> Result<()> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .context("Failed to open Redis pub/sub connection")?;
        pubsub
            .subscribe(&self.settings.inbound_channel)
            .await
            .context("Failed to subscribe to inbound channel")?;
        info!(channel = %self.settings.inbound_channel, "Event gateway subscribed");

        let mut messages = pubsub.on_message();
        while let Some(message) = messages.next().await {
            let pending = match gateway.parse(message.get_payload_bytes()) {
                Ok(event) => gateway.submit(event).await,
                Err(e) => Err(e),
            };
            match pending {
                Ok(pending) => self.spawn_publisher(gateway.clone(), pending),
                Err(e) => warn!(error = %e, "Dropping inbound event"),
            }
        }

        Err(anyhow!("Redis subscription stream ended"))
    }

    fn spawn_publisher(&self, gateway: Arc<EventGateway>, pending: PendingOutcome) {
        let publisher = self.publisher.clone();
        let channel = self.outbound_channel(pending.room_id());
        tokio::spawn(async move {
            match pending.wait().await {
                Ok(outcome) => {
                    if !outcome.applied {
                        debug!(room_id = %outcome.room_id, "Duplicate event acknowledged");
                        return;
                    }
                    if let Err(e) = publish(publisher, &channel, &outcome).await {
                        warn!(
                            room_id = %outcome.room_id,
                            error = %e,
                            "Failed to publish room update"
                        );
                    }
                    if outcome.snapshot.state == GameState::Finished {
                        gateway.close_room(&outcome.room_id);
                    }
                }
                Err(e @ (ArenaError::InvalidTransition(_) | ArenaError::Validation(_))) => {
                    warn!(channel = %channel, error = %e, "Room rejected event");
                }
                Err(e) => warn!(channel = %channel, error = %e, "Room event failed"),
            }
        });
    }
}

async fn publish(
    mut conn: ConnectionManager,
    channel: &str,
    outcome: &EventOutcome,
) -> Result<()> {
    let body = serde_json::to_string(outcome)?;
    track_cache_operation("publish", async {
        redis::cmd("PUBLISH")
            .arg(channel)
            .arg(body)
            .query_async::<i64>(&mut conn)
            .await
    })
    .await?;
    Ok(())
}
