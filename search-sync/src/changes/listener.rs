//! LISTEN side of the change channel.

use std::time::Duration;

use sqlx::postgres::PgListener;
use sqlx::PgPool;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

use crate::changes::events::parse_payloads;
use crate::changes::ingest::ChangeIngest;
use crate::errors::{StoreError, SyncError};
use crate::store::validate_identifier;

/// Channel the primary store's triggers notify.
pub const DEFAULT_CHANGE_CHANNEL: &str = "search_sync_changes";

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Receives change notifications on a dedicated connection.
pub struct PgChangeListener {
    listener: PgListener,
    channel: String,
}

impl PgChangeListener {
    /// Open a listening connection from `pool` and subscribe to `channel`.
    pub async fn connect(pool: &PgPool, channel: &str) -> Result<Self, SyncError> {
        validate_identifier(channel)?;
        let mut listener = PgListener::connect_with(pool)
            .await
            .map_err(StoreError::from)?;
        listener.listen(channel).await.map_err(StoreError::from)?;
        info!(channel = %channel, "Listening for row changes");
        Ok(Self {
            listener,
            channel: channel.to_string(),
        })
    }

    /// Hand every notification to `ingest` until `shutdown` turns true.
    ///
    /// Notifications already buffered on the connection are applied together
    /// with the one that woke the listener. Changes committed while the
    /// connection is down are not replayed.
    #[instrument(skip_all, fields(channel = %self.channel))]
    pub async fn run(mut self, ingest: ChangeIngest, mut shutdown: watch::Receiver<bool>) {
        loop {
            let received = tokio::select! {
                _ = shutdown.wait_for(|stopped| *stopped) => break,
                received = self.listener.try_recv() => received,
            };

            let first = match received {
                Ok(Some(notification)) => notification,
                Ok(None) => {
                    warn!("Change listener connection lost, reconnecting");
                    continue;
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        retry_in_secs = RECONNECT_DELAY.as_secs(),
                        "Change listener failed, retrying"
                    );
                    tokio::select! {
                        _ = shutdown.wait_for(|stopped| *stopped) => break,
                        _ = sleep(RECONNECT_DELAY) => continue,
                    }
                }
            };

            let mut notifications = vec![first];
            while let Some(next) = self.listener.next_buffered() {
                notifications.push(next);
            }
            let events = parse_payloads(notifications.iter().map(|n| n.payload()));
            debug!(received = notifications.len(), events = events.len(), "Applying row changes");
            ingest.apply(&events).await;
        }
        info!("Change listener stopped");
    }
}
