//! Event listener: wake-ups from PostgreSQL LISTEN/NOTIFY.
//!
//! The listener runs on its own dedicated connection, which must stay in autocommit mode.
//! A notification is only delivered to a session when that session is outside a transaction,
//! so a listener connection left inside an open transaction does not fail. It just goes quiet
//! until the transaction ends. Never run queries in a transaction on the listener connection.

use std::time::Duration;

use async_trait::async_trait;
use feedsense_core::ListenError;
use sqlx::postgres::PgListener;
use sqlx::PgPool;

/// After a wake-up, notifications arriving within this window are folded into it.
const COALESCE_WINDOW: Duration = Duration::from_millis(10);

/// A live subscription to one notification channel.
#[async_trait]
pub trait NotificationSource: Send {
    /// Wait up to `timeout` for notifications.
    ///
    /// Returns `Ok(true)` if at least one arrived (bursts coalesce into a single wake-up),
    /// `Ok(false)` on timeout and [`ListenError::Disconnected`] when the connection is gone
    /// and the subscription has to be recreated.
    async fn poll(&mut self, timeout: Duration) -> Result<bool, ListenError>;
}

/// Opens subscriptions; the scheduler calls it again after a disconnect.
#[async_trait]
pub trait Subscriber: Send + Sync {
    async fn subscribe(&self, channel: &str) -> Result<Box<dyn NotificationSource>, ListenError>;
}

/// Creates [`PgEventListener`]s from the worker's pool configuration.
#[derive(Clone)]
pub struct PgSubscriber {
    pool: PgPool,
}

impl PgSubscriber {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Subscriber for PgSubscriber {
    async fn subscribe(&self, channel: &str) -> Result<Box<dyn NotificationSource>, ListenError> {
        let listener = PgEventListener::connect(&self.pool, channel).await?;
        Ok(Box::new(listener))
    }
}

pub struct PgEventListener {
    listener: PgListener,
    channel: String,
}

impl PgEventListener {
    /// Open a dedicated listener connection and `LISTEN` on `channel`.
    pub async fn connect(pool: &PgPool, channel: &str) -> Result<Self, ListenError> {
        let subscribe_err = |e: sqlx::Error| ListenError::Subscribe {
            channel: channel.to_string(),
            reason: e.to_string(),
        };

        let mut listener = PgListener::connect_with(pool).await.map_err(subscribe_err)?;
        listener.listen(channel).await.map_err(subscribe_err)?;

        tracing::info!(channel = %channel, "Listening for new feedback notifications");
        Ok(Self {
            listener,
            channel: channel.to_string(),
        })
    }
}

#[async_trait]
impl NotificationSource for PgEventListener {
    async fn poll(&mut self, timeout: Duration) -> Result<bool, ListenError> {
        match tokio::time::timeout(timeout, self.listener.try_recv()).await {
            Err(_) => Ok(false),
            Ok(Ok(Some(notification))) => {
                let mut coalesced = 1usize;
                loop {
                    while self.listener.next_buffered().is_some() {
                        coalesced += 1;
                    }
                    // After a lost connection the next `try_recv` reconnects and re-issues LISTEN.
                    match tokio::time::timeout(COALESCE_WINDOW, self.listener.try_recv()).await {
                        Ok(Ok(Some(_))) => coalesced += 1,
                        _ => break,
                    }
                }
                tracing::debug!(
                    channel = %self.channel,
                    payload = %notification.payload(),
                    coalesced,
                    "Notification received"
                );
                Ok(true)
            }
            Ok(Ok(None)) => Err(ListenError::Disconnected(format!(
                "listener connection for '{}' closed",
                self.channel
            ))),
            Ok(Err(e)) => Err(ListenError::Disconnected(e.to_string())),
        }
    }
}
