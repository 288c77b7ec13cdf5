//! Session-scoped live-update fan-out.
//!
//! Each session gets a broadcast channel; the engine publishes the
//! exact deltas a commit or roll wrote, in commit order. Subscribers
//! that fall behind or reconnect reconcile by re-reading the logs with
//! `?cursor=`; the bus itself never replays.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;

use tf_domain::model::RollResult;

const CHANNEL_CAPACITY: usize = 64;

/// One `update` event: only the sections that changed are present.
#[derive(Debug, Clone, Serialize, Default)]
pub struct SessionUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript: Option<LogDelta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changelog: Option<LogDelta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rolls: Option<RollsDelta>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogDelta {
    pub lines: Vec<String>,
    /// 1-based position of the last line after the write.
    pub cursor: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RollsDelta {
    pub turn: u64,
    pub items: Vec<RollResult>,
}

pub struct UpdateBus {
    channels: Mutex<HashMap<String, broadcast::Sender<SessionUpdate>>>,
}

impl Default for UpdateBus {
    fn default() -> Self {
        Self::new()
    }
}

impl UpdateBus {
    pub fn new() -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribe to a session's updates. Subscribing never creates a
    /// writer; an idle channel just waits.
    pub fn subscribe(&self, slug: &str) -> broadcast::Receiver<SessionUpdate> {
        self.sender(slug).subscribe()
    }

    /// Publish an update. Events are delivered in publish order; with
    /// no subscribers the event is dropped.
    pub fn publish(&self, slug: &str, update: SessionUpdate) {
        let receivers = self.sender(slug).send(update).unwrap_or(0);
        tracing::trace!(slug, receivers, "session update published");
    }

    /// Drop channels with no live subscribers.
    pub fn prune_idle(&self) {
        self.channels
            .lock()
            .retain(|_, sender| sender.receiver_count() > 0);
    }

    fn sender(&self, slug: &str) -> broadcast::Sender<SessionUpdate> {
        self.channels
            .lock()
            .entry(slug.to_owned())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_in_order() {
        let bus = UpdateBus::new();
        let mut rx = bus.subscribe("alpha");

        for turn in 1..=3 {
            bus.publish(
                "alpha",
                SessionUpdate {
                    turn: Some(turn),
                    ..Default::default()
                },
            );
        }

        for expected in 1..=3 {
            let update = rx.recv().await.unwrap();
            assert_eq!(update.turn, Some(expected));
        }
    }

    #[tokio::test]
    async fn sessions_are_isolated() {
        let bus = UpdateBus::new();
        let mut alpha = bus.subscribe("alpha");
        let mut beta = bus.subscribe("beta");

        bus.publish(
            "beta",
            SessionUpdate {
                turn: Some(9),
                ..Default::default()
            },
        );

        assert_eq!(beta.recv().await.unwrap().turn, Some(9));
        assert!(matches!(
            alpha.try_recv(),
            Err(tokio::sync::broadcast::error::TryRecvError::Empty)
        ));
    }

    #[test]
    fn prune_drops_idle_channels() {
        let bus = UpdateBus::new();
        {
            let _rx = bus.subscribe("alpha");
            bus.prune_idle();
            assert_eq!(bus.channels.lock().len(), 1);
        }
        bus.prune_idle();
        assert!(bus.channels.lock().is_empty());
    }
}
