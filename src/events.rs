use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

use log::debug;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

pub const STATE_UPDATE: &str = "state_update";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateUpdate {
    pub pin_num: u32,
    pub state: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateEvent {
    pub event: String,
    pub data: StateUpdate,
    pub timestamp_ms: u64,
}

/// Fire-and-forget fan-out to every connected subscriber. Implementations must
/// not fail the caller when nobody is listening.
pub trait Broadcast: Send + Sync {
    fn broadcast(&self, event: &str, payload: StateUpdate);
}

pub struct EventBroadcaster {
    event_tx: broadcast::Sender<StateEvent>,
    history: RwLock<VecDeque<StateEvent>>,
    history_capacity: usize,
}

impl EventBroadcaster {
    pub fn new(channel_capacity: usize, history_capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(channel_capacity.max(1));

        Self {
            event_tx,
            history: RwLock::new(VecDeque::with_capacity(history_capacity)),
            history_capacity,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateEvent> {
        self.event_tx.subscribe()
    }

    /// Most recent events, oldest first.
    pub fn history(&self, limit: Option<usize>) -> Vec<StateEvent> {
        let history = self.history.read();
        let skip = limit
            .map(|lim| history.len().saturating_sub(lim))
            .unwrap_or(0);
        history.iter().skip(skip).cloned().collect()
    }
}

impl Broadcast for EventBroadcaster {
    fn broadcast(&self, event: &str, payload: StateUpdate) {
        let event = StateEvent {
            event: event.to_string(),
            data: payload,
            timestamp_ms: epoch_millis(),
        };

        if self.history_capacity > 0 {
            let mut history = self.history.write();
            while history.len() >= self.history_capacity {
                history.pop_front();
            }
            history.push_back(event.clone());
        }

        match self.event_tx.send(event) {
            Ok(receivers) => debug!("state update delivered to {receivers} subscriber(s)"),
            Err(_) => debug!("state update dropped, no subscribers"),
        }
    }
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
