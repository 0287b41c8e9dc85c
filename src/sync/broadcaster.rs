use crate::board::Snapshot;
use crate::history::LogEntry;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tracing::{debug, info};
use uuid::Uuid;

/// Everything an observer needs to render the board from scratch:
/// current state, full ordered history and the time of the change.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardView {
    pub current_state: Snapshot,
    pub history: Vec<LogEntry>,
    pub display_time: String,
    /// Epoch millis at which this view was produced
    pub produced_at: i64,
}

/// Connected observer bookkeeping
#[derive(Clone, Debug)]
pub struct ObserverInfo {
    pub connected_at: DateTime<Utc>,
}

struct Latest {
    view: Arc<BoardView>,
    tx: broadcast::Sender<Arc<BoardView>>,
}

/// Pushes every accepted change to all observers.
///
/// The latest view and the sender share one lock, so a joining observer's
/// initial view is exactly the last published one and every later publish
/// reaches it.
pub struct Broadcaster {
    latest: Mutex<Latest>,
    observers: DashMap<Uuid, ObserverInfo>,
}

impl Broadcaster {
    pub fn new(initial: BoardView, capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            latest: Mutex::new(Latest {
                view: Arc::new(initial),
                tx,
            }),
            observers: DashMap::new(),
        }
    }

    /// Record `view` as current and send it to every connected observer.
    pub fn publish(&self, view: BoardView) -> Arc<BoardView> {
        let view = Arc::new(view);
        let mut latest = self.lock();
        latest.view = Arc::clone(&view);
        // No receivers is fine: nobody is connected
        let delivered = latest.tx.send(Arc::clone(&view)).unwrap_or(0);
        debug!(
            observers = delivered,
            entries = view.history.len(),
            "Published board view"
        );
        view
    }

    /// Register a new observer. The returned session carries the current view
    /// and a receiver for every view published afterwards.
    pub fn join(self: &Arc<Self>) -> ObserverSession {
        let (initial, rx) = {
            let latest = self.lock();
            (Arc::clone(&latest.view), latest.tx.subscribe())
        };

        let id = Uuid::new_v4();
        self.observers.insert(
            id,
            ObserverInfo {
                connected_at: Utc::now(),
            },
        );
        info!(observer_id = %id, observers = self.observers.len(), "Observer joined");

        ObserverSession {
            id,
            initial,
            rx,
            broadcaster: Arc::clone(self),
        }
    }

    /// Most recently published view
    pub fn latest(&self) -> Arc<BoardView> {
        Arc::clone(&self.lock().view)
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    fn leave(&self, id: &Uuid) {
        if let Some((_, observer)) = self.observers.remove(id) {
            let connected_secs = (Utc::now() - observer.connected_at).num_seconds();
            info!(
                observer_id = %id,
                connected_secs,
                observers = self.observers.len(),
                "Observer left"
            );
        }
    }

    fn lock(&self) -> MutexGuard<'_, Latest> {
        self.latest.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A registered observer. Unregisters itself when dropped.
pub struct ObserverSession {
    pub id: Uuid,
    /// View current at the moment of joining
    pub initial: Arc<BoardView>,
    pub rx: broadcast::Receiver<Arc<BoardView>>,
    broadcaster: Arc<Broadcaster>,
}

impl Drop for ObserverSession {
    fn drop(&mut self) {
        self.broadcaster.leave(&self.id);
    }
}
