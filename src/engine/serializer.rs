use super::{Applied, Command, EngineError, MergeStrategy};
use crate::board::{BoardRules, Snapshot};
use crate::history::{Clock, DisplayFormat, HistoryLog, RetentionPolicy};
use crate::store::{LogStore, StoreError, TimestampPredicate};
use crate::sync::{BoardView, Broadcaster};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Engine tuning, usually built from [`crate::config::BoardConfig`]
#[derive(Clone, Debug)]
pub struct EngineSettings {
    pub rules: BoardRules,
    pub retention: RetentionPolicy,
    pub display: DisplayFormat,
    pub merge: MergeStrategy,
    /// Keep the oldest entry out of reach of undo
    pub preserve_initial_entry: bool,
    pub broadcast_capacity: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            rules: BoardRules::default(),
            retention: RetentionPolicy::default(),
            display: DisplayFormat::default(),
            merge: MergeStrategy::default(),
            preserve_initial_entry: false,
            broadcast_capacity: 64,
        }
    }
}

/// Sole owner and mutator of the history log.
///
/// Every change goes through `apply(&mut self, ..)`, so at most one command
/// is in flight. Once spawned, commands are queued FIFO and applied one at a
/// time by a single task.
pub struct BoardEngine {
    pub(super) history: HistoryLog,
    pub(super) rules: BoardRules,
    pub(super) merge: MergeStrategy,
    pub(super) preserve_initial_entry: bool,
    pub(super) store: Option<Arc<dyn LogStore>>,
    pub(super) broadcaster: Arc<Broadcaster>,
    /// Newest pruned timestamp whose store delete has not succeeded yet
    pub(super) pruned_through: Option<i64>,
}

impl BoardEngine {
    pub fn new(
        settings: EngineSettings,
        store: Option<Arc<dyn LogStore>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let now = clock.now_millis();
        let history = HistoryLog::new(settings.retention, settings.display, clock);
        let initial = BoardView {
            current_state: settings.rules.initial_snapshot(),
            history: Vec::new(),
            display_time: history.format().render(now),
            produced_at: now,
        };

        Self {
            history,
            rules: settings.rules,
            merge: settings.merge,
            preserve_initial_entry: settings.preserve_initial_entry,
            store,
            broadcaster: Arc::new(Broadcaster::new(initial, settings.broadcast_capacity)),
            pruned_through: None,
        }
    }

    pub fn broadcaster(&self) -> Arc<Broadcaster> {
        Arc::clone(&self.broadcaster)
    }

    pub fn history(&self) -> &HistoryLog {
        &self.history
    }

    /// Board as of the newest entry, or every bed at its initial status when
    /// the log is empty.
    pub fn current_state(&self) -> Snapshot {
        match self.history.latest() {
            Some(entry) => entry.snapshot.clone(),
            None => self.rules.initial_snapshot(),
        }
    }

    /// Build the full (state, history, time) triple from the log.
    pub fn view(&self) -> BoardView {
        let now = self.history.clock().now_millis();
        BoardView {
            current_state: self.current_state(),
            history: self.history.query_all(),
            display_time: self.history.format().render(now),
            produced_at: now,
        }
    }

    /// Load persisted entries, apply retention and publish the result.
    pub async fn hydrate(&mut self) -> Result<usize, EngineError> {
        let Some(entries) = self
            .with_store(|store| store.query_all_ordered_by_timestamp())
            .await?
        else {
            self.broadcaster.publish(self.view());
            return Ok(0);
        };

        let loaded = entries.len();
        self.history = HistoryLog::from_entries(
            entries,
            self.history.retention(),
            self.history.format().clone(),
            Arc::clone(self.history.clock()),
        )?;

        let pruned = self.retain().await;

        info!(
            loaded,
            pruned,
            retained = self.history.len(),
            "Hydrated history log from store"
        );

        self.broadcaster.publish(self.view());
        Ok(self.history.len())
    }

    /// Apply one command. On error the log is untouched and nothing is
    /// broadcast.
    pub async fn apply(&mut self, command: Command) -> Result<Applied, EngineError> {
        match command {
            Command::Update(patch) => self.update(patch).await,
            Command::Undo => self.undo().await,
            Command::RevertTo { timestamp } => self.revert_to(timestamp).await,
        }
    }

    async fn update(&mut self, patch: Snapshot) -> Result<Applied, EngineError> {
        self.rules.validate(&patch)?;

        let merged = self.merge.merge(&self.current_state(), patch);

        // Stamped at apply time; a same-millisecond collision is bumped past
        // the newest entry so timestamps stay unique.
        let now = self.history.clock().now_millis();
        let timestamp = match self.history.latest_timestamp() {
            Some(latest) if now <= latest => latest + 1,
            _ => now,
        };
        let entry = self.history.next_entry(merged, Some(timestamp))?;

        let persisted = entry.clone();
        self.with_store(move |store| store.append(&persisted)).await?;

        self.history.push(entry.clone())?;
        self.retain().await;

        info!(
            timestamp = entry.timestamp,
            beds = entry.snapshot.len(),
            entries = self.history.len(),
            "Board updated"
        );

        Ok(self.publish())
    }

    /// Send the current view to every observer.
    pub(super) fn publish(&self) -> Applied {
        Applied::Changed(self.broadcaster.publish(self.view()))
    }

    /// The board as last published, for commands that change nothing.
    pub(super) fn unchanged(&self) -> Applied {
        Applied::Unchanged(self.broadcaster.latest())
    }

    /// Run a blocking store operation off the async executor. `Ok(None)` when
    /// no store is configured.
    pub(super) async fn with_store<T, F>(&self, op: F) -> Result<Option<T>, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn LogStore) -> Result<T, StoreError> + Send + 'static,
    {
        let Some(store) = self.store.clone() else {
            return Ok(None);
        };
        tokio::task::spawn_blocking(move || op(store.as_ref()))
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?
            .map(Some)
    }

    /// Apply retention as of now and mirror the removals into the store.
    /// Runs after every accepted change. Returns how many entries were pruned.
    pub(super) async fn retain(&mut self) -> usize {
        let now = self.history.clock().now_millis();
        let pruned = self.history.enforce_retention(now);
        if let Some(newest) = pruned.last().map(|e| e.timestamp) {
            self.pruned_through = Some(self.pruned_through.map_or(newest, |w| w.max(newest)));
        }
        self.flush_pruned().await;
        pruned.len()
    }

    /// Delete every pruned entry still present in the store. A failed delete
    /// stays pending and is retried after the next successful store write.
    async fn flush_pruned(&mut self) {
        let Some(through) = self.pruned_through else {
            return;
        };
        match self
            .with_store(move |store| store.delete_where(TimestampPredicate::AtOrBefore(through)))
            .await
        {
            Ok(Some(removed)) => {
                debug!(removed, through, "Deleted pruned entries from store");
                self.pruned_through = None;
            }
            Ok(None) => self.pruned_through = None,
            Err(e) => warn!(
                error = %e,
                through,
                "Failed to delete pruned entries from store, will retry"
            ),
        }
    }

    /// Move the engine into its own task and return a handle for submitting
    /// commands. The task ends once every handle is dropped.
    pub fn spawn(self, queue_capacity: usize) -> (EngineHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let task = tokio::spawn(self.run(rx));
        (EngineHandle { tx }, task)
    }

    async fn run(mut self, mut rx: mpsc::Receiver<Submission>) {
        info!("Board engine running");

        while let Some(Submission { command, reply }) = rx.recv().await {
            let name = command.name();
            let outcome = self.apply(command).await;

            match &outcome {
                Ok(Applied::Changed(_)) => {}
                Ok(Applied::Unchanged(_)) => debug!(command = name, "Command left board unchanged"),
                Err(EngineError::PersistenceUnavailable(reason)) => {
                    error!(command = name, reason = %reason, "Command rejected, store unavailable")
                }
                Err(e) => warn!(command = name, error = %e, "Command rejected"),
            }

            // Requester may have gone away; the outcome stands regardless
            let _ = reply.send(outcome);
        }

        info!("Board engine stopped");
    }
}

struct Submission {
    command: Command,
    reply: oneshot::Sender<Result<Applied, EngineError>>,
}

/// Cloneable handle to a running [`BoardEngine`]
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<Submission>,
}

impl EngineHandle {
    /// Queue a command and wait for it to be applied.
    pub async fn submit(&self, command: Command) -> Result<Applied, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Submission { command, reply })
            .await
            .map_err(|_| EngineError::EngineStopped)?;
        rx.await.map_err(|_| EngineError::EngineStopped)?
    }
}
