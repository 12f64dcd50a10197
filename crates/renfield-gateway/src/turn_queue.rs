//! Per-session FIFO turn queue (§4.6 "the Gateway enqueues the turn on the
//! session's FIFO queue; the Turn Engine consumes one at a time", §5
//! "within a session, user messages are processed strictly in arrival
//! order").
//!
//! Grounded in `skynet_scheduler::engine::SchedulerEngine`'s tick/event ->
//! bounded-channel -> router fan-out shape: one long-lived consumer task per
//! key, a bounded `mpsc` in front of it, and the caller never touches the
//! Turn Engine directly.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::warn;

use renfield_turn::{TurnEngine, TurnRequest};

const QUEUE_DEPTH: usize = 32;

/// One consumer task per `session_id`, draining queued turns strictly in
/// arrival order. A session with no in-flight turns has no running task —
/// the first enqueue spawns it.
#[derive(Default)]
pub struct SessionWorkers {
    senders: DashMap<String, mpsc::Sender<TurnRequest>>,
}

impl SessionWorkers {
    pub fn new() -> Self {
        Self { senders: DashMap::new() }
    }

    /// Enqueue a turn for `session_id`, spawning its consumer task if this
    /// is the first turn seen for that session. Never blocks the caller on
    /// the turn itself — only on queue capacity (back-pressure, §5).
    pub async fn enqueue(&self, engine: Arc<TurnEngine>, session_id: &str, request: TurnRequest) {
        let sender = self
            .senders
            .entry(session_id.to_string())
            .or_insert_with(|| spawn_worker(engine, session_id.to_string()))
            .clone();

        if sender.send(request).await.is_err() {
            warn!(session_id, "turn queue consumer died, dropping turn");
        }
    }
}

fn spawn_worker(engine: Arc<TurnEngine>, session_id: String) -> mpsc::Sender<TurnRequest> {
    let (tx, mut rx) = mpsc::channel::<TurnRequest>(QUEUE_DEPTH);
    tokio::spawn(async move {
        while let Some(request) = rx.recv().await {
            if let Err(e) = engine.run_turn(request).await {
                warn!(session_id = %session_id, error = %e, "turn failed");
            }
        }
    });
    tx
}
