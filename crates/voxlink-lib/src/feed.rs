//! Append-only transcript store with ordered snapshot fan-out.
//!
//! Every appended turn is one transcript mutation and produces one snapshot
//! per subscriber, delivered in append order.

use std::sync::Mutex;

use tokio::sync::mpsc;
use tracing::debug;

use voxlink_core::types::TranscriptTurn;

use crate::provider::Subscription;

#[derive(Default)]
pub struct TranscriptFeed {
    inner: Mutex<FeedInner>,
}

#[derive(Default)]
struct FeedInner {
    turns: Vec<TranscriptTurn>,
    subscribers: Vec<mpsc::UnboundedSender<Vec<TranscriptTurn>>>,
}

impl TranscriptFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current snapshot plus a receiver for every later one.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock();
        inner.subscribers.push(tx);
        Subscription {
            current: inner.turns.clone(),
            updates: rx,
        }
    }

    pub fn snapshot(&self) -> Vec<TranscriptTurn> {
        self.lock().turns.clone()
    }

    /// Append turns whose id is not yet in the transcript. Returns how many
    /// were added.
    pub fn append(&self, turns: impl IntoIterator<Item = TranscriptTurn>) -> usize {
        let mut inner = self.lock();
        let mut added = 0;
        for turn in turns {
            if inner.turns.iter().any(|t| t.id == turn.id) {
                continue;
            }
            inner.turns.push(turn);
            added += 1;

            let snapshot = inner.turns.clone();
            inner
                .subscribers
                .retain(|tx| tx.send(snapshot.clone()).is_ok());
        }
        if added > 0 {
            debug!(
                "transcript: +{added} turn(s), {} subscriber(s)",
                inner.subscribers.len()
            );
        }
        added
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FeedInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
