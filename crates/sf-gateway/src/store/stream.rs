//! Lazy, restartable event log readers.
//!
//! [`read_from`] replays history in pages and then tails live entries.
//! [`read_history`] stops at the head observed when it was called.

use std::collections::VecDeque;
use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::broadcast;

use sf_protocol::EventLogEntry;

use super::{Ledger, StoreResult};

/// Entries fetched from history per read.
const PAGE_SIZE: usize = 256;

struct Cursor {
    ledger: Arc<dyn Ledger>,
    live: broadcast::Receiver<EventLogEntry>,
    /// Next sequence number to yield.
    next: u64,
    buffer: VecDeque<EventLogEntry>,
    /// Last sequence number to yield, for finite reads.
    end: Option<u64>,
    done: bool,
}

impl Cursor {
    async fn step(&mut self) -> Option<StoreResult<EventLogEntry>> {
        loop {
            if self.done {
                return None;
            }
            if let Some(entry) = self.buffer.pop_front() {
                if self.end.is_some_and(|end| entry.seq > end) {
                    self.done = true;
                    return None;
                }
                return Some(Ok(entry));
            }
            if self.end.is_some_and(|end| self.next > end) {
                return None;
            }

            match self.ledger.read_range(self.next, PAGE_SIZE).await {
                Ok(page) if !page.is_empty() => {
                    if let Some(last) = page.last() {
                        self.next = last.seq + 1;
                    }
                    self.buffer.extend(page);
                    continue;
                }
                Ok(_) => {}
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }

            // History exhausted.
            if self.end.is_some() {
                return None;
            }
            match self.live.recv().await {
                // Already yielded from history.
                Ok(entry) if entry.seq < self.next => {}
                Ok(entry) if entry.seq == self.next => {
                    self.next += 1;
                    return Some(Ok(entry));
                }
                // Skipped ahead: the missing entries are committed, refill.
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::debug!(
                        skipped = n,
                        next = self.next,
                        "event tail lagged, refilling from history"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

fn cursor_stream(cursor: Cursor) -> BoxStream<'static, StoreResult<EventLogEntry>> {
    stream::unfold(cursor, |mut cursor| async move {
        cursor.step().await.map(|item| (item, cursor))
    })
    .boxed()
}

/// All entries with `seq >= from`, then every entry committed afterwards.
/// Never ends on its own while the ledger is alive.
pub fn read_from(
    ledger: Arc<dyn Ledger>,
    from: u64,
) -> BoxStream<'static, StoreResult<EventLogEntry>> {
    // Subscribe before the first history read so nothing falls in between.
    let live = ledger.subscribe();
    cursor_stream(Cursor {
        ledger,
        live,
        next: from.max(1),
        buffer: VecDeque::new(),
        end: None,
        done: false,
    })
}

/// Entries with `seq >= from` up to the head at the time of the call.
pub async fn read_history(
    ledger: Arc<dyn Ledger>,
    from: u64,
) -> StoreResult<BoxStream<'static, StoreResult<EventLogEntry>>> {
    let live = ledger.subscribe();
    let end = ledger.head().await?;
    Ok(cursor_stream(Cursor {
        ledger,
        live,
        next: from.max(1),
        buffer: VecDeque::new(),
        end: Some(end),
        done: false,
    }))
}
