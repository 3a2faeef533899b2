//! FIFO queue of intercepted units and its single consumer.

use std::borrow::Cow;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::error::SocketError;

/// One intercepted unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueItem {
    pub payload: Vec<u8>,
    pub received_at: DateTime<Utc>,
    /// Peer description when the transport exposes one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer: Option<String>,
}

impl QueueItem {
    pub fn new(payload: Vec<u8>, peer: Option<String>) -> Self {
        Self {
            payload,
            received_at: Utc::now(),
            peer,
        }
    }

    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

/// How long a read may block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    Within(Duration),
    Forever,
}

impl From<Duration> for Wait {
    fn from(d: Duration) -> Self {
        Wait::Within(d)
    }
}

#[derive(Debug, Clone)]
pub(crate) enum QueueSender {
    Unbounded(mpsc::UnboundedSender<QueueItem>),
    Bounded(mpsc::Sender<QueueItem>),
}

impl QueueSender {
    /// Bounded queues wait for room instead of dropping.
    pub(crate) async fn push(&self, item: QueueItem) -> Result<(), QueueItem> {
        match self {
            QueueSender::Unbounded(tx) => tx.send(item).map_err(|e| e.0),
            QueueSender::Bounded(tx) => tx.send(item).await.map_err(|e| e.0),
        }
    }
}

#[derive(Debug)]
enum QueueReceiver {
    Unbounded(mpsc::UnboundedReceiver<QueueItem>),
    Bounded(mpsc::Receiver<QueueItem>),
}

impl QueueReceiver {
    async fn recv(&mut self) -> Option<QueueItem> {
        match self {
            QueueReceiver::Unbounded(rx) => rx.recv().await,
            QueueReceiver::Bounded(rx) => rx.recv().await,
        }
    }

    fn try_recv(&mut self) -> Option<QueueItem> {
        match self {
            QueueReceiver::Unbounded(rx) => rx.try_recv().ok(),
            QueueReceiver::Bounded(rx) => rx.try_recv().ok(),
        }
    }
}

/// Exclusive reader of one listener's queue.
#[derive(Debug)]
pub struct QueueObserver {
    label: String,
    rx: QueueReceiver,
}

/// Create a queue; `capacity = None` is unbounded.
pub(crate) fn channel(label: &str, capacity: Option<usize>) -> (QueueSender, QueueObserver) {
    let (tx, rx) = match capacity {
        Some(cap) => {
            let (tx, rx) = mpsc::channel(cap.max(1));
            (QueueSender::Bounded(tx), QueueReceiver::Bounded(rx))
        }
        None => {
            let (tx, rx) = mpsc::unbounded_channel();
            (QueueSender::Unbounded(tx), QueueReceiver::Unbounded(rx))
        }
    };
    (
        tx,
        QueueObserver {
            label: label.to_string(),
            rx,
        },
    )
}

impl QueueObserver {
    /// Address of the listener feeding this queue.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Next item in arrival order.
    pub async fn poll(&mut self, wait: Wait) -> Result<QueueItem, SocketError> {
        match wait {
            Wait::Forever => self.rx.recv().await.ok_or_else(|| self.closed()),
            Wait::Within(window) => match tokio::time::timeout(window, self.rx.recv()).await {
                Ok(Some(item)) => Ok(item),
                Ok(None) => Err(self.closed()),
                Err(_) => Err(SocketError::Timeout {
                    address: self.label.clone(),
                    waited: window,
                }),
            },
        }
    }

    pub fn try_next(&mut self) -> Option<QueueItem> {
        self.rx.try_recv()
    }

    /// Discard everything currently queued; returns how many items were dropped.
    pub fn drain(&mut self) -> usize {
        let mut count = 0;
        while self.rx.try_recv().is_some() {
            count += 1;
        }
        if count > 0 {
            tracing::debug!(queue = %self.label, drained = count, "queue drained");
        }
        count
    }

    /// Consume items until one satisfies `matches`; non-matching items are discarded.
    pub async fn poll_matching<F>(&mut self, mut matches: F, wait: Wait) -> Result<QueueItem, SocketError>
    where
        F: FnMut(&QueueItem) -> bool,
    {
        let deadline = deadline_for(wait);
        loop {
            let item = self.poll(remaining(deadline)).await.map_err(|err| {
                self.rescope_timeout(err, wait)
            })?;
            if matches(&item) {
                return Ok(item);
            }
            tracing::trace!(queue = %self.label, "skipping non-matching item");
        }
    }

    /// Read exactly `count` items within one overall window.
    pub async fn collect(&mut self, count: usize, wait: Wait) -> Result<Vec<QueueItem>, SocketError> {
        let deadline = deadline_for(wait);
        let mut items = Vec::with_capacity(count);
        while items.len() < count {
            let item = self
                .poll(remaining(deadline))
                .await
                .map_err(|err| self.rescope_timeout(err, wait))?;
            items.push(item);
        }
        Ok(items)
    }

    fn closed(&self) -> SocketError {
        SocketError::QueueClosed(self.label.clone())
    }

    /// Report the caller's whole window rather than the last slice of it.
    fn rescope_timeout(&self, err: SocketError, wait: Wait) -> SocketError {
        match (err, wait) {
            (SocketError::Timeout { address, .. }, Wait::Within(window)) => SocketError::Timeout {
                address,
                waited: window,
            },
            (err, _) => err,
        }
    }
}

fn deadline_for(wait: Wait) -> Option<Instant> {
    match wait {
        Wait::Within(window) => Some(Instant::now() + window),
        Wait::Forever => None,
    }
}

fn remaining(deadline: Option<Instant>) -> Wait {
    match deadline {
        Some(at) => Wait::Within(at.saturating_duration_since(Instant::now())),
        None => Wait::Forever,
    }
}
