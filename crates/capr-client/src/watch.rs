//! Explicit watch streams.
//!
//! A [`Watch`] is the consumer half of a bounded channel fed by a producer
//! task. Consumers must [`Watch::stop`] it when done: stopping closes the
//! channel so the producer exits, then drains whatever was still buffered.

use tokio::sync::mpsc;

/// Buffer size between a watch producer and its consumer
pub const WATCH_BUFFER: usize = 64;

/// A change observed on a watched object
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent<K> {
    Added(K),
    Modified(K),
    Deleted(K),
}

impl<K> WatchEvent<K> {
    pub fn object(&self) -> &K {
        match self {
            Self::Added(obj) | Self::Modified(obj) | Self::Deleted(obj) => obj,
        }
    }

    pub fn into_object(self) -> K {
        match self {
            Self::Added(obj) | Self::Modified(obj) | Self::Deleted(obj) => obj,
        }
    }

    /// Added or modified
    pub fn is_upsert(&self) -> bool {
        !matches!(self, Self::Deleted(_))
    }
}

/// Consumer side of a watch.
#[derive(Debug)]
pub struct Watch<K> {
    rx: mpsc::Receiver<WatchEvent<K>>,
}

/// Producer side of a watch
pub type WatchSender<K> = mpsc::Sender<WatchEvent<K>>;

impl<K> Watch<K> {
    /// A connected producer/consumer pair
    pub fn channel() -> (WatchSender<K>, Self) {
        let (tx, rx) = mpsc::channel(WATCH_BUFFER);
        (tx, Self { rx })
    }

    /// Next event, `None` once the producer has gone away
    pub async fn next(&mut self) -> Option<WatchEvent<K>> {
        self.rx.recv().await
    }

    /// Stop the watch and drain buffered events. Returns how many were discarded.
    pub async fn stop(mut self) -> usize {
        self.rx.close();
        let mut drained = 0;
        while self.rx.recv().await.is_some() {
            drained += 1;
        }
        drained
    }
}
