//! Bounded batch channels with an explicit end-of-stream protocol.
//!
//! ```text
//!   put(Data) ──► [ bounded FIFO of Message<T> ] ──► take()
//!   finish()  ──► EndOfStream (sticky once sent)
//!   poison()  ──► every later put/take fails on both ends
//! ```
//!
//! End-of-stream is its own message variant, so an empty batch is never
//! mistaken for shutdown. Producers may be cloned: `put` and `finish` are
//! serialized, so every `put` that succeeded is queued ahead of end-of-stream. A stage that fails poisons the channels it holds;
//! a stage that dies without doing so drops its endpoint, and the peer sees
//! a disconnection. Either way no peer stays blocked forever.

use crate::kmer::KmerError;
use crossbeam_channel::{Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;

/// Terminal channel conditions. None of them is retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("channel '{channel}' was poisoned by a failing stage")]
    Poisoned { channel: &'static str },

    #[error("channel '{channel}' peer terminated without end-of-stream")]
    Disconnected { channel: &'static str },

    #[error("channel '{channel}' received data after end-of-stream")]
    Closed { channel: &'static str },
}

/// An ordered group of items moved through a channel as one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch<T> {
    items: Vec<T>,
}

impl<T> Batch<T> {
    /// Allocate a batch for `capacity` items.
    ///
    /// Allocation failure is reported instead of aborting the process.
    pub fn try_with_capacity(capacity: usize) -> Result<Self, KmerError> {
        let mut items = Vec::new();
        items.try_reserve_exact(capacity).map_err(|e| {
            KmerError::ResourceExhausted(format!(
                "cannot allocate batch of {} items: {}",
                capacity, e
            ))
        })?;
        Ok(Self { items })
    }

    #[inline]
    pub fn push(&mut self, item: T) {
        self.items.push(item);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    pub fn into_vec(self) -> Vec<T> {
        self.items
    }
}

impl<T> From<Vec<T>> for Batch<T> {
    fn from(items: Vec<T>) -> Self {
        Self { items }
    }
}

impl<T> IntoIterator for Batch<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

/// What travels through a channel.
#[derive(Debug, PartialEq, Eq)]
pub enum Message<T> {
    Data(Batch<T>),
    EndOfStream,
}

#[derive(Debug)]
struct ChannelState {
    name: &'static str,
    poisoned: AtomicBool,
    finished: AtomicBool,
    /// Held shared by `put`, exclusively by `finish`.
    closing: RwLock<()>,
}

impl ChannelState {
    fn poisoned(&self) -> bool {
        self.poisoned.load(Ordering::Acquire)
    }

    fn finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }
}

/// Producer end of a bounded batch channel.
#[derive(Debug)]
pub struct BatchSender<T> {
    tx: Sender<Message<T>>,
    state: Arc<ChannelState>,
}

// Derived Clone would require T: Clone.
impl<T> Clone for BatchSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            state: Arc::clone(&self.state),
        }
    }
}

/// Consumer end of a bounded batch channel.
#[derive(Debug)]
pub struct BatchReceiver<T> {
    rx: Receiver<Message<T>>,
    state: Arc<ChannelState>,
}

impl<T> Clone for BatchReceiver<T> {
    fn clone(&self) -> Self {
        Self {
            rx: self.rx.clone(),
            state: Arc::clone(&self.state),
        }
    }
}

/// Create a channel holding at most `capacity` messages.
pub fn bounded<T>(name: &'static str, capacity: usize) -> (BatchSender<T>, BatchReceiver<T>) {
    let (tx, rx) = crossbeam_channel::bounded(capacity);
    let state = Arc::new(ChannelState {
        name,
        poisoned: AtomicBool::new(false),
        finished: AtomicBool::new(false),
        closing: RwLock::new(()),
    });
    (
        BatchSender {
            tx,
            state: Arc::clone(&state),
        },
        BatchReceiver { rx, state },
    )
}

impl<T> BatchSender<T> {
    /// Push a data batch, blocking while the channel is full.
    pub fn put(&self, batch: Batch<T>) -> Result<(), ChannelError> {
        let _open = self
            .state
            .closing
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        if self.state.finished() {
            return Err(ChannelError::Closed {
                channel: self.state.name,
            });
        }
        self.send(Message::Data(batch))
    }

    /// Send end-of-stream. Later `put` calls fail with `Closed`.
    ///
    /// Waits for in-flight `put` calls on other clones to complete first.
    pub fn finish(&self) -> Result<(), ChannelError> {
        let _closing = self
            .state
            .closing
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if self.state.finished.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.send(Message::EndOfStream)
    }

    /// Mark the channel failed so both ends stop.
    pub fn poison(&self) {
        self.state.poisoned.store(true, Ordering::Release);
    }

    pub fn is_poisoned(&self) -> bool {
        self.state.poisoned()
    }

    pub fn name(&self) -> &'static str {
        self.state.name
    }

    fn send(&self, message: Message<T>) -> Result<(), ChannelError> {
        if self.state.poisoned() {
            return Err(ChannelError::Poisoned {
                channel: self.state.name,
            });
        }
        self.tx.send(message).map_err(|_| {
            if self.state.poisoned() {
                ChannelError::Poisoned {
                    channel: self.state.name,
                }
            } else {
                ChannelError::Disconnected {
                    channel: self.state.name,
                }
            }
        })
    }
}

impl<T> BatchReceiver<T> {
    /// Take the next message, blocking while the channel is empty.
    ///
    /// Once end-of-stream has been sent, a drained or disconnected channel
    /// keeps answering `EndOfStream`, so every consumer observes shutdown.
    pub fn take(&self) -> Result<Message<T>, ChannelError> {
        if self.state.poisoned() {
            return Err(ChannelError::Poisoned {
                channel: self.state.name,
            });
        }
        if self.state.finished() && self.rx.is_empty() {
            return Ok(Message::EndOfStream);
        }
        match self.rx.recv() {
            Ok(message) => Ok(message),
            Err(_) if self.state.poisoned() => Err(ChannelError::Poisoned {
                channel: self.state.name,
            }),
            Err(_) if self.state.finished() => Ok(Message::EndOfStream),
            Err(_) => Err(ChannelError::Disconnected {
                channel: self.state.name,
            }),
        }
    }

    /// Mark the channel failed so the producer stops.
    pub fn poison(&self) {
        self.state.poisoned.store(true, Ordering::Release);
    }

    pub fn is_poisoned(&self) -> bool {
        self.state.poisoned()
    }

    pub fn name(&self) -> &'static str {
        self.state.name
    }
}
