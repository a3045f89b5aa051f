//! Bounded FIFO between admission and dispatch.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::sync::Notify;

#[derive(Debug, Error)]
#[error("work queue is full (capacity {capacity})")]
/// Returned by [`WorkQueue::try_push`]; hands the rejected item back.
pub struct QueueFullError<T> {
    pub capacity: usize,
    pub item: T,
}

#[derive(Debug)]
struct QueueState<T> {
    items: VecDeque<T>,
    reserved: usize,
}

impl<T> QueueState<T> {
    fn occupied(&self) -> usize {
        self.items.len() + self.reserved
    }
}

#[derive(Debug)]
pub struct WorkQueue<T> {
    capacity: usize,
    state: Mutex<QueueState<T>>,
    available: Notify,
}

#[derive(Debug)]
/// A held queue slot whose item is invisible to consumers until [`Reservation::publish`].
///
/// Dropping an unpublished reservation releases the slot.
pub struct Reservation<T> {
    queue: Arc<WorkQueue<T>>,
    item: Option<T>,
    position: usize,
}

impl<T> Reservation<T> {
    /// Queue position counted at reservation time, reserved slots included.
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn item(&self) -> Option<&T> {
        self.item.as_ref()
    }

    /// Makes the item poppable; returns the visible depth after the push.
    pub fn publish(mut self) -> usize {
        let Some(item) = self.item.take() else {
            return self.queue.len();
        };
        let depth = {
            let mut state = self.queue.state();
            state.reserved = state.reserved.saturating_sub(1);
            state.items.push_back(item);
            state.items.len()
        };
        self.queue.available.notify_one();
        depth
    }
}

impl<T> Drop for Reservation<T> {
    fn drop(&mut self) {
        if self.item.take().is_some() {
            let mut state = self.queue.state();
            state.reserved = state.reserved.saturating_sub(1);
        }
    }
}

impl<T: PartialEq> PartialEq for Reservation<T> {
    fn eq(&self, other: &Self) -> bool {
        self.position == other.position && self.item == other.item
    }
}

impl<T> WorkQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity),
                reserved: 0,
            }),
            available: Notify::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends without waiting; returns the depth after the push.
    pub fn try_push(&self, item: T) -> Result<usize, QueueFullError<T>> {
        let depth = {
            let mut state = self.state();
            if state.occupied() >= self.capacity {
                return Err(QueueFullError {
                    capacity: self.capacity,
                    item,
                });
            }
            state.items.push_back(item);
            state.occupied()
        };
        self.available.notify_one();
        Ok(depth)
    }

    /// Claims a slot for `item` without exposing it to [`WorkQueue::pop`].
    pub fn try_reserve(self: &Arc<Self>, item: T) -> Result<Reservation<T>, QueueFullError<T>> {
        let position = {
            let mut state = self.state();
            if state.occupied() >= self.capacity {
                return Err(QueueFullError {
                    capacity: self.capacity,
                    item,
                });
            }
            state.reserved += 1;
            state.occupied()
        };
        Ok(Reservation {
            queue: Arc::clone(self),
            item: Some(item),
            position,
        })
    }

    /// Waits for the next item.
    pub async fn pop(&self) -> T {
        loop {
            let next = self.state().items.pop_front();
            if let Some(item) = next {
                return item;
            }
            self.available.notified().await;
        }
    }

    pub fn try_pop(&self) -> Option<T> {
        self.state().items.pop_front()
    }

    /// Removes every queued item without waiting; reserved slots are untouched.
    pub fn drain(&self) -> Vec<T> {
        self.state().items.drain(..).collect()
    }

    /// Items visible to consumers.
    pub fn len(&self) -> usize {
        self.state().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
