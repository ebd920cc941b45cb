//! Bounded, single-consumer FIFO queue with a terminal closed state.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

use crate::error::RuntimeError;

struct Inner<T> {
    queue: VecDeque<T>,
    open: bool,
}

/// A process' mailbox: bounded capacity, any number of producers, a single
/// consumer (the owning process).
pub struct Mailbox<T> {
    capacity: usize,
    state: Mutex<Inner<T>>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl<T> Mailbox<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(Inner { queue: VecDeque::new(), open: true }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    /// Put a message into the mailbox, blocking while it is full. Fails with
    /// [`RuntimeError::QueueClosed`] if the mailbox has been closed.
    pub fn put(&self, value: T) -> Result<(), RuntimeError> {
        let mut inner = self.state.lock().unwrap();
        loop {
            if !inner.open {
                return Err(RuntimeError::QueueClosed);
            }
            if inner.queue.len() < self.capacity {
                inner.queue.push_back(value);
                self.not_empty.notify_one();
                return Ok(());
            }
            inner = self.not_full.wait(inner).unwrap();
        }
    }

    /// Block until a message is available, returning it. Fails with
    /// [`RuntimeError::QueueClosed`] once the mailbox is closed and drained
    /// (or closed without flushing).
    pub fn get(&self) -> Result<T, RuntimeError> {
        let mut inner = self.state.lock().unwrap();
        loop {
            if let Some(value) = inner.queue.pop_front() {
                self.not_full.notify_one();
                return Ok(value);
            }
            if !inner.open {
                return Err(RuntimeError::QueueClosed);
            }
            inner = self.not_empty.wait(inner).unwrap();
        }
    }

    /// Non-blocking variant of [`Mailbox::get`]. Returns `Ok(None)` if the
    /// mailbox is open but currently empty.
    pub fn get_unless_empty(&self) -> Result<Option<T>, RuntimeError> {
        let mut inner = self.state.lock().unwrap();
        if let Some(value) = inner.queue.pop_front() {
            self.not_full.notify_one();
            Ok(Some(value))
        } else if inner.open {
            Ok(None)
        } else {
            Err(RuntimeError::QueueClosed)
        }
    }

    /// Close the mailbox. If `flush` is false, buffered items are discarded
    /// immediately and `get`/`get_unless_empty` fail right away instead of
    /// draining them first.
    ///
    /// Idempotent: returns whether this call performed the open -> closed
    /// transition, so callers (the runtime's `kill`) can tell a first close
    /// from a redundant one.
    pub fn close(&self, flush: bool) -> bool {
        let mut inner = self.state.lock().unwrap();
        if !inner.open {
            return false;
        }
        inner.open = false;
        if !flush {
            inner.queue.clear();
        }
        self.not_empty.notify_all();
        self.not_full.notify_all();
        true
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().unwrap().open
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn fifo_single_producer() {
        let mb = Mailbox::new(64);
        mb.put(1).unwrap();
        mb.put(2).unwrap();
        mb.put(3).unwrap();
        assert_eq!(mb.get().unwrap(), 1);
        assert_eq!(mb.get().unwrap(), 2);
        assert_eq!(mb.get().unwrap(), 3);
    }

    #[test]
    fn put_on_closed_mailbox_fails() {
        let mb: Mailbox<i32> = Mailbox::new(4);
        mb.close(true);
        assert!(matches!(mb.put(1), Err(RuntimeError::QueueClosed)));
    }

    #[test]
    fn get_on_closed_empty_mailbox_fails() {
        let mb: Mailbox<i32> = Mailbox::new(4);
        mb.close(true);
        assert!(matches!(mb.get(), Err(RuntimeError::QueueClosed)));
    }

    #[test]
    fn close_without_flush_discards_buffered_items() {
        let mb = Mailbox::new(4);
        mb.put(1).unwrap();
        mb.put(2).unwrap();
        mb.close(false);
        assert!(matches!(mb.get(), Err(RuntimeError::QueueClosed)));
    }

    #[test]
    fn close_with_flush_drains_then_fails() {
        let mb = Mailbox::new(4);
        mb.put(1).unwrap();
        mb.put(2).unwrap();
        mb.close(true);
        assert_eq!(mb.get().unwrap(), 1);
        assert_eq!(mb.get().unwrap(), 2);
        assert!(matches!(mb.get(), Err(RuntimeError::QueueClosed)));
    }

    #[test]
    fn close_is_idempotent() {
        let mb: Mailbox<i32> = Mailbox::new(4);
        assert!(mb.close(true));
        assert!(!mb.close(true));
    }

    #[test]
    fn get_blocks_until_put() {
        let mb = Arc::new(Mailbox::new(4));
        let mb2 = Arc::clone(&mb);
        let handle = thread::spawn(move || mb2.get().unwrap());
        thread::sleep(std::time::Duration::from_millis(20));
        mb.put(42).unwrap();
        assert_eq!(handle.join().unwrap(), 42);
    }

    #[test]
    fn put_blocks_when_full_until_space_freed() {
        let mb = Arc::new(Mailbox::new(1));
        mb.put(1).unwrap();
        let mb2 = Arc::clone(&mb);
        let handle = thread::spawn(move || mb2.put(2));
        thread::sleep(std::time::Duration::from_millis(20));
        assert_eq!(mb.get().unwrap(), 1);
        handle.join().unwrap().unwrap();
        assert_eq!(mb.get().unwrap(), 2);
    }
}
