use crossbeam_channel::{unbounded, Receiver, Sender};

/// MPMC FIFO linking pipeline stages.
///
/// `push` never blocks; `pop` blocks until an entry is available and returns
/// `None` once every other handle is gone. Shutdown is cooperative: producers
/// push exactly one sentinel entry per consumer they terminate, and consumers
/// treat a disconnect like a sentinel.
pub struct WorkQueue<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
}

impl<T> WorkQueue<T> {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    pub fn push(&self, value: T) {
        // Cannot fail: this handle keeps a receiver alive.
        let _ = self.tx.send(value);
    }

    pub fn pop(&self) -> Option<T> {
        self.rx.recv().ok()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for WorkQueue<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            rx: self.rx.clone(),
        }
    }
}
