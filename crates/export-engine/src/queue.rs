//! Unbounded frame queue between the producer and the encoder worker.

use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};

use simcast_common::error::{SimcastError, SimcastResult};

/// A deferred encode action. Runs exactly once, on the worker thread.
pub type EncodeJob = Box<dyn FnOnce() -> SimcastResult<()> + Send>;

/// Unbounded FIFO of encode jobs.
///
/// Insertion order equals playback-time order: frames are produced in
/// strictly increasing virtual time. A slow worker grows memory; it never
/// blocks the producer.
#[derive(Clone, Debug)]
pub struct FrameQueue {
    tx: Sender<EncodeJob>,
    rx: Receiver<EncodeJob>,
}

impl FrameQueue {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    /// Enqueue a job. Fails only once the queue has been torn down.
    pub fn push(&self, job: EncodeJob) -> SimcastResult<()> {
        self.tx
            .send(job)
            .map_err(|_| SimcastError::pipeline("frame queue disconnected"))
    }

    /// Blocking pop with a timeout, so the worker sleeps while idle but
    /// still observes its running flag.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<EncodeJob> {
        match self.rx.recv_timeout(timeout) {
            Ok(job) => Some(job),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Non-blocking pop, used to finish a drain pass.
    pub fn try_pop(&self) -> Option<EncodeJob> {
        self.rx.try_recv().ok()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }
}

impl Default for FrameQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn jobs_pop_in_fifo_order() {
        let queue = FrameQueue::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..16u32 {
            let seen = seen.clone();
            queue
                .push(Box::new(move || {
                    seen.lock().unwrap().push(i);
                    Ok(())
                }))
                .unwrap();
        }
        assert_eq!(queue.len(), 16);

        while let Some(job) = queue.try_pop() {
            job().unwrap();
        }

        assert!(queue.is_empty());
        assert_eq!(*seen.lock().unwrap(), (0..16).collect::<Vec<_>>());
    }

    #[test]
    fn pop_timeout_returns_none_when_idle() {
        let queue = FrameQueue::new();
        assert!(queue.pop_timeout(Duration::from_millis(5)).is_none());
    }
}
