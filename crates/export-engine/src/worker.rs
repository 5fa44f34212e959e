//! Dedicated encoder worker thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::fault::FaultLatch;
use crate::queue::FrameQueue;

/// How long a blocking pop waits before the worker re-checks its flag.
/// Shutdown latency is bounded by one drain pass plus this interval.
const IDLE_POLL: Duration = Duration::from_millis(50);

/// Background thread that drains the frame queue for the lifetime of an
/// export, invoking each encode job exactly once in FIFO order.
#[derive(Debug)]
pub struct EncoderWorker {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<u64>>,
}

impl EncoderWorker {
    /// Spawn the worker. It blocks on the queue while idle rather than
    /// spinning, and observes the running flag between jobs.
    pub fn spawn(queue: FrameQueue, fault: Arc<FaultLatch>) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let handle = std::thread::spawn(move || drain_loop(queue, fault, flag));
        Self {
            running,
            handle: Some(handle),
        }
    }

    /// Ask the worker to exit after its current drain pass.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Whether the thread has not been joined yet.
    pub fn is_alive(&self) -> bool {
        self.handle.is_some()
    }

    /// Stop and join, returning the number of jobs executed.
    pub fn join(&mut self) -> u64 {
        self.stop();
        match self.handle.take() {
            Some(handle) => handle.join().unwrap_or_else(|_| {
                tracing::error!("encoder worker thread panicked");
                0
            }),
            None => 0,
        }
    }
}

impl Drop for EncoderWorker {
    fn drop(&mut self) {
        self.join();
    }
}

fn drain_loop(queue: FrameQueue, fault: Arc<FaultLatch>, running: Arc<AtomicBool>) -> u64 {
    tracing::debug!("encoder worker started");
    let mut executed = 0u64;

    while running.load(Ordering::SeqCst) {
        let Some(first) = queue.pop_timeout(IDLE_POLL) else {
            continue;
        };

        // One drain pass: run everything queued, in order. A failing job
        // latches the fault and ends the pass; the thread itself stays
        // alive and joinable, and later passes keep draining.
        let mut next = Some(first);
        while let Some(job) = next {
            executed += 1;
            if let Err(err) = job() {
                tracing::error!(error = %err, "encode job failed");
                fault.latch(err);
                break;
            }
            if !running.load(Ordering::SeqCst) {
                break;
            }
            next = queue.try_pop();
        }
    }

    tracing::debug!(executed, "encoder worker exiting");
    executed
}

#[cfg(test)]
mod tests {
    use super::*;
    use simcast_common::error::SimcastError;
    use std::sync::Mutex;

    fn wait_until(deadline_ms: u64, mut done: impl FnMut() -> bool) -> bool {
        let start = std::time::Instant::now();
        while start.elapsed() < Duration::from_millis(deadline_ms) {
            if done() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        done()
    }

    #[test]
    fn drains_jobs_in_order_and_joins() {
        let queue = FrameQueue::new();
        let fault = Arc::new(FaultLatch::new());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let mut worker = EncoderWorker::spawn(queue.clone(), fault.clone());
        for i in 0..32u32 {
            let seen = seen.clone();
            queue
                .push(Box::new(move || {
                    seen.lock().unwrap().push(i);
                    Ok(())
                }))
                .unwrap();
        }

        assert!(wait_until(2_000, || queue.is_empty()));
        let executed = worker.join();
        assert_eq!(executed, 32);
        assert_eq!(*seen.lock().unwrap(), (0..32).collect::<Vec<_>>());
        assert!(!fault.is_latched());
    }

    #[test]
    fn failed_job_latches_fault_but_thread_keeps_draining() {
        let queue = FrameQueue::new();
        let fault = Arc::new(FaultLatch::new());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let mut worker = EncoderWorker::spawn(queue.clone(), fault.clone());

        queue
            .push(Box::new(|| Err(SimcastError::pipeline("bad frame"))))
            .unwrap();
        let seen_late = seen.clone();
        queue
            .push(Box::new(move || {
                seen_late.lock().unwrap().push(99u32);
                Ok(())
            }))
            .unwrap();

        // The failing job ends its pass; the later job still runs in a
        // later pass because the thread stays up.
        assert!(wait_until(2_000, || !seen.lock().unwrap().is_empty()));
        assert!(fault.is_latched());
        assert!(fault.get().unwrap().to_string().contains("bad frame"));

        worker.join();
    }

    #[test]
    fn stop_is_idempotent() {
        let queue = FrameQueue::new();
        let fault = Arc::new(FaultLatch::new());
        let mut worker = EncoderWorker::spawn(queue, fault);
        worker.stop();
        worker.stop();
        worker.join();
        worker.join();
        assert!(!worker.is_alive());
    }
}
