use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use super::slot::{Slot, SlotState, SlotTag};
use super::Stage;

/// State shared by the driver and every worker.
pub(crate) struct Shared<S, T> {
    pub slots: Box<[Slot<S, T>]>,
    pub exit: AtomicBool,
    pub poll_interval: Duration,
    pub stage_count: u8,
}

/// Per-worker rendezvous with the driver for reset and seek.
#[derive(Debug, Default)]
pub(crate) struct WorkerControl {
    pub reset_requested: AtomicBool,
    pub reset_performed: AtomicBool,
    /// Set when the thread has returned, for any reason.
    pub finished: AtomicBool,
    pub seek: Mutex<Option<i64>>,
}

impl WorkerControl {
    /// Parked in the barrier, or gone.
    pub fn acknowledged(&self) -> bool {
        self.reset_performed.load(Ordering::Acquire) || self.finished.load(Ordering::Acquire)
    }

    /// Out of the barrier, or gone.
    pub fn released(&self) -> bool {
        !self.reset_performed.load(Ordering::Acquire) || self.finished.load(Ordering::Acquire)
    }
}

struct FinishGuard(Arc<WorkerControl>);

impl Drop for FinishGuard {
    fn drop(&mut self) {
        self.0.finished.store(true, Ordering::Release);
    }
}

/// One thread of one stage. Owns the slots `offset, offset + stride, ...`.
pub(crate) struct Worker<S, T> {
    pub name: String,
    pub stage: Box<dyn Stage<S, T>>,
    pub stage_index: u8,
    pub offset: usize,
    pub stride: usize,
    pub shared: Arc<Shared<S, T>>,
    pub control: Arc<WorkerControl>,
}

impl<S, T> Worker<S, T> {
    pub fn run(mut self) {
        let _finished = FinishGuard(self.control.clone());
        let shared = self.shared.clone();
        let len = shared.slots.len();
        let mut cursor = self.offset;
        let mut processed: u64 = 0;

        tracing::debug!(worker = %self.name, offset = self.offset, stride = self.stride, "worker started");

        while !shared.exit.load(Ordering::Acquire) {
            if self.control.reset_requested.load(Ordering::Acquire) {
                cursor = self.offset;
                self.park();
                continue;
            }

            let slot = &shared.slots[cursor];
            let tag = slot.tag();
            if tag.hops != self.stage_index
                || (self.stage_index == 0 && tag.state != SlotState::Cleared)
            {
                thread::sleep(shared.poll_interval);
                continue;
            }

            let next = if tag.state.is_terminal() {
                tag.state
            } else {
                // SAFETY: `hops == stage_index` and this worker owns `cursor`
                // within its stage, so no other thread touches the data until
                // the tag is published below.
                let data = unsafe { slot.data_mut() };
                match self.stage.process(data) {
                    Some(next) => next,
                    None => {
                        thread::sleep(shared.poll_interval);
                        continue;
                    }
                }
            };

            slot.publish(SlotTag {
                state: next,
                hops: self.stage_index + 1,
            });
            processed += 1;

            cursor += self.stride;
            if cursor >= len {
                cursor = self.offset;
            }
        }

        self.stage.close();
        tracing::debug!(worker = %self.name, processed, "worker exited");
    }

    /// Acknowledge a reset and wait until the driver lets go.
    fn park(&mut self) {
        self.control.reset_performed.store(true, Ordering::Release);
        while self.control.reset_requested.load(Ordering::Acquire)
            && !self.shared.exit.load(Ordering::Acquire)
        {
            thread::sleep(self.shared.poll_interval);
        }

        let seek = self.control.seek.lock().take();
        if let Some(timestamp) = seek
            && let Err(e) = self.stage.seek(timestamp)
        {
            tracing::warn!(worker = %self.name, timestamp, error = %e, "stage seek failed");
        }
        self.control.reset_performed.store(false, Ordering::Release);
    }
}
