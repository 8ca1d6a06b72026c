//! Multi-stage frame pipeline over a fixed ring of slots.
//!
//! Each stage runs on `T` worker threads; worker `i` owns the slots whose
//! index is `i mod T` and walks them in order. A slot carries a tag made of
//! its [`SlotState`] and the number of stages that have handled it in the
//! current cycle, so stage `k` only picks up slots stage `k - 1` has
//! published. Handing a slot on is one atomic store; there are no locks on
//! the data path.
//!
//! ```text
//!            stage 0 (decode)   stage 1 (prepare)   stage 2 (convert)    consumer
//! slot 0  →  Cleared→Decoded  → PreProcessed      → Ready             → release → Cleared
//! slot 1  →  ...
//! ```
//!
//! A slot in a terminal state (end of video, failure) skips the remaining
//! stages. The consumer takes slots strictly in ring order with
//! [`Pipeline::next_ready`].
//!
//! [`Pipeline::reset`] parks every worker and hands back a [`ResetGuard`]
//! through which slots can be cleared and stages seeked; dropping the guard
//! (or calling [`ResetGuard::resume`]) lets the workers continue.

pub mod decode;
pub mod slot;
mod worker;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::{Result, RtspError};
pub use slot::{SlotData, SlotState};
use slot::{Slot, SlotTag};
use worker::{Shared, Worker, WorkerControl};

/// One step of the pipeline. Every worker thread gets its own instance.
pub trait Stage<S, T>: Send {
    /// Work on a slot this stage owns. Return the slot's next state, or
    /// `None` if there is nothing to do yet (the worker sleeps and asks again
    /// for the same slot).
    fn process(&mut self, slot: &mut SlotData<S, T>) -> Option<SlotState>;

    /// Called while the pipeline is parked by [`ResetGuard::seek`].
    fn seek(&mut self, _timestamp: i64) -> Result<()> {
        Ok(())
    }

    /// Called once when the worker exits.
    fn close(&mut self) {}
}

type StageFactory<S, T> = Box<dyn Fn(usize) -> Result<Box<dyn Stage<S, T>>> + Send>;

struct StageConfig<S, T> {
    name: String,
    threads: usize,
    create: StageFactory<S, T>,
}

pub struct PipelineBuilder<S, T> {
    capacity: usize,
    poll_interval: Duration,
    stages: Vec<StageConfig<S, T>>,
}

impl<S, T> PipelineBuilder<S, T>
where
    S: Default + Send + 'static,
    T: Default + Send + 'static,
{
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            poll_interval: Duration::from_micros(500),
            stages: Vec::new(),
        }
    }

    /// Sleep between polls of a slot that is not ready for a stage.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Append a stage run by `threads` workers. `create` is called with the
    /// worker index to build each worker's instance.
    pub fn stage<G, F>(mut self, name: &str, threads: usize, create: F) -> Self
    where
        G: Stage<S, T> + 'static,
        F: Fn(usize) -> Result<G> + Send + 'static,
    {
        self.stages.push(StageConfig {
            name: name.to_string(),
            threads,
            create: Box::new(move |i| Ok(Box::new(create(i)?) as Box<dyn Stage<S, T>>)),
        });
        self
    }

    /// Allocate the ring and create every stage instance. Threads are not
    /// started until [`Pipeline::start`].
    pub fn build(self) -> Result<Pipeline<S, T>> {
        if self.capacity == 0 {
            return Err(RtspError::Pipeline("capacity must be at least 1".into()));
        }
        if self.stages.is_empty() || self.stages.len() >= u8::MAX as usize {
            return Err(RtspError::Pipeline(format!(
                "need between 1 and {} stages, got {}",
                u8::MAX - 1,
                self.stages.len()
            )));
        }
        if let Some(bad) = self
            .stages
            .iter()
            .find(|s| s.threads == 0 || s.threads > self.capacity)
        {
            return Err(RtspError::Pipeline(format!(
                "stage {} wants {} threads for {} slots",
                bad.name, bad.threads, self.capacity
            )));
        }

        let slots: Vec<Slot<S, T>> = (0..self.capacity).map(|_| Slot::default()).collect();
        let shared = Arc::new(Shared {
            slots: slots.into_boxed_slice(),
            exit: Default::default(),
            poll_interval: self.poll_interval,
            stage_count: self.stages.len() as u8,
        });

        let mut workers = Vec::new();
        let mut controls = Vec::new();
        for (stage_index, config) in self.stages.iter().enumerate() {
            for i in 0..config.threads {
                let control = Arc::new(WorkerControl::default());
                controls.push(control.clone());
                workers.push(Worker {
                    name: format!("{}-{}", config.name, i),
                    stage: (config.create)(i)?,
                    stage_index: stage_index as u8,
                    offset: i,
                    stride: config.threads,
                    shared: shared.clone(),
                    control,
                });
            }
        }

        tracing::debug!(
            capacity = self.capacity,
            stages = self.stages.len(),
            workers = workers.len(),
            "pipeline built"
        );

        Ok(Pipeline {
            shared,
            pending: workers,
            handles: Vec::new(),
            controls,
            cursor: 0,
        })
    }
}

pub struct Pipeline<S, T> {
    shared: Arc<Shared<S, T>>,
    pending: Vec<Worker<S, T>>,
    handles: Vec<JoinHandle<()>>,
    controls: Vec<Arc<WorkerControl>>,
    cursor: usize,
}

impl<S, T> Pipeline<S, T>
where
    S: Default + Send + 'static,
    T: Default + Send + 'static,
{
    /// Spawn one thread per worker.
    pub fn start(&mut self) -> Result<()> {
        if !self.handles.is_empty() || self.pending.is_empty() {
            return Err(RtspError::Pipeline("pipeline already started".into()));
        }
        for worker in self.pending.drain(..) {
            let handle = thread::Builder::new()
                .name(worker.name.clone())
                .spawn(move || worker.run())?;
            self.handles.push(handle);
        }
        tracing::info!(workers = self.handles.len(), "pipeline started");
        Ok(())
    }

    /// Park all workers, clear every slot and seek every stage to
    /// `timestamp`, then resume.
    pub fn seek(&mut self, timestamp: i64) {
        let mut guard = self.reset();
        guard.clear_slots();
        guard.seek(timestamp);
        guard.resume();
    }
}

impl<S, T> Pipeline<S, T> {
    pub fn capacity(&self) -> usize {
        self.shared.slots.len()
    }

    pub fn stage_count(&self) -> usize {
        self.shared.stage_count as usize
    }

    pub fn slot_state(&self, index: usize) -> Option<SlotState> {
        self.shared.slots.get(index).map(|s| s.tag().state)
    }

    pub fn slot_states(&self) -> Vec<SlotState> {
        self.shared.slots.iter().map(|s| s.tag().state).collect()
    }

    /// Whether any worker thread is still alive.
    pub fn is_running(&self) -> bool {
        self.handles.iter().any(|h| !h.is_finished())
    }

    fn ready_at_cursor(&self) -> bool {
        self.shared.slots[self.cursor].tag().hops == self.shared.stage_count
    }

    /// The slot at the consumer cursor, if every stage is done with it.
    pub fn next_ready(&mut self) -> Option<ReadySlot<'_, S, T>> {
        if !self.ready_at_cursor() {
            return None;
        }
        let index = self.cursor;
        Some(ReadySlot {
            pipeline: self,
            index,
        })
    }

    /// [`next_ready`](Self::next_ready), polling until `timeout`.
    pub fn wait_ready(&mut self, timeout: Duration) -> Option<ReadySlot<'_, S, T>> {
        let deadline = Instant::now() + timeout;
        while !self.ready_at_cursor() {
            if Instant::now() >= deadline {
                return None;
            }
            thread::sleep(self.shared.poll_interval);
        }
        self.next_ready()
    }

    /// Ask every worker to park and wait until all have.
    ///
    /// Workers restart from their first slot, and so does the consumer
    /// cursor. Slot states are left alone unless the guard changes them.
    ///
    /// Because the cursors rewind, frames still in flight come out of order
    /// afterwards. Reset only a drained ring, or call
    /// [`ResetGuard::clear_slots`] before resuming.
    pub fn reset(&mut self) -> ResetGuard<'_, S, T> {
        for control in &self.controls {
            control.reset_requested.store(true, Ordering::Release);
        }
        if !self.handles.is_empty() {
            while !self.controls.iter().all(|c| c.acknowledged()) {
                thread::sleep(self.shared.poll_interval);
            }
        }
        self.cursor = 0;
        tracing::debug!("pipeline parked");
        ResetGuard { pipeline: self }
    }

    /// Stop every worker and wait for the threads to end. Idempotent.
    pub fn exit(&mut self) {
        self.shared.exit.store(true, Ordering::Release);
        let mut panicked = 0;
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                panicked += 1;
            }
        }
        for mut worker in self.pending.drain(..) {
            worker.stage.close();
        }
        if panicked > 0 {
            tracing::error!(panicked, "pipeline workers panicked");
        }
        tracing::debug!("pipeline stopped");
    }
}

impl<S, T> Drop for Pipeline<S, T> {
    fn drop(&mut self) {
        self.exit();
    }
}

/// A slot every stage has finished with. Borrowing it blocks other use of
/// the pipeline until it is released or dropped.
pub struct ReadySlot<'a, S, T> {
    pipeline: &'a mut Pipeline<S, T>,
    index: usize,
}

impl<S, T> ReadySlot<'_, S, T> {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn state(&self) -> SlotState {
        self.pipeline.shared.slots[self.index].tag().state
    }

    pub fn data(&self) -> &SlotData<S, T> {
        // SAFETY: the tag says all stages are done; only the consumer, which
        // holds `&mut Pipeline`, may touch the slot until it is released.
        unsafe { self.pipeline.shared.slots[self.index].data() }
    }

    pub fn data_mut(&mut self) -> &mut SlotData<S, T> {
        // SAFETY: as in `data`.
        unsafe { self.pipeline.shared.slots[self.index].data_mut() }
    }

    /// Hand the slot back to the first stage and move the cursor on.
    ///
    /// An end-of-video slot stays where it is until a reset clears it, so
    /// it keeps being returned by `next_ready`; this returns false then.
    pub fn release(self) -> bool {
        let slot = &self.pipeline.shared.slots[self.index];
        if slot.tag().state == SlotState::EndOfVideoReached {
            return false;
        }
        slot.publish(SlotTag::CLEARED);
        self.pipeline.cursor = (self.index + 1) % self.pipeline.shared.slots.len();
        true
    }
}

/// Exclusive access to a parked pipeline. Workers resume on drop.
pub struct ResetGuard<'a, S, T> {
    pipeline: &'a mut Pipeline<S, T>,
}

impl<S: Default, T> ResetGuard<'_, S, T> {
    pub fn slot_states(&self) -> Vec<SlotState> {
        self.pipeline.slot_states()
    }

    pub fn data_mut(&mut self, index: usize) -> Option<&mut SlotData<S, T>> {
        let slot = self.pipeline.shared.slots.get(index)?;
        // SAFETY: every worker is parked and the consumer is borrowed by us.
        Some(unsafe { slot.data_mut() })
    }

    /// Return every slot to `Cleared`, dropping the source payloads. Target
    /// buffers are kept for reuse.
    pub fn clear_slots(&mut self) {
        for slot in self.pipeline.shared.slots.iter() {
            // SAFETY: every worker is parked and the consumer is borrowed by us.
            let data = unsafe { slot.data_mut() };
            data.source = S::default();
            data.timestamp = 0;
            slot.publish(SlotTag::CLEARED);
        }
    }

    /// Have every stage seek to `timestamp` before it resumes.
    pub fn seek(&mut self, timestamp: i64) {
        for control in &self.pipeline.controls {
            *control.seek.lock() = Some(timestamp);
        }
    }

    pub fn resume(self) {}
}

impl<S, T> Drop for ResetGuard<'_, S, T> {
    fn drop(&mut self) {
        for control in &self.pipeline.controls {
            control.reset_requested.store(false, Ordering::Release);
        }
        if !self.pipeline.handles.is_empty() {
            while !self.pipeline.controls.iter().all(|c| c.released()) {
                thread::sleep(self.pipeline.shared.poll_interval);
            }
        }
        tracing::debug!("pipeline resumed");
    }
}
