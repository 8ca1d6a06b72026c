use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU16, Ordering};

/// Lifecycle of one ring slot.
///
/// ```text
/// Cleared → Decoded → PreProcessed → Converted → Ready
///              ↘ EndOfVideoReached / DecodeFailed / PreProcessFailed
/// ```
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotState {
    Cleared = 0,
    Decoded = 1,
    PreProcessed = 2,
    Converted = 3,
    Ready = 4,
    EndOfVideoReached = 5,
    DecodeFailed = 6,
    PreProcessFailed = 7,
}

impl SlotState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => SlotState::Decoded,
            2 => SlotState::PreProcessed,
            3 => SlotState::Converted,
            4 => SlotState::Ready,
            5 => SlotState::EndOfVideoReached,
            6 => SlotState::DecodeFailed,
            7 => SlotState::PreProcessFailed,
            _ => SlotState::Cleared,
        }
    }

    /// Later stages pass the slot through untouched.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SlotState::EndOfVideoReached | SlotState::DecodeFailed | SlotState::PreProcessFailed
        )
    }

    pub fn is_failure(self) -> bool {
        matches!(self, SlotState::DecodeFailed | SlotState::PreProcessFailed)
    }
}

/// What a stage reads and writes.
#[derive(Debug, Default)]
pub struct SlotData<S, T> {
    /// Producer-side payload, e.g. a decoded picture.
    pub source: S,
    /// Output buffer, reused from cycle to cycle.
    pub target: T,
    pub timestamp: i64,
}

/// State plus the number of stages that have handled the slot this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SlotTag {
    pub state: SlotState,
    pub hops: u8,
}

impl SlotTag {
    pub const CLEARED: SlotTag = SlotTag {
        state: SlotState::Cleared,
        hops: 0,
    };

    fn pack(self) -> u16 {
        ((self.hops as u16) << 8) | self.state as u16
    }

    fn unpack(v: u16) -> Self {
        SlotTag {
            state: SlotState::from_u8(v as u8),
            hops: (v >> 8) as u8,
        }
    }
}

/// One ring entry.
///
/// Ownership is decided by the tag alone: stage `i` may touch the data only
/// while `hops == i`, the consumer only while `hops` equals the stage
/// count. Whoever owns the slot hands it on with a single release store of
/// the next tag; the next owner observes it with an acquire load.
pub(crate) struct Slot<S, T> {
    tag: AtomicU16,
    data: UnsafeCell<SlotData<S, T>>,
}

// SAFETY: the data is only accessed by the single owner that the tag
// designates, and hand-over happens through release/acquire on the tag.
unsafe impl<S: Send, T: Send> Sync for Slot<S, T> {}

impl<S: Default, T: Default> Default for Slot<S, T> {
    fn default() -> Self {
        Self {
            tag: AtomicU16::new(SlotTag::CLEARED.pack()),
            data: UnsafeCell::new(SlotData::default()),
        }
    }
}

impl<S, T> Slot<S, T> {
    pub fn tag(&self) -> SlotTag {
        SlotTag::unpack(self.tag.load(Ordering::Acquire))
    }

    pub fn publish(&self, tag: SlotTag) {
        self.tag.store(tag.pack(), Ordering::Release);
    }

    /// # Safety
    ///
    /// The caller must be the slot's current owner according to its tag, or
    /// hold the pipeline with every worker parked.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn data_mut(&self) -> &mut SlotData<S, T> {
        // SAFETY: exclusive access guaranteed by the caller.
        unsafe { &mut *self.data.get() }
    }

    /// # Safety
    ///
    /// Same as [`data_mut`](Self::data_mut).
    pub unsafe fn data(&self) -> &SlotData<S, T> {
        // SAFETY: exclusive access guaranteed by the caller.
        unsafe { &*self.data.get() }
    }
}
