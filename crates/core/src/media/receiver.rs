use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::RwLock;

use crate::cancel::CancelToken;
use crate::transport::demux::PacketSink;

use super::depacketizer::{DepacketizerStats, H264Depacketizer};
use super::h264::{H264NalUnit, H264ParameterSets};
use super::rtp::RtpPacket;
use super::{NalConsumer, TransportEvent};

/// Shared, versioned SPS/PPS pair.
///
/// Written by the RTSP client (sprop from SDP) and by the receiver (in-band
/// capture); each write replaces the whole pair and bumps the generation.
#[derive(Debug, Clone, Default)]
pub struct ParameterSetStore {
    inner: Arc<RwLock<(u64, H264ParameterSets)>>,
}

impl ParameterSetStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace(&self, sets: H264ParameterSets) {
        let mut inner = self.inner.write();
        inner.0 += 1;
        inner.1 = sets;
    }

    pub fn get(&self) -> H264ParameterSets {
        self.inner.read().1.clone()
    }

    pub fn generation(&self) -> u64 {
        self.inner.read().0
    }
}

/// Packet sink that reassembles H.264 and drives a [`NalConsumer`].
///
/// Tracks parameter sets: an in-band SPS followed by a PPS that differ from
/// the stored pair replace it, and the consumer is told once per change.
pub struct H264Receiver<C> {
    depacketizer: H264Depacketizer,
    consumer: C,
    store: ParameterSetStore,
    seen_generation: u64,
    pending_sps: Option<H264NalUnit>,
}

impl<C: NalConsumer> H264Receiver<C> {
    pub fn new(consumer: C, store: ParameterSetStore) -> Self {
        Self {
            depacketizer: H264Depacketizer::new(),
            consumer,
            store,
            seen_generation: 0,
            pending_sps: None,
        }
    }

    pub fn consumer(&self) -> &C {
        &self.consumer
    }

    pub fn into_consumer(self) -> C {
        self.consumer
    }

    pub fn stats(&self) -> DepacketizerStats {
        self.depacketizer.stats()
    }

    fn capture_parameter_set(&mut self, nal: &H264NalUnit) {
        if nal.is_sequence_parameter_set() {
            self.pending_sps = Some(nal.clone());
        } else if nal.is_picture_parameter_set()
            && let Some(sps) = self.pending_sps.take()
        {
            let current = self.store.get();
            if !current.matches(sps.payload(), nal.payload()) {
                tracing::debug!(
                    sps_len = sps.payload().len(),
                    pps_len = nal.payload().len(),
                    "in-band parameter sets changed"
                );
                self.store
                    .replace(H264ParameterSets::new(sps, nal.clone()));
            }
        }
    }

    fn sync_parameter_sets(&mut self) {
        let generation = self.store.generation();
        if generation != self.seen_generation {
            self.seen_generation = generation;
            let sets = self.store.get();
            self.consumer.on_parameter_sets_changed(&sets);
        }
    }
}

impl<C: NalConsumer> PacketSink for H264Receiver<C> {
    fn on_rtp_packet(&mut self, packet: RtpPacket) {
        self.sync_parameter_sets();
        for nal in self.depacketizer.push(&packet) {
            self.capture_parameter_set(&nal);
            self.sync_parameter_sets();
            self.consumer.on_nal_unit(nal);
        }
    }

    fn on_transport_event(&mut self, event: TransportEvent) {
        if matches!(event, TransportEvent::Disconnected { .. }) {
            self.depacketizer.reset();
            self.pending_sps = None;
        }
        self.consumer.on_transport_event(&event);
    }
}

/// Bounded queue between the stream reader and a decoder thread.
///
/// When the queue is full the reader waits in short sleeps until space
/// frees up or the token is cancelled; nothing is dropped while the decoder
/// keeps up. Parameter-set changes are forwarded as SPS and PPS units so the
/// decoder sees SDP-provided sets too.
pub struct NalQueue {
    tx: Sender<H264NalUnit>,
    cancel: CancelToken,
    poll_interval: Duration,
    dropped: u64,
}

impl NalQueue {
    pub fn bounded(capacity: usize, cancel: CancelToken) -> (Self, Receiver<H264NalUnit>) {
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        (
            Self {
                tx,
                cancel,
                poll_interval: Duration::from_millis(1),
                dropped: 0,
            },
            rx,
        )
    }

    /// Units thrown away because the token fired or the decoder went away.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    fn enqueue(&mut self, mut nal: H264NalUnit) {
        loop {
            match self.tx.try_send(nal) {
                Ok(()) => return,
                Err(TrySendError::Full(n)) => {
                    if self.cancel.is_cancelled() {
                        self.dropped += 1;
                        return;
                    }
                    nal = n;
                    thread::sleep(self.poll_interval);
                }
                Err(TrySendError::Disconnected(_)) => {
                    self.dropped += 1;
                    tracing::warn!(dropped = self.dropped, "decoder queue closed, NAL unit dropped");
                    return;
                }
            }
        }
    }
}

impl NalConsumer for NalQueue {
    fn on_nal_unit(&mut self, nal: H264NalUnit) {
        self.enqueue(nal);
    }

    fn on_parameter_sets_changed(&mut self, sets: &H264ParameterSets) {
        if let (Some(sps), Some(pps)) = (sets.sps(), sets.pps()) {
            self.enqueue(sps.clone());
            self.enqueue(pps.clone());
        }
    }
}
