//! Single-producer, single-consumer sample ring.
//!
//! The decode worker writes and the device callback reads. Samples are
//! stored as `f32` bit patterns in atomic slots, so neither side ever
//! blocks or allocates.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

/// `clear_to` value when no clear is pending. Positions never get this far.
const NO_CLEAR: usize = usize::MAX;

pub struct SampleRing {
    slots: Box<[AtomicU32]>,
    mask: usize,
    /// Written only by the consumer.
    read_pos: AtomicUsize,
    /// Written only by the producer.
    write_pos: AtomicUsize,
    /// Producer's request for the consumer to skip ahead to this position.
    clear_to: AtomicUsize,
}

impl SampleRing {
    /// Capacity is rounded up to a power of two.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1).next_power_of_two();
        let slots = (0..capacity).map(|_| AtomicU32::new(0)).collect();
        Self {
            slots,
            mask: capacity - 1,
            read_pos: AtomicUsize::new(0),
            write_pos: AtomicUsize::new(0),
            clear_to: AtomicUsize::new(NO_CLEAR),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Samples the consumer will still get, as seen by the producer.
    pub fn available(&self) -> usize {
        let write = self.write_pos.load(Ordering::Acquire);
        let read = match self.clear_to.load(Ordering::Acquire) {
            NO_CLEAR => self.read_pos.load(Ordering::Acquire),
            target => target,
        };
        write.wrapping_sub(read).min(self.capacity())
    }

    /// Slots the producer may overwrite. Until the consumer applies a
    /// pending clear, the discarded samples still occupy their slots.
    pub fn free(&self) -> usize {
        let write = self.write_pos.load(Ordering::Acquire);
        let read = self.read_pos.load(Ordering::Acquire);
        self.capacity() - write.wrapping_sub(read).min(self.capacity())
    }

    pub fn is_empty(&self) -> bool {
        self.available() == 0
    }

    /// Producer side. Returns how many samples fit.
    pub fn write(&self, samples: &[f32]) -> usize {
        let write = self.write_pos.load(Ordering::Relaxed);
        let count = samples.len().min(self.free());

        for (offset, sample) in samples[..count].iter().enumerate() {
            self.slots[write.wrapping_add(offset) & self.mask]
                .store(sample.to_bits(), Ordering::Relaxed);
        }

        self.write_pos
            .store(write.wrapping_add(count), Ordering::Release);
        count
    }

    /// Producer side. Drop everything written so far.
    ///
    /// The consumer skips the dropped samples on its next read, so a read
    /// already in progress finishes undisturbed.
    pub fn clear(&self) {
        let write = self.write_pos.load(Ordering::Relaxed);
        self.clear_to.store(write, Ordering::Release);
    }

    /// Consumer side. Apply a pending clear without reading.
    pub fn discard_cleared(&self) {
        self.consumer_position();
    }

    fn consumer_position(&self) -> usize {
        match self.clear_to.swap(NO_CLEAR, Ordering::AcqRel) {
            NO_CLEAR => self.read_pos.load(Ordering::Relaxed),
            target => {
                self.read_pos.store(target, Ordering::Release);
                target
            }
        }
    }

    /// Consumer side. Returns how many samples were copied into `out`.
    pub fn read(&self, out: &mut [f32]) -> usize {
        // Loading `write_pos` first guarantees any clear issued before the
        // samples we are about to read is visible to the swap below.
        let write = self.write_pos.load(Ordering::Acquire);
        let read = self.consumer_position();
        let ready = write.wrapping_sub(read);
        if ready > self.capacity() {
            // A clear landed after `write` was loaded.
            return 0;
        }
        let count = out.len().min(ready);

        for (offset, sample) in out[..count].iter_mut().enumerate() {
            *sample = f32::from_bits(
                self.slots[read.wrapping_add(offset) & self.mask].load(Ordering::Relaxed),
            );
        }

        self.read_pos.store(read.wrapping_add(count), Ordering::Release);
        count
    }
}
