//! Stdout ring channel.
//!
//! Lock-free single-producer/single-consumer byte ring carrying the guest's
//! stdout from the worker context to the main context. Head and tail are
//! byte offsets modulo the ring capacity, not wrapping counters — matching
//! the shared-memory layout rather than a generic ring-buffer crate's
//! sequence-number scheme. The byte area is modeled as a slice of
//! `AtomicU8` so producer and consumer can each hold a plain shared
//! reference to it, the same shape a `js_sys::SharedArrayBuffer`-backed view
//! has on the wasm side: there is no exclusive borrow to fight over, only
//! the head/tail handshake below.

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};

/// Byte capacity of the stdout ring.
pub const RING_CAPACITY: usize = 65_528;

/// One slot is always sacrificed to distinguish full from empty.
const USABLE_CAPACITY: usize = RING_CAPACITY - 1;

/// Running counters a consumer can sample for observability. A full ring
/// silently drops overflow bytes; this struct is the ambient
/// instrumentation that makes the silent case observable without changing
/// the drop behavior itself.
#[derive(Debug, Default, Clone, Copy)]
pub struct RingStats {
    pub bytes_written: u64,
    pub bytes_dropped: u64,
}

/// Producer-side handle. Exactly one of these may exist per ring; the type
/// does not enforce that (the buffer is shared memory, not owned), the
/// caller's topology does.
pub struct RingProducer<'a> {
    head: &'a AtomicU32,
    tail: &'a AtomicU32,
    data: &'a [AtomicU8],
    stats: RingStats,
}

/// Consumer-side handle.
pub struct RingConsumer<'a> {
    head: &'a AtomicU32,
    tail: &'a AtomicU32,
    data: &'a [AtomicU8],
}

/// Splits a raw shared-memory region into a producer/consumer pair.
///
/// `counters` holds `[write_head, read_tail]` at word offsets 0 and 1;
/// `data` is the byte area of size at least [`RING_CAPACITY`], laid out at
/// byte offset 8 in the control buffer.
pub fn split<'a>(
    counters: &'a [AtomicU32; 2],
    data: &'a [AtomicU8],
) -> (RingProducer<'a>, RingConsumer<'a>) {
    assert!(
        data.len() >= RING_CAPACITY,
        "ring data region smaller than RING_CAPACITY"
    );
    let producer = RingProducer {
        head: &counters[0],
        tail: &counters[1],
        data,
        stats: RingStats::default(),
    };
    let consumer = RingConsumer {
        head: &counters[0],
        tail: &counters[1],
        data,
    };
    (producer, consumer)
}

impl<'a> RingProducer<'a> {
    fn free_space(&self, head: u32, tail: u32) -> usize {
        let head = head as usize % RING_CAPACITY;
        let tail = tail as usize % RING_CAPACITY;
        if head >= tail {
            USABLE_CAPACITY - (head - tail)
        } else {
            tail - head - 1
        }
    }

    /// Writes as many bytes of `buf` as fit. Never blocks. Returns the
    /// number of bytes actually written; the remainder is silently dropped.
    pub fn write(&mut self, buf: &[u8]) -> usize {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);
        let free = self.free_space(head, tail);
        let to_write = buf.len().min(free);
        if to_write == 0 {
            self.record_drop(buf.len());
            return 0;
        }

        let start = head as usize % RING_CAPACITY;
        for (i, byte) in buf[..to_write].iter().enumerate() {
            let idx = (start + i) % RING_CAPACITY;
            self.data[idx].store(*byte, Ordering::Relaxed);
        }

        let new_head = (start + to_write) % RING_CAPACITY;
        self.head.store(new_head as u32, Ordering::Release);

        self.stats.bytes_written += to_write as u64;
        if to_write < buf.len() {
            self.record_drop(buf.len() - to_write);
        }
        to_write
    }

    fn record_drop(&mut self, dropped: usize) {
        self.stats.bytes_dropped += dropped as u64;
        #[cfg(feature = "tracing-integration")]
        tracing::debug!(
            dropped_bytes = dropped,
            total_dropped = self.stats.bytes_dropped,
            "stdout ring full, dropping bytes"
        );
    }

    pub fn stats(&self) -> RingStats {
        self.stats
    }
}

impl<'a> RingConsumer<'a> {
    /// Drains all currently available bytes into `sink`, advancing `tail`.
    /// Returns the number of bytes drained.
    pub fn drain_into(&self, sink: &mut Vec<u8>) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Relaxed);
        let head_off = head as usize % RING_CAPACITY;
        let tail_off = tail as usize % RING_CAPACITY;

        let available = if head_off >= tail_off {
            head_off - tail_off
        } else {
            RING_CAPACITY - tail_off + head_off
        };
        if available == 0 {
            return 0;
        }

        sink.reserve(available);
        for i in 0..available {
            let idx = (tail_off + i) % RING_CAPACITY;
            sink.push(self.data[idx].load(Ordering::Relaxed));
        }

        let new_tail = (tail_off + available) % RING_CAPACITY;
        self.tail.store(new_tail as u32, Ordering::Release);
        available
    }

    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire) == self.tail.load(Ordering::Relaxed)
    }
}

/// Allocates an owned ring backing store, for native tests and the
/// in-process fakes. The wasm-facing crate instead derives `data` from a
/// `js_sys::SharedArrayBuffer` view.
pub fn new_backing_store() -> ([AtomicU32; 2], Vec<AtomicU8>) {
    let counters = [AtomicU32::new(0), AtomicU32::new(0)];
    let data = (0..RING_CAPACITY).map(|_| AtomicU8::new(0)).collect();
    (counters, data)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_ring() -> ([AtomicU32; 2], Vec<AtomicU8>) {
        new_backing_store()
    }

    #[test]
    fn writes_and_drains_roundtrip() {
        let (counters, data) = new_ring();
        let (mut producer, consumer) = split(&counters, &data);

        let written = producer.write(b"hello world");
        assert_eq!(written, 11);

        let mut out = Vec::new();
        let drained = consumer.drain_into(&mut out);
        assert_eq!(drained, 11);
        assert_eq!(out, b"hello world");
        assert!(consumer.is_empty());
    }

    #[test]
    fn wraps_around_capacity() {
        let (counters, data) = new_ring();
        let (mut producer, consumer) = split(&counters, &data);

        // Fill to just before the wrap point, drain, then write again so the
        // second write straddles the physical end of the buffer.
        let filler = vec![b'x'; RING_CAPACITY - 10];
        producer.write(&filler);
        let mut sink = Vec::new();
        consumer.drain_into(&mut sink);

        let second = vec![b'y'; 20];
        let written = producer.write(&second);
        assert_eq!(written, 20);

        let mut out = Vec::new();
        consumer.drain_into(&mut out);
        assert_eq!(out, second);
    }

    #[test]
    fn drops_excess_when_full_without_blocking() {
        let (counters, data) = new_ring();
        let (mut producer, consumer) = split(&counters, &data);

        let oversized = vec![b'z'; RING_CAPACITY + 100];
        let written = producer.write(&oversized);
        assert!(written <= RING_CAPACITY - 1);
        assert!(producer.stats().bytes_dropped > 0);
        assert_eq!(
            producer.stats().bytes_written as usize + producer.stats().bytes_dropped as usize,
            oversized.len()
        );
        drop(consumer);
    }

    #[test]
    fn partial_write_when_nearly_full() {
        let (counters, data) = new_ring();
        let (mut producer, consumer) = split(&counters, &data);

        // Leave only 5 free bytes.
        let filler = vec![b'a'; RING_CAPACITY - 1 - 5];
        producer.write(&filler);

        let attempt = vec![b'b'; 50];
        let written = producer.write(&attempt);
        assert_eq!(written, 5);
        assert_eq!(producer.stats().bytes_dropped, 45);

        let mut out = Vec::new();
        consumer.drain_into(&mut out);
        assert_eq!(out.len(), filler.len() + 5);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    // For any interleaving of producer writes
    // totalling P bytes and consumer reads totalling C bytes, P - C <= N - 1
    // and no byte is ever duplicated or reordered.
    proptest! {
        #[test]
        fn ring_conservation(chunks in proptest::collection::vec(
            proptest::collection::vec(any::<u8>(), 0..200),
            0..50,
        )) {
            let (counters, data) = new_backing_store();
            let (mut producer, consumer) = split(&counters, &data);

            let mut expected = Vec::new();
            let mut actual = Vec::new();
            for chunk in &chunks {
                let written = producer.write(chunk);
                expected.extend_from_slice(&chunk[..written]);
                // Drain opportunistically, mirroring an interleaved consumer.
                consumer.drain_into(&mut actual);
            }
            consumer.drain_into(&mut actual);

            prop_assert_eq!(&actual, &expected);
            let stats = producer.stats();
            prop_assert!(
                stats.bytes_written as usize <= stats.bytes_written as usize + stats.bytes_dropped as usize
            );
        }
    }
}
