use std::cell::UnsafeCell;
use std::ptr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

// # Memory ordering
//
// The ring has exactly one writer and one reader. The only shared cursor is
// `rear`: the writer copies a frame into the buffer and then publishes it
// with a single store(Release); the reader load(Acquire)s `rear` before
// touching the bytes, which makes every byte written before the store
// visible. `front` is private to the reader, so the writer never waits on
// it. A lagging reader is overwritten, not a source of back-pressure.
//
// Cursors are free-running u32 counters; distances use wrapping
// subtraction, physical positions use `index & mask`. A reader that lags by
// more than the capacity observes the overrun as a `lost` count, never as
// an error.

/// Shared state between the producer and consumer sides of one ring.
///
/// Layout mirrors a shared-memory region: a producer-owned write cursor
/// followed by the byte storage. The reader's `front` cursor deliberately
/// lives outside this struct.
struct Shared {
    rear: AtomicU32,
    capacity: u32,
    mask: u32,
    buffer: Box<[UnsafeCell<u8>]>,
}

// The buffer cells are written by one thread and read by another without a
// lock; torn reads surface as framing corruption, which the snapshot
// recovery pass discards.
unsafe impl Send for Shared {}
unsafe impl Sync for Shared {}

impl Shared {
    fn base_ptr(&self) -> *mut u8 {
        self.buffer.as_ptr() as *mut u8
    }
}

fn round_up_pow2(n: usize) -> usize {
    n.next_power_of_two()
}

/// A bounded byte FIFO where the producer never blocks: writes overwrite
/// the oldest unread bytes and the reader discovers the loss on its next
/// `obtain`.
#[derive(Clone)]
pub struct RingBuffer {
    shared: Arc<Shared>,
}

impl RingBuffer {
    /// Creates a ring of at least `capacity` bytes, rounded up to a power
    /// of two.
    pub fn new(capacity: usize) -> RingBuffer {
        let capacity = round_up_pow2(capacity.max(2));
        assert!(capacity <= 1 << 30, "ring capacity out of range");
        let buffer = (0..capacity).map(|_| UnsafeCell::new(0u8)).collect();
        RingBuffer {
            shared: Arc::new(Shared {
                rear: AtomicU32::new(0),
                capacity: capacity as u32,
                mask: capacity as u32 - 1,
                buffer,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity as usize
    }

    /// The producer handle. The ring supports a single producer; creating
    /// more than one writer breaks the publication discipline.
    pub fn writer(&self) -> RingWriter {
        RingWriter {
            shared: Arc::clone(&self.shared),
        }
    }

    /// The consumer handle. One reader per ring. A reader attached after
    /// writes have happened observes the backlog, subject to the usual
    /// loss accounting.
    pub fn reader(&self) -> RingReader {
        RingReader {
            shared: Arc::clone(&self.shared),
            front: 0,
        }
    }
}

/// A `(offset, len)` span of the readable region; `obtain` yields one span,
/// or two when the region wraps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IoVec {
    pub offset: usize,
    pub len: usize,
}

/// Result of `RingReader::obtain`: the readable spans, their total length,
/// and the bytes overwritten since the previous read.
#[derive(Debug, Clone, Copy, Default)]
pub struct Obtained {
    pub iovec: [IoVec; 2],
    pub available: usize,
    pub lost: usize,
}

/// Producer side. Wait-free: `write` copies and publishes, nothing more.
pub struct RingWriter {
    shared: Arc<Shared>,
}

impl RingWriter {
    /// Appends `data`, overwriting the oldest bytes if the reader lags.
    /// Always succeeds. The write cursor advances once, after all bytes
    /// are in place, so a concurrent reader sees either none or all of
    /// them behind the cursor.
    pub fn write(&mut self, data: &[u8]) {
        let capacity = self.shared.capacity as usize;
        let mask = self.shared.mask as usize;
        let rear = self.shared.rear.load(Ordering::Relaxed);

        // A single oversized write keeps only its tail; earlier bytes
        // would be overwritten within this same call anyway.
        let skip = data.len().saturating_sub(capacity);
        let tail = &data[skip..];

        let start = (rear as usize + skip) & mask;
        let first = tail.len().min(capacity - start);
        let base = self.shared.base_ptr();
        unsafe {
            ptr::copy_nonoverlapping(tail.as_ptr(), base.add(start), first);
            if first < tail.len() {
                ptr::copy_nonoverlapping(tail.as_ptr().add(first), base, tail.len() - first);
            }
        }

        self.shared
            .rear
            .store(rear.wrapping_add(data.len() as u32), Ordering::Release);
    }
}

/// Consumer side. Holds the private `front` cursor.
pub struct RingReader {
    shared: Arc<Shared>,
    front: u32,
}

impl RingReader {
    pub fn capacity(&self) -> usize {
        self.shared.capacity as usize
    }

    /// Describes the currently readable region, up to `max` bytes, without
    /// consuming it. If the producer has written more than a full capacity
    /// since the last read, `front` snaps forward past the overwritten
    /// bytes and the overrun is reported in `lost`.
    pub fn obtain(&mut self, max: usize) -> Obtained {
        let capacity = self.shared.capacity;
        let rear = self.shared.rear.load(Ordering::Acquire);
        let mut available = rear.wrapping_sub(self.front);
        let mut lost = 0u32;
        if available > capacity {
            lost = available - capacity;
            self.front = self.front.wrapping_add(lost);
            available = capacity;
        }
        let available = (available as usize).min(max);

        let offset = (self.front & self.shared.mask) as usize;
        let first = available.min(capacity as usize - offset);
        Obtained {
            iovec: [
                IoVec { offset, len: first },
                IoVec { offset: 0, len: available - first },
            ],
            available,
            lost: lost as usize,
        }
    }

    /// Copies one span obtained from this reader into `dst`.
    pub fn copy_span(&self, span: IoVec, dst: &mut [u8]) {
        assert!(span.len <= dst.len());
        unsafe {
            ptr::copy_nonoverlapping(
                self.shared.base_ptr().add(span.offset),
                dst.as_mut_ptr(),
                span.len,
            );
        }
    }

    /// Consumes `n` bytes. The caller passes the number actually decoded,
    /// which may be less than obtained to leave a partial tail frame for
    /// the next read.
    pub fn release(&mut self, n: usize) {
        self.front = self.front.wrapping_add(n as u32);
    }
}
