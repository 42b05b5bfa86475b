use crate::entry::{
    encode_frame, Event, EntryIterator, FormatEntry, HistTs, Timespec, HIST_TS_SIZE,
    HIST_TS_WITH_AUTHOR_SIZE, OVERHEAD,
};
use crate::reader::{Reader, Snapshot};
use crate::ring_buffer::{RingBuffer, RingWriter};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

/// Period of one merge tick while the merge thread countdown is armed.
pub const MERGE_PERIOD_US: i64 = 2_000;

/// Countdown armed by `MergeThread::wakeup`: the thread keeps merging at
/// the tick period until this much time has drained.
pub const WAKEUP_TIMEOUT_US: i64 = 3_000_000;

/// A producer's reader tagged with the display name used for author
/// resolution in merged output.
pub struct NamedReader {
    name: String,
    reader: Reader,
}

impl NamedReader {
    pub fn new(name: &str, reader: Reader) -> NamedReader {
        NamedReader {
            name: name.to_string(),
            reader,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// A mergeable unit at the head of a producer snapshot: either a whole
/// format block or a single histogram frame. Built purely from the leading
/// type byte.
enum MergeEntry<'a> {
    Format(FormatEntry<'a>),
    Histogram(EntryIterator<'a>),
}

impl<'a> MergeEntry<'a> {
    fn build(it: EntryIterator<'a>) -> Option<MergeEntry<'a>> {
        match it.event() {
            Some(Event::StartFmt) => Some(MergeEntry::Format(FormatEntry::new(it))),
            Some(Event::HistogramTs) | Some(Event::HistogramFlush) => {
                Some(MergeEntry::Histogram(it))
            }
            other => {
                log::warn!("cannot merge entry of type {:?}", other);
                None
            }
        }
    }

    /// The logical timestamp the merge orders by.
    fn timestamp(&self) -> Option<Timespec> {
        match self {
            MergeEntry::Format(entry) => entry.timestamp(),
            MergeEntry::Histogram(it) => HistTs::from_bytes(it.payload()).map(|data| data.ts),
        }
    }

    /// Copies this unit into the destination ring with `author` injected,
    /// and returns the iterator past it.
    ///
    /// Format blocks gain an `AUTHOR` frame between the hash and the first
    /// argument; histogram frames are rewritten with the author-bearing
    /// payload layout.
    fn copy_with_author(
        &self,
        dst: &mut RingWriter,
        author: i32,
        end: EntryIterator<'a>,
    ) -> EntryIterator<'a> {
        match self {
            MergeEntry::Format(entry) => {
                let mut it = entry.iterator();
                // Start, timestamp, hash pass through unchanged.
                for _ in 0..3 {
                    if it == end {
                        return it;
                    }
                    dst.write(it.frame_bytes());
                    it.advance();
                }
                let mut scratch = [0u8; 4 + OVERHEAD];
                let total = encode_frame(&mut scratch, Event::Author, &author.to_le_bytes());
                dst.write(&scratch[..total]);
                // Arguments, then the closing frame.
                while it != end && it.event() != Some(Event::EndFmt) {
                    dst.write(it.frame_bytes());
                    it.advance();
                }
                if it != end {
                    dst.write(it.frame_bytes());
                    it.advance();
                }
                it
            }
            MergeEntry::Histogram(it) => {
                let original = it.payload();
                let mut payload = [0u8; HIST_TS_WITH_AUTHOR_SIZE];
                let base = original.len().min(HIST_TS_SIZE);
                payload[..base].copy_from_slice(&original[..base]);
                payload[HIST_TS_SIZE..].copy_from_slice(&author.to_le_bytes());

                let mut scratch = [0u8; HIST_TS_WITH_AUTHOR_SIZE + OVERHEAD];
                if let Some(event) = it.event() {
                    let total = encode_frame(&mut scratch, event, &payload);
                    dst.write(&scratch[..total]);
                }
                it.next()
            }
        }
    }
}

/// Interleaves the logs of several producers into one ring, ordered by
/// event timestamp, stamping every copied unit with the index of the
/// producer it came from.
pub struct Merger {
    dst: RingWriter,
    readers: Vec<NamedReader>,
    names: Arc<Mutex<Vec<String>>>,
}

impl Merger {
    pub fn new(dst: &RingBuffer) -> Merger {
        Merger {
            dst: dst.writer(),
            readers: Vec::new(),
            names: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Registers a producer. Its author index is its registration order.
    pub fn add_reader(&mut self, reader: NamedReader) {
        self.names.lock().unwrap().push(reader.name.clone());
        self.readers.push(reader);
    }

    pub(crate) fn names_handle(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.names)
    }

    /// Snapshots every producer and drains the snapshots into the
    /// destination ring in timestamp order, ties broken by producer index.
    pub fn merge(&mut self) {
        let snapshots: Vec<Snapshot> = self
            .readers
            .iter_mut()
            .map(|named| named.reader.snapshot())
            .collect();
        let mut offsets: Vec<EntryIterator<'_>> =
            snapshots.iter().map(|snapshot| snapshot.begin()).collect();
        let ends: Vec<EntryIterator<'_>> =
            snapshots.iter().map(|snapshot| snapshot.end()).collect();

        let mut heap: BinaryHeap<Reverse<(Timespec, usize)>> = BinaryHeap::new();
        for (index, offset) in offsets.iter().enumerate() {
            if *offset != ends[index] {
                if let Some(ts) = MergeEntry::build(*offset).and_then(|entry| entry.timestamp()) {
                    heap.push(Reverse((ts, index)));
                }
            }
        }

        while let Some(Reverse((_, index))) = heap.pop() {
            let Some(entry) = MergeEntry::build(offsets[index]) else {
                // Unmergeable head frame; drop this producer's remainder.
                continue;
            };
            offsets[index] = entry.copy_with_author(&mut self.dst, index as i32, ends[index]);
            if offsets[index] != ends[index] {
                if let Some(ts) =
                    MergeEntry::build(offsets[index]).and_then(|entry| entry.timestamp())
                {
                    heap.push(Reverse((ts, index)));
                }
            }
        }
    }
}

/// Reader over the merged ring; resolves author indices to the names the
/// producers were registered under.
pub struct MergeReader {
    reader: Reader,
}

impl MergeReader {
    pub fn new(merged: &RingBuffer, merger: &Merger) -> MergeReader {
        MergeReader {
            reader: Reader::with_author_names(merged, merger.names_handle()),
        }
    }

    pub fn snapshot(&mut self) -> Snapshot {
        self.reader.snapshot()
    }

    pub fn dump<W: Write>(&self, out: &mut W, indent: usize, snapshot: &Snapshot) -> io::Result<()> {
        self.reader.dump(out, indent, snapshot)
    }

    pub fn dump_latest<W: Write>(&mut self, out: &mut W, indent: usize) -> io::Result<()> {
        self.reader.dump_latest(out, indent)
    }
}

struct MergeState {
    timeout_us: Mutex<i64>,
    cond: Condvar,
    shutdown: AtomicBool,
}

/// Background task that merges at a fixed period while its countdown is
/// armed.
///
/// A non-positive timeout parks the thread until the next `set_timeout_us`
/// or `wakeup`. Dropping the handle requests shutdown, zeroes the timeout
/// and joins; an in-flight merge runs to completion.
pub struct MergeThread {
    state: Arc<MergeState>,
    handle: Option<thread::JoinHandle<()>>,
}

impl MergeThread {
    pub fn new(mut merger: Merger) -> MergeThread {
        let state = Arc::new(MergeState {
            timeout_us: Mutex::new(0),
            cond: Condvar::new(),
            shutdown: AtomicBool::new(false),
        });
        let thread_state = Arc::clone(&state);
        let handle = thread::spawn(move || loop {
            let do_merge;
            {
                let guard = thread_state.timeout_us.lock().unwrap();
                let wait = if *guard > 0 {
                    Duration::from_micros(MERGE_PERIOD_US as u64)
                } else {
                    // Parked; only a signal wakes us.
                    Duration::from_secs(86_400)
                };
                let (mut guard, _) = thread_state.cond.wait_timeout(guard, wait).unwrap();
                if thread_state.shutdown.load(Ordering::Relaxed) {
                    break;
                }
                do_merge = *guard > 0;
                *guard -= MERGE_PERIOD_US;
            }
            if do_merge {
                merger.merge();
            }
        });
        MergeThread {
            state,
            handle: Some(handle),
        }
    }

    /// Arms the countdown so merging happens on the next tick and keeps
    /// going for `WAKEUP_TIMEOUT_US`.
    pub fn wakeup(&self) {
        self.set_timeout_us(WAKEUP_TIMEOUT_US);
    }

    /// Raw countdown control: negative suspends, zero stops after the
    /// current wake, positive merges each tick until drained.
    pub fn set_timeout_us(&self, timeout_us: i64) {
        let mut guard = self.state.timeout_us.lock().unwrap();
        *guard = timeout_us;
        self.state.cond.notify_one();
    }
}

impl Drop for MergeThread {
    fn drop(&mut self) {
        self.state.shutdown.store(true, Ordering::Relaxed);
        self.set_timeout_us(0);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
