use crate::entry::{Event, EntryIterator, FormatEntry, HistTs, Timespec, OVERHEAD};
use crate::histogram::{draw_histogram, MAX_HEIGHT};
use crate::ring_buffer::{RingBuffer, RingReader};
use std::collections::BTreeMap;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

/// Frame kinds that can begin a snapshot. A `HistogramTs` frame is a
/// complete unit on its own, so it appears in both sets.
const STARTING_TYPES: &[Event] = &[Event::StartFmt, Event::HistogramTs];

/// Frame kinds that can terminate a snapshot.
const ENDING_TYPES: &[Event] = &[Event::EndFmt, Event::HistogramTs, Event::HistogramFlush];

/// An immutable contiguous copy of the readable ring region, with the
/// framing landmarks established by recovery and the count of bytes lost
/// to overrun.
///
/// `begin..end` is guaranteed to be a chain of length-consistent frames
/// starting on a starting type and finishing just past an ending type.
/// Bytes before `begin` were garbled by overwrite and count as lost;
/// bytes after `end` are a partial tail left in the ring for the next
/// snapshot.
#[derive(Debug, Default)]
pub struct Snapshot {
    data: Vec<u8>,
    begin: usize,
    end: usize,
    lost: usize,
}

impl Snapshot {
    pub fn begin(&self) -> EntryIterator<'_> {
        EntryIterator::new(&self.data, self.begin)
    }

    pub fn end(&self) -> EntryIterator<'_> {
        EntryIterator::new(&self.data, self.end)
    }

    pub fn is_empty(&self) -> bool {
        self.begin == self.end
    }

    /// Bytes overwritten by the producer before this snapshot could read
    /// them. Does not include the garbled prefix; see `discarded`.
    pub fn lost(&self) -> usize {
        self.lost
    }

    /// Bytes at the front of the copy that could not be attributed to a
    /// complete frame chain.
    pub fn discarded(&self) -> usize {
        self.begin
    }
}

/// Scans backwards from `back` using each frame's trailing length byte and
/// returns the offset of the nearest frame whose type is in `types`.
///
/// Every step is validated: a step that would cross `front`, or whose
/// forward length does not land exactly back where the scan came from,
/// means the region is torn there and the scan stops.
fn find_last_entry_of_types(
    data: &[u8],
    front: usize,
    mut back: usize,
    types: &[Event],
) -> Option<usize> {
    while back > front {
        let prev_length = data[back - 1] as usize;
        let prev = match back.checked_sub(prev_length + OVERHEAD) {
            Some(prev) if prev >= front => prev,
            _ => return None,
        };
        if prev + data[prev + 1] as usize + OVERHEAD != back {
            return None;
        }
        if let Some(event) = Event::from_u8(data[prev]) {
            if types.contains(&event) {
                return Some(prev);
            }
        }
        back = prev;
    }
    None
}

/// The consumer side of one event log: takes snapshots, recovers framing
/// after overruns, and renders entries as text.
pub struct Reader {
    fifo: RingReader,
    names: Arc<Mutex<Vec<String>>>,
}

impl Reader {
    pub fn new(ring: &RingBuffer) -> Reader {
        Reader {
            fifo: ring.reader(),
            names: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A reader that resolves author indices against a shared name table;
    /// used for the merged ring.
    pub(crate) fn with_author_names(
        ring: &RingBuffer,
        names: Arc<Mutex<Vec<String>>>,
    ) -> Reader {
        Reader {
            fifo: ring.reader(),
            names,
        }
    }

    /// Copies the readable region and re-establishes framing.
    ///
    /// The producer may have overwritten the front of our window (and may
    /// have been mid-frame at the tail), so the copy is walked backwards
    /// from the end: first to the last complete ending frame, then onward
    /// to the earliest starting frame still reachable through consistent
    /// reverse steps. Only the well-framed region is released back to the
    /// ring; a partial tail frame stays for the next snapshot.
    pub fn snapshot(&mut self) -> Snapshot {
        let capacity = self.fifo.capacity();
        let obtained = self.fifo.obtain(capacity);
        if obtained.available == 0 {
            return Snapshot::default();
        }

        let mut data = vec![0u8; obtained.available];
        let first = obtained.iovec[0].len;
        self.fifo.copy_span(obtained.iovec[0], &mut data[..first]);
        if obtained.iovec[1].len > 0 {
            self.fifo.copy_span(obtained.iovec[1], &mut data[first..]);
        }

        let (begin, end) = match find_last_entry_of_types(&data, 0, data.len(), ENDING_TYPES) {
            None => (0, 0),
            Some(last_end) => {
                let end = last_end + data[last_end + 1] as usize + OVERHEAD;
                let mut first_start = None;
                let mut cursor = end;
                while let Some(start) = find_last_entry_of_types(&data, 0, cursor, STARTING_TYPES)
                {
                    first_start = Some(start);
                    cursor = start;
                }
                (first_start.unwrap_or(end), end)
            }
        };

        self.fifo.release(end);
        Snapshot {
            data,
            begin,
            end,
            lost: obtained.lost,
        }
    }

    /// Takes a snapshot and renders it.
    pub fn dump_latest<W: Write>(&mut self, out: &mut W, indent: usize) -> io::Result<()> {
        let snapshot = self.snapshot();
        self.dump(out, indent, &snapshot)
    }

    /// Renders a snapshot as text.
    ///
    /// One line per format block (`[sec.msec] HHHH-LLLL [name: ]body`),
    /// histogram charts on flush, and warning lines for losses and for
    /// anything unexpected at the top level.
    pub fn dump<W: Write>(&self, out: &mut W, indent: usize, snapshot: &Snapshot) -> io::Result<()> {
        let mut timestamp = String::new();
        let mut body = String::new();

        let lost = snapshot.lost() + snapshot.discarded();
        if lost > 0 {
            body.push_str(&format!("warning: lost {} bytes worth of events", lost));
            dump_line(out, indent, &timestamp, &mut body)?;
        }

        // Inter-tick deltas in ms, keyed by (hash, author); author is -1
        // before merge injection.
        let mut hists: BTreeMap<(u64, i32), Vec<i32>> = BTreeMap::new();
        let mut last_ts: BTreeMap<(u64, i32), Timespec> = BTreeMap::new();

        let end = snapshot.end();
        let mut entry = snapshot.begin();
        while entry != end {
            match entry.event() {
                Some(Event::StartFmt) => {
                    entry = self.handle_format(
                        FormatEntry::new(entry),
                        end,
                        &mut timestamp,
                        &mut body,
                    );
                }
                Some(Event::HistogramTs) => {
                    match HistTs::from_bytes(entry.payload()) {
                        Some(data) => {
                            let key = (data.hash, data.author.unwrap_or(-1));
                            if let Some(prev) = last_ts.get(&key) {
                                hists.entry(key).or_default().push(prev.delta_ms(data.ts));
                            }
                            last_ts.insert(key, data.ts);
                        }
                        None => {
                            log::warn!(
                                "histogram entry of length {} is too short",
                                entry.length()
                            );
                        }
                    }
                    entry.advance();
                }
                Some(Event::HistogramFlush) => {
                    body.push_str("Histograms:\n");
                    for ((hash, author), samples) in &hists {
                        body.push_str(&format!("Histogram {:X} - ", hash & 0xFFFF));
                        if let Some(name) = self.author_name(*author) {
                            body.push_str(&format!("{}: ", name));
                        }
                        draw_histogram(&mut body, samples, MAX_HEIGHT);
                    }
                    hists.clear();
                    last_ts.clear();
                    entry.advance();
                }
                Some(Event::EndFmt) => {
                    body.push_str("warning: got to end format event");
                    entry.advance();
                }
                _ => {
                    body.push_str(&format!("warning: unexpected event {}", entry.type_byte()));
                    entry.advance();
                }
            }
            if !body.is_empty() {
                dump_line(out, indent, &timestamp, &mut body)?;
            }
        }
        Ok(())
    }

    fn author_name(&self, author: i32) -> Option<String> {
        if author < 0 {
            return None;
        }
        self.names.lock().unwrap().get(author as usize).cloned()
    }

    /// Renders one format block and returns the iterator past it.
    ///
    /// The format string drives the walk: each known specifier consumes
    /// one argument frame, rendering it even when the types disagree
    /// (with a warning); unknown specifiers are skipped without consuming.
    fn handle_format<'a>(
        &self,
        entry: FormatEntry<'a>,
        end: EntryIterator<'a>,
        timestamp: &mut String,
        body: &mut String,
    ) -> EntryIterator<'a> {
        let ts = entry.timestamp().unwrap_or_default();
        timestamp.clear();
        timestamp.push_str(&ts.to_string());

        // Compact call-site id: top 16 bits in hex, low 32 in decimal.
        let hash = entry.hash();
        body.push_str(&format!("{:04X}-{} ", (hash >> 48) as u16, hash as u32));

        if let Some(name) = self.author_name(entry.author()) {
            body.push_str(&format!("{}: ", name));
        }

        let mut arg = entry.args();
        let fmt = entry.format_bytes();
        let mut i = 0;
        while i < fmt.len() {
            if fmt[i] != b'%' {
                let run = i;
                while i < fmt.len() && fmt[i] != b'%' {
                    i += 1;
                }
                body.push_str(&String::from_utf8_lossy(&fmt[run..i]));
                continue;
            }
            i += 1;
            if i >= fmt.len() {
                // Lone trailing '%'.
                break;
            }
            let spec = fmt[i];
            i += 1;
            if spec == b'%' {
                body.push('%');
                continue;
            }
            if arg == end || arg.event() == Some(Event::EndFmt) {
                break;
            }
            let event = arg.event();
            let datum = arg.payload();
            let expected = match spec {
                b's' => Event::String,
                b't' => Event::Timestamp,
                b'd' => Event::Integer,
                b'f' => Event::Float,
                b'p' => Event::Pid,
                other => {
                    // Unknown specifier: skip it without consuming the
                    // argument frame.
                    log::warn!("unknown format specifier: %{}", other as char);
                    continue;
                }
            };
            if event != Some(expected) {
                log::warn!(
                    "incompatible event {:?} for specifier %{}",
                    event,
                    spec as char
                );
            }
            // Render by the frame's own type, not the specifier: a
            // mismatched argument still shows its real payload.
            match event {
                Some(Event::String) => body.push_str(&String::from_utf8_lossy(datum)),
                Some(Event::Timestamp) => append_timestamp(body, datum),
                Some(Event::Integer) => append_int(body, datum),
                Some(Event::Float) => append_float(body, datum),
                Some(Event::Pid) => append_pid(body, datum),
                _ => {
                    log::warn!("cannot render argument event {:?}", event);
                }
            }
            arg.advance();
        }

        if arg != end && arg.event() != Some(Event::EndFmt) {
            log::warn!("expected end of format, got event {}", arg.type_byte());
        }
        if arg != end {
            arg.advance();
        }
        arg
    }
}

fn dump_line<W: Write>(
    out: &mut W,
    indent: usize,
    timestamp: &str,
    body: &mut String,
) -> io::Result<()> {
    writeln!(out, "{:indent$}{} {}", "", timestamp, body, indent = indent)?;
    body.clear();
    Ok(())
}

fn append_timestamp(body: &mut String, datum: &[u8]) {
    match Timespec::from_bytes(datum) {
        Some(ts) => body.push_str(&ts.to_string()),
        None => log::warn!("timestamp argument of length {} is too short", datum.len()),
    }
}

fn append_int(body: &mut String, datum: &[u8]) {
    if datum.len() < 4 {
        log::warn!("integer argument of length {} is too short", datum.len());
        return;
    }
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&datum[..4]);
    body.push_str(&format!("<{}>", i32::from_le_bytes(bytes)));
}

fn append_float(body: &mut String, datum: &[u8]) {
    if datum.len() < 4 {
        log::warn!("float argument of length {} is too short", datum.len());
        return;
    }
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&datum[..4]);
    body.push_str(&format!("<{:.6}>", f32::from_le_bytes(bytes)));
}

fn append_pid(body: &mut String, datum: &[u8]) {
    if datum.len() < 4 {
        log::warn!("pid argument of length {} is too short", datum.len());
        return;
    }
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&datum[..4]);
    let pid = i32::from_le_bytes(bytes);
    let name = String::from_utf8_lossy(&datum[4..]);
    body.push_str(&format!("<PID: {}, name: {}>", pid, name));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::encode_frame;

    fn frame(event: Event, payload: &[u8]) -> Vec<u8> {
        let mut buf = vec![0u8; payload.len() + OVERHEAD];
        encode_frame(&mut buf, event, payload);
        buf
    }

    #[test]
    fn test_reverse_scan_finds_ending_frame() {
        let mut data = frame(Event::StartFmt, b"%d");
        data.extend(frame(Event::Integer, &1i32.to_le_bytes()));
        data.extend(frame(Event::EndFmt, &[]));

        let found = find_last_entry_of_types(&data, 0, data.len(), ENDING_TYPES);
        // The empty END_FMT frame is the last three bytes.
        assert_eq!(found, Some(data.len() - OVERHEAD));
    }

    #[test]
    fn test_reverse_scan_stops_at_inconsistent_step() {
        let mut data = frame(Event::EndFmt, &[]);
        // A garbled prefix: the scan from the end must refuse to step into
        // it.
        let mut garbled = vec![0xAAu8; 7];
        garbled.extend(data.drain(..));
        let found = find_last_entry_of_types(&garbled, 0, garbled.len(), ENDING_TYPES);
        assert_eq!(found, Some(7));
        // From the ending frame itself, further steps are rejected.
        let found = find_last_entry_of_types(&garbled, 0, 7, ENDING_TYPES);
        assert_eq!(found, None);
    }

    #[test]
    fn test_solo_histogram_ts_is_both_begin_and_end() {
        use crate::ring_buffer::RingBuffer;
        use crate::writer::Writer;

        let ring = RingBuffer::new(256);
        let mut writer = Writer::with_ring(&ring);
        let mut reader = Reader::new(&ring);
        writer.log_hist_ts(77);

        let snapshot = reader.snapshot();
        assert!(!snapshot.is_empty());
        assert_eq!(snapshot.begin().event(), Some(Event::HistogramTs));
        assert_eq!(snapshot.begin().next(), snapshot.end());
    }
}
