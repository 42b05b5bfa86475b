use std::fmt;

/// Maximum payload length of a single frame. The length field is one byte.
pub const MAX_LENGTH: usize = 255;

/// Fixed per-frame overhead: type byte, leading length byte, trailing
/// length byte.
pub const OVERHEAD: usize = 3;

/// Offset of the previous frame's trailing length byte, relative to the
/// start of the frame that follows it.
pub const PREVIOUS_LENGTH_OFFSET: isize = -1;

/// Wire size of a histogram timestamp payload without an author tag.
pub const HIST_TS_SIZE: usize = 24;

/// Wire size of a histogram timestamp payload carrying an author tag.
pub const HIST_TS_WITH_AUTHOR_SIZE: usize = 28;

// Authorship of a histogram frame is discriminated by payload length alone,
// so the two layouts must never coincide.
const _: () = assert!(HIST_TS_SIZE != HIST_TS_WITH_AUTHOR_SIZE);

/// First invalid event tag value.
pub const EVENT_UPPER_BOUND: u8 = 12;

/// Event kinds carried in the leading type byte of a frame.
///
/// `Reserved` and any byte >= `EVENT_UPPER_BOUND` are invalid on the wire;
/// writers drop them and readers warn on them.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Reserved = 0,
    String = 1,
    Timestamp = 2,
    Integer = 3,
    Float = 4,
    Pid = 5,
    Author = 6,
    StartFmt = 7,
    Hash = 8,
    EndFmt = 9,
    HistogramTs = 10,
    HistogramFlush = 11,
}

impl Event {
    /// Decodes a raw type byte. Returns None for `Reserved` gaps above the
    /// upper bound; `Reserved` itself decodes so readers can warn on it.
    pub fn from_u8(byte: u8) -> Option<Event> {
        match byte {
            0 => Some(Event::Reserved),
            1 => Some(Event::String),
            2 => Some(Event::Timestamp),
            3 => Some(Event::Integer),
            4 => Some(Event::Float),
            5 => Some(Event::Pid),
            6 => Some(Event::Author),
            7 => Some(Event::StartFmt),
            8 => Some(Event::Hash),
            9 => Some(Event::EndFmt),
            10 => Some(Event::HistogramTs),
            11 => Some(Event::HistogramFlush),
            _ => None,
        }
    }
}

/// A monotonic timestamp as carried in `Timestamp` and histogram payloads.
///
/// Ordering is lexicographic on (sec, nsec), which is what the merger sorts
/// by.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timespec {
    pub sec: i64,
    pub nsec: i64,
}

/// Wire size of a `Timespec` payload.
pub const TIMESPEC_SIZE: usize = 16;

impl Timespec {
    /// Serializes to the 16-byte little-endian wire form.
    pub fn to_bytes(self) -> [u8; TIMESPEC_SIZE] {
        let mut out = [0u8; TIMESPEC_SIZE];
        out[..8].copy_from_slice(&self.sec.to_le_bytes());
        out[8..].copy_from_slice(&self.nsec.to_le_bytes());
        out
    }

    /// Decodes from a payload slice. The scalars are byte-copied, so the
    /// slice may start at any alignment.
    pub fn from_bytes(bytes: &[u8]) -> Option<Timespec> {
        if bytes.len() < TIMESPEC_SIZE {
            return None;
        }
        let mut sec = [0u8; 8];
        let mut nsec = [0u8; 8];
        sec.copy_from_slice(&bytes[..8]);
        nsec.copy_from_slice(&bytes[8..16]);
        Some(Timespec {
            sec: i64::from_le_bytes(sec),
            nsec: i64::from_le_bytes(nsec),
        })
    }

    /// Whole milliseconds elapsed from `self` to `later`.
    pub fn delta_ms(self, later: Timespec) -> i32 {
        ((later.sec - self.sec) * 1000 + later.nsec / 1_000_000 - self.nsec / 1_000_000) as i32
    }
}

impl fmt::Display for Timespec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}.{:03}]", self.sec, self.nsec / 1_000_000)
    }
}

/// Decoded payload of a `HistogramTs` or `HistogramFlush` frame.
///
/// The author tag is present only after the merger has copied the frame
/// into the unified ring; its presence is keyed off the payload length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistTs {
    pub hash: u64,
    pub ts: Timespec,
    pub author: Option<i32>,
}

impl HistTs {
    pub fn new(hash: u64, ts: Timespec) -> HistTs {
        HistTs { hash, ts, author: None }
    }

    /// Decodes from a payload slice, accepting either wire layout.
    pub fn from_bytes(bytes: &[u8]) -> Option<HistTs> {
        if bytes.len() < HIST_TS_SIZE {
            return None;
        }
        let mut hash = [0u8; 8];
        hash.copy_from_slice(&bytes[..8]);
        let ts = Timespec::from_bytes(&bytes[8..])?;
        let author = if bytes.len() == HIST_TS_WITH_AUTHOR_SIZE {
            let mut a = [0u8; 4];
            a.copy_from_slice(&bytes[HIST_TS_SIZE..HIST_TS_WITH_AUTHOR_SIZE]);
            Some(i32::from_le_bytes(a))
        } else {
            None
        };
        Some(HistTs {
            hash: u64::from_le_bytes(hash),
            ts,
            author,
        })
    }

    /// Serializes to the author-less 24-byte wire form.
    pub fn to_bytes(self) -> [u8; HIST_TS_SIZE] {
        let mut out = [0u8; HIST_TS_SIZE];
        out[..8].copy_from_slice(&self.hash.to_le_bytes());
        out[8..].copy_from_slice(&self.ts.to_bytes());
        out
    }
}

/// Stages one complete frame into `buf` and returns the number of bytes
/// written (`payload.len() + OVERHEAD`).
///
/// # Frame layout
/// ```text
/// [type: u8 | length: u8 | data: length bytes | length: u8]
/// ```
/// The trailing length byte duplicates the leading one; it is what makes
/// the stream traversable backwards.
///
/// # Panics
/// Panics if `payload.len() > MAX_LENGTH` or `buf` is too small; callers
/// validate length before staging.
pub fn encode_frame(buf: &mut [u8], event: Event, payload: &[u8]) -> usize {
    let length = payload.len();
    assert!(length <= MAX_LENGTH);
    buf[0] = event as u8;
    buf[1] = length as u8;
    buf[2..2 + length].copy_from_slice(payload);
    buf[2 + length] = length as u8;
    length + OVERHEAD
}

/// A cursor over self-framed entries in a byte buffer.
///
/// The iterator is a non-owning borrow of the buffer; it is `Copy` and
/// cheap to fork. Forward movement uses the leading length byte of the
/// current frame; backward movement uses the trailing length byte of the
/// frame before it. Neither direction validates; callers walk only
/// regions whose framing has been established (see the snapshot recovery
/// in `reader`).
#[derive(Debug, Clone, Copy)]
pub struct EntryIterator<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> EntryIterator<'a> {
    pub fn new(buf: &'a [u8], offset: usize) -> EntryIterator<'a> {
        EntryIterator { buf, offset }
    }

    /// Byte offset of the current frame within the underlying buffer.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Raw type byte of the current frame.
    pub fn type_byte(&self) -> u8 {
        self.buf[self.offset]
    }

    /// Decoded event kind, None for a byte outside the tag set.
    pub fn event(&self) -> Option<Event> {
        Event::from_u8(self.type_byte())
    }

    /// Payload length of the current frame.
    pub fn length(&self) -> usize {
        self.buf[self.offset + 1] as usize
    }

    /// Payload bytes of the current frame.
    pub fn payload(&self) -> &'a [u8] {
        &self.buf[self.offset + 2..self.offset + 2 + self.length()]
    }

    /// The complete frame, overhead included, as it sits on the wire.
    pub fn frame_bytes(&self) -> &'a [u8] {
        &self.buf[self.offset..self.offset + self.length() + OVERHEAD]
    }

    /// Steps to the next frame.
    pub fn advance(&mut self) {
        self.offset += self.length() + OVERHEAD;
    }

    /// Steps to the previous frame via its trailing length byte.
    pub fn retreat(&mut self) {
        let prev_length = self.buf[(self.offset as isize + PREVIOUS_LENGTH_OFFSET) as usize];
        self.offset -= prev_length as usize + OVERHEAD;
    }

    /// Forked copy positioned at the next frame.
    pub fn next(mut self) -> EntryIterator<'a> {
        self.advance();
        self
    }

    /// The leading length byte must match the trailing copy; this is the
    /// primitive integrity check used during recovery.
    pub fn has_consistent_length(&self) -> bool {
        let length = self.length();
        match self.buf.get(self.offset + 2 + length) {
            Some(&trailing) => trailing as usize == length,
            None => false,
        }
    }
}

impl PartialEq for EntryIterator<'_> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.buf, other.buf) && self.offset == other.offset
    }
}

impl Eq for EntryIterator<'_> {}

/// View over a `StartFmt` frame and the block that follows it.
///
/// A format block is `START_FMT, TIMESTAMP, HASH, [AUTHOR], args..,
/// END_FMT`; the accessors walk that fixed prefix.
#[derive(Debug, Clone, Copy)]
pub struct FormatEntry<'a> {
    it: EntryIterator<'a>,
}

impl<'a> FormatEntry<'a> {
    pub fn new(it: EntryIterator<'a>) -> FormatEntry<'a> {
        FormatEntry { it }
    }

    /// The iterator positioned at the `START_FMT` frame itself.
    pub fn iterator(&self) -> EntryIterator<'a> {
        self.it
    }

    /// The format string payload, as raw bytes.
    pub fn format_bytes(&self) -> &'a [u8] {
        self.it.payload()
    }

    /// The block's timestamp, taken from the frame after `START_FMT`.
    pub fn timestamp(&self) -> Option<Timespec> {
        Timespec::from_bytes(self.it.next().payload())
    }

    /// The block's 64-bit call-site hash. Unaligned on the wire; decoded
    /// by byte copy.
    pub fn hash(&self) -> u64 {
        let payload = self.it.next().next().payload();
        let mut hash = [0u8; 8];
        hash[..payload.len().min(8)].copy_from_slice(&payload[..payload.len().min(8)]);
        u64::from_le_bytes(hash)
    }

    /// The author index injected by the merger, or -1 when absent.
    pub fn author(&self) -> i32 {
        let it = self.it.next().next().next();
        if it.event() == Some(Event::Author) && it.length() >= 4 {
            let mut a = [0u8; 4];
            a.copy_from_slice(&it.payload()[..4]);
            i32::from_le_bytes(a)
        } else {
            -1
        }
    }

    /// Iterator positioned at the first argument frame, past the optional
    /// author tag.
    pub fn args(&self) -> EntryIterator<'a> {
        let it = self.it.next().next().next();
        if it.event() == Some(Event::Author) {
            it.next()
        } else {
            it
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(event: Event, payload: &[u8]) -> Vec<u8> {
        let mut buf = vec![0u8; payload.len() + OVERHEAD];
        encode_frame(&mut buf, event, payload);
        buf
    }

    #[test]
    fn test_frame_symmetry() {
        let buf = frame(Event::String, b"hello");
        assert_eq!(buf[0], Event::String as u8);
        assert_eq!(buf[1], 5);
        assert_eq!(&buf[2..7], b"hello");
        assert_eq!(buf[7], 5, "trailing length must mirror the leading one");
    }

    #[test]
    fn test_forward_backward_duality() {
        let mut data = frame(Event::Integer, &7i32.to_le_bytes());
        data.extend(frame(Event::String, b"abc"));
        data.extend(frame(Event::EndFmt, &[]));

        let first = EntryIterator::new(&data, 0);
        let mut it = first;
        it.advance();
        it.advance();
        assert_eq!(it.event(), Some(Event::EndFmt));
        it.retreat();
        it.retreat();
        assert_eq!(it, first, "forward then backward must land on the start");
    }

    #[test]
    fn test_consistent_length_detects_corruption() {
        let mut data = frame(Event::String, b"abcd");
        assert!(EntryIterator::new(&data, 0).has_consistent_length());
        // Clobber the trailing copy.
        let last = data.len() - 1;
        data[last] = 9;
        assert!(!EntryIterator::new(&data, 0).has_consistent_length());
    }

    #[test]
    fn test_timespec_roundtrip() {
        let ts = Timespec { sec: 12, nsec: 345_678_901 };
        assert_eq!(Timespec::from_bytes(&ts.to_bytes()), Some(ts));
        assert_eq!(Timespec::from_bytes(&[0u8; 8]), None);
    }

    #[test]
    fn test_delta_ms() {
        let t1 = Timespec { sec: 1, nsec: 900_000_000 };
        let t2 = Timespec { sec: 2, nsec: 100_000_000 };
        assert_eq!(t1.delta_ms(t2), 200);
    }

    #[test]
    fn test_hist_ts_roundtrip_and_author_discrimination() {
        let hist = HistTs::new(0xABCD_EF01_2345_6789, Timespec { sec: 3, nsec: 4 });
        let bytes = hist.to_bytes();
        assert_eq!(bytes.len(), HIST_TS_SIZE);
        assert_eq!(HistTs::from_bytes(&bytes), Some(hist));

        let mut with_author = bytes.to_vec();
        with_author.extend_from_slice(&42i32.to_le_bytes());
        let decoded = HistTs::from_bytes(&with_author).unwrap();
        assert_eq!(decoded.author, Some(42));
    }

    #[test]
    fn test_format_entry_accessors() {
        let ts = Timespec { sec: 5, nsec: 6_000_000 };
        let hash = 0xDEAD_BEEF_1234_5678u64;
        let mut data = frame(Event::StartFmt, b"x=%d");
        data.extend(frame(Event::Timestamp, &ts.to_bytes()));
        data.extend(frame(Event::Hash, &hash.to_le_bytes()));
        data.extend(frame(Event::Integer, &3i32.to_le_bytes()));
        data.extend(frame(Event::EndFmt, &[]));

        let entry = FormatEntry::new(EntryIterator::new(&data, 0));
        assert_eq!(entry.format_bytes(), b"x=%d");
        assert_eq!(entry.timestamp(), Some(ts));
        assert_eq!(entry.hash(), hash);
        assert_eq!(entry.author(), -1);
        assert_eq!(entry.args().event(), Some(Event::Integer));
    }

    #[test]
    fn test_format_entry_author_tag() {
        let mut data = frame(Event::StartFmt, b"%d");
        data.extend(frame(Event::Timestamp, &Timespec::default().to_bytes()));
        data.extend(frame(Event::Hash, &1u64.to_le_bytes()));
        data.extend(frame(Event::Author, &2i32.to_le_bytes()));
        data.extend(frame(Event::Integer, &9i32.to_le_bytes()));
        data.extend(frame(Event::EndFmt, &[]));

        let entry = FormatEntry::new(EntryIterator::new(&data, 0));
        assert_eq!(entry.author(), 2);
        assert_eq!(entry.args().event(), Some(Event::Integer));
    }
}
