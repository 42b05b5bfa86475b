use crate::clock;
use crate::entry::{encode_frame, Event, Timespec, MAX_LENGTH, OVERHEAD};
use crate::ring_buffer::{RingBuffer, RingWriter};
use std::sync::Mutex;

/// A typed argument to `log_format`. `%p` takes no argument; the pid tag
/// is cached in the writer.
#[derive(Debug, Clone, Copy)]
pub enum Arg<'a> {
    Str(&'a str),
    Int(i32),
    Float(f32),
    Timestamp(Timespec),
}

/// The producer side of one event log.
///
/// Every operation is wait-free: a frame is staged in a stack scratch
/// buffer and published to the ring with a single write, so the consumer
/// never observes a partial frame behind the cursor. Nothing here
/// allocates after construction.
///
/// All operations are silent no-ops while the writer is disabled or
/// detached from a ring.
pub struct Writer {
    fifo: Option<RingWriter>,
    enabled: bool,
    // (pid, process name), captured once so log_pid never syscalls.
    pid_tag: Vec<u8>,
}

fn capture_pid_tag() -> Vec<u8> {
    let pid = std::process::id() as i32;
    let name = std::env::current_exe()
        .ok()
        .and_then(|path| {
            path.file_name()
                .map(|name| name.to_string_lossy().into_owned())
        })
        .unwrap_or_default();
    let mut tag = Vec::with_capacity(4 + name.len());
    tag.extend_from_slice(&pid.to_le_bytes());
    tag.extend_from_slice(name.as_bytes());
    tag.truncate(MAX_LENGTH);
    tag
}

impl Writer {
    /// A detached writer; stays disabled until attached to a ring.
    pub fn new() -> Writer {
        Writer {
            fifo: None,
            enabled: false,
            pid_tag: capture_pid_tag(),
        }
    }

    pub fn with_ring(ring: &RingBuffer) -> Writer {
        Writer {
            fifo: Some(ring.writer()),
            enabled: true,
            pid_tag: capture_pid_tag(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Enables or disables logging; returns the previous state. A writer
    /// without a ring cannot be enabled.
    pub fn set_enabled(&mut self, enabled: bool) -> bool {
        let old = self.enabled;
        self.enabled = enabled && self.fifo.is_some();
        old
    }

    /// Logs a string, truncated to `MAX_LENGTH` bytes.
    pub fn log_string(&mut self, s: &str) {
        if !self.enabled {
            return;
        }
        let bytes = s.as_bytes();
        let length = bytes.len().min(MAX_LENGTH);
        self.log(Event::String, &bytes[..length]);
    }

    /// Logs the current monotonic time.
    pub fn log_timestamp(&mut self) {
        if !self.enabled {
            return;
        }
        self.log_timestamp_at(clock::now());
    }

    /// Logs an explicit timestamp.
    pub fn log_timestamp_at(&mut self, ts: Timespec) {
        if !self.enabled {
            return;
        }
        self.log(Event::Timestamp, &ts.to_bytes());
    }

    pub fn log_integer(&mut self, x: i32) {
        if !self.enabled {
            return;
        }
        self.log(Event::Integer, &x.to_le_bytes());
    }

    pub fn log_float(&mut self, x: f32) {
        if !self.enabled {
            return;
        }
        self.log(Event::Float, &x.to_le_bytes());
    }

    /// Logs the cached `(pid, process name)` tag.
    pub fn log_pid(&mut self) {
        if !self.enabled {
            return;
        }
        let mut tag = [0u8; MAX_LENGTH];
        let length = self.pid_tag.len();
        tag[..length].copy_from_slice(&self.pid_tag);
        self.log(Event::Pid, &tag[..length]);
    }

    pub fn log_hash(&mut self, hash: u64) {
        if !self.enabled {
            return;
        }
        self.log(Event::Hash, &hash.to_le_bytes());
    }

    /// Opens a format block; the format string is truncated to
    /// `MAX_LENGTH` bytes.
    pub fn log_start(&mut self, fmt: &str) {
        if !self.enabled {
            return;
        }
        let bytes = fmt.as_bytes();
        let length = bytes.len().min(MAX_LENGTH);
        self.log(Event::StartFmt, &bytes[..length]);
    }

    /// Closes a format block.
    pub fn log_end(&mut self) {
        if !self.enabled {
            return;
        }
        self.log(Event::EndFmt, &[]);
    }

    /// Records a latency-histogram tick for `hash`.
    pub fn log_hist_ts(&mut self, hash: u64) {
        if !self.enabled {
            return;
        }
        let data = crate::entry::HistTs::new(hash, clock::now());
        self.log(Event::HistogramTs, &data.to_bytes());
    }

    /// Requests rendering and reset of the histograms for `hash`'s log.
    pub fn log_hist_flush(&mut self, hash: u64) {
        if !self.enabled {
            return;
        }
        let data = crate::entry::HistTs::new(hash, clock::now());
        self.log(Event::HistogramFlush, &data.to_bytes());
    }

    /// Logs a whole format block: `START_FMT`, timestamp, hash, one frame
    /// per `%` specifier, `END_FMT`.
    ///
    /// Supported specifiers are `%s %d %f %t %p` and the literal `%%`.
    /// A known specifier consumes the next argument and emits the frame
    /// for that argument's own type; the reader warns if they disagree.
    /// `%p` consumes no argument. Unknown specifiers warn and consume
    /// nothing; a lone trailing `%` ends the scan.
    pub fn log_format(&mut self, fmt: &str, hash: u64, args: &[Arg<'_>]) {
        if !self.enabled {
            return;
        }
        self.log_start(fmt);
        self.log_timestamp();
        self.log_hash(hash);

        let bytes = fmt.as_bytes();
        let mut args = args.iter();
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] != b'%' {
                i += 1;
                continue;
            }
            i += 1;
            let Some(&spec) = bytes.get(i) else {
                break;
            };
            match spec {
                b'%' => {}
                b's' | b'd' | b'f' | b't' => {
                    if let Some(arg) = args.next() {
                        match *arg {
                            Arg::Str(s) => self.log_string(s),
                            Arg::Int(x) => self.log_integer(x),
                            Arg::Float(x) => self.log_float(x),
                            Arg::Timestamp(ts) => self.log_timestamp_at(ts),
                        }
                    }
                }
                b'p' => self.log_pid(),
                other => {
                    log::warn!("invalid format specifier: %{}", other as char);
                }
            }
            i += 1;
        }
        self.log_end();
    }

    /// Stages and publishes one frame. Oversized payloads and invalid
    /// event kinds are dropped silently; the log is best-effort by
    /// contract.
    fn log(&mut self, event: Event, data: &[u8]) {
        if !self.enabled {
            return;
        }
        if data.len() > MAX_LENGTH {
            return;
        }
        if event == Event::Reserved {
            return;
        }
        let Some(fifo) = self.fifo.as_mut() else {
            return;
        };
        let mut scratch = [0u8; MAX_LENGTH + OVERHEAD];
        let total = encode_frame(&mut scratch, event, data);
        fifo.write(&scratch[..total]);
    }
}

impl Default for Writer {
    fn default() -> Writer {
        Writer::new()
    }
}

/// A writer that serializes every operation on a mutex so multiple threads
/// can share one producer. The lock is held across the full call, so the
/// wait-free guarantee of `Writer` does not apply; use one `Writer` per
/// thread when latency matters.
pub struct LockedWriter {
    inner: Mutex<Writer>,
}

impl LockedWriter {
    pub fn new(ring: &RingBuffer) -> LockedWriter {
        LockedWriter {
            inner: Mutex::new(Writer::with_ring(ring)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.lock().unwrap().is_enabled()
    }

    pub fn set_enabled(&self, enabled: bool) -> bool {
        self.inner.lock().unwrap().set_enabled(enabled)
    }

    pub fn log_string(&self, s: &str) {
        self.inner.lock().unwrap().log_string(s);
    }

    pub fn log_timestamp(&self) {
        self.inner.lock().unwrap().log_timestamp();
    }

    pub fn log_timestamp_at(&self, ts: Timespec) {
        self.inner.lock().unwrap().log_timestamp_at(ts);
    }

    pub fn log_integer(&self, x: i32) {
        self.inner.lock().unwrap().log_integer(x);
    }

    pub fn log_float(&self, x: f32) {
        self.inner.lock().unwrap().log_float(x);
    }

    pub fn log_pid(&self) {
        self.inner.lock().unwrap().log_pid();
    }

    pub fn log_hash(&self, hash: u64) {
        self.inner.lock().unwrap().log_hash(hash);
    }

    pub fn log_start(&self, fmt: &str) {
        self.inner.lock().unwrap().log_start(fmt);
    }

    pub fn log_end(&self) {
        self.inner.lock().unwrap().log_end();
    }

    pub fn log_hist_ts(&self, hash: u64) {
        self.inner.lock().unwrap().log_hist_ts(hash);
    }

    pub fn log_hist_flush(&self, hash: u64) {
        self.inner.lock().unwrap().log_hist_flush(hash);
    }

    pub fn log_format(&self, fmt: &str, hash: u64, args: &[Arg<'_>]) {
        self.inner.lock().unwrap().log_format(fmt, hash, args);
    }
}
