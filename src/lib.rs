pub mod clock;
pub mod entry;
pub mod histogram;
pub mod merger;
pub mod reader;
pub mod ring_buffer;
pub mod writer;

pub use entry::{EntryIterator, Event, FormatEntry, HistTs, Timespec, MAX_LENGTH, OVERHEAD};
pub use merger::{MergeReader, MergeThread, Merger, NamedReader};
pub use reader::{Reader, Snapshot};
pub use ring_buffer::{RingBuffer, RingReader, RingWriter};
pub use writer::{Arg, LockedWriter, Writer};
