//! The input/output queue protocol, worker submission, and the codec
//! registry (`spec.md` §4.10, §5, §6).
//!
//! This module intentionally knows nothing about PBF or OPL specifics: it
//! is the thin plumbing [`crate::pbf`] and [`crate::opl`] both sit on top
//! of, mirroring the teacher's own separation between `BlobReader` (framing)
//! and `ElementReader` (the higher-level, format-aware consumer).

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::OnceLock;

use crate::error::{new_error, ErrorKind, Result};
use crate::model::Buffer;

/// The input side of the "Parser/encoder I/O contract" (`spec.md` §6):
/// `get_chunk() -> bytes` (empty = EOF) plus `input_done() -> bool`.
pub trait ByteSource: Send {
    fn get_chunk(&mut self) -> io::Result<Vec<u8>>;
    fn input_done(&self) -> bool;
}

/// A [`ByteSource`] backed by any `std::io::Read`, chunked at a fixed size.
pub struct ReadSource<R: Read + Send> {
    reader: R,
    chunk_size: usize,
    done: bool,
}

impl<R: Read + Send> ReadSource<R> {
    pub fn new(reader: R, chunk_size: usize) -> Self {
        ReadSource {
            reader,
            chunk_size: chunk_size.max(1),
            done: false,
        }
    }
}

impl<R: Read + Send> ByteSource for ReadSource<R> {
    fn get_chunk(&mut self) -> io::Result<Vec<u8>> {
        if self.done {
            return Ok(Vec::new());
        }
        let mut buf = vec![0u8; self.chunk_size];
        let mut filled = 0;
        while filled < buf.len() {
            match self.reader.read(&mut buf[filled..])? {
                0 => break,
                n => filled += n,
            }
        }
        buf.truncate(filled);
        if filled == 0 {
            self.done = true;
        }
        Ok(buf)
    }

    fn input_done(&self) -> bool {
        self.done
    }
}

/// The output side: a sink for raw encoded bytes (`ByteSink`), distinct
/// from the ordered queue of futures described below.
pub trait ByteSink: Send {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()>;
}

impl<W: Write + Send> ByteSink for W {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        Write::write_all(self, bytes)
    }
}

/// A handle to a value a pool worker is computing, the "future" described in
/// `spec.md` §4.4/§5. `wait` is the only suspension point; it blocks until
/// the worker sends its result.
pub struct Task<T> {
    rx: Receiver<T>,
}

impl<T> Task<T> {
    /// Blocks until the worker's result is available.
    pub fn wait(self) -> T {
        self.rx.recv().expect("worker thread dropped its sender without sending a result")
    }

    /// A task that is already resolved, for call sites that need to submit
    /// work conditionally without a pool (e.g. a forced single-threaded
    /// fallback path).
    pub fn ready(value: T) -> Task<T>
    where
        T: Send + 'static,
    {
        let (tx, rx) = sync_channel(1);
        let _ = tx.send(value);
        Task { rx }
    }
}

/// `submit(task) -> future<bytes>` (`spec.md` §2, §5): the only interface
/// the core needs from a thread pool. Implemented for `rayon`'s global
/// pool, the teacher's own concurrency dependency.
pub trait Submit {
    fn submit<T, F>(&self, f: F) -> Task<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static;
}

/// Submits work to `rayon`'s global thread pool.
#[derive(Clone, Copy, Debug, Default)]
pub struct RayonPool;

impl Submit for RayonPool {
    fn submit<T, F>(&self, f: F) -> Task<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (tx, rx) = sync_channel(1);
        rayon::spawn(move || {
            let _ = tx.send(f());
        });
        Task { rx }
    }
}

/// Producer half of the bounded, ordered output queue (`spec.md` §5): a
/// FIFO of [`Task`]s. Pushing blocks once `capacity` tasks are outstanding,
/// which is how the design bounds end-to-end memory.
pub struct QueueProducer<T> {
    tx: SyncSender<Task<T>>,
}

/// Consumer half: pops tasks in submission order and awaits each one,
/// so the output byte stream / decoded buffer sequence matches submission
/// order even though the tasks themselves ran in parallel.
pub struct QueueConsumer<T> {
    rx: Receiver<Task<T>>,
}

/// Creates a bounded ordered queue of futures with the given capacity
/// (`spec.md` §5 "Backpressure"). A `capacity` of zero is treated as one,
/// so a producer can always have at least one in-flight task.
pub fn ordered_queue<T>(capacity: usize) -> (QueueProducer<T>, QueueConsumer<T>) {
    let (tx, rx) = sync_channel(capacity.max(1));
    (QueueProducer { tx }, QueueConsumer { rx })
}

impl<T> QueueProducer<T> {
    /// Pushes a task, blocking if the queue is full. Returns
    /// `ErrorKind::Cancelled` if the consumer has been dropped (the queue
    /// was closed), per `spec.md` §5 "Cancellation & timeout".
    pub fn push(&self, task: Task<T>) -> Result<()> {
        self.tx.send(task).map_err(|_| new_error(ErrorKind::Cancelled))
    }
}

impl<T> QueueConsumer<T> {
    /// Pops and awaits the next task in FIFO order, or `None` once the
    /// producer side has been dropped and no tasks remain.
    pub fn pop(&self) -> Option<T> {
        self.rx.recv().ok().map(Task::wait)
    }
}

impl<T> Iterator for QueueConsumer<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.pop()
    }
}

/// A decoder registered under a format tag: reads an entire stream from a
/// chunked [`ByteSource`] and returns the decoded objects.
///
/// Mirrors `spec.md` §4.9/§4.7's "parser task" role, generalized across
/// formats. The PBF implementation still exposes its own lower-level,
/// zero-copy `ElementReader` for callers who don't need the format-agnostic
/// registry indirection (see `spec.md` §9's note that higher-level
/// iteration APIs are a layer above the core, not a replacement for it).
pub trait FormatDecoder: Send {
    fn decode_all(&self, source: &mut dyn ByteSource) -> Result<Buffer>;
}

/// An encoder registered under a format tag: serializes a [`Buffer`] to a
/// sink.
pub trait FormatEncoder: Send {
    fn encode_all(&self, buffer: &Buffer, sink: &mut dyn ByteSink) -> Result<()>;
}

type DecoderFactory = fn() -> Box<dyn FormatDecoder>;
type EncoderFactory = fn() -> Box<dyn FormatEncoder>;

/// A process-wide map from format tag to codec factory (`spec.md` §4.10).
/// Registration happens once; duplicate registration of the same tag under
/// the same direction is a programming error and panics, matching the
/// spec's "duplicate registration... is a programming error".
pub struct Registry {
    decoders: HashMap<&'static str, DecoderFactory>,
    encoders: HashMap<&'static str, EncoderFactory>,
}

impl Registry {
    /// An empty registry, for tests that want explicit control over what is
    /// registered rather than relying on the process-wide default.
    pub fn empty() -> Self {
        Registry {
            decoders: HashMap::new(),
            encoders: HashMap::new(),
        }
    }

    /// The registry with `pbf` and `opl` registered, matching what
    /// [`default_registry`] lazily builds.
    pub fn with_defaults() -> Self {
        let mut registry = Registry::empty();
        registry.register_decoder("opl", || Box::new(crate::opl::OplCodec));
        registry.register_decoder("pbf", || Box::new(crate::pbf::reader::PbfCodec::default()));
        registry.register_encoder("opl", || Box::new(crate::opl::OplCodec));
        registry.register_encoder("pbf", || Box::new(crate::pbf::writer::PbfCodec::default()));
        registry
    }

    pub fn register_decoder(&mut self, tag: &'static str, factory: DecoderFactory) {
        if self.decoders.insert(tag, factory).is_some() {
            panic!("duplicate decoder registration for tag '{tag}'");
        }
    }

    pub fn register_encoder(&mut self, tag: &'static str, factory: EncoderFactory) {
        if self.encoders.insert(tag, factory).is_some() {
            panic!("duplicate encoder registration for tag '{tag}'");
        }
    }

    pub fn decoder(&self, tag: &str) -> Option<Box<dyn FormatDecoder>> {
        self.decoders.get(tag).map(|factory| factory())
    }

    pub fn encoder(&self, tag: &str) -> Option<Box<dyn FormatEncoder>> {
        self.encoders.get(tag).map(|factory| factory())
    }
}

/// The process-wide default registry, initialized on first use and never
/// torn down (`spec.md` §9).
pub fn default_registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(Registry::with_defaults)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordered_queue_preserves_fifo_order_under_reordered_completion() {
        let (producer, consumer) = ordered_queue::<u32>(8);
        let pool = RayonPool;

        for i in 0..5u32 {
            // Later tasks sleep less, so they'd finish first if order
            // depended on completion time rather than submission order.
            let delay = 5 - i;
            let task = pool.submit(move || {
                std::thread::sleep(std::time::Duration::from_millis(u64::from(delay)));
                i
            });
            producer.push(task).unwrap();
        }
        drop(producer);

        let results: Vec<u32> = consumer.collect();
        assert_eq!(results, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn pop_returns_none_once_producer_is_dropped_and_drained() {
        let (producer, consumer) = ordered_queue::<u32>(4);
        producer.push(Task::ready(1)).unwrap();
        drop(producer);
        assert_eq!(consumer.pop(), Some(1));
        assert_eq!(consumer.pop(), None);
    }

    #[test]
    fn default_registry_has_pbf_and_opl() {
        let registry = default_registry();
        assert!(registry.decoder("pbf").is_some());
        assert!(registry.decoder("opl").is_some());
        assert!(registry.encoder("pbf").is_some());
        assert!(registry.encoder("opl").is_some());
        assert!(registry.decoder("nonexistent").is_none());
    }
}
