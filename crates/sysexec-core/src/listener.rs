use std::fmt;
use std::sync::{Arc, Mutex, RwLock};
use tracing::debug;

/// Which child stream a line was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Output,
    Error,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Output => write!(f, "STDOUT"),
            StreamKind::Error => write!(f, "STDERR"),
        }
    }
}

/// Observer notified once per line produced by a child process.
///
/// Callbacks run on the pump task of the stream, so they should return
/// quickly: a slow listener delays every other listener of that stream.
pub trait StreamListener: Send + Sync {
    fn line_streamed(&self, stream: StreamKind, line: &str);
}

impl<F> StreamListener for F
where
    F: Fn(StreamKind, &str) + Send + Sync,
{
    fn line_streamed(&self, stream: StreamKind, line: &str) {
        self(stream, line)
    }
}

pub type SharedListener = Arc<dyn StreamListener>;

/// Output and error observers of a command.
///
/// Cloning shares the underlying lists. The most recently added listener is
/// notified first.
#[derive(Clone, Default)]
pub struct ListenerRegistry {
    output: Arc<RwLock<Vec<SharedListener>>>,
    error: Arc<RwLock<Vec<SharedListener>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn list(&self, stream: StreamKind) -> &RwLock<Vec<SharedListener>> {
        match stream {
            StreamKind::Output => &self.output,
            StreamKind::Error => &self.error,
        }
    }

    pub fn add(&self, stream: StreamKind, listener: SharedListener) {
        let mut list = self.list(stream).write().unwrap_or_else(|e| e.into_inner());
        list.insert(0, listener);
    }

    /// Remove `listener` by identity; returns whether it was registered
    pub fn remove(&self, stream: StreamKind, listener: &SharedListener) -> bool {
        let mut list = self.list(stream).write().unwrap_or_else(|e| e.into_inner());
        match list.iter().position(|l| Arc::ptr_eq(l, listener)) {
            Some(index) => {
                list.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn add_output_listener(&self, listener: SharedListener) {
        self.add(StreamKind::Output, listener);
    }

    pub fn remove_output_listener(&self, listener: &SharedListener) -> bool {
        self.remove(StreamKind::Output, listener)
    }

    pub fn add_error_listener(&self, listener: SharedListener) {
        self.add(StreamKind::Error, listener);
    }

    pub fn remove_error_listener(&self, listener: &SharedListener) -> bool {
        self.remove(StreamKind::Error, listener)
    }

    /// Current listeners of `stream`, in notification order
    pub fn snapshot(&self, stream: StreamKind) -> Vec<SharedListener> {
        self.list(stream)
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn len(&self, stream: StreamKind) -> usize {
        self.list(stream)
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len(StreamKind::Output) == 0 && self.len(StreamKind::Error) == 0
    }

    /// Hand `line` to every listener of `stream`.
    ///
    /// Iterates over a copy so listeners may (un)register others while
    /// being notified.
    pub fn dispatch(&self, stream: StreamKind, line: &str) {
        for listener in self.snapshot(stream) {
            listener.line_streamed(stream, line);
        }
    }
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("output", &self.len(StreamKind::Output))
            .field("error", &self.len(StreamKind::Error))
            .finish()
    }
}

/// Keeps every line it is given, for later inspection
#[derive(Debug, Default)]
pub struct LineCollector {
    lines: Mutex<Vec<String>>,
}

impl LineCollector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn clear(&self) {
        self.lines.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

impl StreamListener for LineCollector {
    fn line_streamed(&self, _stream: StreamKind, line: &str) {
        self.lines
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(line.to_string());
    }
}

/// Forwards lines to `tracing` at debug level, tagged with a name
#[derive(Debug, Clone)]
pub struct TracingListener {
    name: String,
}

impl TracingListener {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl StreamListener for TracingListener {
    fn line_streamed(&self, stream: StreamKind, line: &str) {
        debug!(command = %self.name, stream = %stream, "{line}");
    }
}
