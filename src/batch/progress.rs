//! The two resources shared across batch workers: the completed-job counter
//! and the console lock.

use std::io::{self, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Monotonic count of finished jobs (saved or failed).
///
/// Workers increment it right after a job ends; the coordinator only reads.
#[derive(Debug, Default)]
pub struct ProgressCounter {
    completed: AtomicUsize,
}

impl ProgressCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one finished job and return the new total.
    pub fn increment(&self) -> usize {
        self.completed.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn get(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

type SharedWriter = Arc<Mutex<Box<dyn Write + Send>>>;

/// Serialised access to the human-readable output stream.
///
/// A multi-line block passed to [`emit`](Console::emit) is written under a
/// single lock acquisition, so blocks from different workers never
/// interleave. The guard is released on every exit path, and a lock
/// poisoned by a panicking writer is recovered rather than propagated.
#[derive(Clone)]
pub struct Console {
    out: SharedWriter,
}

impl Console {
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            out: Arc::new(Mutex::new(writer)),
        }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(io::stdout()))
    }

    /// Discards everything.
    pub fn sink() -> Self {
        Self::new(Box::new(io::sink()))
    }

    /// A console writing into memory, plus a handle to read it back.
    pub fn capture() -> (Self, CapturedOutput) {
        let buffer = CapturedOutput::default();
        (Self::new(Box::new(buffer.clone())), buffer)
    }

    /// Write `lines` as one uninterrupted block.
    pub fn emit<S: AsRef<str>>(&self, lines: &[S]) {
        let mut guard = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        for line in lines {
            // Console output is best effort; a closed stdout must not fail a job
            let _ = writeln!(guard, "{}", line.as_ref());
        }
        let _ = guard.flush();
    }
}

/// In-memory console target.
#[derive(Clone, Default)]
pub struct CapturedOutput {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl CapturedOutput {
    pub fn contents(&self) -> String {
        let buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

impl Write for CapturedOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
