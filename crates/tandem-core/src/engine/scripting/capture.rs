//! Output capture for the scripting engine.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Buffer the interpreter's `print`/`debug` output is redirected into.
///
/// Writes are only recorded while the capture is armed, so nothing printed
/// outside a run can leak into the next run's output.
#[derive(Clone, Default)]
pub struct OutputCapture {
    buffer: Arc<Mutex<String>>,
    armed: Arc<AtomicBool>,
}

impl OutputCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear the buffer and start recording.
    pub fn arm(&self) {
        self.lock().clear();
        self.armed.store(true, Ordering::SeqCst);
    }

    /// Append one line of output, if armed.
    pub fn write_line(&self, text: &str) {
        if !self.armed.load(Ordering::SeqCst) {
            return;
        }
        let mut buffer = self.lock();
        buffer.push_str(text);
        buffer.push('\n');
    }

    /// Stop recording and return everything captured since [`arm`](Self::arm).
    pub fn take(&self) -> String {
        self.armed.store(false, Ordering::SeqCst);
        std::mem::take(&mut *self.lock())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, String> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writes_outside_a_run_are_dropped() {
        let capture = OutputCapture::new();
        capture.write_line("stray");

        capture.arm();
        capture.write_line("inside");
        assert_eq!(capture.take(), "inside\n");

        capture.write_line("after");
        capture.arm();
        assert_eq!(capture.take(), "");
    }

    #[test]
    fn test_clones_share_the_buffer() {
        let capture = OutputCapture::new();
        let writer = capture.clone();
        capture.arm();
        writer.write_line("a");
        writer.write_line("b");
        assert_eq!(capture.take(), "a\nb\n");
    }
}
