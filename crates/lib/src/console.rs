//! The build console: the user-visible log of a scan step.
//!
//! Everything a pipeline user should see (status lines, the scan tool's own
//! output) goes through a [`Console`]. Diagnostics go to `tracing` instead.

use std::fmt;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard};

enum Sink {
  Stdout,
  Buffer(Vec<u8>),
  Writer(Box<dyn Write + Send>),
}

/// A cloneable handle to the build log.
#[derive(Clone)]
pub struct Console {
  sink: Arc<Mutex<Sink>>,
}

impl fmt::Debug for Console {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let kind = match &*self.lock() {
      Sink::Stdout => "stdout",
      Sink::Buffer(_) => "buffer",
      Sink::Writer(_) => "writer",
    };
    f.debug_struct("Console").field("sink", &kind).finish()
  }
}

impl Console {
  pub fn stdout() -> Self {
    Self::with_sink(Sink::Stdout)
  }

  /// A console that keeps everything in memory; read it with [`Console::contents`].
  pub fn capture() -> Self {
    Self::with_sink(Sink::Buffer(Vec::new()))
  }

  pub fn writer(writer: impl Write + Send + 'static) -> Self {
    Self::with_sink(Sink::Writer(Box::new(writer)))
  }

  fn with_sink(sink: Sink) -> Self {
    Self {
      sink: Arc::new(Mutex::new(sink)),
    }
  }

  fn lock(&self) -> MutexGuard<'_, Sink> {
    self.sink.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  /// Writes one line. Console write failures are dropped; the build log is
  /// best effort.
  pub fn line(&self, text: &str) {
    let _ = self.write_line(text);
  }

  /// Writes an empty line.
  pub fn blank(&self) {
    self.line("");
  }

  fn write_line(&self, text: &str) -> io::Result<()> {
    match &mut *self.lock() {
      Sink::Stdout => {
        let mut out = io::stdout().lock();
        writeln!(out, "{}", text)?;
        out.flush()
      }
      Sink::Buffer(buf) => writeln!(buf, "{}", text),
      Sink::Writer(writer) => {
        writeln!(writer, "{}", text)?;
        writer.flush()
      }
    }
  }

  /// Everything written to a capturing console; empty for other sinks.
  pub fn contents(&self) -> String {
    match &*self.lock() {
      Sink::Buffer(buf) => String::from_utf8_lossy(buf).into_owned(),
      _ => String::new(),
    }
  }
}
