//! Injectable diagnostic sink.
//!
//! The two structural-failure sites this crate reports to — a malformed
//! incoming message and a short kernel write — call through this sink so a
//! server layer can observe them without scraping logs. The default sink
//! still logs at the appropriate level; a caller replacing it is expected to
//! keep doing so if they want the same visibility.

use std::fmt;
use std::io;

/// One diagnostic event this crate can report.
#[derive(Debug)]
pub enum DebugEvent<'a> {
    /// A kernel message failed to decode.
    MalformedRequest {
        /// Opcode, if it was far enough along to be parsed.
        opcode: Option<u32>,
        /// What went wrong.
        error: &'a dyn fmt::Display,
    },
    /// A response write returned fewer bytes than the frame's length.
    ShortWrite {
        /// Bytes actually written.
        written: usize,
        /// Bytes the frame was supposed to contain.
        intended: usize,
        /// The underlying I/O error, if the write call returned one.
        error: Option<&'a io::Error>,
    },
}

/// A sink for [`DebugEvent`]s, installed on a [`crate::Connection`] at
/// construction time.
pub type DebugSink = Box<dyn Fn(DebugEvent<'_>) + Send + Sync>;

pub(crate) fn default_sink() -> DebugSink {
    Box::new(|event| match event {
        DebugEvent::MalformedRequest { opcode, error } => {
            log::debug!("malformed request (opcode={opcode:?}): {error}");
        }
        DebugEvent::ShortWrite {
            written,
            intended,
            error,
        } => {
            log::warn!(
                "short write to kernel device: wrote {written} of {intended} bytes ({error:?})"
            );
        }
    })
}
