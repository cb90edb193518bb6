//! The small errno catalog this implementation is willing to report to the kernel.
//!
//! Every response error field is a negative value from this set; `Errno::EIO`
//! is the fallback when an operation error carries no explicit errno. A
//! positive value must never reach the wire — OSXFUSE kernel-panics on it.

use num_enum::{IntoPrimitive, TryFromPrimitive};

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
pub enum Errno {
    /// Function not implemented.
    ENOSYS = libc::ENOSYS,
    /// Stale file handle.
    ESTALE = libc::ESTALE,
    /// No such file or directory.
    ENOENT = libc::ENOENT,
    /// I/O error.
    EIO = libc::EIO,
    /// Operation not permitted.
    EPERM = libc::EPERM,
    /// Interrupted system call.
    EINTR = libc::EINTR,
    /// Result too large / range error.
    ERANGE = libc::ERANGE,
    /// Operation not supported.
    ENOTSUP = libc::ENOTSUP,
    /// File exists.
    EEXIST = libc::EEXIST,
}

impl Errno {
    /// The value written to the wire: always `<= 0`.
    pub(crate) fn to_wire(self) -> i32 {
        -i32::from(self)
    }
}

impl Default for Errno {
    fn default() -> Self {
        Errno::EIO
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_values_are_never_positive() {
        for e in [
            Errno::ENOSYS,
            Errno::ESTALE,
            Errno::ENOENT,
            Errno::EIO,
            Errno::EPERM,
            Errno::EINTR,
            Errno::ERANGE,
            Errno::ENOTSUP,
            Errno::EEXIST,
        ] {
            assert!(e.to_wire() <= 0);
        }
    }

    #[test]
    fn default_is_eio() {
        assert_eq!(Errno::default(), Errno::EIO);
    }
}
