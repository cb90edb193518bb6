//! The kernel connection: owns `/dev/fuse`, decodes incoming requests, and
//! encodes replies back onto the wire.

use std::fs::File;
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use crate::abi::FopenFlags;
use crate::debug::{self, DebugEvent, DebugSink};
use crate::mount;
use crate::mount_options::{self, MountOption};
use crate::reply::{AppendDirent, Response};
use crate::request::{Request, RequestError};
use crate::FileAttr;

/// Failure establishing a connection: either the requested options conflict
/// with each other, or the underlying `mount(2)` call failed.
#[derive(Debug)]
pub enum MountError {
    /// Two or more supplied options cannot be combined.
    ConflictingOptions(io::Error),
    /// The `mount(2)`/device-open syscalls failed.
    Io(io::Error),
}

impl std::fmt::Display for MountError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MountError::ConflictingOptions(e) => write!(f, "conflicting mount options: {e}"),
            MountError::Io(e) => write!(f, "failed to mount: {e}"),
        }
    }
}

impl std::error::Error for MountError {}

/// A connection to the kernel's FUSE character device. Decodes requests read
/// from it and encodes replies written back.
pub struct Connection {
    device: File,
    mountpoint: PathBuf,
    read_lock: RwLock<()>,
    write_lock: Mutex<()>,
    closed: AtomicBool,
    debug_sink: DebugSink,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("mountpoint", &self.mountpoint)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Recommended size for the buffer passed to [`Connection::read_request`]:
/// large enough to hold any single message this implementation will ever
/// receive, including the largest WRITE payload it advertises.
pub fn recommended_buffer_size() -> usize {
    page_size::get() + crate::abi::MAX_WRITE_SIZE as usize
}

impl Connection {
    /// Mounts `mountpoint` with the given options and opens the kernel
    /// connection, using the default logging debug sink.
    pub fn mount(mountpoint: &Path, options: &[MountOption]) -> Result<Self, MountError> {
        Self::mount_with_debug_sink(mountpoint, options, debug::default_sink())
    }

    /// Like [`Connection::mount`], but with a caller-supplied diagnostic sink
    /// in place of the default logging one.
    pub fn mount_with_debug_sink(
        mountpoint: &Path,
        options: &[MountOption],
        debug_sink: DebugSink,
    ) -> Result<Self, MountError> {
        mount_options::check_option_conflicts(options).map_err(MountError::ConflictingOptions)?;
        let device = mount::mount(mountpoint, options).map_err(MountError::Io)?;
        Ok(Connection {
            device,
            mountpoint: mountpoint.to_owned(),
            read_lock: RwLock::new(()),
            write_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
            debug_sink,
        })
    }

    /// Reads and decodes one kernel message into `buf`.
    ///
    /// Returns `Ok(None)` once the kernel has torn down the connection
    /// (end-of-stream). A malformed message is reported to the debug sink and
    /// surfaced as `Err`; the connection remains usable and this may be
    /// called again.
    pub fn read_request<'a>(
        &self,
        buf: &'a mut [u8],
    ) -> io::Result<Result<Option<Request<'a>>, RequestError>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(io::Error::from(io::ErrorKind::NotConnected));
        }
        let _guard = self.read_lock.read();
        let n = loop {
            let rc = unsafe {
                libc::read(
                    self.device.as_raw_fd(),
                    buf.as_mut_ptr() as *mut libc::c_void,
                    buf.len(),
                )
            };
            if rc >= 0 {
                break rc as usize;
            }
            let err = io::Error::last_os_error();
            match err.kind() {
                io::ErrorKind::Interrupted => continue,
                _ if err.raw_os_error() == Some(libc::ENODEV) => return Ok(Ok(None)),
                _ => return Err(err),
            }
        };
        if n == 0 {
            return Ok(Ok(None));
        }
        match Request::parse(&buf[..n]) {
            Ok(req) => Ok(Ok(Some(req))),
            Err(e) => {
                (self.debug_sink)(DebugEvent::MalformedRequest {
                    opcode: None,
                    error: &e,
                });
                Ok(Err(e))
            }
        }
    }

    /// Short, fixed-size reply: a single non-vectored write of the whole
    /// response (header plus any small fixed-size body already built into
    /// it).
    pub(crate) fn respond(&self, unique: u64, response: &Response<'_>) -> io::Result<()> {
        self.write_guarded(unique, response, Self::write_concatenated)
    }

    /// Reply whose payload is assembled at call time from pieces the caller
    /// does not retain ownership of past this call; concatenated into one
    /// buffer and written in a single non-vectored write.
    pub(crate) fn respond_data(&self, unique: u64, response: &Response<'_>) -> io::Result<()> {
        self.write_guarded(unique, response, Self::write_concatenated)
    }

    /// Vectored reply: writes the header and a caller-owned payload slice
    /// without copying them into one buffer first. Used for replies whose
    /// payload may be large (READ, READLINK).
    pub(crate) fn respond_safe(&self, unique: u64, response: &Response<'_>) -> io::Result<()> {
        self.write_guarded(unique, response, Self::write_vectored)
    }

    fn write_guarded<F>(&self, unique: u64, response: &Response<'_>, write: F) -> io::Result<()>
    where
        F: FnOnce(&Self, &[io::IoSlice<'_>]) -> io::Result<()>,
    {
        if self.closed.load(Ordering::Acquire) {
            return Err(io::Error::from(io::ErrorKind::NotConnected));
        }
        let _guard = self.write_lock.lock();
        response.with_iovec(unique, |iov| write(self, iov))
    }

    fn write_concatenated(&self, iov: &[io::IoSlice<'_>]) -> io::Result<()> {
        let total: usize = iov.iter().map(|s| s.len()).sum();
        let mut buf = Vec::with_capacity(total);
        for s in iov {
            buf.extend_from_slice(s);
        }
        self.write_all_reporting(&buf)
    }

    fn write_vectored(&self, iov: &[io::IoSlice<'_>]) -> io::Result<()> {
        let total: usize = iov.iter().map(|s| s.len()).sum();
        let rc = unsafe {
            libc::writev(
                self.device.as_raw_fd(),
                iov.as_ptr() as *const libc::iovec,
                iov.len() as libc::c_int,
            )
        };
        if rc < 0 {
            let err = io::Error::last_os_error();
            (self.debug_sink)(DebugEvent::ShortWrite {
                written: 0,
                intended: total,
                error: Some(&err),
            });
            return Err(err);
        }
        let written = rc as usize;
        if written != total {
            (self.debug_sink)(DebugEvent::ShortWrite {
                written,
                intended: total,
                error: None,
            });
        }
        Ok(())
    }

    fn write_all_reporting(&self, buf: &[u8]) -> io::Result<()> {
        let rc = unsafe {
            libc::write(
                self.device.as_raw_fd(),
                buf.as_ptr() as *const libc::c_void,
                buf.len(),
            )
        };
        if rc < 0 {
            let err = io::Error::last_os_error();
            (self.debug_sink)(DebugEvent::ShortWrite {
                written: 0,
                intended: buf.len(),
                error: Some(&err),
            });
            return Err(err);
        }
        let written = rc as usize;
        if written != buf.len() {
            (self.debug_sink)(DebugEvent::ShortWrite {
                written,
                intended: buf.len(),
                error: None,
            });
        }
        Ok(())
    }

    /// Replies with an error. `errno` is negated on the wire, as the kernel
    /// requires.
    pub fn reply_error(&self, unique: u64, errno: crate::Errno) -> io::Result<()> {
        self.respond(unique, &Response::new_error(errno))
    }

    /// Replies with success and no body (FLUSH, RELEASE, FSYNC, SETXATTR,
    /// REMOVEXATTR, and similar acknowledgement-only operations).
    pub fn reply_ok(&self, unique: u64) -> io::Result<()> {
        self.respond(unique, &Response::new_empty())
    }

    /// Replies to LOOKUP, MKNOD, MKDIR, SYMLINK, or LINK with the resulting
    /// entry.
    pub fn reply_entry(
        &self,
        unique: u64,
        nodeid: u64,
        generation: u64,
        attr: &FileAttr,
        attr_ttl: Duration,
        entry_ttl: Duration,
    ) -> io::Result<()> {
        self.respond(
            unique,
            &Response::new_entry(nodeid, generation, attr, attr_ttl, entry_ttl),
        )
    }

    /// Replies to GETATTR or SETATTR with the current attributes.
    pub fn reply_attr(&self, unique: u64, ttl: Duration, attr: &FileAttr) -> io::Result<()> {
        self.respond(unique, &Response::new_attr(ttl, attr))
    }

    /// Replies to OPEN or OPENDIR with a file handle.
    pub fn reply_open(&self, unique: u64, fh: u64, flags: FopenFlags) -> io::Result<()> {
        self.respond(unique, &Response::new_open(fh, flags))
    }

    /// Replies to CREATE with the new entry and an open file handle.
    #[allow(clippy::too_many_arguments)]
    pub fn reply_create(
        &self,
        unique: u64,
        nodeid: u64,
        generation: u64,
        attr: &FileAttr,
        attr_ttl: Duration,
        entry_ttl: Duration,
        fh: u64,
        flags: FopenFlags,
    ) -> io::Result<()> {
        self.respond(
            unique,
            &Response::new_create(nodeid, generation, attr, attr_ttl, entry_ttl, fh, flags),
        )
    }

    /// Replies to WRITE with the number of bytes written.
    pub fn reply_write(&self, unique: u64, written: u32) -> io::Result<()> {
        self.respond(unique, &Response::new_write(written))
    }

    /// Replies to STATFS with filesystem-wide statistics.
    #[allow(clippy::too_many_arguments)]
    pub fn reply_statfs(
        &self,
        unique: u64,
        blocks: u64,
        bfree: u64,
        bavail: u64,
        files: u64,
        ffree: u64,
        bsize: u32,
        namelen: u32,
        frsize: u32,
    ) -> io::Result<()> {
        self.respond(
            unique,
            &Response::new_statfs(blocks, bfree, bavail, files, ffree, bsize, namelen, frsize),
        )
    }

    /// Replies to a size-only GETXATTR/LISTXATTR (the request's buffer size
    /// was `0`) with the size the caller would need.
    pub fn reply_xattr_size(&self, unique: u64, size: u32) -> io::Result<()> {
        self.respond(unique, &Response::new_xattr_size(size))
    }

    /// Completes the INIT handshake.
    #[allow(clippy::too_many_arguments)]
    pub fn reply_init(
        &self,
        unique: u64,
        major: u32,
        minor: u32,
        max_readahead: u32,
        flags: u32,
        max_background: u16,
        congestion_threshold: u16,
        max_write: u32,
        time_gran: u32,
    ) -> io::Result<()> {
        self.respond(
            unique,
            &Response::new_init(
                major,
                minor,
                max_readahead,
                flags,
                max_background,
                congestion_threshold,
                max_write,
                time_gran,
            ),
        )
    }

    /// Replies to READLINK, or to READ/GETXATTR/LISTXATTR with a
    /// caller-owned buffer it need not copy before this call returns.
    pub fn reply_slice(&self, unique: u64, data: &[u8]) -> io::Result<()> {
        self.respond_safe(unique, &Response::new_slice(data))
    }

    /// Replies to READDIR with an accumulated listing.
    pub fn reply_directory(&self, unique: u64, entries: AppendDirent) -> io::Result<()> {
        self.respond_data(unique, &entries.into_response())
    }

    /// Tears down the connection: blocks until any in-flight read finishes,
    /// then unmounts. Safe to call more than once; later calls are no-ops.
    pub fn close(&self) -> io::Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let _read_guard = self.read_lock.write();
        let _write_guard = self.write_lock.lock();
        mount::unmount(&self.mountpoint)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recommended_buffer_covers_max_write() {
        assert!(recommended_buffer_size() > crate::abi::MAX_WRITE_SIZE as usize);
    }
}
