//! Response encoding: turns typed reply data into the byte layout the kernel
//! expects on the other end of a [`crate::Connection`].

use std::convert::TryInto;
use std::ffi::OsStr;
use std::io::IoSlice;
use std::os::unix::ffi::OsStrExt;
use std::time::Duration;

use smallvec::{SmallVec, smallvec};
use zerocopy::{Immutable, IntoBytes};

use crate::abi;
use crate::errno::Errno;
use crate::mode;
use crate::time::time_from_system_time;
use crate::{FileAttr, FileType};

const INLINE_DATA_THRESHOLD: usize = size_of::<u64>() * 4;
pub(crate) type ResponseBuf = SmallVec<[u8; INLINE_DATA_THRESHOLD]>;

/// The body of a reply, not yet wrapped in a `fuse_out_header`.
#[derive(Debug)]
pub(crate) enum Response<'a> {
    Error(Option<Errno>),
    Data(ResponseBuf),
    Slice(&'a [u8]),
}

impl<'a> Response<'a> {
    /// Builds the `fuse_out_header` plus body as a vectored write, and hands
    /// both to `f` in one call.
    pub(crate) fn with_iovec<F: FnOnce(&[IoSlice<'_>]) -> T, T>(&self, unique: u64, f: F) -> T {
        let datalen = match self {
            Response::Error(_) => 0,
            Response::Data(v) => v.len(),
            Response::Slice(d) => d.len(),
        };
        let header = abi::fuse_out_header {
            unique,
            error: match self {
                Response::Error(Some(errno)) => errno.to_wire(),
                _ => 0,
            },
            len: (abi::FUSE_OUT_HEADER_SIZE + datalen)
                .try_into()
                .expect("response too large"),
        };
        let mut v: SmallVec<[IoSlice<'_>; 2]> = smallvec![IoSlice::new(header.as_bytes())];
        match self {
            Response::Error(_) => {}
            Response::Data(d) => v.push(IoSlice::new(d)),
            Response::Slice(d) => v.push(IoSlice::new(d)),
        }
        f(&v)
    }

    pub(crate) fn new_empty() -> Self {
        Self::Error(None)
    }

    pub(crate) fn new_error(error: Errno) -> Self {
        Self::Error(Some(error))
    }

    pub(crate) fn new_slice(data: &'a [u8]) -> Self {
        Self::Slice(data)
    }

    pub(crate) fn new_entry(
        nodeid: u64,
        generation: u64,
        attr: &FileAttr,
        attr_ttl: Duration,
        entry_ttl: Duration,
    ) -> Self {
        let d = abi::fuse_entry_out {
            nodeid,
            generation,
            entry_valid: entry_ttl.as_secs(),
            attr_valid: attr_ttl.as_secs(),
            entry_valid_nsec: entry_ttl.subsec_nanos(),
            attr_valid_nsec: attr_ttl.subsec_nanos(),
            attr: fuse_attr_from_attr(attr),
        };
        Self::from_struct(&d)
    }

    pub(crate) fn new_attr(ttl: Duration, attr: &FileAttr) -> Self {
        let d = abi::fuse_attr_out {
            attr_valid: ttl.as_secs(),
            attr_valid_nsec: ttl.subsec_nanos(),
            dummy: 0,
            attr: fuse_attr_from_attr(attr),
        };
        Self::from_struct(&d)
    }

    pub(crate) fn new_open(fh: u64, flags: abi::FopenFlags) -> Self {
        let d = abi::fuse_open_out {
            fh,
            open_flags: flags.bits(),
            padding: 0,
        };
        Self::from_struct(&d)
    }

    pub(crate) fn new_create(
        nodeid: u64,
        generation: u64,
        attr: &FileAttr,
        attr_ttl: Duration,
        entry_ttl: Duration,
        fh: u64,
        flags: abi::FopenFlags,
    ) -> Self {
        let d = abi::fuse_create_out(
            abi::fuse_entry_out {
                nodeid,
                generation,
                entry_valid: entry_ttl.as_secs(),
                attr_valid: attr_ttl.as_secs(),
                entry_valid_nsec: entry_ttl.subsec_nanos(),
                attr_valid_nsec: attr_ttl.subsec_nanos(),
                attr: fuse_attr_from_attr(attr),
            },
            abi::fuse_open_out {
                fh,
                open_flags: flags.bits(),
                padding: 0,
            },
        );
        Self::from_struct(&d)
    }

    pub(crate) fn new_write(written: u32) -> Self {
        Self::from_struct(&abi::fuse_write_out {
            size: written,
            padding: 0,
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new_statfs(
        blocks: u64,
        bfree: u64,
        bavail: u64,
        files: u64,
        ffree: u64,
        bsize: u32,
        namelen: u32,
        frsize: u32,
    ) -> Self {
        Self::from_struct(&abi::fuse_statfs_out {
            st: abi::fuse_kstatfs {
                blocks,
                bfree,
                bavail,
                files,
                ffree,
                bsize,
                namelen,
                frsize,
                padding: 0,
                spare: [0; 6],
            },
        })
    }

    /// Builds a GETXATTR/LISTXATTR size reply: the kernel uses this form
    /// whenever the request's advertised buffer size was `0`.
    pub(crate) fn new_xattr_size(size: u32) -> Self {
        Self::from_struct(&abi::fuse_getxattr_out { size, padding: 0 })
    }

    /// The INIT handshake reply. `max_write` is clamped to the largest write
    /// payload this implementation will ever advertise.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new_init(
        major: u32,
        minor: u32,
        max_readahead: u32,
        flags: u32,
        max_background: u16,
        congestion_threshold: u16,
        max_write: u32,
        time_gran: u32,
    ) -> Self {
        Self::from_struct(&abi::fuse_init_out {
            major,
            minor,
            max_readahead,
            flags,
            max_background,
            congestion_threshold,
            max_write: max_write.min(abi::MAX_WRITE_SIZE),
            time_gran,
            reserved: [0; 9],
        })
    }

    fn from_struct<T: IntoBytes + Immutable + ?Sized>(data: &T) -> Self {
        Self::Data(ResponseBuf::from_slice(data.as_bytes()))
    }
}

fn fuse_attr_from_attr(attr: &FileAttr) -> abi::fuse_attr {
    let (atime, atimensec) = time_from_system_time(&attr.atime);
    let (mtime, mtimensec) = time_from_system_time(&attr.mtime);
    let (ctime, ctimensec) = time_from_system_time(&attr.ctime);
    abi::fuse_attr {
        ino: attr.ino,
        size: attr.size,
        blocks: attr.blocks,
        atime,
        mtime,
        ctime,
        atimensec,
        mtimensec,
        ctimensec,
        mode: mode::mode_from_kind_and_perm(attr.kind, attr.perm),
        nlink: attr.nlink,
        uid: attr.uid,
        gid: attr.gid,
        rdev: attr.rdev,
        blksize: attr.blksize,
        padding: 0,
    }
}

/// One entry to append to a directory listing with [`AppendDirent`].
#[derive(Debug)]
pub struct Dirent<'a> {
    /// Inode of the entry.
    pub ino: u64,
    /// Type of the entry.
    pub kind: FileType,
    /// Entry name.
    pub name: &'a OsStr,
}

/// Accumulates directory entries into a READDIR reply buffer, bounded by the
/// size the kernel advertised in its request.
#[derive(Debug)]
pub struct AppendDirent {
    max_size: usize,
    buf: ResponseBuf,
}

impl AppendDirent {
    /// Starts a new listing bounded to `max_size` bytes.
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            buf: ResponseBuf::new(),
        }
    }

    /// Appends one entry. Returns `false` (without modifying the buffer) if
    /// the entry wouldn't fit within `max_size`; the caller should stop
    /// accumulating entries and reply with what it already has.
    #[must_use]
    pub fn push(&mut self, ent: &Dirent<'_>) -> bool {
        debug_assert!(self.buf.len() % size_of::<u64>() == 0);

        let name = ent.name.as_bytes();
        let namelen: u32 = name.len().try_into().expect("direntry name too long");
        let entlen = abi::FUSE_DIRENT_HEADER_SIZE + name.len();
        let entsize = entlen.next_multiple_of(size_of::<u64>());
        if self.buf.len() + entsize > self.max_size {
            return false;
        }

        let off = (self.buf.len() + entsize) as i64;
        let header = abi::fuse_dirent {
            ino: ent.ino,
            off,
            namelen,
            typ: mode::dirent_type(ent.kind),
        };
        self.buf.reserve(entsize);
        self.buf.extend_from_slice(header.as_bytes());
        self.buf.extend_from_slice(name);
        let padlen = entsize - entlen;
        self.buf.resize(self.buf.len() + padlen, 0);
        true
    }

    pub(crate) fn into_response(self) -> Response<'static> {
        Response::Data(self.buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dirent_offsets_account_for_padding() {
        let mut list = AppendDirent::new(4096);
        assert!(list.push(&Dirent {
            ino: 1,
            kind: FileType::RegularFile,
            name: OsStr::new("a"),
        }));
        let first_entsize = (abi::FUSE_DIRENT_HEADER_SIZE + 1).next_multiple_of(8);
        assert_eq!(list.buf.len(), first_entsize);
        // `off` (the second u64 field of fuse_dirent) equals the entry's own end offset.
        let off = i64::from_ne_bytes(list.buf[8..16].try_into().unwrap());
        assert_eq!(off, first_entsize as i64);

        assert!(list.push(&Dirent {
            ino: 2,
            kind: FileType::Directory,
            name: OsStr::new("bb"),
        }));
        let second_entsize = (abi::FUSE_DIRENT_HEADER_SIZE + 2).next_multiple_of(8);
        assert_eq!(list.buf.len(), first_entsize + second_entsize);
    }

    #[test]
    fn push_stops_when_buffer_would_overflow() {
        let mut list = AppendDirent::new(8);
        assert!(!list.push(&Dirent {
            ino: 1,
            kind: FileType::RegularFile,
            name: OsStr::new("toolong"),
        }));
        assert!(list.buf.is_empty());
    }

    #[test]
    fn response_unique_is_echoed_verbatim() {
        let resp = Response::new_empty();
        resp.with_iovec(0xdead_beef, |iov| {
            let header: &[u8] = &iov[0];
            let error = i32::from_ne_bytes(header[4..8].try_into().unwrap());
            let unique = u64::from_ne_bytes(header[8..16].try_into().unwrap());
            assert_eq!(unique, 0xdead_beef);
            assert_eq!(error, 0);
        });
    }

    #[test]
    fn error_is_negated_on_the_wire() {
        let resp = Response::new_error(Errno::ENOENT);
        resp.with_iovec(1, |iov| {
            let header: &[u8] = &iov[0];
            let error = i32::from_ne_bytes(header[4..8].try_into().unwrap());
            assert_eq!(error, -libc::ENOENT);
        });
    }

    #[test]
    fn init_max_write_is_clamped() {
        let resp = Response::new_init(7, 31, 4096, 0, 0, 0, u32::MAX, 1);
        match resp {
            Response::Data(buf) => {
                // max_write is the 5th u32 field (major,minor,max_readahead,flags,
                // max_background/congestion_threshold packed, then max_write).
                let offset = 4 * 4 + 2 + 2;
                let max_write = u32::from_ne_bytes(buf[offset..offset + 4].try_into().unwrap());
                assert_eq!(max_write, abi::MAX_WRITE_SIZE);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
