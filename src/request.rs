//! Decodes one kernel message into a typed [`Request`].

use std::convert::TryFrom;
use std::ffi::OsStr;
use std::fmt;
use std::{error, mem};

use crate::abi::{self, InvalidOpcodeError, fuse_in_header, fuse_opcode};
use crate::argument::ArgumentIterator;

/// Error that may occur while parsing a request from the kernel driver.
#[derive(Debug)]
pub enum RequestError {
    /// Not enough data for the fixed header (short read).
    ShortReadHeader(usize),
    /// The kernel requested an opcode this implementation is fatally
    /// unprepared to even attempt to parse (see [`is_fatal_opcode`]).
    UnsupportedOperation(u32),
    /// Not enough data for the arguments the header's declared length promised.
    ShortRead(usize, usize),
    /// The declared length and the opcode's argument layout disagree.
    InsufficientData,
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestError::ShortReadHeader(len) => write!(
                f,
                "short read of request header ({len} < {})",
                mem::size_of::<fuse_in_header>()
            ),
            RequestError::UnsupportedOperation(opcode) => {
                write!(f, "unsupported fatal opcode ({opcode})")
            }
            RequestError::ShortRead(len, total) => {
                write!(f, "short read of request ({len} < {total})")
            }
            RequestError::InsufficientData => write!(f, "insufficient argument data"),
        }
    }
}

impl error::Error for RequestError {}

/// Opcodes the kernel may send that this implementation does not support and
/// will not attempt to decode; encountering one aborts the process rather
/// than risk misinterpreting lock or volume-management state.
pub(crate) fn is_fatal_opcode(opcode: fuse_opcode) -> bool {
    matches!(
        opcode,
        fuse_opcode::FUSE_GETLK
            | fuse_opcode::FUSE_SETLK
            | fuse_opcode::FUSE_SETLKW
            | fuse_opcode::FUSE_BMAP
            | fuse_opcode::FUSE_SETVOLNAME
            | fuse_opcode::FUSE_GETXTIMES
            | fuse_opcode::FUSE_EXCHANGE
    )
}

/// A FUSE INIT handshake.
#[derive(Debug)]
pub struct Init {
    /// Kernel's major ABI version.
    pub major: u32,
    /// Kernel's minor ABI version.
    pub minor: u32,
    /// Largest readahead the kernel may perform.
    pub max_readahead: u32,
    /// Capability flags the kernel advertises.
    pub flags: u32,
}

/// A `LOOKUP` request.
#[derive(Debug)]
pub struct Lookup<'a> {
    /// Name being looked up within the parent directory.
    pub name: &'a OsStr,
}

/// A `FORGET` request. Carries no response.
#[derive(Debug)]
pub struct Forget {
    /// Number of lookups to release.
    pub nlookup: u64,
}

/// A `SETATTR` request.
#[derive(Debug)]
pub struct Setattr {
    /// Bitmask of which fields below are meaningful.
    pub valid: u32,
    /// File handle, valid when `FATTR_FH` is set.
    pub fh: u64,
    /// New size, valid when `FATTR_SIZE` is set.
    pub size: u64,
    /// Lock owner.
    pub lock_owner: u64,
    /// New atime seconds, valid when `FATTR_ATIME` is set.
    pub atime: i64,
    /// New atime nanoseconds.
    pub atimensec: u32,
    /// New mtime seconds, valid when `FATTR_MTIME` is set.
    pub mtime: i64,
    /// New mtime nanoseconds.
    pub mtimensec: u32,
    /// New mode, valid when `FATTR_MODE` is set.
    pub mode: u32,
    /// New uid, valid when `FATTR_UID` is set.
    pub uid: u32,
    /// New gid, valid when `FATTR_GID` is set.
    pub gid: u32,
}

impl Setattr {
    /// True if the kernel asked for atime to be set to "now" rather than an
    /// explicit value.
    pub fn atime_now(&self) -> bool {
        self.valid & abi::consts::FATTR_ATIME_NOW != 0
    }

    /// True if the kernel asked for mtime to be set to "now" rather than an
    /// explicit value.
    pub fn mtime_now(&self) -> bool {
        self.valid & abi::consts::FATTR_MTIME_NOW != 0
    }
}

/// A `SYMLINK` request.
#[derive(Debug)]
pub struct Symlink<'a> {
    /// Name of the new link.
    pub name: &'a OsStr,
    /// Target the link points at.
    pub link: &'a OsStr,
}

/// A `LINK` request.
#[derive(Debug)]
pub struct Link<'a> {
    /// Inode being linked.
    pub oldnodeid: u64,
    /// Name of the new link in the parent.
    pub name: &'a OsStr,
}

/// A `MKNOD` request.
#[derive(Debug)]
pub struct Mknod<'a> {
    /// Requested mode, including type bits.
    pub mode: u32,
    /// Device id, meaningful for device-special nodes.
    pub rdev: u32,
    /// Process umask to apply.
    pub umask: u32,
    /// Name of the new node.
    pub name: &'a OsStr,
}

/// A `MKDIR` request.
#[derive(Debug)]
pub struct Mkdir<'a> {
    /// Requested mode; the type nibble is always forced to `S_IFDIR` at
    /// decode time regardless of what the kernel sent.
    pub mode: u32,
    /// Process umask to apply.
    pub umask: u32,
    /// Name of the new directory.
    pub name: &'a OsStr,
}

/// An `UNLINK`/`RMDIR` request.
#[derive(Debug)]
pub struct Remove<'a> {
    /// Name being removed.
    pub name: &'a OsStr,
    /// True if this is `RMDIR` rather than `UNLINK`.
    pub dir: bool,
}

/// A `RENAME` request.
#[derive(Debug)]
pub struct Rename<'a> {
    /// Destination parent directory.
    pub newdir: u64,
    /// Current name within the source parent.
    pub name: &'a OsStr,
    /// New name within the destination parent.
    pub newname: &'a OsStr,
}

/// An `OPEN`/`OPENDIR` request.
#[derive(Debug)]
pub struct Open {
    /// Open flags, matching the `open(2)` flag encoding.
    pub flags: i32,
    /// True if this is `OPENDIR` rather than `OPEN`.
    pub dir: bool,
}

/// A `CREATE` request.
#[derive(Debug)]
pub struct Create<'a> {
    /// Open flags, matching the `open(2)` flag encoding.
    pub flags: i32,
    /// Requested mode for the new file.
    pub mode: u32,
    /// Process umask to apply.
    pub umask: u32,
    /// Name of the new file.
    pub name: &'a OsStr,
}

/// A `READ`/`READDIR` request.
#[derive(Debug)]
pub struct Read {
    /// Open file handle.
    pub fh: u64,
    /// Byte (or directory-stream) offset to read from.
    pub offset: i64,
    /// Maximum number of bytes to return.
    pub size: u32,
    /// True if this is `READDIR` rather than `READ`.
    pub dir: bool,
}

/// A `WRITE` request.
#[derive(Debug)]
pub struct Write<'a> {
    /// Open file handle.
    pub fh: u64,
    /// Byte offset to write at.
    pub offset: i64,
    /// Write flags.
    pub write_flags: u32,
    /// Data to write, bounded to exactly the advertised size.
    pub data: &'a [u8],
}

/// A `RELEASE`/`RELEASEDIR` request.
#[derive(Debug)]
pub struct Release {
    /// Open file handle being released.
    pub fh: u64,
    /// Open flags the handle was opened with.
    pub flags: i32,
    /// Release flags.
    pub release_flags: u32,
    /// Lock owner.
    pub lock_owner: u64,
    /// True if this is `RELEASEDIR` rather than `RELEASE`.
    pub dir: bool,
}

/// A `FLUSH` request.
#[derive(Debug)]
pub struct Flush {
    /// Open file handle.
    pub fh: u64,
    /// Lock owner.
    pub lock_owner: u64,
}

/// An `FSYNC`/`FSYNCDIR` request.
#[derive(Debug)]
pub struct Fsync {
    /// Open file handle.
    pub fh: u64,
    /// Fsync flags; bit 0 requests data-only sync.
    pub fsync_flags: u32,
    /// True if this is `FSYNCDIR` rather than `FSYNC`.
    pub dir: bool,
}

/// A `SETXATTR` request.
#[derive(Debug)]
pub struct Setxattr<'a> {
    /// Attribute name.
    pub name: &'a OsStr,
    /// Attribute value.
    pub value: &'a [u8],
    /// setxattr flags (`XATTR_CREATE`/`XATTR_REPLACE`).
    pub flags: i32,
}

/// A `GETXATTR` request.
#[derive(Debug)]
pub struct Getxattr<'a> {
    /// Attribute name.
    pub name: &'a OsStr,
    /// Buffer size the caller has available; zero means "tell me the size".
    pub size: u32,
}

/// A `LISTXATTR` request.
#[derive(Debug)]
pub struct Listxattr {
    /// Buffer size the caller has available; zero means "tell me the size".
    pub size: u32,
}

/// A `REMOVEXATTR` request.
#[derive(Debug)]
pub struct Removexattr<'a> {
    /// Attribute name.
    pub name: &'a OsStr,
}

/// An `ACCESS` request.
#[derive(Debug)]
pub struct Access {
    /// Requested access mask, matching the `access(2)` mode encoding.
    pub mask: i32,
}

/// An `INTERRUPT` request.
#[derive(Debug)]
pub struct Interrupt {
    /// Unique id of the request to cancel.
    pub unique: u64,
}

/// The decoded filesystem operation and its arguments.
#[derive(Debug)]
pub enum Operation<'a> {
    /// See [`Init`].
    Init(Init),
    /// Tear down the connection; no reply.
    Destroy,
    /// Return filesystem-wide statistics.
    Statfs,
    /// See [`Lookup`].
    Lookup(Lookup<'a>),
    /// See [`Forget`]. No reply.
    Forget(Forget),
    /// Return the attributes of the target inode.
    Getattr,
    /// See [`Setattr`].
    Setattr(Setattr),
    /// Return the target symlink's contents.
    Readlink,
    /// See [`Symlink`].
    Symlink(Symlink<'a>),
    /// See [`Link`].
    Link(Link<'a>),
    /// See [`Mknod`].
    Mknod(Mknod<'a>),
    /// See [`Mkdir`].
    Mkdir(Mkdir<'a>),
    /// See [`Remove`].
    Remove(Remove<'a>),
    /// See [`Rename`].
    Rename(Rename<'a>),
    /// See [`Open`].
    Open(Open),
    /// See [`Create`].
    Create(Create<'a>),
    /// See [`Read`].
    Read(Read),
    /// See [`Write`].
    Write(Write<'a>),
    /// See [`Release`].
    Release(Release),
    /// See [`Flush`].
    Flush(Flush),
    /// See [`Fsync`].
    Fsync(Fsync),
    /// See [`Setxattr`].
    Setxattr(Setxattr<'a>),
    /// See [`Getxattr`].
    Getxattr(Getxattr<'a>),
    /// See [`Listxattr`].
    Listxattr(Listxattr),
    /// See [`Removexattr`].
    Removexattr(Removexattr<'a>),
    /// See [`Access`].
    Access(Access),
    /// See [`Interrupt`]. No reply.
    Interrupt(Interrupt),
    /// An opcode this implementation doesn't recognize; the server should
    /// reply `ENOSYS`.
    Unknown(u32),
}

impl fmt::Display for Operation<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Init(x) => write!(f, "INIT kernel ABI {}.{}, flags {:#x}", x.major, x.minor, x.flags),
            Operation::Destroy => write!(f, "DESTROY"),
            Operation::Statfs => write!(f, "STATFS"),
            Operation::Lookup(x) => write!(f, "LOOKUP name {:?}", x.name),
            Operation::Forget(x) => write!(f, "FORGET nlookup {}", x.nlookup),
            Operation::Getattr => write!(f, "GETATTR"),
            Operation::Setattr(x) => write!(f, "SETATTR valid {:#x}", x.valid),
            Operation::Readlink => write!(f, "READLINK"),
            Operation::Symlink(x) => write!(f, "SYMLINK name {:?}, link {:?}", x.name, x.link),
            Operation::Link(x) => write!(f, "LINK name {:?}, oldnodeid {:#018x}", x.name, x.oldnodeid),
            Operation::Mknod(x) => write!(f, "MKNOD name {:?}, mode {:#05o}, rdev {}", x.name, x.mode, x.rdev),
            Operation::Mkdir(x) => write!(f, "MKDIR name {:?}, mode {:#05o}", x.name, x.mode),
            Operation::Remove(x) => write!(f, "{} name {:?}", if x.dir { "RMDIR" } else { "UNLINK" }, x.name),
            Operation::Rename(x) => write!(f, "RENAME name {:?}, newdir {:#018x}, newname {:?}", x.name, x.newdir, x.newname),
            Operation::Open(x) => write!(f, "{} flags {:#x}", if x.dir { "OPENDIR" } else { "OPEN" }, x.flags),
            Operation::Create(x) => write!(f, "CREATE name {:?}, mode {:#05o}, flags {:#x}", x.name, x.mode, x.flags),
            Operation::Read(x) => write!(f, "{} fh {}, offset {}, size {}", if x.dir { "READDIR" } else { "READ" }, x.fh, x.offset, x.size),
            Operation::Write(x) => write!(f, "WRITE fh {}, offset {}, size {}", x.fh, x.offset, x.data.len()),
            Operation::Release(x) => write!(f, "{} fh {}, flags {:#x}", if x.dir { "RELEASEDIR" } else { "RELEASE" }, x.fh, x.flags),
            Operation::Flush(x) => write!(f, "FLUSH fh {}, lock owner {}", x.fh, x.lock_owner),
            Operation::Fsync(x) => write!(f, "{} fh {}, flags {:#x}", if x.dir { "FSYNCDIR" } else { "FSYNC" }, x.fh, x.fsync_flags),
            Operation::Setxattr(x) => write!(f, "SETXATTR name {:?}, size {}", x.name, x.value.len()),
            Operation::Getxattr(x) => write!(f, "GETXATTR name {:?}, size {}", x.name, x.size),
            Operation::Listxattr(x) => write!(f, "LISTXATTR size {}", x.size),
            Operation::Removexattr(x) => write!(f, "REMOVEXATTR name {:?}", x.name),
            Operation::Access(x) => write!(f, "ACCESS mask {:#05o}", x.mask),
            Operation::Interrupt(x) => write!(f, "INTERRUPT unique {}", x.unique),
            Operation::Unknown(opcode) => write!(f, "UNKNOWN opcode {opcode}"),
        }
    }
}

impl<'a> Operation<'a> {
    fn parse(opcode: fuse_opcode, data: &mut ArgumentIterator<'a>) -> Option<Self> {
        use fuse_opcode::*;
        Some(match opcode {
            FUSE_LOOKUP => Operation::Lookup(Lookup {
                name: data.fetch_str()?,
            }),
            FUSE_FORGET => {
                let arg: &abi::fuse_forget_in = data.fetch()?;
                Operation::Forget(Forget {
                    nlookup: arg.nlookup,
                })
            }
            FUSE_GETATTR => {
                let _arg: &abi::fuse_getattr_in = data.fetch()?;
                Operation::Getattr
            }
            FUSE_SETATTR => {
                let arg: &abi::fuse_setattr_in = data.fetch()?;
                Operation::Setattr(Setattr {
                    valid: arg.valid,
                    fh: arg.fh,
                    size: arg.size,
                    lock_owner: arg.lock_owner,
                    atime: arg.atime,
                    atimensec: arg.atimensec,
                    mtime: arg.mtime,
                    mtimensec: arg.mtimensec,
                    mode: arg.mode,
                    uid: arg.uid,
                    gid: arg.gid,
                })
            }
            FUSE_READLINK => Operation::Readlink,
            FUSE_SYMLINK => Operation::Symlink(Symlink {
                name: data.fetch_str()?,
                link: data.fetch_str()?,
            }),
            FUSE_MKNOD => {
                let arg: &abi::fuse_mknod_in = data.fetch()?;
                Operation::Mknod(Mknod {
                    mode: arg.mode,
                    rdev: arg.rdev,
                    umask: arg.umask,
                    name: data.fetch_str()?,
                })
            }
            FUSE_MKDIR => {
                let arg: &abi::fuse_mkdir_in = data.fetch()?;
                // The kernel may send a mode with a zeroed type nibble; the
                // directory type is implied by the opcode, so force it.
                let mode = (arg.mode & !(libc::S_IFMT as u32)) | libc::S_IFDIR as u32;
                Operation::Mkdir(Mkdir {
                    mode,
                    umask: arg.umask,
                    name: data.fetch_str()?,
                })
            }
            FUSE_UNLINK => Operation::Remove(Remove {
                name: data.fetch_str()?,
                dir: false,
            }),
            FUSE_RMDIR => Operation::Remove(Remove {
                name: data.fetch_str()?,
                dir: true,
            }),
            FUSE_RENAME => {
                let arg: &abi::fuse_rename_in = data.fetch()?;
                Operation::Rename(Rename {
                    newdir: arg.newdir,
                    name: data.fetch_str()?,
                    newname: data.fetch_str()?,
                })
            }
            FUSE_LINK => {
                let arg: &abi::fuse_link_in = data.fetch()?;
                Operation::Link(Link {
                    oldnodeid: arg.oldnodeid,
                    name: data.fetch_str()?,
                })
            }
            FUSE_OPEN => {
                let arg: &abi::fuse_open_in = data.fetch()?;
                Operation::Open(Open {
                    flags: arg.flags,
                    dir: false,
                })
            }
            FUSE_OPENDIR => {
                let arg: &abi::fuse_open_in = data.fetch()?;
                Operation::Open(Open {
                    flags: arg.flags,
                    dir: true,
                })
            }
            FUSE_READ => {
                let arg: &abi::fuse_read_in = data.fetch()?;
                Operation::Read(Read {
                    fh: arg.fh,
                    offset: arg.offset,
                    size: arg.size,
                    dir: false,
                })
            }
            FUSE_READDIR => {
                let arg: &abi::fuse_read_in = data.fetch()?;
                Operation::Read(Read {
                    fh: arg.fh,
                    offset: arg.offset,
                    size: arg.size,
                    dir: true,
                })
            }
            FUSE_WRITE => {
                let arg: &abi::fuse_write_in = data.fetch()?;
                let size = arg.size;
                Operation::Write(Write {
                    fh: arg.fh,
                    offset: arg.offset,
                    write_flags: arg.write_flags,
                    data: data.fetch_n(size as usize)?,
                })
            }
            FUSE_STATFS => Operation::Statfs,
            FUSE_RELEASE => {
                let arg: &abi::fuse_release_in = data.fetch()?;
                Operation::Release(Release {
                    fh: arg.fh,
                    flags: arg.flags,
                    release_flags: arg.release_flags,
                    lock_owner: arg.lock_owner,
                    dir: false,
                })
            }
            FUSE_RELEASEDIR => {
                let arg: &abi::fuse_release_in = data.fetch()?;
                Operation::Release(Release {
                    fh: arg.fh,
                    flags: arg.flags,
                    release_flags: arg.release_flags,
                    lock_owner: arg.lock_owner,
                    dir: true,
                })
            }
            FUSE_FSYNC => {
                let arg: &abi::fuse_fsync_in = data.fetch()?;
                Operation::Fsync(Fsync {
                    fh: arg.fh,
                    fsync_flags: arg.fsync_flags,
                    dir: false,
                })
            }
            FUSE_FSYNCDIR => {
                let arg: &abi::fuse_fsync_in = data.fetch()?;
                Operation::Fsync(Fsync {
                    fh: arg.fh,
                    fsync_flags: arg.fsync_flags,
                    dir: true,
                })
            }
            FUSE_SETXATTR => {
                let arg: &abi::fuse_setxattr_in = data.fetch()?;
                let size = arg.size;
                let flags = arg.flags;
                let name = data.fetch_str()?;
                Operation::Setxattr(Setxattr {
                    name,
                    value: data.fetch_n(size as usize)?,
                    flags,
                })
            }
            FUSE_GETXATTR => {
                let arg: &abi::fuse_getxattr_in = data.fetch()?;
                Operation::Getxattr(Getxattr {
                    name: data.fetch_str()?,
                    size: arg.size,
                })
            }
            FUSE_LISTXATTR => {
                let arg: &abi::fuse_getxattr_in = data.fetch()?;
                Operation::Listxattr(Listxattr { size: arg.size })
            }
            FUSE_REMOVEXATTR => Operation::Removexattr(Removexattr {
                name: data.fetch_str()?,
            }),
            FUSE_FLUSH => {
                let arg: &abi::fuse_flush_in = data.fetch()?;
                Operation::Flush(Flush {
                    fh: arg.fh,
                    lock_owner: arg.lock_owner,
                })
            }
            FUSE_INIT => {
                let arg: &abi::fuse_init_in = data.fetch()?;
                Operation::Init(Init {
                    major: arg.major,
                    minor: arg.minor,
                    max_readahead: arg.max_readahead,
                    flags: arg.flags,
                })
            }
            FUSE_ACCESS => {
                let arg: &abi::fuse_access_in = data.fetch()?;
                Operation::Access(Access { mask: arg.mask })
            }
            FUSE_CREATE => {
                let arg: &abi::fuse_create_in = data.fetch()?;
                Operation::Create(Create {
                    flags: arg.flags,
                    mode: arg.mode,
                    umask: arg.umask,
                    name: data.fetch_str()?,
                })
            }
            FUSE_INTERRUPT => {
                let arg: &abi::fuse_interrupt_in = data.fetch()?;
                Operation::Interrupt(Interrupt {
                    unique: arg.unique,
                })
            }
            FUSE_DESTROY => Operation::Destroy,
            FUSE_GETLK | FUSE_SETLK | FUSE_SETLKW | FUSE_BMAP | FUSE_SETVOLNAME
            | FUSE_GETXTIMES | FUSE_EXCHANGE => unreachable!("fatal opcode handled before dispatch"),
        })
    }
}

/// One decoded kernel message: a header plus its operation.
#[derive(Debug)]
pub struct Request<'a> {
    header: RequestHeader,
    operation: Operation<'a>,
}

#[derive(Debug, Clone, Copy)]
struct RequestHeader {
    unique: u64,
    nodeid: u64,
    uid: u32,
    gid: u32,
    pid: u32,
}

impl fmt::Display for Request<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FUSE({:3}) ino {:#018x}: {}",
            self.header.unique, self.header.nodeid, self.operation
        )
    }
}

impl<'a> Request<'a> {
    /// Decodes one complete kernel message (exactly as read in one call to
    /// the device) into a typed request.
    pub(crate) fn parse(data: &'a [u8]) -> Result<Self, RequestError> {
        let data_len = data.len();
        let mut it = ArgumentIterator::new(data);
        let header: &fuse_in_header = it
            .fetch()
            .ok_or(RequestError::ShortReadHeader(data_len))?;

        let opcode = match fuse_opcode::try_from(header.opcode) {
            Ok(opcode) => opcode,
            Err(InvalidOpcodeError(raw)) => {
                return Ok(Request {
                    header: RequestHeader {
                        unique: header.unique,
                        nodeid: header.nodeid,
                        uid: header.uid,
                        gid: header.gid,
                        pid: header.pid,
                    },
                    operation: Operation::Unknown(raw),
                });
            }
        };

        let declared_len = normalize_length_quirks(opcode, header.len as usize, data_len);
        if data_len < declared_len {
            return Err(RequestError::ShortRead(data_len, declared_len));
        }

        if is_fatal_opcode(opcode) {
            panic!("unsupported fatal FUSE opcode {opcode:?} received from kernel");
        }

        let header = RequestHeader {
            unique: header.unique,
            nodeid: header.nodeid,
            uid: header.uid,
            gid: header.gid,
            pid: header.pid,
        };
        let operation = Operation::parse(opcode, &mut it).ok_or(RequestError::InsufficientData)?;
        Ok(Request { header, operation })
    }

    /// Unique id of this request; echoed in the response header.
    #[inline]
    pub fn unique(&self) -> u64 {
        self.header.unique
    }

    /// Node id this request targets.
    #[inline]
    pub fn nodeid(&self) -> u64 {
        self.header.nodeid
    }

    /// UID of the process that triggered this request.
    #[inline]
    pub fn uid(&self) -> u32 {
        self.header.uid
    }

    /// GID of the process that triggered this request.
    #[inline]
    pub fn gid(&self) -> u32 {
        self.header.gid
    }

    /// PID of the process that triggered this request.
    #[inline]
    pub fn pid(&self) -> u32 {
        self.header.pid
    }

    /// The decoded operation and its arguments.
    #[inline]
    pub fn operation(&self) -> &Operation<'a> {
        &self.operation
    }
}

/// Corrects two known kernel quirks where the declared header length
/// disagrees with how many bytes were actually read, before the strict
/// length check runs.
fn normalize_length_quirks(opcode: fuse_opcode, declared_len: usize, raw_read_len: usize) -> usize {
    // FreeBSD sends a too-small `len` on INIT.
    if opcode == fuse_opcode::FUSE_INIT
        && declared_len < raw_read_len
        && raw_read_len == abi::FUSE_IN_HEADER_SIZE + mem::size_of::<abi::fuse_init_in>()
    {
        return raw_read_len;
    }
    // OSXFUSE sends a too-small `len` on some WRITE messages.
    if opcode == fuse_opcode::FUSE_WRITE
        && declared_len >= abi::FUSE_IN_HEADER_SIZE + abi::WRITE_IN_SIZE
        && declared_len < raw_read_len
    {
        return raw_read_len;
    }
    declared_len
}

#[cfg(test)]
mod tests {
    use super::*;

    const INIT_REQUEST: [u8; 56] = [
        0x38, 0x00, 0x00, 0x00, 0x1a, 0x00, 0x00, 0x00, // len, opcode
        0x0d, 0xf0, 0xad, 0xba, 0xef, 0xbe, 0xad, 0xde, // unique
        0x88, 0x77, 0x66, 0x55, 0x44, 0x33, 0x22, 0x11, // nodeid
        0x0d, 0xd0, 0x01, 0xc0, 0xfe, 0xca, 0x01, 0xc0, // uid, gid
        0x5e, 0xba, 0xde, 0xc0, 0x00, 0x00, 0x00, 0x00, // pid, padding
        0x07, 0x00, 0x00, 0x00, 0x08, 0x00, 0x00, 0x00, // major, minor
        0x00, 0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // max_readahead, flags
    ];

    const MKNOD_REQUEST: [u8; 56] = [
        0x38, 0x00, 0x00, 0x00, 0x08, 0x00, 0x00, 0x00, // len, opcode
        0x0d, 0xf0, 0xad, 0xba, 0xef, 0xbe, 0xad, 0xde, // unique
        0x88, 0x77, 0x66, 0x55, 0x44, 0x33, 0x22, 0x11, // nodeid
        0x0d, 0xd0, 0x01, 0xc0, 0xfe, 0xca, 0x01, 0xc0, // uid, gid
        0x5e, 0xba, 0xde, 0xc0, 0x00, 0x00, 0x00, 0x00, // pid, padding
        0xa4, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // mode, rdev
        0x66, 0x6f, 0x6f, 0x2e, 0x74, 0x78, 0x74, 0x00, // name
    ];

    #[test]
    fn short_read_header() {
        match Request::parse(&INIT_REQUEST[..20]) {
            Err(RequestError::ShortReadHeader(20)) => (),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn short_read() {
        match Request::parse(&INIT_REQUEST[..48]) {
            Err(RequestError::ShortRead(48, 56)) => (),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn init() {
        let req = Request::parse(&INIT_REQUEST).unwrap();
        assert_eq!(req.unique(), 0xdead_beef_baad_f00d);
        assert_eq!(req.nodeid(), 0x1122_3344_5566_7788);
        assert_eq!(req.uid(), 0xc001_d00d);
        assert_eq!(req.gid(), 0xc001_cafe);
        assert_eq!(req.pid(), 0xc0de_ba5e);
        match req.operation() {
            Operation::Init(x) => {
                assert_eq!(x.major, 7);
                assert_eq!(x.minor, 8);
                assert_eq!(x.max_readahead, 4096);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn mknod() {
        let req = Request::parse(&MKNOD_REQUEST).unwrap();
        match req.operation() {
            Operation::Mknod(x) => {
                assert_eq!(x.mode, 0o644);
                assert_eq!(x.name, OsStr::new("foo.txt"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn mkdir_forces_directory_type_bit() {
        let mut req = MKNOD_REQUEST;
        req[4] = 0x09; // opcode MKDIR
        req[40] = 0x00; // mode lower byte: zero out S_IFMT nibble entirely
        req[41] = 0x00;
        let req = Request::parse(&req).unwrap();
        match req.operation() {
            Operation::Mkdir(x) => {
                assert_eq!(x.mode & libc::S_IFMT as u32, libc::S_IFDIR as u32);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn unknown_opcode_is_not_an_error() {
        let mut req = INIT_REQUEST;
        req[4] = 0xff; // opcode 255, not recognized
        let req = Request::parse(&req).unwrap();
        assert!(matches!(req.operation(), Operation::Unknown(255)));
    }

    #[test]
    #[should_panic(expected = "fatal FUSE opcode")]
    fn fatal_opcode_panics() {
        let mut req = INIT_REQUEST;
        req[4] = 0x1f; // opcode 31: FUSE_GETLK
        let _ = Request::parse(&req);
    }

    #[test]
    fn symlink_splits_two_names() {
        let mut payload = Vec::new();
        payload.extend_from_slice(b"link\0/tmp/target\0");
        let mut header = INIT_REQUEST[..40].to_vec();
        let total_len = (40 + payload.len()) as u32;
        header[0..4].copy_from_slice(&total_len.to_le_bytes());
        header[4..8].copy_from_slice(&6u32.to_le_bytes()); // FUSE_SYMLINK
        header.extend_from_slice(&payload);
        let req = Request::parse(&header).unwrap();
        match req.operation() {
            Operation::Symlink(x) => {
                assert_eq!(x.name, OsStr::new("link"));
                assert_eq!(x.link, OsStr::new("/tmp/target"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn rename_has_source_and_destination_names() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&0x2233_4455_6677_8899u64.to_le_bytes()); // newdir
        payload.extend_from_slice(b"old.txt\0new.txt\0");
        let mut header = INIT_REQUEST[..40].to_vec();
        let total_len = (40 + payload.len()) as u32;
        header[0..4].copy_from_slice(&total_len.to_le_bytes());
        header[4..8].copy_from_slice(&12u32.to_le_bytes()); // FUSE_RENAME
        header.extend_from_slice(&payload);
        let req = Request::parse(&header).unwrap();
        match req.operation() {
            Operation::Rename(x) => {
                assert_eq!(x.newdir, 0x2233_4455_6677_8899);
                assert_eq!(x.name, OsStr::new("old.txt"));
                assert_eq!(x.newname, OsStr::new("new.txt"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn interrupt_carries_target_unique() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&0xdead_beef_baad_f00du64.to_le_bytes());
        let mut header = INIT_REQUEST[..40].to_vec();
        let total_len = (40 + payload.len()) as u32;
        header[0..4].copy_from_slice(&total_len.to_le_bytes());
        header[4..8].copy_from_slice(&36u32.to_le_bytes()); // FUSE_INTERRUPT
        header.extend_from_slice(&payload);
        let req = Request::parse(&header).unwrap();
        match req.operation() {
            Operation::Interrupt(x) => assert_eq!(x.unique, 0xdead_beef_baad_f00d),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn write_data_is_bounded_by_advertised_size() {
        let mut header = INIT_REQUEST[..40].to_vec();
        let write_in_len = abi::WRITE_IN_SIZE;
        let payload_len = 10usize;
        let total_len = (40 + write_in_len + payload_len) as u32;
        header[0..4].copy_from_slice(&total_len.to_le_bytes());
        header[4..8].copy_from_slice(&16u32.to_le_bytes()); // FUSE_WRITE
        let mut write_in = vec![0u8; write_in_len];
        write_in[16..20].copy_from_slice(&4u32.to_le_bytes()); // size = 4
        header.extend_from_slice(&write_in);
        header.extend_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
        let req = Request::parse(&header).unwrap();
        match req.operation() {
            Operation::Write(x) => assert_eq!(x.data, &[1, 2, 3, 4]),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
