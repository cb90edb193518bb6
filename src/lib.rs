//! From-scratch implementation of the kernel FUSE wire protocol.
//!
//! This crate owns the hard binary-compatibility surface of a FUSE
//! filesystem: the connection to the kernel's `/dev/fuse` character device,
//! the decoder that turns kernel messages into typed [`Request`] values, and
//! the encoder that turns typed replies back into kernel messages. It does
//! not implement a filesystem, or the dispatch loop that maps requests to
//! filesystem operations — that belongs to a layer built on top of this one.

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

use std::os::unix::fs::FileTypeExt;
use std::time::SystemTime;

pub use crate::abi::FopenFlags;
pub use crate::connection::{Connection, MountError, recommended_buffer_size};
pub use crate::debug::{DebugEvent, DebugSink};
pub use crate::errno::Errno;
pub use crate::mount_options::MountOption;
pub use crate::reply::{AppendDirent, Dirent};
pub use crate::request::{
    Access, Create, Flush, Forget, Fsync, Getxattr, Init, Interrupt, Link, Listxattr, Lookup,
    Mkdir, Mknod, Open, Operation, Read, Release, Remove, Removexattr, Rename, Request,
    RequestError, Setattr, Setxattr, Symlink, Write,
};

mod abi;
mod argument;
mod connection;
mod debug;
mod errno;
mod mode;
mod mount;
mod mount_options;
mod reply;
mod request;
mod time;

/// Opaque kernel-assigned inode identifier.
pub type NodeId = u64;
/// Opaque server-assigned open-file handle.
pub type HandleId = u64;
/// Correlates a request with its response; echoed verbatim in the reply header.
pub type RequestId = u64;

/// Abstract file type, independent of any host `S_IFMT` encoding.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum FileType {
    /// Named pipe (`S_IFIFO`).
    NamedPipe,
    /// Character device (`S_IFCHR`).
    CharDevice,
    /// Block device (`S_IFBLK`).
    BlockDevice,
    /// Directory (`S_IFDIR`).
    Directory,
    /// Regular file (`S_IFREG`).
    RegularFile,
    /// Symbolic link (`S_IFLNK`).
    Symlink,
    /// Unix domain socket (`S_IFSOCK`).
    Socket,
}

impl FileType {
    /// Converts a standard library `FileType` to this crate's `FileType`, if
    /// it names a kind the wire protocol can represent.
    pub fn from_std(file_type: std::fs::FileType) -> Option<Self> {
        if file_type.is_file() {
            Some(FileType::RegularFile)
        } else if file_type.is_dir() {
            Some(FileType::Directory)
        } else if file_type.is_symlink() {
            Some(FileType::Symlink)
        } else if file_type.is_fifo() {
            Some(FileType::NamedPipe)
        } else if file_type.is_socket() {
            Some(FileType::Socket)
        } else if file_type.is_char_device() {
            Some(FileType::CharDevice)
        } else if file_type.is_block_device() {
            Some(FileType::BlockDevice)
        } else {
            None
        }
    }
}

/// File attributes as exchanged on the wire (times as `SystemTime`, mode
/// already split into [`FileType`] and a permission word).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FileAttr {
    /// Inode number.
    pub ino: NodeId,
    /// Size in bytes.
    pub size: u64,
    /// Allocated size in 512-byte blocks.
    pub blocks: u64,
    /// Time of last access.
    pub atime: SystemTime,
    /// Time of last modification.
    pub mtime: SystemTime,
    /// Time of last status change.
    pub ctime: SystemTime,
    /// Time of creation (observed only on OS X).
    pub crtime: SystemTime,
    /// Kind of file.
    pub kind: FileType,
    /// Permission bits (lower 12 bits: rwx + setuid/setgid/sticky).
    pub perm: u16,
    /// Number of hard links.
    pub nlink: u32,
    /// Owning user id.
    pub uid: u32,
    /// Owning group id.
    pub gid: u32,
    /// Device id, for device-special files.
    pub rdev: u32,
    /// Preferred I/O block size reported by `stat()`.
    pub blksize: u32,
    /// BSD flags (observed only on OS X, see chflags(2)).
    pub flags: u32,
}
