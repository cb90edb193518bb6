//! Mount-time configuration accepted when establishing a connection.
//!
//! See `man mount.fuse` for the kernel-level option vocabulary this mirrors.

use std::collections::HashSet;
use std::io;
use std::io::ErrorKind;

/// One mount-time option. Options are applied in the order supplied to
/// `Connection::mount` and validated for conflicts before any syscall runs.
#[derive(Debug, Eq, PartialEq, Hash, Clone)]
pub enum MountOption {
    /// Name of the source shown in mtab.
    FSName(String),
    /// Filesystem subtype shown in mtab.
    Subtype(String),
    /// Volume name (observed only on OS X).
    VolumeName(String),
    /// An option not otherwise covered by this enum, passed through verbatim.
    Custom(String),

    /// Allow all users to access the filesystem, not just the mounting user.
    AllowOther,
    /// Allow the root user to access the filesystem in addition to the mounting user.
    AllowRoot,
    /// Enable kernel-side permission checking.
    DefaultPermissions,

    /// Enable special character and block devices.
    Dev,
    /// Disable special character and block devices.
    NoDev,
    /// Honor set-user-id and set-group-id bits on files.
    Suid,
    /// Ignore set-user-id and set-group-id bits on files.
    NoSuid,
    /// Read-only filesystem.
    RO,
    /// Read-write filesystem.
    RW,
    /// Allow execution of binaries.
    Exec,
    /// Disallow execution of binaries.
    NoExec,
    /// Maintain inode access time.
    Atime,
    /// Don't update inode access time.
    NoAtime,
    /// Directory modifications are done synchronously.
    DirSync,
    /// All I/O is done synchronously.
    Sync,
    /// All I/O is done asynchronously.
    Async,
}

/// Returns an error listing any mutually-exclusive options found together.
pub fn check_option_conflicts(options: &[MountOption]) -> Result<(), io::Error> {
    let mut options_set = HashSet::new();
    options_set.extend(options.iter().cloned());
    let conflicting: HashSet<MountOption> =
        options.iter().flat_map(conflicts_with).collect();
    let intersection: Vec<MountOption> = conflicting.intersection(&options_set).cloned().collect();
    if !intersection.is_empty() {
        Err(io::Error::new(
            ErrorKind::InvalidInput,
            format!("conflicting mount options found: {intersection:?}"),
        ))
    } else {
        Ok(())
    }
}

fn conflicts_with(option: &MountOption) -> Vec<MountOption> {
    match option {
        MountOption::FSName(_) => vec![],
        MountOption::Subtype(_) => vec![],
        MountOption::VolumeName(_) => vec![],
        MountOption::Custom(_) => vec![],
        MountOption::AllowOther => vec![MountOption::AllowRoot],
        MountOption::AllowRoot => vec![MountOption::AllowOther],
        MountOption::DefaultPermissions => vec![],
        MountOption::Dev => vec![MountOption::NoDev],
        MountOption::NoDev => vec![MountOption::Dev],
        MountOption::Suid => vec![MountOption::NoSuid],
        MountOption::NoSuid => vec![MountOption::Suid],
        MountOption::RO => vec![MountOption::RW],
        MountOption::RW => vec![MountOption::RO],
        MountOption::Exec => vec![MountOption::NoExec],
        MountOption::NoExec => vec![MountOption::Exec],
        MountOption::Atime => vec![MountOption::NoAtime],
        MountOption::NoAtime => vec![MountOption::Atime],
        MountOption::DirSync => vec![],
        MountOption::Sync => vec![MountOption::Async],
        MountOption::Async => vec![MountOption::Sync],
    }
}

/// Which layer of the mount string a given option belongs to: a kernel mount
/// string key=value pair, or a flags-word bit.
#[derive(PartialEq)]
pub(crate) enum MountOptionGroup {
    KernelOption,
    KernelFlag,
}

pub(crate) fn option_group(option: &MountOption) -> MountOptionGroup {
    match option {
        MountOption::FSName(_) => MountOptionGroup::KernelOption,
        MountOption::Subtype(_) => MountOptionGroup::KernelOption,
        MountOption::VolumeName(_) => MountOptionGroup::KernelOption,
        MountOption::Custom(_) => MountOptionGroup::KernelOption,
        MountOption::AllowOther => MountOptionGroup::KernelOption,
        MountOption::AllowRoot => MountOptionGroup::KernelOption,
        MountOption::DefaultPermissions => MountOptionGroup::KernelOption,
        MountOption::Dev
        | MountOption::NoDev
        | MountOption::Suid
        | MountOption::NoSuid
        | MountOption::RO
        | MountOption::RW
        | MountOption::Exec
        | MountOption::NoExec
        | MountOption::Atime
        | MountOption::NoAtime
        | MountOption::DirSync
        | MountOption::Sync
        | MountOption::Async => MountOptionGroup::KernelFlag,
    }
}

/// Formats an option for inclusion in the comma-joined kernel mount string.
pub(crate) fn option_to_string(option: &MountOption) -> String {
    match option {
        MountOption::FSName(name) => format!("fsname={name}"),
        MountOption::Subtype(subtype) => format!("subtype={subtype}"),
        MountOption::VolumeName(name) => format!("volname={name}"),
        MountOption::Custom(value) => value.to_string(),
        MountOption::AllowOther => "allow_other".to_string(),
        MountOption::AllowRoot => "allow_root".to_string(),
        MountOption::DefaultPermissions => "default_permissions".to_string(),
        MountOption::Dev => "dev".to_string(),
        MountOption::NoDev => "nodev".to_string(),
        MountOption::Suid => "suid".to_string(),
        MountOption::NoSuid => "nosuid".to_string(),
        MountOption::RO => "ro".to_string(),
        MountOption::RW => "rw".to_string(),
        MountOption::Exec => "exec".to_string(),
        MountOption::NoExec => "noexec".to_string(),
        MountOption::Atime => "atime".to_string(),
        MountOption::NoAtime => "noatime".to_string(),
        MountOption::DirSync => "dirsync".to_string(),
        MountOption::Sync => "sync".to_string(),
        MountOption::Async => "async".to_string(),
    }
}

#[cfg(target_os = "linux")]
pub(crate) fn option_to_flag(option: &MountOption) -> libc::c_ulong {
    match option {
        MountOption::Dev => 0, // absence of NoDev, not its own flag
        MountOption::NoDev => libc::MS_NODEV,
        MountOption::Suid => 0,
        MountOption::NoSuid => libc::MS_NOSUID,
        MountOption::RW => 0,
        MountOption::RO => libc::MS_RDONLY,
        MountOption::Exec => 0,
        MountOption::NoExec => libc::MS_NOEXEC,
        MountOption::Atime => 0,
        MountOption::NoAtime => libc::MS_NOATIME,
        MountOption::Async => 0,
        MountOption::Sync => libc::MS_SYNCHRONOUS,
        MountOption::DirSync => libc::MS_DIRSYNC,
        _ => unreachable!("not a flag-group option"),
    }
}

#[cfg(target_os = "macos")]
pub(crate) fn option_to_flag(option: &MountOption) -> libc::c_int {
    match option {
        MountOption::Dev => 0,
        MountOption::NoDev => libc::MNT_NODEV,
        MountOption::Suid => 0,
        MountOption::NoSuid => libc::MNT_NOSUID,
        MountOption::RW => 0,
        MountOption::RO => libc::MNT_RDONLY,
        MountOption::Exec => 0,
        MountOption::NoExec => libc::MNT_NOEXEC,
        MountOption::Atime => 0,
        MountOption::NoAtime => libc::MNT_NOATIME,
        MountOption::Async => 0,
        MountOption::Sync => libc::MNT_SYNCHRONOUS,
        _ => unreachable!("not a flag-group option"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn option_checking() {
        assert!(check_option_conflicts(&[MountOption::Suid, MountOption::NoSuid]).is_err());
        assert!(check_option_conflicts(&[MountOption::Suid, MountOption::NoExec]).is_ok());
    }

    #[test]
    fn group_assignment() {
        assert!(option_group(&MountOption::FSName("x".into())) == MountOptionGroup::KernelOption);
        assert!(option_group(&MountOption::RO) == MountOptionGroup::KernelFlag);
    }
}
