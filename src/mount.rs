//! Direct (non-libfuse) establishment of the kernel connection: opens
//! `/dev/fuse` and mounts it at the target path with the `mount(2)` syscall.
//!
//! This is the only mount strategy this crate implements; the privileged
//! `fusermount` helper subprocess (needed for unprivileged mounts on systems
//! that lock down `mount(2)`) is intentionally out of scope.

use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::io::AsRawFd;
use std::path::Path;

use crate::mount_options::{self, MountOption, MountOptionGroup};

#[cfg(not(feature = "no-mount"))]
pub(crate) fn mount(mountpoint: &Path, options: &[MountOption]) -> io::Result<File> {
    let fuse_device_name = "/dev/fuse";

    let mountpoint_mode = std::fs::metadata(mountpoint)?.permissions().mode();

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(fuse_device_name)
        .map_err(|error| {
            if error.kind() == io::ErrorKind::NotFound {
                log::warn!("{fuse_device_name} not found; is the fuse kernel module loaded?");
            }
            error
        })?;

    let mut mount_string = format!(
        "fd={},rootmode={:o},user_id={},group_id={}",
        file.as_raw_fd(),
        mountpoint_mode,
        nix::unistd::getuid(),
        nix::unistd::getgid(),
    );
    for option in options
        .iter()
        .filter(|o| mount_options::option_group(o) == MountOptionGroup::KernelOption)
    {
        mount_string.push(',');
        mount_string.push_str(&mount_options::option_to_string(option));
    }

    let mut flags: libc::c_ulong = 0;
    if !options.contains(&MountOption::Dev) {
        flags |= libc::MS_NODEV;
    }
    if !options.contains(&MountOption::Suid) {
        flags |= libc::MS_NOSUID;
    }
    for option in options
        .iter()
        .filter(|o| mount_options::option_group(o) == MountOptionGroup::KernelFlag)
    {
        flags |= mount_options::option_to_flag(option);
    }

    let source = CString::new(fuse_device_name).unwrap();
    let target = CString::new(mountpoint.as_os_str().as_bytes())?;
    let fstype = CString::new("fuse").unwrap();
    let c_mount_string = CString::new(mount_string.clone()).unwrap();

    let result = unsafe {
        libc::mount(
            source.as_ptr(),
            target.as_ptr(),
            fstype.as_ptr(),
            flags,
            c_mount_string.as_ptr() as *const libc::c_void,
        )
    };
    if result == -1 {
        return Err(io::Error::last_os_error());
    }

    Ok(file)
}

#[cfg(feature = "no-mount")]
pub(crate) fn mount(_mountpoint: &Path, _options: &[MountOption]) -> io::Result<File> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "direct mount() is disabled by the no-mount feature",
    ))
}

#[cfg(not(feature = "no-mount"))]
pub(crate) fn unmount(mountpoint: &Path) -> io::Result<()> {
    let target = CString::new(mountpoint.as_os_str().as_bytes())?;
    let result = unsafe { libc::umount2(target.as_ptr(), 0) };
    if result == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(feature = "no-mount")]
pub(crate) fn unmount(_mountpoint: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "direct umount() is disabled by the no-mount feature",
    ))
}
