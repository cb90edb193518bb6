//! Bidirectional mapping between this crate's abstract [`FileType`] and the
//! POSIX `S_IFMT` nibble carried in the wire's `mode` fields.

use crate::FileType;

/// Decodes the `S_IFMT` nibble of a kernel-supplied mode into a file type plus
/// the remaining permission bits. Falls back to `CharDevice` when the nibble
/// doesn't match any recognized type — this only happens for malformed input,
/// since every request that carries a type nibble constructs it itself.
pub(crate) fn kind_and_perm_from_mode(mode: u32) -> (FileType, u16) {
    let perm = (mode & 0o7777) as u16;
    let kind = match mode & libc::S_IFMT as u32 {
        m if m == libc::S_IFREG as u32 => FileType::RegularFile,
        m if m == libc::S_IFDIR as u32 => FileType::Directory,
        m if m == libc::S_IFCHR as u32 => FileType::CharDevice,
        m if m == libc::S_IFBLK as u32 => FileType::BlockDevice,
        m if m == libc::S_IFIFO as u32 => FileType::NamedPipe,
        m if m == libc::S_IFLNK as u32 => FileType::Symlink,
        m if m == libc::S_IFSOCK as u32 => FileType::Socket,
        _ => FileType::CharDevice,
    };
    (kind, perm)
}

/// Encodes a file type and permission bits into a kernel-ready mode word with
/// exactly one `S_IFMT` type bit set.
pub(crate) fn mode_from_kind_and_perm(kind: FileType, perm: u16) -> u32 {
    (match kind {
        FileType::NamedPipe => libc::S_IFIFO,
        FileType::CharDevice => libc::S_IFCHR,
        FileType::BlockDevice => libc::S_IFBLK,
        FileType::Directory => libc::S_IFDIR,
        FileType::RegularFile => libc::S_IFREG,
        FileType::Symlink => libc::S_IFLNK,
        FileType::Socket => libc::S_IFSOCK,
    }) as u32
        | u32::from(perm)
}

/// The kernel dirent `type` tag: the `S_IFMT>>12` encoding.
pub(crate) fn dirent_type(kind: FileType) -> u32 {
    mode_from_kind_and_perm(kind, 0) >> 12
}

#[cfg(test)]
mod tests {
    use super::*;

    const KINDS: [FileType; 7] = [
        FileType::NamedPipe,
        FileType::CharDevice,
        FileType::BlockDevice,
        FileType::Directory,
        FileType::RegularFile,
        FileType::Symlink,
        FileType::Socket,
    ];

    #[test]
    fn round_trip_every_kind_and_perm() {
        for kind in KINDS {
            for perm in [0o000u16, 0o644, 0o755, 0o777, 0o4755, 0o2755] {
                let mode = mode_from_kind_and_perm(kind, perm);
                let (decoded_kind, decoded_perm) = kind_and_perm_from_mode(mode);
                assert_eq!(decoded_kind, kind);
                assert_eq!(decoded_perm, perm);
            }
        }
    }

    #[test]
    fn exactly_one_type_bit_set() {
        for kind in KINDS {
            let mode = mode_from_kind_and_perm(kind, 0o644);
            let type_bits = mode & libc::S_IFMT as u32;
            assert_ne!(type_bits, 0);
        }
    }

    #[test]
    fn dirent_type_matches_shifted_mode() {
        assert_eq!(dirent_type(FileType::Directory), libc::S_IFDIR as u32 >> 12);
        assert_eq!(dirent_type(FileType::RegularFile), libc::S_IFREG as u32 >> 12);
    }
}
