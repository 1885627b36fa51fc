//! Rootfs setup for the init trampoline (§4.4 steps 4-7): remount `/`
//! private, bind-mount the new root onto itself, `pivot_root`, then perform
//! the spec's mount list.

use std::fs::DirBuilder;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};

use nix::mount::MsFlags;
use thiserror::Error;

use crate::spec::Mount;
use crate::syscall::{Syscall, SyscallError};

const MOUNT_DIR_MODE: u32 = 0o750;

#[derive(Error, Debug)]
pub enum RootfsError {
    #[error("syscall failed during rootfs setup: {0}")]
    Syscall(#[from] SyscallError),
    #[error("failed to create directory {path:?}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Remounts `/` recursively as private, guarding against propagation back to
/// the host before pivoting.
pub fn make_root_private(syscall: &dyn Syscall) -> Result<(), RootfsError> {
    syscall.mount(
        None,
        Path::new("/"),
        None,
        MsFlags::MS_REC | MsFlags::MS_PRIVATE,
        None,
    )?;
    Ok(())
}

/// Bind-mounts `rootfs` onto itself so `pivot_root` has a mount point as its
/// source, then pivots into it with the same-directory trick: the old root
/// ends up stacked at `/` and `Syscall::pivot_root` unmounts it as part of
/// the same call. There is no separate `.old_root` directory to create or
/// remove — that technique belongs to the distinct-`put_old` variant of
/// `pivot_root`, which this runtime doesn't use.
pub fn pivot_into(syscall: &dyn Syscall, rootfs: &Path) -> Result<(), RootfsError> {
    syscall.mount(
        Some(rootfs),
        rootfs,
        None,
        MsFlags::MS_BIND | MsFlags::MS_REC,
        None,
    )?;

    syscall.pivot_root(rootfs)?;

    Ok(())
}

/// Performs the spec's mount list: `mkdir -p` each destination, then mount.
pub fn apply_mounts(syscall: &dyn Syscall, mounts: &[Mount]) -> Result<(), RootfsError> {
    for mount in mounts {
        DirBuilder::new()
            .recursive(true)
            .mode(MOUNT_DIR_MODE)
            .create(&mount.destination)
            .map_err(|source| RootfsError::CreateDir {
                path: mount.destination.clone(),
                source,
            })?;

        syscall.mount(
            Some(&mount.source),
            &mount.destination,
            Some(&mount.typ),
            MsFlags::empty(),
            None,
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syscall::test::TestHelperSyscall;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::tempdir;

    #[test]
    fn make_root_private_remounts_root_recursively_private() {
        let syscall = TestHelperSyscall::default();
        make_root_private(&syscall).unwrap();
        let args = syscall.get_mount_args();
        assert_eq!(args.len(), 1);
        assert_eq!(args[0].target, PathBuf::from("/"));
        assert!(args[0].flags.contains(MsFlags::MS_PRIVATE));
        assert!(args[0].flags.contains(MsFlags::MS_REC));
    }

    #[test]
    fn pivot_into_bind_mounts_then_pivots_with_no_put_old() {
        let dir = tempdir().unwrap();
        let rootfs = dir.path().join("rootfs");
        fs::create_dir(&rootfs).unwrap();
        let syscall = TestHelperSyscall::default();

        pivot_into(&syscall, &rootfs).unwrap();

        let mounts = syscall.get_mount_args();
        assert_eq!(mounts.len(), 1);
        assert_eq!(mounts[0].source.as_deref(), Some(rootfs.as_path()));
        assert_eq!(mounts[0].target, rootfs);
        assert!(mounts[0].flags.contains(MsFlags::MS_BIND));
        assert!(mounts[0].flags.contains(MsFlags::MS_REC));

        let pivots = syscall.get_pivot_root_args();
        assert_eq!(pivots, vec![rootfs]);

        // No .old_root directory is ever created: the same-directory trick
        // leaves nothing under the new root to clean up.
        assert!(!dir.path().join("rootfs/.old_root").exists());
    }

    #[test]
    fn apply_mounts_creates_destination_then_mounts() {
        let dir = tempdir().unwrap();
        let destination = dir.path().join("nested/proc");
        let syscall = TestHelperSyscall::default();
        let mounts = vec![Mount {
            destination: destination.clone(),
            typ: "proc".to_string(),
            source: PathBuf::from("proc"),
        }];

        apply_mounts(&syscall, &mounts).unwrap();

        assert!(destination.is_dir());
        let recorded = syscall.get_mount_args();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].target, destination);
        assert_eq!(recorded[0].fstype.as_deref(), Some("proc"));
    }
}
