use std::any::Any;
use std::path::Path;

use nix::mount::MsFlags;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyscallError {
    #[error("failed to open {new_root:?} for the pivot: {source}")]
    PivotOpenRoot {
        new_root: std::path::PathBuf,
        #[source]
        source: nix::Error,
    },
    #[error("pivot_root({new_root:?}, {new_root:?}) failed: {source}")]
    PivotRoot {
        new_root: std::path::PathBuf,
        #[source]
        source: nix::Error,
    },
    #[error("failed to unmount the old root stacked at /: {0}")]
    PivotUmount(#[source] nix::Error),
    #[error("failed to chdir back into the new root: {0}")]
    PivotFchdir(#[source] nix::Error),
    #[error("mount({source_path:?} -> {target:?}, type {fstype:?}) failed: {source}")]
    Mount {
        source_path: Option<std::path::PathBuf>,
        target: std::path::PathBuf,
        fstype: Option<String>,
        #[source]
        source: nix::Error,
    },
    #[error("sethostname({hostname}) failed: {source}")]
    SetHostname {
        hostname: String,
        #[source]
        source: nix::Error,
    },
}

/// The syscalls the rootfs/init-trampoline path needs. A real implementation
/// backs `create`/`start`; a recording fake backs unit tests.
pub trait Syscall {
    fn as_any(&self) -> &dyn Any;
    /// Pivots into `new_root` using the same-directory trick: stacks the old
    /// root at `/`, unmounts it, and returns with the cwd inside the new
    /// root. Mirrors `examples/containers-youki/src/command/linux.rs`'s
    /// `pivot_rootfs` (open the new root before pivoting, `pivot_root(path,
    /// path)`, `umount2("/", MNT_DETACH)`, `fchdir` back into it) rather than
    /// the distinct-`put_old`-directory technique.
    fn pivot_root(&self, new_root: &Path) -> Result<(), SyscallError>;
    #[allow(clippy::too_many_arguments)]
    fn mount(
        &self,
        source: Option<&Path>,
        target: &Path,
        fstype: Option<&str>,
        flags: MsFlags,
        data: Option<&str>,
    ) -> Result<(), SyscallError>;
    fn set_hostname(&self, hostname: &str) -> Result<(), SyscallError>;
}
