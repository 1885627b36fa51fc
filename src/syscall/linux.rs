use std::any::Any;
use std::path::Path;

use nix::fcntl::{open, OFlag};
use nix::mount::{mount, umount2, MntFlags, MsFlags};
use nix::sys::stat::Mode;
use nix::unistd::{close, fchdir, pivot_root, sethostname};

use super::{Syscall, SyscallError};

/// The real syscall implementation, used by `create`/`start` on Linux.
#[derive(Debug, Clone, Default)]
pub struct LinuxSyscall;

impl Syscall for LinuxSyscall {
    fn as_any(&self) -> &dyn Any {
        self
    }

    /// Opens `new_root` before pivoting (so there's a handle back into it
    /// once `/` refers to the stacked-up old root), pivots with the
    /// same-directory trick, unmounts the old root now sitting at `/`, then
    /// `fchdir`s back into the new root via the fd opened up front.
    fn pivot_root(&self, new_root: &Path) -> Result<(), SyscallError> {
        let new_root_fd = open(new_root, OFlag::O_DIRECTORY | OFlag::O_RDONLY, Mode::empty())
            .map_err(|source| SyscallError::PivotOpenRoot {
                new_root: new_root.to_path_buf(),
                source,
            })?;

        let result = pivot_root(new_root, new_root)
            .map_err(|source| SyscallError::PivotRoot {
                new_root: new_root.to_path_buf(),
                source,
            })
            .and_then(|()| umount2(Path::new("/"), MntFlags::MNT_DETACH).map_err(SyscallError::PivotUmount))
            .and_then(|()| fchdir(new_root_fd).map_err(SyscallError::PivotFchdir));

        let _ = close(new_root_fd);
        result
    }

    fn mount(
        &self,
        source: Option<&Path>,
        target: &Path,
        fstype: Option<&str>,
        flags: MsFlags,
        data: Option<&str>,
    ) -> Result<(), SyscallError> {
        mount(source, target, fstype, flags, data).map_err(|err| SyscallError::Mount {
            source_path: source.map(|p| p.to_path_buf()),
            target: target.to_path_buf(),
            fstype: fstype.map(|s| s.to_string()),
            source: err,
        })
    }

    fn set_hostname(&self, hostname: &str) -> Result<(), SyscallError> {
        sethostname(hostname).map_err(|source| SyscallError::SetHostname {
            hostname: hostname.to_string(),
            source,
        })
    }
}
