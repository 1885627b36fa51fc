//! A `clone(2)` wrapper used instead of `fork` so the container's init
//! process can enter its namespaces directly at creation time.

use anyhow::Context;
use anyhow::Result;
use libc::c_int;
use libc::c_void;
use nix::errno::Errno;
use nix::sched;
use nix::sys;
use nix::sys::mman;
use nix::unistd::Pid;
use std::mem;
use std::ptr;

/// Creates a single new process with `clone_flags` applied immediately,
/// instead of `unshare`-after-`fork`, which would require a second process.
pub fn clone(mut cb: sched::CloneCb, clone_flags: sched::CloneFlags) -> Result<Pid> {
    extern "C" fn callback(data: *mut sched::CloneCb) -> c_int {
        let cb: &mut sched::CloneCb = unsafe { &mut *data };
        (*cb)() as c_int
    }

    let page_size: usize = unsafe {
        match libc::sysconf(libc::_SC_PAGE_SIZE) {
            -1 => 4 * 1024,
            x => x as usize,
        }
    };

    let mut rlimit = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    unsafe { Errno::result(libc::getrlimit(libc::RLIMIT_STACK, &mut rlimit))? };
    let default_stack_size = rlimit.rlim_cur as usize;

    // mmap the child's stack ourselves: clone(2) doesn't set one up like
    // fork does, and exec resets the stack anyway once the trampoline execs.
    let child_stack = unsafe {
        mman::mmap(
            ptr::null_mut(),
            default_stack_size,
            mman::ProtFlags::PROT_READ | mman::ProtFlags::PROT_WRITE,
            mman::MapFlags::MAP_PRIVATE | mman::MapFlags::MAP_ANONYMOUS | mman::MapFlags::MAP_STACK,
            -1,
            0,
        )?
    };

    let signal = sys::signal::Signal::SIGCHLD;
    let combined = clone_flags.bits() | signal as c_int;
    let res = unsafe {
        // One guard page below the stack, same as pthread_create, since the
        // stack grows downward for clone.
        mman::mprotect(child_stack, page_size, mman::ProtFlags::PROT_NONE)
            .with_context(|| "failed to create guard page")?;

        let child_stack_top = child_stack.add(default_stack_size);

        libc::clone(
            mem::transmute(callback as extern "C" fn(*mut Box<dyn FnMut() -> isize>) -> i32),
            child_stack_top,
            combined,
            &mut cb as *mut _ as *mut c_void,
        )
    };
    let pid = Errno::result(res).map(Pid::from_raw)?;

    Ok(pid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use nix::unistd;

    #[test]
    fn clone_enters_new_pid_namespace() -> Result<()> {
        let cb = || -> Result<()> {
            let pid = unistd::getpid();
            assert_eq!(unistd::Pid::from_raw(1), pid, "pid should be 1 inside a new pid namespace");
            Ok(())
        };

        let flags = sched::CloneFlags::CLONE_NEWPID | sched::CloneFlags::CLONE_NEWUSER;
        let pid = super::clone(
            Box::new(|| if cb().is_err() { -1 } else { 0 }),
            flags,
        )?;

        let status = nix::sys::wait::waitpid(pid, None)?;
        if let nix::sys::wait::WaitStatus::Exited(_, exit_code) = status {
            assert_eq!(0, exit_code);
            return Ok(());
        }
        bail!("child did not exit cleanly")
    }

    #[test]
    fn clone_gives_the_child_a_usable_stack() -> Result<()> {
        let flags = sched::CloneFlags::empty();
        let pid = super::clone(
            Box::new(|| {
                let mut array_on_stack = [0u8; 4096];
                array_on_stack.iter_mut().for_each(|x| *x = 0);
                0
            }),
            flags,
        )?;

        let status = nix::sys::wait::waitpid(pid, None)?;
        if let nix::sys::wait::WaitStatus::Exited(_, exit_code) = status {
            assert_eq!(0, exit_code);
            return Ok(());
        }
        bail!("child did not exit cleanly")
    }
}
