//! An interface trait so that the rest of the jail pipeline can issue the
//! handful of privileged syscalls it needs without depending on whether it
//! is really running as root or being exercised by a test double.
use std::{any::Any, path::Path};

use caps::{errors::CapsError, CapSet, CapsHashSet};
use nix::mount::MsFlags;
use nix::unistd::{Gid, Uid};

use crate::syscall::{linux::LinuxSyscall, test::TestHelperSyscall};

/// The syscalls the jail pipeline issues while it still holds capabilities.
/// Every method here corresponds to one syscall; none of them loop or retry.
pub trait Syscall {
    fn as_any(&self) -> &dyn Any;

    fn mount(
        &self,
        source: Option<&Path>,
        target: &Path,
        fstype: Option<&str>,
        flags: MsFlags,
        data: Option<&str>,
    ) -> Result<(), nix::errno::Errno>;

    fn umount2(&self, target: &Path, flags: nix::mount::MntFlags) -> Result<(), nix::errno::Errno>;

    fn chown(&self, path: &Path, owner: Uid, group: Gid) -> Result<(), nix::errno::Errno>;

    fn set_capability(&self, cset: CapSet, value: &CapsHashSet) -> Result<(), CapsError>;
}

pub fn create_syscall() -> Box<dyn Syscall> {
    if cfg!(test) {
        Box::new(TestHelperSyscall::default())
    } else {
        Box::new(LinuxSyscall)
    }
}
