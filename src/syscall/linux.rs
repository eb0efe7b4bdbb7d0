//! Implements the `Syscall` trait for real Linux systems
use std::any::Any;
use std::path::Path;

use caps::{errors::CapsError, CapSet, Capability, CapsHashSet};
use nix::mount::{mount, umount2, MntFlags, MsFlags};
use nix::unistd::{chown, Gid, Uid};

use super::Syscall;

/// Empty structure to implement the `Syscall` trait for
#[derive(Clone, Copy, Default)]
pub struct LinuxSyscall;

impl Syscall for LinuxSyscall {
    /// To enable dynamic typing,
    /// see https://doc.rust-lang.org/std/any/index.html for more information
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn mount(
        &self,
        source: Option<&Path>,
        target: &Path,
        fstype: Option<&str>,
        flags: MsFlags,
        data: Option<&str>,
    ) -> Result<(), nix::errno::Errno> {
        mount(source, target, fstype, flags, data)
    }

    fn umount2(&self, target: &Path, flags: MntFlags) -> Result<(), nix::errno::Errno> {
        umount2(target, flags)
    }

    fn chown(&self, path: &Path, owner: Uid, group: Gid) -> Result<(), nix::errno::Errno> {
        chown(path, Some(owner), Some(group))
    }

    /// Set capabilities for the calling process. `caps::set` cannot assign
    /// the bounding set wholesale, so it is lowered one capability at a time
    /// by dropping whatever isn't in `value`.
    fn set_capability(&self, cset: CapSet, value: &CapsHashSet) -> Result<(), CapsError> {
        match cset {
            CapSet::Bounding => {
                let all = caps::all();
                for c in all.difference(value) {
                    match c {
                        Capability::CAP_PERFMON
                        | Capability::CAP_CHECKPOINT_RESTORE
                        | Capability::CAP_BPF => {
                            log::warn!("{:?} is not supported.", c);
                            continue;
                        }
                        _ => caps::drop(None, CapSet::Bounding, *c)?,
                    }
                }
                Ok(())
            }
            _ => caps::set(None, cset, value),
        }
    }
}
