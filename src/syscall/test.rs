use caps::{CapSet, CapsHashSet};
use nix::mount::{MntFlags, MsFlags};
use nix::unistd::{Gid, Uid};
use std::{
    any::Any,
    cell::RefCell,
    path::{Path, PathBuf},
};

use super::Syscall;

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct MountArgs {
    pub source: Option<PathBuf>,
    pub target: PathBuf,
    pub fstype: Option<String>,
    pub flags: MsFlags,
    pub data: Option<String>,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct UmountArgs {
    pub target: PathBuf,
    pub flags: MntFlags,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ChownArgs {
    pub path: PathBuf,
    pub owner: Uid,
    pub group: Gid,
}

#[derive(Clone, Default)]
pub struct TestHelperSyscall {
    mount_args: RefCell<Vec<MountArgs>>,
    umount_args: RefCell<Vec<UmountArgs>>,
    chown_args: RefCell<Vec<ChownArgs>>,
    set_capability_args: RefCell<Vec<(CapSet, CapsHashSet)>>,
}

impl Syscall for TestHelperSyscall {
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
        self.mount_args.borrow_mut().push(MountArgs {
            source: source.map(|x| x.to_owned()),
            target: target.to_owned(),
            fstype: fstype.map(|x| x.to_owned()),
            flags,
            data: data.map(|x| x.to_owned()),
        });
        Ok(())
    }

    fn umount2(&self, target: &Path, flags: MntFlags) -> Result<(), nix::errno::Errno> {
        self.umount_args.borrow_mut().push(UmountArgs {
            target: target.to_owned(),
            flags,
        });
        Ok(())
    }

    fn chown(&self, path: &Path, owner: Uid, group: Gid) -> Result<(), nix::errno::Errno> {
        self.chown_args.borrow_mut().push(ChownArgs {
            path: path.to_owned(),
            owner,
            group,
        });
        Ok(())
    }

    fn set_capability(
        &self,
        cset: CapSet,
        value: &CapsHashSet,
    ) -> Result<(), caps::errors::CapsError> {
        self.set_capability_args
            .borrow_mut()
            .push((cset, value.clone()));
        Ok(())
    }
}

impl TestHelperSyscall {
    pub fn get_mount_args(&self) -> Vec<MountArgs> {
        self.mount_args.borrow().clone()
    }

    pub fn get_umount_args(&self) -> Vec<UmountArgs> {
        self.umount_args.borrow().clone()
    }

    pub fn get_chown_args(&self) -> Vec<ChownArgs> {
        self.chown_args.borrow().clone()
    }

    pub fn get_set_capability_args(&self) -> Vec<(CapSet, CapsHashSet)> {
        self.set_capability_args.borrow().clone()
    }
}
