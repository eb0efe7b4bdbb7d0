//! Capability gatekeeper: the pipeline keeps exactly the capabilities it
//! needs (`CAP_SYS_ADMIN` for mount/umount, `CAP_CHOWN` for the final
//! ownership fixups) in the effective set and nothing else, then seals the
//! process irreversibly once the jail is built.
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use caps::{CapSet, CapsHashSet, Capability};
use nix::mount::{MntFlags, MsFlags};
use nix::unistd::{Gid, Uid};

use crate::syscall::Syscall;

fn required_caps() -> CapsHashSet {
    let mut set = CapsHashSet::new();
    set.insert(Capability::CAP_SYS_ADMIN);
    set.insert(Capability::CAP_CHOWN);
    set
}

/// Owns the process' capability state for the lifetime of the jail pipeline.
///
/// `drop_caps` brings the effective set down to [`required_caps`] right after
/// the child is spawned. `cap_mount`/`cap_umount2`/`cap_chown` run a single
/// syscall with the capability it needs confirmed present, restoring
/// whatever was effective beforehand on every exit path. `drop_caps_forever`
/// consumes the gatekeeper, so no wrapper call can be written against it
/// afterwards -- the compiler enforces that sealing is terminal.
pub struct CapabilityGatekeeper {
    syscall: Box<dyn Syscall>,
    effective: CapsHashSet,
}

impl CapabilityGatekeeper {
    /// Takes ownership of the syscall handle and records the effective set
    /// the child inherited from its parent, without altering it.
    pub fn new(syscall: Box<dyn Syscall>) -> Result<Self> {
        let effective =
            caps::read(None, CapSet::Effective).context("failed to read effective capabilities")?;
        Ok(Self { syscall, effective })
    }

    #[cfg(test)]
    fn with_effective(syscall: Box<dyn Syscall>, effective: CapsHashSet) -> Self {
        Self { syscall, effective }
    }

    /// Lowers the effective set to exactly what the pipeline needs. Called
    /// once, immediately after namespace setup and before anything else.
    pub fn drop_caps(&mut self) -> Result<()> {
        log::debug!("dropping effective capabilities to the pipeline minimum");
        self.set_effective(required_caps())
    }

    /// Clears both the effective and permitted sets, optionally setting
    /// `no_new_privs`, and consumes `self`. After this call nothing in the
    /// process can regain a capability it does not already hold in its
    /// bounding set -- there is no going back.
    pub fn drop_caps_forever(mut self, set_no_new_privs: bool) -> Result<()> {
        log::debug!("dropping all capabilities permanently");
        self.set_effective(CapsHashSet::new())?;
        self.syscall
            .set_capability(CapSet::Permitted, &CapsHashSet::new())
            .map_err(|e| anyhow!("failed to clear permitted capabilities: {e}"))?;

        if set_no_new_privs {
            prctl::set_no_new_privileges(true)
                .map_err(|errno| anyhow!("failed to set no_new_privs (errno {errno})"))?;
        }
        Ok(())
    }

    /// Runs `mount(2)` with `CAP_SYS_ADMIN` confirmed present.
    pub fn cap_mount(
        &mut self,
        source: Option<&Path>,
        target: &Path,
        fstype: Option<&str>,
        flags: MsFlags,
        data: Option<&str>,
    ) -> Result<()> {
        self.with_elevated(Capability::CAP_SYS_ADMIN, "mount", |syscall| {
            syscall.mount(source, target, fstype, flags, data)
        })
        .with_context(|| format!("failed to mount onto {}", target.display()))
    }

    /// Runs `umount2(2)` with `CAP_SYS_ADMIN` confirmed present. A lazy
    /// detach against a path that is no longer a mount point (`EINVAL`) is
    /// swallowed, since the shaper issues detaches speculatively.
    pub fn cap_umount2(&mut self, target: &Path, flags: MntFlags) -> Result<()> {
        let result = self.with_elevated(Capability::CAP_SYS_ADMIN, "umount2", |syscall| {
            match syscall.umount2(target, flags) {
                Err(nix::errno::Errno::EINVAL) => Ok(()),
                other => other,
            }
        });
        result.with_context(|| format!("failed to unmount {}", target.display()))
    }

    /// Runs `chown(2)` with `CAP_CHOWN` confirmed present.
    pub fn cap_chown(&mut self, path: &Path, owner: Uid, group: Gid) -> Result<()> {
        self.with_elevated(Capability::CAP_CHOWN, "chown", |syscall| {
            syscall.chown(path, owner, group)
        })
        .with_context(|| format!("failed to chown {}", path.display()))
    }

    fn set_effective(&mut self, set: CapsHashSet) -> Result<()> {
        self.syscall
            .set_capability(CapSet::Effective, &set)
            .map_err(|e| anyhow!("failed to set effective capabilities to {set:?}: {e}"))?;
        self.effective = set;
        Ok(())
    }

    fn with_elevated<T>(
        &mut self,
        cap: Capability,
        op: &str,
        f: impl FnOnce(&dyn Syscall) -> Result<T, nix::errno::Errno>,
    ) -> Result<T> {
        let prior = self.effective.clone();
        let needs_raise = !prior.contains(&cap);
        if needs_raise {
            let mut raised = prior.clone();
            raised.insert(cap);
            self.set_effective(raised)
                .with_context(|| format!("failed to raise {cap:?} for {op}"))?;
        }

        let result = f(self.syscall.as_ref());

        if needs_raise {
            self.set_effective(prior)
                .with_context(|| format!("failed to restore capabilities after {op}"))?;
        }

        result.map_err(|errno| anyhow!("{op} failed: {errno}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syscall::test::TestHelperSyscall;
    use std::path::PathBuf;

    fn gatekeeper_with(effective: CapsHashSet) -> CapabilityGatekeeper {
        let syscall = Box::new(TestHelperSyscall::default());
        CapabilityGatekeeper::with_effective(syscall, effective)
    }

    #[test]
    fn drop_caps_lowers_effective_to_required_set() {
        let mut gate = gatekeeper_with(caps::all());
        gate.drop_caps().unwrap();
        assert_eq!(gate.effective, required_caps());
    }

    #[test]
    fn cap_mount_is_a_noop_raise_when_already_armed() {
        let mut gate = gatekeeper_with(required_caps());
        gate.cap_mount(None, Path::new("/mnt"), None, MsFlags::MS_BIND, None)
            .unwrap();
        assert_eq!(gate.effective, required_caps());
    }

    #[test]
    fn cap_chown_restores_effective_set_when_cap_was_missing() {
        let mut gate = gatekeeper_with(CapsHashSet::new());
        gate.cap_chown(Path::new("/home/app"), Uid::from_raw(0), Gid::from_raw(0))
            .unwrap();
        assert_eq!(gate.effective, CapsHashSet::new());
    }

    #[test]
    fn cap_umount2_tolerates_not_a_mount_point() {
        struct AlwaysEinval;
        impl Syscall for AlwaysEinval {
            fn as_any(&self) -> &dyn std::any::Any {
                self
            }
            fn mount(
                &self,
                _: Option<&Path>,
                _: &Path,
                _: Option<&str>,
                _: MsFlags,
                _: Option<&str>,
            ) -> Result<(), nix::errno::Errno> {
                Ok(())
            }
            fn umount2(&self, _: &Path, _: MntFlags) -> Result<(), nix::errno::Errno> {
                Err(nix::errno::Errno::EINVAL)
            }
            fn chown(&self, _: &Path, _: Uid, _: Gid) -> Result<(), nix::errno::Errno> {
                Ok(())
            }
            fn set_capability(
                &self,
                _: CapSet,
                _: &CapsHashSet,
            ) -> Result<(), caps::errors::CapsError> {
                Ok(())
            }
        }

        let mut gate =
            CapabilityGatekeeper::with_effective(Box::new(AlwaysEinval), required_caps());
        assert!(gate
            .cap_umount2(&PathBuf::from("/scratch/swap"), MntFlags::MNT_DETACH)
            .is_ok());
    }

    #[test]
    fn drop_caps_forever_consumes_the_gatekeeper() {
        let gate = gatekeeper_with(required_caps());
        assert!(gate.drop_caps_forever(true).is_ok());
        // `gate` has moved; a second call would not compile, which is the point.
    }
}
