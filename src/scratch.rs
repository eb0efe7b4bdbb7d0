//! The scratch root: a throwaway directory the pipeline binds over itself
//! early on, so that every later step has somewhere to stage a placeholder
//! mount before swinging it into its final position. It is retracted once
//! the home directory and controlling terminal have been moved onto their
//! real targets.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use nix::mount::{MntFlags, MsFlags};

use crate::capabilities::CapabilityGatekeeper;

/// Where the scratch root is bound inside the jail. Chosen to be a path
/// that nothing else in the pipeline touches.
pub const SWAP_DIR: &str = "/.appcell-swap";

/// A bind-mounted scratch directory rooted at [`SWAP_DIR`]. Every relative
/// path handed to the shaper, the tty rebinder and the home binder is
/// resolved against it.
pub struct ScratchRoot {
    mount_point: PathBuf,
    retracted: bool,
}

impl ScratchRoot {
    /// Creates a uniquely-named directory under the host's `/tmp`, binds it
    /// onto `SWAP_DIR`, and chdirs into it so that every subsequent relative
    /// path (`./tmp`, `./home`, `./console`, ...) lands inside the scratch
    /// tree rather than wherever the process happened to start.
    pub(crate) fn materialize(gate: &mut CapabilityGatekeeper) -> Result<Self> {
        let host_dir = std::env::temp_dir().join(format!("appcell-{:016x}", fastrand::u64(..)));
        std::fs::create_dir(&host_dir)
            .with_context(|| format!("failed to create scratch directory {}", host_dir.display()))?;

        let mount_point = PathBuf::from(SWAP_DIR);
        std::fs::create_dir_all(&mount_point)
            .with_context(|| format!("failed to create {}", mount_point.display()))?;

        gate.cap_mount(Some(host_dir.as_path()), &mount_point, None, MsFlags::MS_BIND, None)
            .context("failed to bind the scratch directory onto the swap mount point")?;

        nix::unistd::chdir(&mount_point)
            .with_context(|| format!("failed to chdir into {}", mount_point.display()))?;

        Ok(Self {
            mount_point,
            retracted: false,
        })
    }

    pub fn mount_point(&self) -> &Path {
        &self.mount_point
    }

    /// Resolves a path relative to the scratch root, e.g. `join("console")`.
    pub fn join(&self, name: &str) -> PathBuf {
        self.mount_point.join(name)
    }

    /// Lazily unmounts the scratch root once every placeholder it held has
    /// been moved to its final destination. Must run before the final
    /// capability drop, since it needs `CAP_SYS_ADMIN`.
    pub fn retract(&mut self, gate: &mut CapabilityGatekeeper) -> Result<()> {
        gate.cap_umount2(&self.mount_point, MntFlags::empty())
            .context("failed to unmount the scratch root")?;
        self.retracted = true;
        Ok(())
    }

    /// Builds a `ScratchRoot` over an already-existing directory, skipping
    /// the host-tmp creation and bind mount. Used by other modules' tests so
    /// they can exercise placeholder-building logic against a real,
    /// writable directory without touching [`SWAP_DIR`].
    #[cfg(test)]
    pub(crate) fn for_test(mount_point: PathBuf) -> Self {
        Self {
            mount_point,
            retracted: true,
        }
    }
}

impl Drop for ScratchRoot {
    fn drop(&mut self) {
        if !self.retracted {
            log::warn!(
                "scratch root {} dropped without being retracted",
                self.mount_point.display()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_at(mount_point: &str) -> ScratchRoot {
        ScratchRoot::for_test(PathBuf::from(mount_point))
    }

    #[test]
    fn join_resolves_relative_to_mount_point() {
        let scratch = scratch_at(SWAP_DIR);
        assert_eq!(scratch.join("console"), PathBuf::from(SWAP_DIR).join("console"));
        assert_eq!(scratch.join("home-src"), PathBuf::from(SWAP_DIR).join("home-src"));
    }

    #[test]
    fn mount_point_accessor_matches_constructed_value() {
        let scratch = scratch_at("/.appcell-swap");
        assert_eq!(scratch.mount_point(), Path::new("/.appcell-swap"));
    }
}
