//! The home binder: captures the invoking user's real home directory before
//! the mount shaper replaces `/home` with an empty overlay, then installs it
//! at its target path once that overlay is in place.
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use nix::mount::MsFlags;
use nix::sys::stat::Mode;

use crate::capabilities::CapabilityGatekeeper;
use crate::scratch::ScratchRoot;
use crate::utils::create_dir_all_with_mode;

/// The real home directory, captured into the scratch root as a private
/// mount, not yet installed under the jail's (still host-visible) `/home`.
pub struct CapturedHome {
    placeholder: PathBuf,
    target: PathBuf,
}

/// Binds `host_home` into the scratch root. Must run before [`crate::mount::overlay_empty_dir`]
/// replaces `/home`, since after that the host's home directory is no
/// longer reachable by path.
pub(crate) fn capture_home(
    gate: &mut CapabilityGatekeeper,
    scratch: &ScratchRoot,
    host_home: &Path,
) -> Result<CapturedHome> {
    let placeholder = scratch.join("home-src");
    create_dir_all_with_mode(&placeholder, 0, Mode::from_bits_truncate(0o700))
        .with_context(|| format!("failed to create placeholder for {}", host_home.display()))?;

    gate.cap_mount(Some(host_home), &placeholder, None, MsFlags::MS_BIND, None)
        .with_context(|| format!("failed to bind {}", host_home.display()))?;
    gate.cap_mount(None, &placeholder, None, MsFlags::MS_PRIVATE, None)
        .context("failed to make the captured home directory a private mount")?;

    let target = Path::new("/home").join(
        host_home
            .file_name()
            .context("home directory path has no final component")?,
    );

    Ok(CapturedHome { placeholder, target })
}

impl CapturedHome {
    /// Creates the user's directory under the jail's fresh `/home` overlay
    /// and move-mounts the captured real home directory onto it.
    pub fn install(self, gate: &mut CapabilityGatekeeper) -> Result<PathBuf> {
        create_dir_all_with_mode(&self.target, 0, Mode::from_bits_truncate(0o755))
            .with_context(|| format!("failed to create {}", self.target.display()))?;

        gate.cap_mount(Some(self.placeholder.as_path()), &self.target, None, MsFlags::MS_MOVE, None)
            .with_context(|| format!("failed to move the captured home directory onto {}", self.target.display()))?;

        Ok(self.target)
    }
}
