//! The mount shaper: detaches propagation, remounts `/proc`, replaces
//! `/tmp`, `/var/tmp` and `/home` with freshly-created overlays, and rebuilds
//! `/dev/pts` and `/dev/shm` so the jail cannot see the host's instances.
use std::path::Path;

use anyhow::{Context, Result};
use nix::mount::{MntFlags, MsFlags};
use nix::sys::stat::Mode;

use crate::capabilities::CapabilityGatekeeper;
use crate::scratch::ScratchRoot;
use crate::utils::create_dir_all_with_mode;

/// Detaches the mount namespace's root from the host's propagation tree, so
/// that the jail's subsequent mounts do not leak onto the host and the
/// host's later mounts do not leak into the jail in ways we didn't ask for.
/// Must run before any other mount operation.
pub(crate) fn detach_propagation(gate: &mut CapabilityGatekeeper) -> Result<()> {
    gate.cap_mount(
        None,
        Path::new("/"),
        None,
        MsFlags::MS_REC | MsFlags::MS_SLAVE,
        None,
    )
    .context("failed to make / a slave mount")
}

/// Unmounts and remounts a fresh `/proc`. Safe because the jail has its own
/// PID namespace, so the new `/proc` cannot describe processes outside it.
pub(crate) fn remount_proc(gate: &mut CapabilityGatekeeper) -> Result<()> {
    let proc = Path::new("/proc");
    gate.cap_umount2(proc, MntFlags::MNT_DETACH)?;
    gate.cap_mount(Some(Path::new("proc")), proc, Some("proc"), MsFlags::empty(), None)
        .context("failed to mount a fresh /proc")?;
    crate::utils::ensure_procfs(proc)
}

/// Replaces `target` with a freshly created, empty directory of `mode`,
/// staged through the scratch root so the placeholder can be built up
/// before it is swung into place. Used for `/tmp`, `/var/tmp` and `/home`.
pub(crate) fn overlay_empty_dir(
    gate: &mut CapabilityGatekeeper,
    scratch: &ScratchRoot,
    name: &str,
    target: &Path,
    mode: Mode,
) -> Result<()> {
    let placeholder = scratch.join(name);
    create_dir_all_with_mode(&placeholder, 0, mode)
        .with_context(|| format!("failed to create placeholder for {}", target.display()))?;

    gate.cap_umount2(target, MntFlags::MNT_DETACH)?;
    gate.cap_mount(Some(placeholder.as_path()), target, None, MsFlags::MS_BIND, None)
        .with_context(|| format!("failed to bind the {} placeholder", target.display()))?;
    gate.cap_mount(None, target, None, MsFlags::MS_PRIVATE, None)
        .with_context(|| format!("failed to make {} a private mount", target.display()))
}

/// Rebuilds `/dev/pts` as a fresh instance so ptys allocated by the host are
/// invisible to the jail, and rebinds `/dev/ptmx` onto the new instance's
/// cloning device.
pub(crate) fn rebuild_devpts(gate: &mut CapabilityGatekeeper) -> Result<()> {
    let devpts = Path::new("/dev/pts");
    gate.cap_umount2(devpts, MntFlags::MNT_DETACH)?;
    gate.cap_mount(
        Some(Path::new("devpts")),
        devpts,
        Some("devpts"),
        MsFlags::empty(),
        Some("newinstance,gid=5,mode=620,ptmxmode=0666"),
    )
    .context("failed to mount a fresh devpts instance")?;

    gate.cap_mount(
        Some(Path::new("/dev/pts/ptmx")),
        Path::new("/dev/ptmx"),
        None,
        MsFlags::MS_BIND,
        None,
    )
    .context("failed to bind /dev/pts/ptmx onto /dev/ptmx")
}

/// Rebuilds `/dev/shm` as a fresh tmpfs, optionally ceilinged at
/// `size_option` (a `mount(2)` `size=` data string, e.g. `"size=64m"`).
pub(crate) fn rebuild_shm(gate: &mut CapabilityGatekeeper, size_option: Option<&str>) -> Result<()> {
    let shm = Path::new("/dev/shm");
    gate.cap_umount2(shm, MntFlags::MNT_DETACH)?;

    let data = match size_option {
        Some(size) => format!("mode=1777,uid=0,gid=0,{size}"),
        None => "mode=1777,uid=0,gid=0".to_string(),
    };

    gate.cap_mount(
        Some(Path::new("shm")),
        shm,
        Some("tmpfs"),
        MsFlags::MS_NODEV | MsFlags::MS_NOSUID,
        Some(&data),
    )
    .context("failed to mount a fresh /dev/shm")
}

/// Bind-mounts the host's `/run/media` read-only into the jail, when it
/// exists. Missing on the host is tolerated since this overlay is a
/// convenience, not a security boundary; any failure once the source is
/// confirmed present is fatal like any other mount step.
pub(crate) fn overlay_run_media(gate: &mut CapabilityGatekeeper, scratch: &ScratchRoot) -> Result<()> {
    let host_run_media = Path::new("/run/media");
    if !host_run_media.exists() {
        log::debug!("/run/media does not exist on the host, skipping optional overlay");
        return Ok(());
    }

    let placeholder = scratch.join("run-media");
    crate::utils::create_dir_all(&placeholder)?;

    gate.cap_mount(
        Some(host_run_media),
        &placeholder,
        None,
        MsFlags::MS_BIND,
        None,
    )
    .context("failed to bind the host's /run/media")?;
    gate.cap_mount(None, &placeholder, None, MsFlags::MS_PRIVATE, None)
        .context("failed to make /run/media a private mount")?;

    crate::utils::create_dir_all(host_run_media)?;
    gate.cap_mount(
        Some(placeholder.as_path()),
        host_run_media,
        None,
        MsFlags::MS_MOVE,
        None,
    )
    .context("failed to move /run/media into place")?;
    gate.cap_mount(None, host_run_media, None, MsFlags::MS_RDONLY | MsFlags::MS_REMOUNT | MsFlags::MS_BIND, None)
        .context("failed to remount /run/media read-only")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syscall::test::TestHelperSyscall;
    use crate::utils::TempDir;

    fn gate() -> CapabilityGatekeeper {
        let syscall = Box::new(TestHelperSyscall::default());
        let mut gate = CapabilityGatekeeper::new(syscall).unwrap();
        gate.drop_caps().unwrap();
        gate
    }

    #[test]
    fn detach_propagation_issues_rslave_on_root() {
        detach_propagation(&mut gate()).unwrap();
    }

    #[test]
    fn remount_proc_reinstalls_a_real_procfs() {
        remount_proc(&mut gate()).unwrap();
    }

    #[test]
    fn rebuild_devpts_binds_ptmx_after_mounting_instance() {
        rebuild_devpts(&mut gate()).unwrap();
    }

    #[test]
    fn rebuild_shm_includes_size_option_when_given() {
        rebuild_shm(&mut gate(), Some("size=64m")).unwrap();
    }

    #[test]
    fn overlay_empty_dir_creates_placeholder_with_requested_mode() {
        let dir = TempDir::new(std::env::temp_dir().join("appcell-mount-test")).unwrap();
        let scratch = ScratchRoot::for_test(dir.path().to_path_buf());
        let target = dir.path().join("tmp-target");
        std::fs::create_dir_all(&target).unwrap();

        overlay_empty_dir(&mut gate(), &scratch, "tmp", &target, Mode::from_bits_truncate(0o1777))
            .unwrap();

        let placeholder = scratch.join("tmp");
        let metadata = std::fs::metadata(&placeholder).unwrap();
        assert!(metadata.is_dir());
    }

    #[test]
    fn overlay_run_media_is_a_noop_when_absent_on_host() {
        // /run/media does not exist in the sandboxed test environment, so
        // this should return without issuing any mount calls at all.
        let dir = TempDir::new(std::env::temp_dir().join("appcell-mount-test-run-media")).unwrap();
        let scratch = ScratchRoot::for_test(dir.path().to_path_buf());
        overlay_run_media(&mut gate(), &scratch).unwrap();
    }
}
