//! The pipeline driver: runs the jail construction steps in the one order
//! that is safe, inside the child after namespace creation. `run_pipeline`
//! cannot be partially invoked from outside this crate; the individual
//! shaper/rebinder/binder operations are `pub(crate)` so tests can drive
//! them directly without going through the whole sequence.
use std::path::PathBuf;

use anyhow::{Context, Result};
use nix::unistd::{Gid, Uid};

use crate::capabilities::CapabilityGatekeeper;
use crate::home;
use crate::mount;
use crate::scratch::ScratchRoot;
use crate::syscall::create_syscall;
use crate::tty;

/// Everything the pipeline needs to build and launch the jail, resolved by
/// the launch driver from CLI flags and [`crate::config::JailConfig`]
/// before any namespace is created.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    /// Program to exec once the jail is built. `None` falls back to an
    /// interactive `/bin/sh -i`.
    pub program: Option<String>,
    /// Arguments passed to `program`, argv[0] included.
    pub args: Vec<String>,
    /// The invoking user's real home directory, captured before `/home` is
    /// replaced and installed under the jail's fresh `/home` overlay.
    pub home: PathBuf,
    /// Whether the child gets its own, empty network namespace.
    pub private_network: bool,
    /// Whether `/run/media` is bound read-only into the jail, if present.
    pub bind_run_media: bool,
    /// `mount(2)` `size=` ceiling for `/dev/shm`, e.g. `Some("64m".into())`.
    pub tmpfs_size: Option<String>,
    /// Final decision on whether `no_new_privs` is set before exec. Decided
    /// by the launch driver from `JailConfig::permit_allow_new_privs` and
    /// any CLI override; the pipeline itself never second-guesses it.
    pub no_new_privs: bool,
}

impl LaunchOptions {
    #[cfg(test)]
    pub(crate) fn for_test(private_network: bool) -> Self {
        Self {
            program: None,
            args: Vec::new(),
            home: PathBuf::from("/home/appuser"),
            private_network,
            bind_run_media: false,
            tmpfs_size: None,
            no_new_privs: true,
        }
    }
}

/// Runs the full jail construction pipeline and execs into `opts.program`
/// (or an interactive shell). Only returns on failure -- a successful run
/// replaces the calling process' image and never comes back here.
pub fn run_pipeline(opts: LaunchOptions) -> Result<()> {
    let mut gate = CapabilityGatekeeper::new(create_syscall())
        .context("failed to initialize the capability gatekeeper")?;
    gate.drop_caps().context("failed to drop to the pipeline's minimum capabilities")?;

    mount::detach_propagation(&mut gate)?;

    let mut scratch = ScratchRoot::materialize(&mut gate)
        .context("failed to materialize the scratch root")?;

    let captured_home = home::capture_home(&mut gate, &scratch, &opts.home)
        .context("failed to capture the home directory")?;
    let captured_tty =
        tty::snapshot_tty(&mut gate, &scratch).context("failed to capture the controlling terminal")?;

    mount::remount_proc(&mut gate)?;
    mount::overlay_empty_dir(
        &mut gate,
        &scratch,
        "tmp",
        std::path::Path::new("/tmp"),
        nix::sys::stat::Mode::from_bits_truncate(0o1777),
    )?;
    mount::overlay_empty_dir(
        &mut gate,
        &scratch,
        "vartmp",
        std::path::Path::new("/var/tmp"),
        nix::sys::stat::Mode::from_bits_truncate(0o1777),
    )?;
    mount::overlay_empty_dir(
        &mut gate,
        &scratch,
        "home",
        std::path::Path::new("/home"),
        nix::sys::stat::Mode::from_bits_truncate(0o755),
    )?;
    mount::rebuild_devpts(&mut gate)?;
    mount::rebuild_shm(&mut gate, opts.tmpfs_size.as_deref())?;

    captured_tty
        .finalize(&mut gate)
        .context("failed to finalize the controlling terminal")?;
    captured_home
        .install(&mut gate)
        .context("failed to install the home directory")?;

    if opts.bind_run_media {
        mount::overlay_run_media(&mut gate, &scratch)?;
    }

    scratch.retract(&mut gate).context("failed to retract the scratch root")?;

    let root = Uid::from_raw(0);
    let root_group = Gid::from_raw(0);
    gate.cap_chown(std::path::Path::new("/tmp"), root, root_group)?;
    gate.cap_chown(std::path::Path::new("/var/tmp"), root, root_group)?;
    gate.cap_chown(std::path::Path::new("/home"), root, root_group)?;

    gate.drop_caps_forever(opts.no_new_privs)
        .context("failed to permanently drop capabilities")?;

    match opts.program {
        Some(program) => crate::utils::do_exec(&program, &opts.args),
        None => crate::utils::do_exec("/bin/sh", &["/bin/sh".to_string(), "-i".to_string()]),
    }
}

