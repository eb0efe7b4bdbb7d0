//! Parent-side namespace plumbing: which `clone(2)` flags to pass, and how
//! to write the child's uid/gid maps once it exists but before it proceeds
//! past the handshake.
use anyhow::{Context, Result};
use nix::sched::CloneFlags;
use nix::unistd::{Gid, Pid, Uid};

use crate::pipeline::LaunchOptions;

/// Always-on: a private mount tree, a private PID namespace so `/proc`
/// doesn't leak the host, and a user namespace so the child can hold
/// capabilities without actually being root on the host.
const BASE_FLAGS: CloneFlags =
    CloneFlags::from_bits_truncate(CloneFlags::CLONE_NEWUSER.bits() | CloneFlags::CLONE_NEWNS.bits() | CloneFlags::CLONE_NEWPID.bits());

/// Assembles the `clone(2)` flags for the jailed child. A network namespace
/// is added when the caller asked for private networking; otherwise the
/// child shares the host's network namespace.
pub fn namespace_flags(opts: &LaunchOptions) -> CloneFlags {
    let mut flags = BASE_FLAGS;
    if opts.private_network {
        flags |= CloneFlags::CLONE_NEWNET;
    }
    flags
}

/// Writes the child's uid/gid maps from the parent, mapping the invoking
/// user to root inside the child's new user namespace. `setgroups` must be
/// set to `deny` before `gid_map` is written on kernels vulnerable to
/// CVE-2014-8989, where an unprivileged process could otherwise use
/// `gid_map` to join arbitrary groups.
pub fn write_id_maps(pid: Pid, uid: Uid, gid: Gid) -> Result<()> {
    let proc_dir = format!("/proc/{pid}");

    std::fs::write(format!("{proc_dir}/setgroups"), b"deny")
        .with_context(|| format!("failed to write {proc_dir}/setgroups"))?;

    std::fs::write(format!("{proc_dir}/uid_map"), format!("0 {uid} 1"))
        .with_context(|| format!("failed to write {proc_dir}/uid_map"))?;

    std::fs::write(format!("{proc_dir}/gid_map"), format!("0 {gid} 1"))
        .with_context(|| format!("failed to write {proc_dir}/gid_map"))?;

    Ok(())
}
