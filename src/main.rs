//! appcell: a per-application sandbox launcher.
//!
//! Composes a mount, PID and (optionally) network namespace around a single
//! program, replaces its view of `/tmp`, `/var/tmp`, `/home`, `/dev/pts` and
//! `/dev/shm`, and execs it with its standard streams attached to the
//! invoking terminal.
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{self, Pid};

use appcell::config::JailConfig;
use appcell::namespaces::{namespace_flags, write_id_maps};
use appcell::pipeline::{run_pipeline, LaunchOptions};

#[derive(Debug, Parser)]
#[command(name = "appcell", about = "Per-application sandbox launcher")]
struct Cli {
    /// Path to the jail configuration file.
    #[arg(long, default_value = "/etc/appcell/appcell.conf")]
    config: PathBuf,

    /// Give the jailed program its own, empty network namespace.
    #[arg(long)]
    private_network: bool,

    /// Skip setting `no_new_privs` before exec. Rejected unless the config
    /// file's `permit_allow_new_privs` is set.
    #[arg(long)]
    allow_new_privs: bool,

    /// Program to run inside the jail, and its arguments. An interactive
    /// `/bin/sh -i` is used when empty.
    #[arg(trailing_var_arg = true)]
    program: Vec<String>,
}

fn build_launch_options(cli: &Cli, config: &JailConfig) -> Result<LaunchOptions> {
    if cli.allow_new_privs && !config.permit_allow_new_privs {
        anyhow::bail!(
            "--allow-new-privs was requested but {} does not permit it",
            cli.config.display()
        );
    }

    let home = std::env::var_os("HOME")
        .map(PathBuf::from)
        .context("HOME is not set; cannot determine the directory to bind as the jail's home")?;

    let (program, args) = match cli.program.split_first() {
        Some((program, rest)) => {
            let mut args = vec![program.clone()];
            args.extend_from_slice(rest);
            (Some(program.clone()), args)
        }
        None => (None, Vec::new()),
    };

    Ok(LaunchOptions {
        program,
        args,
        home,
        private_network: cli.private_network || config.private_network,
        bind_run_media: config.bind_run_media,
        tmpfs_size: config.max_tmpfs_size.clone(),
        no_new_privs: !cli.allow_new_privs,
    })
}

/// Size of the stack handed to the cloned child. The child only runs the
/// jail pipeline and then execs, so it never needs much.
const CHILD_STACK_SIZE: usize = 1024 * 1024;

/// Clones the jailed child with its namespaces in place from the start (so
/// it becomes PID 1 of its own PID namespace), writes its id maps, and
/// waits for its exit. A blocking pipe handshake makes sure the child does
/// not run the pipeline before its uid/gid maps exist -- without them it
/// would not actually hold any capability inside its own user namespace.
fn spawn_and_run(opts: LaunchOptions) -> Result<i32> {
    let (read_fd, write_fd) = unistd::pipe().context("failed to create the handshake pipe")?;
    let flags = namespace_flags(&opts);
    let uid = unistd::getuid();
    let gid = unistd::getgid();

    let mut stack = vec![0u8; CHILD_STACK_SIZE];
    let mut opts = Some(opts);

    let child_fn = Box::new(move || -> isize {
        let _ = unistd::close(write_fd);

        let mut buf = [0u8; 1];
        if unistd::read(read_fd, &mut buf).is_err() {
            eprintln!("appcell: failed to read the handshake byte");
            return 1;
        }
        let _ = unistd::close(read_fd);

        let opts = opts.take().expect("child callback invoked more than once");
        if let Err(e) = run_pipeline(opts) {
            eprintln!("appcell: {e:?}");
            return 1;
        }
        unreachable!("run_pipeline only returns on error");
    });

    // SAFETY: the new child gets its own address space copy-on-write from
    // this one; `child_fn` only touches data it owns or fds created for
    // this handshake, and never returns to the parent's call stack.
    let child = unsafe { nix::sched::clone(child_fn, &mut stack, flags, Some(libc::SIGCHLD)) }
        .context("failed to clone the jailed child")?;

    let _ = unistd::close(read_fd);
    write_id_maps(child, uid, gid).context("failed to write the child's id maps")?;

    unistd::write(write_fd, &[0u8]).context("failed to send the handshake byte")?;
    let _ = unistd::close(write_fd);

    wait_for_exit(child)
}

fn wait_for_exit(child: Pid) -> Result<i32> {
    match waitpid(child, None).context("failed to wait for the jailed child")? {
        WaitStatus::Exited(_, code) => Ok(code),
        WaitStatus::Signaled(_, signal, _) => Ok(128 + signal as i32),
        other => anyhow::bail!("unexpected wait status for the jailed child: {other:?}"),
    }
}

fn main() {
    appcell::logger::init(None).expect("failed to initialize logging");

    let cli = Cli::parse();

    let config = match JailConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("appcell: refusing to start: {e}");
            std::process::exit(1);
        }
    };

    let opts = match build_launch_options(&cli, &config) {
        Ok(opts) => opts,
        Err(e) => {
            eprintln!("appcell: {e:?}");
            std::process::exit(1);
        }
    };

    match spawn_and_run(opts) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("appcell: {e:?}");
            std::process::exit(1);
        }
    }
}
