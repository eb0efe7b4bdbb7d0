//! Loads and permission-audits the on-disk jail configuration.
//!
//! The audit mirrors the original implementation's `check_permissions`: the
//! config file, and every directory from its parent up to `/`, must be
//! owned by root and writable by nobody but root. A config file that fails
//! this check is never parsed -- an attacker who can write to the config
//! path or one of its ancestors could otherwise point the launcher at a
//! permissive policy.
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Default location of the jail configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/appcell/appcell.conf";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot stat {path}: {source}")]
    Stat {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path} is not owned by root")]
    NotOwnedByRoot { path: PathBuf },
    #[error("{path} is group- or world-writable")]
    Writable { path: PathBuf },
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// The parsed, permission-audited on-disk jail configuration.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct JailConfig {
    /// Whether a per-invocation `--allow-new-privs` override is honored at
    /// all. Defaults to `false`: `no_new_privs` is always applied unless an
    /// administrator explicitly opts the host into allowing it.
    pub permit_allow_new_privs: bool,
    /// Default value of the private-network flag when the CLI does not
    /// override it.
    pub private_network: bool,
    /// Whether `/run/media` is bind-mounted read-only into the jail
    /// alongside the home directory, when present on the host.
    pub bind_run_media: bool,
    /// `mount(2)` `size=` ceiling applied to the jail's `/dev/shm`, e.g.
    /// `"64m"`. `None` leaves `/dev/shm` unbounded (besides the host's own
    /// tmpfs limits).
    pub max_tmpfs_size: Option<String>,
}

impl JailConfig {
    /// Loads the config file at `path`, auditing its and its ancestors'
    /// ownership and permissions first. A missing file is not an error: it
    /// yields an all-default config, exactly as an absent `Permissions`/
    /// `Defaults` group did in the original ini-based format.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            log::debug!("no config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        check_permissions(path)?;

        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

fn check_permissions(config_path: &Path) -> Result<(), ConfigError> {
    check_file_permissions(config_path)?;
    let parent = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("/"));
    check_directory_permissions(parent)
}

fn check_file_permissions(path: &Path) -> Result<(), ConfigError> {
    let metadata = std::fs::metadata(path).map_err(|source| ConfigError::Stat {
        path: path.to_path_buf(),
        source,
    })?;
    audit_metadata(path, &metadata)
}

/// Walks from `dir` up to `/`, requiring every level to be root-owned and
/// non-group/other-writable.
fn check_directory_permissions(dir: &Path) -> Result<(), ConfigError> {
    let metadata = std::fs::metadata(dir).map_err(|source| ConfigError::Stat {
        path: dir.to_path_buf(),
        source,
    })?;
    audit_metadata(dir, &metadata)?;

    if dir == Path::new("/") {
        return Ok(());
    }

    match dir.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => check_directory_permissions(parent),
        _ => check_directory_permissions(Path::new("/")),
    }
}

fn audit_metadata(path: &Path, metadata: &std::fs::Metadata) -> Result<(), ConfigError> {
    const GROUP_WRITABLE: u32 = 0o020;
    const OTHER_WRITABLE: u32 = 0o002;

    if metadata.uid() != 0 {
        return Err(ConfigError::NotOwnedByRoot {
            path: path.to_path_buf(),
        });
    }
    if metadata.mode() & (GROUP_WRITABLE | OTHER_WRITABLE) != 0 {
        return Err(ConfigError::Writable {
            path: path.to_path_buf(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn missing_config_file_yields_defaults() {
        let path = std::env::temp_dir().join("appcell-config-test-missing.conf");
        let _ = fs::remove_file(&path);
        let config = JailConfig::load(&path).unwrap();
        assert_eq!(config, JailConfig::default());
    }

    #[test]
    fn group_writable_config_file_is_rejected() {
        let path = std::env::temp_dir().join("appcell-config-test-writable.conf");
        fs::write(&path, b"private_network = true\n").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o664)).unwrap();

        let result = JailConfig::load(&path);
        let _ = fs::remove_file(&path);

        match result {
            Err(ConfigError::Writable { .. }) => {}
            Err(ConfigError::NotOwnedByRoot { .. }) => {
                // Test is running as a non-root owner of a tmp file; ownership
                // is checked before writability and fails first, which is
                // still a rejection of the insecure file.
            }
            other => panic!("expected a permission rejection, got {other:?}"),
        }
    }

    #[test]
    fn well_formed_toml_round_trips_through_defaults() {
        let toml_src = r#"
            permit_allow_new_privs = true
            private_network = true
            bind_run_media = true
            max_tmpfs_size = "64m"
        "#;
        let config: JailConfig = toml::from_str(toml_src).unwrap();
        assert!(config.permit_allow_new_privs);
        assert!(config.private_network);
        assert!(config.bind_run_media);
        assert_eq!(config.max_tmpfs_size.as_deref(), Some("64m"));
    }
}
