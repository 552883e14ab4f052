use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the sync pipeline.
///
/// Per-account, per-role, per-region, per-cluster and per-namespace-probe
/// failures are not represented here: they are logged and counted where they
/// happen and never abort a run.
#[derive(Error, Debug)]
pub enum Error {
    /// No cached SSO token matched the configured start URL/region, or every
    /// candidate expires within a minute.
    #[error("aws sso login required (token missing or expired); run `aws sso login --sso-session rift`")]
    SsoNotLoggedIn,

    #[error("home directory could not be determined")]
    NoHomeDir,

    #[error("unable to read sso token cache at {path:?}")]
    TokenStoreUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("list accounts")]
    ListAccounts(#[source] anyhow::Error),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("failed to read {path:?}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path:?}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path:?}")]
    Parse {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("invalid kubeconfig at {path:?}")]
    Kubeconfig {
        path: PathBuf,
        #[source]
        source: kube::config::KubeconfigError,
    },

    #[error("failed to encode document")]
    Encode(#[source] anyhow::Error),

    #[error("aws sso login failed")]
    Login(#[source] anyhow::Error),

    #[error("operation cancelled")]
    Cancelled,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// True when the caller should re-authenticate rather than retry.
    ///
    /// A token cache directory that does not exist yet means no login ever
    /// happened on this machine.
    pub fn is_login_required(&self) -> bool {
        match self {
            Error::SsoNotLoggedIn => true,
            Error::TokenStoreUnreadable { source, .. } => {
                source.kind() == std::io::ErrorKind::NotFound
            }
            _ => false,
        }
    }
}
