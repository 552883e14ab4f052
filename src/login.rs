//! Wrapper around `aws sso login`.
//!
//! The access token itself is obtained by the AWS CLI; this module only
//! prepares the profile store for it and picks the login syntax the installed
//! CLI understands.

use std::{
    io,
    path::{Path, PathBuf},
    process::Stdio,
};

use anyhow::anyhow;
use tokio::process::Command;
use tracing::{debug, info};

use crate::{
    Error, Result,
    awsconfig::{self, LEGACY_AUTH_PROFILE, SSO_SESSION_NAME},
    config::Config,
};

/// Which login syntax succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginMode {
    /// `aws sso login --sso-session rift`
    SsoSession,
    /// `aws sso login --profile rift-auth`, for CLIs without `--sso-session`.
    LegacyProfile,
}

struct Attempt {
    success: bool,
    status: String,
    stderr: String,
}

/// True when the CLI rejected `--sso-session` as an unknown option.
pub fn supports_only_profile(output: &str) -> bool {
    let text = output.to_lowercase();
    text.contains("unknown options") && text.contains("--sso-session")
}

#[derive(Debug, Clone)]
pub struct SsoLogin {
    command: Vec<String>,
    aws_config: PathBuf,
    no_browser: bool,
}

impl SsoLogin {
    pub fn new(aws_config: impl Into<PathBuf>) -> Self {
        Self {
            command: vec![String::from("aws")],
            aws_config: aws_config.into(),
            no_browser: false,
        }
    }

    /// Run `program` (with `leading_args` first) instead of `aws`.
    pub fn with_command<I, S>(mut self, program: impl Into<String>, leading_args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command = std::iter::once(program.into())
            .chain(leading_args.into_iter().map(Into::into))
            .collect();
        self
    }

    /// Use the device-code flow instead of opening a browser.
    pub fn no_browser(mut self, no_browser: bool) -> Self {
        self.no_browser = no_browser;
        self
    }

    pub fn aws_config(&self) -> &Path {
        &self.aws_config
    }

    /// Ensure the `sso-session` section exists and log in through it,
    /// falling back to the legacy `rift-auth` profile when the installed CLI
    /// does not know `--sso-session`.
    pub async fn run(&self, config: &Config) -> Result<LoginMode> {
        awsconfig::ensure_session(&self.aws_config, config, false)?;

        let attempt = self
            .attempt(&["sso", "login", "--sso-session", SSO_SESSION_NAME])
            .await?;
        if attempt.success {
            info!("sso login complete");
            return Ok(LoginMode::SsoSession);
        }
        if !supports_only_profile(&attempt.stderr) {
            return Err(login_failed(&attempt));
        }

        info!("aws cli does not support sso-session login, using legacy profile");
        awsconfig::ensure_legacy_auth_profile(&self.aws_config, config, false)?;
        let fallback = self
            .attempt(&["sso", "login", "--profile", LEGACY_AUTH_PROFILE])
            .await?;
        if fallback.success {
            info!("sso login complete");
            Ok(LoginMode::LegacyProfile)
        } else {
            Err(login_failed(&fallback))
        }
    }

    async fn attempt(&self, args: &[&str]) -> Result<Attempt> {
        let Some((program, leading)) = self.command.split_first() else {
            return Err(Error::Login(anyhow!("empty login command")));
        };
        let mut command = Command::new(program);
        command.args(leading).args(args);
        if self.no_browser {
            command.arg("--no-browser");
        }
        debug!(program = %program, ?args, no_browser = self.no_browser, "running aws sso login");

        // stdout carries the verification URL and code, so it stays on the
        // terminal; stderr is captured for the option sniff.
        let output = command
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| match err.kind() {
                io::ErrorKind::NotFound => Error::Login(anyhow!("{program} CLI not found in PATH")),
                _ => Error::Login(anyhow::Error::new(err).context(format!("run {program}"))),
            })?;

        Ok(Attempt {
            success: output.status.success(),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

fn login_failed(attempt: &Attempt) -> Error {
    if attempt.stderr.is_empty() {
        Error::Login(anyhow!("aws sso login {}", attempt.status))
    } else {
        Error::Login(anyhow!("aws sso login {}: {}", attempt.status, attempt.stderr))
    }
}
