//! The end-to-end sync: discover, name, enrich, reconcile, persist.

use k8s_openapi::chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    Result,
    awsconfig::{self, ProfileSyncResult},
    config::{Config, Paths},
    discover::{
        self,
        aws::AwsBackend,
        client::{ClusterDirectory, SsoPortal},
    },
    inventory::InventoryBuilder,
    kubeconfig::{self, ContextSyncResult},
    namespaces::{
        AwsCliTokenProvider, CredentialProvider, EnrichSummary, KubeNamespaceProbe,
        NamespaceEnricher, NamespaceProbe,
    },
    state::State,
    token::TokenCache,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOptions {
    /// Compute every change but write no file.
    pub dry_run: bool,
}

/// Outcome of one sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub state: State,
    pub namespaces: EnrichSummary,
    pub profiles: ProfileSyncResult,
    pub contexts: ContextSyncResult,
    pub dry_run: bool,
}

pub struct Syncer<B, C, N> {
    config: Config,
    paths: Paths,
    backend: B,
    enricher: NamespaceEnricher<C, N>,
}

impl Syncer<AwsBackend, AwsCliTokenProvider, KubeNamespaceProbe> {
    /// A syncer talking to AWS through the SDK and to clusters through kube.
    pub async fn aws(config: Config, paths: Paths) -> Self {
        let backend = AwsBackend::connect(&config.sso_region).await;
        Self::new(
            config,
            paths,
            backend,
            AwsCliTokenProvider::default(),
            KubeNamespaceProbe::default(),
        )
    }
}

impl<B, C, N> Syncer<B, C, N>
where
    B: SsoPortal + ClusterDirectory,
    C: CredentialProvider,
    N: NamespaceProbe,
{
    pub fn new(config: Config, paths: Paths, backend: B, credentials: C, probe: N) -> Self {
        Self {
            config,
            paths,
            backend,
            enricher: NamespaceEnricher::new(credentials, probe),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn paths(&self) -> &Paths {
        &self.paths
    }

    /// Fail with [`crate::Error::SsoNotLoggedIn`] unless a usable token is cached.
    pub fn check_login(&self) -> Result<()> {
        TokenCache::new(&self.paths.token_cache).validate(&self.config, Utc::now())
    }

    /// Run one sync.
    ///
    /// The state is rebuilt from scratch out of a fresh discovery; only the
    /// namespaces of the previously written state are carried over.
    pub async fn run(&self, options: SyncOptions, cancel: &CancellationToken) -> Result<SyncReport> {
        let SyncOptions { dry_run } = options;
        let tokens = TokenCache::new(&self.paths.token_cache);
        let inventory =
            discover::discover(&self.config, &tokens, &self.backend, &self.backend, cancel).await?;

        let previous = State::load_optional(&self.paths.state).unwrap_or_else(|err| {
            warn!(path = %self.paths.state.display(), error = %err, "ignoring unreadable state");
            None
        });
        let mut state = InventoryBuilder::new(&self.config)
            .with_previous(previous.as_ref())
            .build(inventory);

        let namespaces = if self.config.discover_namespaces {
            self.enricher.enrich(&mut state, cancel).await?
        } else {
            EnrichSummary::default()
        };

        let profiles = awsconfig::reconcile(&self.paths.aws_config, &self.config, &state, dry_run)?;
        let contexts = kubeconfig::reconcile(&self.paths.kubeconfig, &state, dry_run)?;

        if !dry_run {
            state.save(&self.paths.state)?;
        }
        info!(
            roles = state.roles.len(),
            clusters = state.clusters.len(),
            dry_run,
            "sync complete"
        );

        Ok(SyncReport {
            state,
            namespaces,
            profiles,
            contexts,
            dry_run,
        })
    }
}
