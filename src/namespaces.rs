//! Best-effort namespace discovery inside already-named clusters.

use std::collections::BTreeSet;

use async_trait::async_trait;
use futures::{StreamExt, stream};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    Result, cancellable,
    state::{ClusterRecord, State},
};

mod probe;
pub use probe::{AwsCliTokenProvider, KubeNamespaceProbe};

/// Clusters probed at the same time.
pub const MAX_PROBE_WORKERS: usize = 4;

/// Vends a bearer token for one cluster.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn cluster_token(&self, cluster: &ClusterRecord) -> anyhow::Result<String>;
}

/// Lists the namespaces of one cluster.
#[async_trait]
pub trait NamespaceProbe: Send + Sync {
    async fn list_namespaces(
        &self,
        cluster: &ClusterRecord,
        bearer_token: &str,
    ) -> anyhow::Result<Vec<String>>;
}

/// Counters reported by one enrichment pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnrichSummary {
    pub enabled: bool,
    pub tried: usize,
    pub updated: usize,
    pub errors: usize,
}

enum ProbeOutcome {
    Found { index: usize, namespaces: Vec<String> },
    Failed { index: usize, error: anyhow::Error },
}

pub struct NamespaceEnricher<C, P> {
    credentials: C,
    probe: P,
}

impl<C, P> NamespaceEnricher<C, P>
where
    C: CredentialProvider,
    P: NamespaceProbe,
{
    pub fn new(credentials: C, probe: P) -> Self {
        Self { credentials, probe }
    }

    /// Probe every cluster with an endpoint and merge what is found into
    /// `state`.
    ///
    /// A failed probe is logged, counted and leaves that cluster's namespaces
    /// as they were. Only cancellation returns an error.
    pub async fn enrich(&self, state: &mut State, cancel: &CancellationToken) -> Result<EnrichSummary> {
        let mut summary = EnrichSummary {
            enabled: true,
            ..EnrichSummary::default()
        };

        let eligible: Vec<usize> = state
            .clusters
            .iter()
            .enumerate()
            .filter(|(_, c)| !c.cluster_endpoint.trim().is_empty() && !c.cluster_name.trim().is_empty())
            .map(|(index, _)| index)
            .collect();
        summary.tried = eligible.len();
        if eligible.is_empty() {
            return Ok(summary);
        }

        let outcomes = Mutex::new(Vec::with_capacity(eligible.len()));
        let clusters = &state.clusters;
        cancellable(cancel, async {
            stream::iter(eligible)
                .for_each_concurrent(MAX_PROBE_WORKERS, |index| {
                    let outcomes = &outcomes;
                    async move {
                        let outcome = match self.probe_cluster(&clusters[index]).await {
                            Ok(namespaces) => ProbeOutcome::Found { index, namespaces },
                            Err(error) => ProbeOutcome::Failed { index, error },
                        };
                        outcomes.lock().await.push(outcome);
                    }
                })
                .await;
            Ok(())
        })
        .await?;

        for outcome in outcomes.into_inner() {
            match outcome {
                ProbeOutcome::Found { index, namespaces } => {
                    let cluster = &mut state.clusters[index];
                    let merged = merge_namespaces(cluster, &namespaces);
                    if !same_set(&cluster.namespaces, &merged) {
                        cluster.namespaces = merged;
                        summary.updated += 1;
                    }
                }
                ProbeOutcome::Failed { index, error } => {
                    summary.errors += 1;
                    let cluster = &state.clusters[index];
                    warn!(
                        context = %cluster.kube_context,
                        cluster = %cluster.cluster_name,
                        region = %cluster.region,
                        error = %format!("{error:#}"),
                        "namespace discovery failed"
                    );
                }
            }
        }

        info!(
            tried = summary.tried,
            updated = summary.updated,
            errors = summary.errors,
            "namespace discovery finished"
        );
        Ok(summary)
    }

    async fn probe_cluster(&self, cluster: &ClusterRecord) -> anyhow::Result<Vec<String>> {
        let token = self.credentials.cluster_token(cluster).await?;
        let namespaces = self.probe.list_namespaces(cluster, &token).await?;
        Ok(normalize(namespaces.iter().map(String::as_str)))
    }
}

/// Trimmed, non-empty, sorted and deduplicated.
fn normalize<'a>(names: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    names
        .into_iter()
        .map(str::trim)
        .filter(|ns| !ns.is_empty())
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn merge_namespaces(cluster: &ClusterRecord, discovered: &[String]) -> Vec<String> {
    normalize(
        cluster
            .namespaces
            .iter()
            .chain(std::iter::once(&cluster.namespace))
            .chain(discovered)
            .map(String::as_str),
    )
}

fn same_set(current: &[String], merged: &[String]) -> bool {
    let mut current = current.to_vec();
    current.sort();
    current == merged
}
