use std::{process::Stdio, time::Duration};

use anyhow::{Context, bail};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use kube::{
    Api, Client, Config,
    api::ListParams,
    config::{KubeConfigOptions, Kubeconfig},
};
use serde::Deserialize;
use serde_json::json;
use tokio::process::Command;

use super::{CredentialProvider, NamespaceProbe};
use crate::{
    retry::{RetryPolicy, retry_with_policy},
    state::ClusterRecord,
};

const PROBE_TIMEOUT: Duration = Duration::from_secs(15);
const PROBE_ENTRY: &str = "rift-probe";

#[derive(Deserialize)]
struct ExecCredential {
    status: ExecCredentialStatus,
}

#[derive(Deserialize)]
struct ExecCredentialStatus {
    #[serde(default)]
    token: String,
}

/// Vends cluster tokens by running `aws eks get-token` under the cluster's
/// generated profile.
#[derive(Debug, Clone)]
pub struct AwsCliTokenProvider {
    program: String,
}

impl Default for AwsCliTokenProvider {
    fn default() -> Self {
        Self {
            program: String::from("aws"),
        }
    }
}

impl AwsCliTokenProvider {
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl CredentialProvider for AwsCliTokenProvider {
    async fn cluster_token(&self, cluster: &ClusterRecord) -> anyhow::Result<String> {
        let output = Command::new(&self.program)
            .args([
                "eks",
                "get-token",
                "--profile",
                &cluster.aws_profile,
                "--cluster-name",
                &cluster.cluster_name,
                "--region",
                &cluster.region,
                "--output",
                "json",
            ])
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("run {} eks get-token", self.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            let message = [stderr.trim(), stdout.trim()]
                .into_iter()
                .find(|m| !m.is_empty())
                .unwrap_or("no output");
            bail!("aws eks get-token ({}): {message}", output.status);
        }
        parse_token(&output.stdout)
    }
}

fn parse_token(stdout: &[u8]) -> anyhow::Result<String> {
    let credential: ExecCredential =
        serde_json::from_slice(stdout).context("parse aws eks get-token output")?;
    let token = credential.status.token.trim();
    if token.is_empty() {
        bail!("empty token from aws eks get-token");
    }
    Ok(token.to_string())
}

/// Lists namespaces with a bearer token straight against the cluster endpoint.
#[derive(Debug, Clone, Copy)]
pub struct KubeNamespaceProbe {
    timeout: Duration,
    retry: RetryPolicy<kube::Error>,
}

impl Default for KubeNamespaceProbe {
    fn default() -> Self {
        Self {
            timeout: PROBE_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }
}

impl KubeNamespaceProbe {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy<kube::Error>) -> Self {
        self.retry = retry;
        self
    }
}

/// A single-entry kubeconfig pointing at `cluster` with a static token.
fn probe_kubeconfig(cluster: &ClusterRecord, bearer_token: &str) -> anyhow::Result<Kubeconfig> {
    let document = json!({
        "apiVersion": "v1",
        "kind": "Config",
        "clusters": [{
            "name": PROBE_ENTRY,
            "cluster": {
                "server": cluster.cluster_endpoint,
                "certificate-authority-data": cluster.cluster_certificate_base64,
            },
        }],
        "users": [{
            "name": PROBE_ENTRY,
            "user": { "token": bearer_token },
        }],
        "contexts": [{
            "name": PROBE_ENTRY,
            "context": { "cluster": PROBE_ENTRY, "user": PROBE_ENTRY },
        }],
        "current-context": PROBE_ENTRY,
    });
    serde_json::from_value(document).context("build probe kubeconfig")
}

#[async_trait]
impl NamespaceProbe for KubeNamespaceProbe {
    async fn list_namespaces(
        &self,
        cluster: &ClusterRecord,
        bearer_token: &str,
    ) -> anyhow::Result<Vec<String>> {
        let kubeconfig = probe_kubeconfig(cluster, bearer_token)?;
        let options = KubeConfigOptions {
            context: Some(PROBE_ENTRY.to_string()),
            ..Default::default()
        };
        let mut config = Config::from_custom_kubeconfig(kubeconfig, &options)
            .await
            .with_context(|| format!("client config for {}", cluster.cluster_endpoint))?;
        config.connect_timeout = Some(self.timeout);
        config.read_timeout = Some(self.timeout);

        let client = Client::try_from(config)?;
        let namespaces: Api<Namespace> = Api::all(client);
        let params = ListParams::default();
        let list = retry_with_policy(&self.retry, || namespaces.list(&params))
            .await
            .context("list namespaces")?;

        Ok(list
            .items
            .into_iter()
            .filter_map(|ns| ns.metadata.name)
            .collect())
    }
}
