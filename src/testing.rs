//! In-memory stand-ins for the remote collaborators.

use std::{
    collections::{BTreeMap, HashSet},
    path::Path,
    sync::atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use k8s_openapi::chrono::{SecondsFormat, TimeDelta, Utc};

use crate::{
    config::Config,
    discover::client::{
        Account, ClusterDescription, ClusterDirectory, Page, RegionalClusters, RoleCredentials,
        SsoPortal,
    },
    namespaces::{CredentialProvider, NamespaceProbe},
    state::ClusterRecord,
};

pub const START_URL: &str = "https://acme.awsapps.com/start";
pub const ACCESS_TOKEN: &str = "token";

pub fn sample_config() -> Config {
    let mut config = Config {
        sso_start_url: START_URL.into(),
        sso_region: "us-east-1".into(),
        ..Config::default()
    };
    config.namespace_defaults.insert("prod".into(), "apps".into());
    config.normalize();
    config
}

/// Write a token record valid for another hour.
pub fn write_token(dir: &Path, token: &str) {
    let expires_at = (Utc::now() + TimeDelta::hours(1)).to_rfc3339_opts(SecondsFormat::Secs, true);
    let body = serde_json::json!({
        "startUrl": START_URL,
        "region": "us-east-1",
        "accessToken": token,
        "expiresAt": expires_at,
    });
    std::fs::create_dir_all(dir).unwrap();
    std::fs::write(dir.join("cached.json"), body.to_string()).unwrap();
}

fn paginate<T: Clone>(items: &[T], next_token: Option<&str>, page_size: usize) -> Page<T> {
    let start: usize = next_token.map(|t| t.parse().unwrap()).unwrap_or(0);
    let end = (start + page_size).min(items.len());
    Page {
        items: items[start..end].to_vec(),
        next_token: (end < items.len()).then(|| end.to_string()),
    }
}

struct FakeAccount {
    id: String,
    name: String,
    roles: Vec<String>,
}

#[derive(Clone)]
struct FakeCluster {
    account_id: String,
    role_name: String,
    region: String,
    name: String,
}

/// SSO portal and EKS in one fake, keyed on account id and role name.
pub struct FakeAws {
    accounts: Vec<FakeAccount>,
    clusters: Vec<FakeCluster>,
    page_size: usize,
    fail_accounts: bool,
    fail_roles: HashSet<String>,
    fail_credentials: HashSet<String>,
    fail_regions: HashSet<String>,
    fail_describe: HashSet<String>,
    in_flight: AtomicUsize,
    pub peak_credential_calls: AtomicUsize,
}

impl FakeAws {
    pub fn new() -> Self {
        Self {
            accounts: Vec::new(),
            clusters: Vec::new(),
            page_size: 100,
            fail_accounts: false,
            fail_roles: HashSet::new(),
            fail_credentials: HashSet::new(),
            fail_regions: HashSet::new(),
            fail_describe: HashSet::new(),
            in_flight: AtomicUsize::new(0),
            peak_credential_calls: AtomicUsize::new(0),
        }
    }

    pub fn account(mut self, id: &str, name: &str, roles: &[&str]) -> Self {
        self.accounts.push(FakeAccount {
            id: id.into(),
            name: name.into(),
            roles: roles.iter().map(|r| r.to_string()).collect(),
        });
        self
    }

    pub fn cluster(mut self, account_id: &str, role_name: &str, region: &str, name: &str) -> Self {
        self.clusters.push(FakeCluster {
            account_id: account_id.into(),
            role_name: role_name.into(),
            region: region.into(),
            name: name.into(),
        });
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn fail_accounts(mut self) -> Self {
        self.fail_accounts = true;
        self
    }

    pub fn fail_roles_for(mut self, account_id: &str) -> Self {
        self.fail_roles.insert(account_id.into());
        self
    }

    pub fn fail_credentials_for(mut self, account_id: &str) -> Self {
        self.fail_credentials.insert(account_id.into());
        self
    }

    pub fn fail_region(mut self, region: &str) -> Self {
        self.fail_regions.insert(region.into());
        self
    }

    pub fn fail_describe(mut self, cluster: &str) -> Self {
        self.fail_describe.insert(cluster.into());
        self
    }

    fn check_token(access_token: &str) -> anyhow::Result<()> {
        anyhow::ensure!(access_token == ACCESS_TOKEN, "UnauthorizedException: session expired");
        Ok(())
    }
}

#[async_trait]
impl SsoPortal for FakeAws {
    async fn list_accounts_page(
        &self,
        access_token: &str,
        next_token: Option<&str>,
    ) -> anyhow::Result<Page<Account>> {
        Self::check_token(access_token)?;
        anyhow::ensure!(!self.fail_accounts, "TooManyRequestsException");
        let accounts: Vec<_> = self
            .accounts
            .iter()
            .map(|a| Account {
                id: a.id.clone(),
                name: a.name.clone(),
            })
            .collect();
        Ok(paginate(&accounts, next_token, self.page_size))
    }

    async fn list_account_roles_page(
        &self,
        access_token: &str,
        account_id: &str,
        next_token: Option<&str>,
    ) -> anyhow::Result<Page<String>> {
        Self::check_token(access_token)?;
        anyhow::ensure!(!self.fail_roles.contains(account_id), "AccessDenied");
        let roles = self
            .accounts
            .iter()
            .find(|a| a.id == account_id)
            .map(|a| a.roles.clone())
            .unwrap_or_default();
        Ok(paginate(&roles, next_token, self.page_size))
    }

    async fn role_credentials(
        &self,
        access_token: &str,
        account_id: &str,
        role_name: &str,
    ) -> anyhow::Result<RoleCredentials> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_credential_calls.fetch_max(current, Ordering::SeqCst);
        for _ in 0..3 {
            tokio::task::yield_now().await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        Self::check_token(access_token)?;
        anyhow::ensure!(!self.fail_credentials.contains(account_id), "ForbiddenException");
        Ok(RoleCredentials {
            access_key_id: format!("{account_id}:{role_name}"),
            secret_access_key: "secret".into(),
            session_token: "session".into(),
            expiration: None,
        })
    }
}

impl ClusterDirectory for FakeAws {
    fn regional(&self, credentials: &RoleCredentials, region: &str) -> Box<dyn RegionalClusters> {
        let (account_id, role_name) = credentials
            .access_key_id
            .split_once(':')
            .unwrap_or_default();
        let names = self
            .clusters
            .iter()
            .filter(|c| c.account_id == account_id && c.role_name == role_name && c.region == region)
            .map(|c| c.name.clone())
            .collect();
        Box::new(FakeRegion {
            account_id: account_id.to_string(),
            region: region.to_string(),
            names,
            page_size: self.page_size,
            fail_list: self.fail_regions.contains(region),
            fail_describe: self.fail_describe.clone(),
        })
    }
}

struct FakeRegion {
    account_id: String,
    region: String,
    names: Vec<String>,
    page_size: usize,
    fail_list: bool,
    fail_describe: HashSet<String>,
}

#[async_trait]
impl RegionalClusters for FakeRegion {
    async fn list_clusters_page(&self, next_token: Option<&str>) -> anyhow::Result<Page<String>> {
        anyhow::ensure!(!self.fail_list, "region {} is not enabled", self.region);
        Ok(paginate(&self.names, next_token, self.page_size))
    }

    async fn describe_cluster(&self, name: &str) -> anyhow::Result<ClusterDescription> {
        anyhow::ensure!(!self.fail_describe.contains(name), "ResourceNotFoundException");
        Ok(ClusterDescription {
            name: name.to_string(),
            arn: format!("arn:aws:eks:{}:{}:cluster/{name}", self.region, self.account_id),
            endpoint: format!("https://{name}.{}.eks.example.com", self.region),
            certificate_authority: "Y2VydA==".into(),
        })
    }
}

/// Hands out `bearer-<cluster>` tokens, failing for selected clusters.
#[derive(Default)]
pub struct FakeCredentials {
    pub fail: HashSet<String>,
}

#[async_trait]
impl CredentialProvider for FakeCredentials {
    async fn cluster_token(&self, cluster: &ClusterRecord) -> anyhow::Result<String> {
        anyhow::ensure!(!self.fail.contains(&cluster.cluster_name), "aws eks get-token: expired");
        Ok(format!("bearer-{}", cluster.cluster_name))
    }
}

/// Namespaces per cluster name; unknown clusters fail the probe.
#[derive(Default)]
pub struct FakeProbe {
    pub namespaces: BTreeMap<String, Vec<String>>,
    in_flight: AtomicUsize,
    pub peak: AtomicUsize,
}

impl FakeProbe {
    pub fn with(mut self, cluster: &str, namespaces: &[&str]) -> Self {
        self.namespaces.insert(
            cluster.into(),
            namespaces.iter().map(|n| n.to_string()).collect(),
        );
        self
    }
}

#[async_trait]
impl NamespaceProbe for FakeProbe {
    async fn list_namespaces(
        &self,
        cluster: &ClusterRecord,
        bearer_token: &str,
    ) -> anyhow::Result<Vec<String>> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(current, Ordering::SeqCst);
        for _ in 0..3 {
            tokio::task::yield_now().await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        anyhow::ensure!(bearer_token == format!("bearer-{}", cluster.cluster_name), "Unauthorized");
        self.namespaces
            .get(&cluster.cluster_name)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("connection refused"))
    }
}
