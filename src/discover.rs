use k8s_openapi::chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{Error, Result, cancellable, config::Config, token::TokenCache};

pub mod aws;
pub mod client;
pub mod clusters;
pub mod identity;

use client::{ClusterDirectory, SsoPortal};

/// A role the caller can assume.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoleAccess {
    pub account_id: String,
    pub account_name: String,
    pub role_name: String,
}

/// A cluster visible under one role in one region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterAccess {
    pub account_id: String,
    pub account_name: String,
    pub role_name: String,
    pub region: String,
    pub cluster_name: String,
    pub cluster_arn: String,
    pub cluster_endpoint: String,
    pub cluster_certificate_base64: String,
}

/// Raw, unnamed discovery output of one sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inventory {
    pub generated_at: DateTime<Utc>,
    pub roles: Vec<RoleAccess>,
    pub clusters: Vec<ClusterAccess>,
}

impl Inventory {
    /// Sort roles by (account, role) and clusters by (account, role, region, cluster).
    pub fn sort(&mut self) {
        self.roles.sort_by(|a, b| {
            (&a.account_name, &a.role_name, &a.account_id).cmp(&(
                &b.account_name,
                &b.role_name,
                &b.account_id,
            ))
        });
        self.clusters.sort_by(|a, b| cluster_order(a).cmp(&cluster_order(b)));
    }
}

pub(crate) fn cluster_order(c: &ClusterAccess) -> (&str, &str, &str, &str, &str) {
    (
        &c.account_name,
        &c.role_name,
        &c.region,
        &c.cluster_name,
        &c.account_id,
    )
}

/// Discover every role and cluster reachable with the cached SSO token.
///
/// Fails with [`Error::SsoNotLoggedIn`] when no valid token is cached, and
/// when account listing fails or `cancel` fires. Everything below account
/// level is best-effort.
pub async fn discover<P, D>(
    config: &Config,
    tokens: &TokenCache,
    portal: &P,
    directory: &D,
    cancel: &CancellationToken,
) -> Result<Inventory>
where
    P: SsoPortal + ?Sized,
    D: ClusterDirectory + ?Sized,
{
    let now = Utc::now();
    let token = tokens.resolve(&config.sso_start_url, &config.sso_region, now)?;
    let access_token = token.access_token.as_str();

    cancellable(cancel, async {
        let accounts = identity::list_accounts(portal, access_token)
            .await
            .map_err(Error::ListAccounts)?;
        let roles = identity::list_roles(portal, access_token, &accounts).await;
        info!(accounts = accounts.len(), roles = roles.len(), "discovered sso roles");

        let clusters = clusters::list_all_clusters(
            portal,
            directory,
            access_token,
            &config.regions,
            &roles,
            cancel,
        )
        .await?;
        info!(clusters = clusters.len(), "discovered clusters");

        let mut inventory = Inventory {
            generated_at: now,
            roles,
            clusters,
        };
        inventory.sort();
        Ok(inventory)
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeAws, sample_config, write_token};

    #[tokio::test]
    async fn discovers_sorted_inventory() {
        let dir = tempfile::tempdir().unwrap();
        write_token(dir.path(), "token");
        let aws = FakeAws::new()
            .account("2", "zeta-dev", &["Admin"])
            .account("1", "acme-prod", &["ReadOnly", "Admin"])
            .cluster("2", "Admin", "us-east-1", "dev")
            .cluster("1", "Admin", "us-west-2", "edge")
            .cluster("1", "Admin", "us-east-1", "main");

        let inventory = discover(
            &sample_config(),
            &TokenCache::new(dir.path()),
            &aws,
            &aws,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        let roles: Vec<_> = inventory
            .roles
            .iter()
            .map(|r| format!("{}/{}", r.account_name, r.role_name))
            .collect();
        assert_eq!(roles, ["acme-prod/Admin", "acme-prod/ReadOnly", "zeta-dev/Admin"]);

        let clusters: Vec<_> = inventory
            .clusters
            .iter()
            .map(|c| format!("{}/{}", c.region, c.cluster_name))
            .collect();
        assert_eq!(clusters, ["us-east-1/main", "us-west-2/edge", "us-east-1/dev"]);
    }

    #[tokio::test]
    async fn missing_token_requires_login() {
        let dir = tempfile::tempdir().unwrap();
        let aws = FakeAws::new().account("1", "acme", &["Admin"]);

        let err = discover(
            &sample_config(),
            &TokenCache::new(dir.path()),
            &aws,
            &aws,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(err.is_login_required());
    }

    #[tokio::test]
    async fn account_failure_propagates() {
        let dir = tempfile::tempdir().unwrap();
        write_token(dir.path(), "token");
        let aws = FakeAws::new().account("1", "acme", &["Admin"]).fail_accounts();

        let err = discover(
            &sample_config(),
            &TokenCache::new(dir.path()),
            &aws,
            &aws,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::ListAccounts(_)));
    }
}
