use futures::{StreamExt, TryStreamExt, stream};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{
    ClusterAccess, RoleAccess,
    client::{ClusterDirectory, RegionalClusters, SsoPortal, collect_pages},
};
use crate::{Error, Result};

/// Roles whose credentials are exchanged and clusters listed at the same time.
pub const MAX_ROLE_WORKERS: usize = 8;

/// Every cluster reachable under `roles` in `regions`.
///
/// Roles are processed by at most [`MAX_ROLE_WORKERS`] concurrent workers.
/// A role whose credentials cannot be obtained contributes nothing, a region
/// that cannot be listed is skipped for that role only, and a cluster that
/// cannot be described is dropped. None of these abort the run; only
/// cancellation does. The result is unordered.
pub async fn list_all_clusters<P, D>(
    portal: &P,
    directory: &D,
    access_token: &str,
    regions: &[String],
    roles: &[RoleAccess],
    cancel: &CancellationToken,
) -> Result<Vec<ClusterAccess>>
where
    P: SsoPortal + ?Sized,
    D: ClusterDirectory + ?Sized,
{
    let found = Mutex::new(Vec::new());

    stream::iter(roles)
        .map(Ok::<_, Error>)
        .try_for_each_concurrent(MAX_ROLE_WORKERS, |role| {
            let found = &found;
            async move {
                if cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }
                let clusters = discover_role(portal, directory, access_token, regions, role).await;
                found.lock().await.extend(clusters);
                Ok(())
            }
        })
        .await?;

    Ok(found.into_inner())
}

async fn discover_role<P, D>(
    portal: &P,
    directory: &D,
    access_token: &str,
    regions: &[String],
    role: &RoleAccess,
) -> Vec<ClusterAccess>
where
    P: SsoPortal + ?Sized,
    D: ClusterDirectory + ?Sized,
{
    let credentials = match portal
        .role_credentials(access_token, &role.account_id, &role.role_name)
        .await
    {
        Ok(credentials) => credentials,
        Err(err) => {
            warn!(
                account_id = %role.account_id,
                account = %role.account_name,
                role = %role.role_name,
                error = %format!("{err:#}"),
                "unable to get role credentials"
            );
            return Vec::new();
        }
    };

    let mut clusters = Vec::new();
    for region in regions {
        let regional = directory.regional(&credentials, region);
        match list_region(regional.as_ref(), role, region).await {
            Ok(found) => clusters.extend(found),
            Err(err) => warn!(
                account_id = %role.account_id,
                account = %role.account_name,
                role = %role.role_name,
                region = %region,
                error = %format!("{err:#}"),
                "unable to list clusters"
            ),
        }
    }
    clusters
}

async fn list_region(
    regional: &dyn RegionalClusters,
    role: &RoleAccess,
    region: &str,
) -> anyhow::Result<Vec<ClusterAccess>> {
    let names = collect_pages(|next| async move { regional.list_clusters_page(next.as_deref()).await })
        .await?;

    let mut clusters = Vec::with_capacity(names.len());
    for name in names {
        let description = match regional.describe_cluster(&name).await {
            Ok(description) => description,
            Err(err) => {
                debug!(
                    account_id = %role.account_id,
                    role = %role.role_name,
                    region = %region,
                    cluster = %name,
                    error = %format!("{err:#}"),
                    "dropping cluster that could not be described"
                );
                continue;
            }
        };
        let cluster_name = if description.name.is_empty() {
            name
        } else {
            description.name
        };
        if cluster_name.is_empty() {
            continue;
        }
        clusters.push(ClusterAccess {
            account_id: role.account_id.clone(),
            account_name: role.account_name.clone(),
            role_name: role.role_name.clone(),
            region: region.to_string(),
            cluster_name,
            cluster_arn: description.arn,
            cluster_endpoint: description.endpoint,
            cluster_certificate_base64: description.certificate_authority,
        });
    }
    Ok(clusters)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::testing::FakeAws;

    fn regions(names: &[&str]) -> Vec<String> {
        names.iter().map(|r| r.to_string()).collect()
    }

    fn role(account_id: &str, account_name: &str, role_name: &str) -> RoleAccess {
        RoleAccess {
            account_id: account_id.into(),
            account_name: account_name.into(),
            role_name: role_name.into(),
        }
    }

    #[tokio::test]
    async fn lists_clusters_per_role_and_region() {
        let aws = FakeAws::new()
            .account("1", "acme-prod", &["Admin"])
            .cluster("1", "Admin", "us-east-1", "main")
            .cluster("1", "Admin", "us-west-2", "edge")
            .with_page_size(1);
        let roles = vec![role("1", "acme-prod", "Admin")];

        let mut clusters = list_all_clusters(
            &aws,
            &aws,
            "token",
            &regions(&["us-east-1", "us-west-2"]),
            &roles,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        clusters.sort_by(|a, b| a.region.cmp(&b.region));

        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].cluster_name, "main");
        assert_eq!(
            clusters[0].cluster_endpoint,
            "https://main.us-east-1.eks.example.com"
        );
        assert_eq!(clusters[1].region, "us-west-2");
    }

    #[tokio::test]
    async fn soft_failures_skip_only_their_scope() {
        let aws = FakeAws::new()
            .account("1", "acme-prod", &["Admin"])
            .account("2", "acme-dev", &["Admin"])
            .cluster("1", "Admin", "us-east-1", "main")
            .cluster("1", "Admin", "us-east-1", "broken")
            .cluster("1", "Admin", "us-west-2", "edge")
            .cluster("2", "Admin", "us-east-1", "dev")
            .fail_credentials_for("2")
            .fail_region("us-west-2")
            .fail_describe("broken");
        let roles = vec![role("1", "acme-prod", "Admin"), role("2", "acme-dev", "Admin")];

        let clusters = list_all_clusters(
            &aws,
            &aws,
            "token",
            &regions(&["us-east-1", "us-west-2"]),
            &roles,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        let names: Vec<_> = clusters.iter().map(|c| c.cluster_name.as_str()).collect();
        assert_eq!(names, vec!["main"]);
    }

    #[tokio::test]
    async fn caps_concurrent_credential_exchanges() {
        let mut aws = FakeAws::new();
        let mut roles = Vec::new();
        for i in 0..20 {
            let id = format!("{i:02}");
            aws = aws.account(&id, &format!("account-{id}"), &["Admin"]);
            roles.push(role(&id, &format!("account-{id}"), "Admin"));
        }

        list_all_clusters(
            &aws,
            &aws,
            "token",
            &regions(&["us-east-1"]),
            &roles,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        let peak = aws.peak_credential_calls.load(Ordering::SeqCst);
        assert!(peak > 1, "expected concurrent workers, saw {peak}");
        assert!(peak <= MAX_ROLE_WORKERS, "exceeded worker cap: {peak}");
    }

    #[tokio::test]
    async fn cancelled_run_fails() {
        let aws = FakeAws::new().account("1", "acme", &["Admin"]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = list_all_clusters(
            &aws,
            &aws,
            "token",
            &regions(&["us-east-1"]),
            &[role("1", "acme", "Admin")],
            &cancel,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }
}
