use std::future::Future;

use async_trait::async_trait;
use k8s_openapi::chrono::{DateTime, Utc};

/// One page of a paginated listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_token: Option<String>,
}

impl<T> Page<T> {
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            next_token: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub id: String,
    pub name: String,
}

/// Temporary credentials for one role, exchanged from the SSO access token.
#[derive(Clone, PartialEq, Eq)]
pub struct RoleCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    pub expiration: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for RoleCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoleCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("expiration", &self.expiration)
            .finish_non_exhaustive()
    }
}

/// The connection details of a described cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterDescription {
    pub name: String,
    pub arn: String,
    pub endpoint: String,
    pub certificate_authority: String,
}

/// The SSO portal: accounts and roles visible to an access token.
#[async_trait]
pub trait SsoPortal: Send + Sync {
    async fn list_accounts_page(
        &self,
        access_token: &str,
        next_token: Option<&str>,
    ) -> anyhow::Result<Page<Account>>;

    /// Role names assumable in `account_id`.
    async fn list_account_roles_page(
        &self,
        access_token: &str,
        account_id: &str,
        next_token: Option<&str>,
    ) -> anyhow::Result<Page<String>>;

    async fn role_credentials(
        &self,
        access_token: &str,
        account_id: &str,
        role_name: &str,
    ) -> anyhow::Result<RoleCredentials>;
}

/// Cluster listings scoped to one set of role credentials and one region.
pub trait ClusterDirectory: Send + Sync {
    fn regional(&self, credentials: &RoleCredentials, region: &str) -> Box<dyn RegionalClusters>;
}

#[async_trait]
pub trait RegionalClusters: Send + Sync {
    /// Cluster names, one page at a time.
    async fn list_clusters_page(&self, next_token: Option<&str>) -> anyhow::Result<Page<String>>;

    async fn describe_cluster(&self, name: &str) -> anyhow::Result<ClusterDescription>;
}

/// Follow `next_token` until a page comes back without one (or with an empty one).
pub(crate) async fn collect_pages<T, F, Fut>(mut fetch: F) -> anyhow::Result<Vec<T>>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = anyhow::Result<Page<T>>>,
{
    let mut items = Vec::new();
    let mut next_token = None;
    loop {
        let page = fetch(next_token.take()).await?;
        items.extend(page.items);
        match page.next_token.filter(|token| !token.is_empty()) {
            Some(token) => next_token = Some(token),
            None => return Ok(items),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn collects_until_next_token_is_empty() {
        let pages = [
            Page {
                items: vec![1, 2],
                next_token: Some("a".to_string()),
            },
            Page {
                items: vec![3],
                next_token: Some(String::new()),
            },
        ];
        let mut seen = Vec::new();
        let items = collect_pages(|token| {
            seen.push(token.clone());
            let page = match token.as_deref() {
                None => pages[0].clone(),
                _ => pages[1].clone(),
            };
            async move { Ok(page) }
        })
        .await
        .unwrap();

        assert_eq!(items, vec![1, 2, 3]);
        assert_eq!(seen, vec![None, Some("a".to_string())]);
    }

    #[tokio::test]
    async fn propagates_page_errors() {
        let result = collect_pages::<u8, _, _>(|_| async { Err(anyhow::anyhow!("throttled")) }).await;
        assert!(result.is_err());
    }

    #[test]
    fn role_credentials_debug_hides_secrets() {
        let credentials = RoleCredentials {
            access_key_id: "AKIA".into(),
            secret_access_key: "very-secret".into(),
            session_token: "session".into(),
            expiration: None,
        };
        let rendered = format!("{credentials:?}");
        assert!(rendered.contains("AKIA"));
        assert!(!rendered.contains("very-secret"));
        assert!(!rendered.contains("\"session\""));
    }
}
