use std::time::SystemTime;

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_eks::config::Credentials;
use aws_sdk_sso::error::DisplayErrorContext;
use k8s_openapi::chrono::DateTime;

use super::client::{
    Account, ClusterDescription, ClusterDirectory, Page, RegionalClusters, RoleCredentials,
    SsoPortal,
};

const CREDENTIALS_PROVIDER: &str = "rift-sso";

/// IAM Identity Center and EKS, reached through the AWS SDK.
///
/// The SSO portal API is called unsigned: every call carries the cached access
/// token instead. EKS clients share the base SDK config (HTTP client, retry
/// settings) and only override region and credentials.
#[derive(Debug, Clone)]
pub struct AwsBackend {
    sdk_config: SdkConfig,
    sso: aws_sdk_sso::Client,
}

impl AwsBackend {
    pub async fn connect(sso_region: &str) -> Self {
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(sso_region.to_string()))
            .no_credentials()
            .load()
            .await;
        let sso = aws_sdk_sso::Client::new(&sdk_config);
        Self { sdk_config, sso }
    }
}

fn sdk_error<E>(err: E) -> anyhow::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    anyhow!("{}", DisplayErrorContext(err))
}

#[async_trait]
impl SsoPortal for AwsBackend {
    async fn list_accounts_page(
        &self,
        access_token: &str,
        next_token: Option<&str>,
    ) -> anyhow::Result<Page<Account>> {
        let out = self
            .sso
            .list_accounts()
            .access_token(access_token)
            .set_next_token(next_token.map(str::to_string))
            .send()
            .await
            .map_err(sdk_error)?;
        let items = out
            .account_list()
            .iter()
            .map(|account| Account {
                id: account.account_id().unwrap_or_default().to_string(),
                name: account.account_name().unwrap_or_default().to_string(),
            })
            .collect();
        Ok(Page {
            items,
            next_token: out.next_token().map(str::to_string),
        })
    }

    async fn list_account_roles_page(
        &self,
        access_token: &str,
        account_id: &str,
        next_token: Option<&str>,
    ) -> anyhow::Result<Page<String>> {
        let out = self
            .sso
            .list_account_roles()
            .access_token(access_token)
            .account_id(account_id)
            .set_next_token(next_token.map(str::to_string))
            .send()
            .await
            .map_err(sdk_error)?;
        let items = out
            .role_list()
            .iter()
            .filter_map(|role| role.role_name())
            .map(str::to_string)
            .collect();
        Ok(Page {
            items,
            next_token: out.next_token().map(str::to_string),
        })
    }

    async fn role_credentials(
        &self,
        access_token: &str,
        account_id: &str,
        role_name: &str,
    ) -> anyhow::Result<RoleCredentials> {
        let out = self
            .sso
            .get_role_credentials()
            .access_token(access_token)
            .account_id(account_id)
            .role_name(role_name)
            .send()
            .await
            .map_err(sdk_error)?;
        let creds = out.role_credentials().context("empty role credentials")?;
        Ok(RoleCredentials {
            access_key_id: creds.access_key_id().unwrap_or_default().to_string(),
            secret_access_key: creds.secret_access_key().unwrap_or_default().to_string(),
            session_token: creds.session_token().unwrap_or_default().to_string(),
            expiration: DateTime::from_timestamp_millis(creds.expiration()),
        })
    }
}

impl ClusterDirectory for AwsBackend {
    fn regional(&self, credentials: &RoleCredentials, region: &str) -> Box<dyn RegionalClusters> {
        let provider = Credentials::new(
            credentials.access_key_id.clone(),
            credentials.secret_access_key.clone(),
            Some(credentials.session_token.clone()),
            credentials.expiration.map(SystemTime::from),
            CREDENTIALS_PROVIDER,
        );
        let config = aws_sdk_eks::config::Builder::from(&self.sdk_config)
            .region(Region::new(region.to_string()))
            .credentials_provider(provider)
            .build();
        Box::new(EksRegion {
            client: aws_sdk_eks::Client::from_conf(config),
        })
    }
}

struct EksRegion {
    client: aws_sdk_eks::Client,
}

#[async_trait]
impl RegionalClusters for EksRegion {
    async fn list_clusters_page(&self, next_token: Option<&str>) -> anyhow::Result<Page<String>> {
        let out = self
            .client
            .list_clusters()
            .set_next_token(next_token.map(str::to_string))
            .send()
            .await
            .map_err(sdk_error)?;
        Ok(Page {
            items: out.clusters().to_vec(),
            next_token: out.next_token().map(str::to_string),
        })
    }

    async fn describe_cluster(&self, name: &str) -> anyhow::Result<ClusterDescription> {
        let out = self
            .client
            .describe_cluster()
            .name(name)
            .send()
            .await
            .map_err(sdk_error)?;
        let Some(cluster) = out.cluster() else {
            return Ok(ClusterDescription::default());
        };
        Ok(ClusterDescription {
            name: cluster.name().unwrap_or_default().to_string(),
            arn: cluster.arn().unwrap_or_default().to_string(),
            endpoint: cluster.endpoint().unwrap_or_default().to_string(),
            certificate_authority: cluster
                .certificate_authority()
                .and_then(|ca| ca.data())
                .unwrap_or_default()
                .to_string(),
        })
    }
}
