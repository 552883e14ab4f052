use std::path::Path;

use k8s_openapi::chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result, persist};

/// A generated AWS profile for one assumable role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRecord {
    pub env: String,
    pub account_id: String,
    pub account_name: String,
    pub role_name: String,
    pub role_slug: String,
    pub aws_profile: String,
}

impl RoleRecord {
    /// Identity stable across runs.
    pub fn key(&self) -> (&str, &str) {
        (&self.account_id, &self.role_name)
    }
}

/// A generated kube context for one cluster reachable under one role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterRecord {
    pub env: String,
    pub account_id: String,
    pub account_name: String,
    pub role_name: String,
    pub aws_profile: String,
    pub region: String,
    pub cluster_name: String,
    pub cluster_arn: String,
    pub cluster_endpoint: String,
    pub cluster_certificate_base64: String,
    pub kube_context: String,
    /// Default namespace for the context; empty when none is configured.
    #[serde(default)]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub namespaces: Vec<String>,
}

impl ClusterRecord {
    /// Identity stable across runs.
    pub fn key(&self) -> (&str, &str, &str, &str) {
        (
            &self.account_id,
            &self.role_name,
            &self.region,
            &self.cluster_name,
        )
    }
}

/// The named inventory produced by a sync and read by every consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    pub generated_at: DateTime<Utc>,
    #[serde(default)]
    pub regions: Vec<String>,
    #[serde(default)]
    pub roles: Vec<RoleRecord>,
    #[serde(default)]
    pub clusters: Vec<ClusterRecord>,
}

impl State {
    /// Sort roles and clusters into presentation order.
    pub fn normalize(&mut self) {
        self.roles.sort_by(|a, b| {
            (&a.env, &a.account_name, &a.role_name, &a.account_id, &a.aws_profile).cmp(&(
                &b.env,
                &b.account_name,
                &b.role_name,
                &b.account_id,
                &b.aws_profile,
            ))
        });
        self.clusters.sort_by(|a, b| {
            (
                &a.env,
                &a.account_name,
                &a.role_name,
                &a.region,
                &a.cluster_name,
                &a.account_id,
            )
                .cmp(&(
                    &b.env,
                    &b.account_name,
                    &b.role_name,
                    &b.region,
                    &b.cluster_name,
                    &b.account_id,
                ))
        });
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|source| Error::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut state: State = serde_json::from_str(&data).map_err(|err| Error::Parse {
            path: path.to_path_buf(),
            source: err.into(),
        })?;
        state.normalize();
        Ok(state)
    }

    /// Load the state at `path`, or `None` when no sync has written one yet.
    pub fn load_optional(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        Self::load(path).map(Some)
    }

    /// Normalize and write as indented JSON with a trailing newline.
    pub fn save(&mut self, path: &Path) -> Result<()> {
        self.normalize();
        let mut data =
            serde_json::to_vec_pretty(self).map_err(|err| Error::Encode(err.into()))?;
        data.push(b'\n');
        persist::write_atomic(path, &data)
    }

    pub fn find_context(&self, name: &str) -> Option<&ClusterRecord> {
        self.clusters.iter().find(|c| c.kube_context == name)
    }

    pub fn find_cluster(&self, key: (&str, &str, &str, &str)) -> Option<&ClusterRecord> {
        self.clusters.iter().find(|c| c.key() == key)
    }

    /// Context names in presentation order, without duplicates.
    pub fn contexts(&self) -> Vec<&str> {
        let mut seen = std::collections::HashSet::new();
        self.clusters
            .iter()
            .map(|c| c.kube_context.as_str())
            .filter(|name| seen.insert(*name))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use k8s_openapi::chrono::TimeZone;

    use super::*;

    fn role(env: &str, account: &str, role: &str) -> RoleRecord {
        RoleRecord {
            env: env.into(),
            account_id: "111122223333".into(),
            account_name: account.into(),
            role_name: role.into(),
            role_slug: crate::names::slug(role),
            aws_profile: format!("rift-{env}-{account}-{role}"),
        }
    }

    fn cluster(env: &str, name: &str) -> ClusterRecord {
        ClusterRecord {
            env: env.into(),
            account_id: "111122223333".into(),
            account_name: "acme".into(),
            role_name: "admin".into(),
            aws_profile: format!("rift-{env}-acme-admin"),
            region: "us-east-1".into(),
            cluster_name: name.into(),
            cluster_arn: format!("arn:aws:eks:us-east-1:111122223333:cluster/{name}"),
            cluster_endpoint: "https://example.eks.amazonaws.com".into(),
            cluster_certificate_base64: "Y2VydA==".into(),
            kube_context: format!("rift-{env}-acme-{name}"),
            namespace: String::new(),
            namespaces: Vec::new(),
        }
    }

    fn sample() -> State {
        State {
            generated_at: Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap(),
            regions: vec!["us-east-1".into()],
            roles: vec![role("prod", "acme", "admin"), role("dev", "acme", "admin")],
            clusters: vec![cluster("prod", "main"), cluster("dev", "main")],
        }
    }

    #[test]
    fn normalize_orders_by_env_first() {
        let mut state = sample();
        state.normalize();
        assert_eq!(state.roles[0].env, "dev");
        assert_eq!(state.clusters[0].kube_context, "rift-dev-acme-main");
    }

    #[test]
    fn save_writes_indented_json_with_trailing_newline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rift").join("state.json");

        let mut state = sample();
        state.save(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("{\n  \"generated_at\""));
        assert!(text.ends_with("}\n"));
        assert!(!text.contains("\"namespaces\""));
        assert_eq!(State::load(&path).unwrap(), state);
    }

    #[test]
    fn load_optional_returns_none_for_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(State::load_optional(&dir.path().join("state.json")).unwrap().is_none());
    }

    #[test]
    fn contexts_are_unique_and_ordered() {
        let mut state = sample();
        state.normalize();
        assert_eq!(state.contexts(), vec!["rift-dev-acme-main", "rift-prod-acme-main"]);
        assert!(state.find_context("rift-prod-acme-main").is_some());
        assert!(
            state
                .find_cluster(("111122223333", "admin", "us-east-1", "main"))
                .is_some()
        );
    }
}
