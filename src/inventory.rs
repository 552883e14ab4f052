//! Turns raw discovery output into the named, persisted [`State`].

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::{
    config::Config,
    discover::{Inventory, RoleAccess, cluster_order},
    names::{self, NameRegistry},
    state::{ClusterRecord, RoleRecord, State},
};

/// Builds a [`State`] from one [`Inventory`].
///
/// Names are allocated from two fresh registries on every build, so the
/// output depends only on the inventory, the config and (for namespaces) the
/// previous state.
pub struct InventoryBuilder<'a> {
    config: &'a Config,
    previous: Option<&'a State>,
}

impl<'a> InventoryBuilder<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self {
            config,
            previous: None,
        }
    }

    /// Carry namespaces discovered by an earlier sync over to matching clusters.
    pub fn with_previous(mut self, previous: Option<&'a State>) -> Self {
        self.previous = previous;
        self
    }

    pub fn build(&self, mut inventory: Inventory) -> State {
        let mut profiles = NameRegistry::new();
        let mut contexts = NameRegistry::new();

        inventory.roles.sort_by(|a, b| {
            (&a.account_name, &a.account_id, &a.role_name).cmp(&(
                &b.account_name,
                &b.account_id,
                &b.role_name,
            ))
        });
        let mut seen_roles = HashSet::new();
        inventory
            .roles
            .retain(|r| seen_roles.insert((r.account_id.clone(), r.role_name.clone())));

        let mut profile_by_role: HashMap<(String, String), String> = HashMap::new();
        let mut roles = Vec::with_capacity(inventory.roles.len());
        for role in &inventory.roles {
            let env = names::infer_env(&[&role.account_name, &role.role_name]);
            let record = role_record(role, env, &mut profiles);
            profile_by_role.insert(
                (record.account_id.clone(), record.role_name.clone()),
                record.aws_profile.clone(),
            );
            roles.push(record);
        }

        inventory
            .clusters
            .sort_by(|a, b| cluster_order(a).cmp(&cluster_order(b)));
        let mut seen_clusters = HashSet::new();
        inventory.clusters.retain(|c| {
            seen_clusters.insert((
                c.account_id.clone(),
                c.role_name.clone(),
                c.region.clone(),
                c.cluster_name.clone(),
            ))
        });

        let mut clusters = Vec::with_capacity(inventory.clusters.len());
        for cluster in inventory.clusters {
            let env = names::infer_env(&[
                &cluster.account_name,
                &cluster.role_name,
                &cluster.cluster_name,
            ]);
            let account_slug = names::account_slug(&cluster.account_name, &cluster.account_id);
            let kube_context = contexts.allocate(&names::context_base(
                env,
                &account_slug,
                &names::slug(&cluster.cluster_name),
            ));

            let role_key = (cluster.account_id.clone(), cluster.role_name.clone());
            let aws_profile = match profile_by_role.get(&role_key) {
                Some(profile) => profile.clone(),
                None => {
                    // A role that lists clusters always gets a profile, even if
                    // role listing missed it. It is named after the cluster's env.
                    let record = role_record(
                        &RoleAccess {
                            account_id: cluster.account_id.clone(),
                            account_name: cluster.account_name.clone(),
                            role_name: cluster.role_name.clone(),
                        },
                        env,
                        &mut profiles,
                    );
                    let profile = record.aws_profile.clone();
                    profile_by_role.insert(role_key, profile.clone());
                    roles.push(record);
                    profile
                }
            };

            let namespace = self
                .config
                .namespace_for_env(env)
                .unwrap_or_default()
                .to_string();
            let mut record = ClusterRecord {
                env: env.to_string(),
                account_id: cluster.account_id,
                account_name: cluster.account_name,
                role_name: cluster.role_name,
                aws_profile,
                region: cluster.region,
                cluster_name: cluster.cluster_name,
                cluster_arn: cluster.cluster_arn,
                cluster_endpoint: cluster.cluster_endpoint,
                cluster_certificate_base64: cluster.cluster_certificate_base64,
                kube_context,
                namespace,
                namespaces: Vec::new(),
            };
            record.namespaces = self.seed_namespaces(&record);
            clusters.push(record);
        }

        let mut seen_profiles = HashSet::new();
        roles.retain(|r| {
            seen_profiles.insert((
                r.account_id.clone(),
                r.role_name.clone(),
                r.aws_profile.clone(),
            ))
        });

        let mut state = State {
            generated_at: inventory.generated_at,
            regions: self.config.regions.clone(),
            roles,
            clusters,
        };
        state.normalize();
        state
    }

    fn seed_namespaces(&self, record: &ClusterRecord) -> Vec<String> {
        let mut set = BTreeSet::new();
        if !record.namespace.is_empty() {
            set.insert(record.namespace.clone());
        }
        if let Some(previous) = self.previous.and_then(|p| p.find_cluster(record.key())) {
            set.extend(
                previous
                    .namespaces
                    .iter()
                    .map(|ns| ns.trim())
                    .filter(|ns| !ns.is_empty())
                    .map(str::to_string),
            );
        }
        set.into_iter().collect()
    }
}

fn role_record(role: &RoleAccess, env: &str, profiles: &mut NameRegistry) -> RoleRecord {
    let account_slug = names::account_slug(&role.account_name, &role.account_id);
    let role_slug = names::slug(&role.role_name);
    let aws_profile = profiles.allocate(&names::profile_base(env, &account_slug, &role_slug));
    RoleRecord {
        env: env.to_string(),
        account_id: role.account_id.clone(),
        account_name: role.account_name.clone(),
        role_name: role.role_name.clone(),
        role_slug,
        aws_profile,
    }
}
