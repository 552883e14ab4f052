//! Reconciles generated profiles into the AWS CLI config file.

use std::{collections::BTreeMap, path::Path};

use tracing::{debug, info};

use crate::{Result, config::Config, names::OWNED_PREFIX, persist, state::State};

pub mod ini;

use ini::{IniDocument, Section};

/// Name of the shared `sso-session` every generated profile refers to.
pub const SSO_SESSION_NAME: &str = "rift";
/// Profile used for `aws sso login` by CLIs without `sso-session` support.
pub const LEGACY_AUTH_PROFILE: &str = "rift-auth";

const SSO_SESSION_SECTION: &str = "sso-session rift";
const PROFILE_SECTION_PREFIX: &str = "profile ";
const REGISTRATION_SCOPES: &str = "sso:account:access";
const OUTPUT_FORMAT: &str = "json";

/// What a profile reconciliation changed (or would change, in a dry run).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProfileSyncResult {
    pub added: usize,
    /// Profiles rewritten in place, plus one when the shared `sso-session`
    /// section was created or refreshed.
    pub updated: usize,
    pub removed: usize,
    /// The shared `sso-session` section was created or refreshed.
    pub session_changed: bool,
}

impl ProfileSyncResult {
    pub fn is_noop(&self) -> bool {
        self.added == 0 && self.updated == 0 && self.removed == 0 && !self.session_changed
    }
}

fn profile_section(profile: &str) -> String {
    format!("{PROFILE_SECTION_PREFIX}{profile}")
}

/// Profile name of a section this crate manages, if it is one.
fn owned_profile(section: &str) -> Option<&str> {
    section
        .strip_prefix(PROFILE_SECTION_PREFIX)
        .filter(|profile| profile.starts_with(OWNED_PREFIX) && *profile != LEGACY_AUTH_PROFILE)
}

fn load(path: &Path) -> Result<IniDocument> {
    Ok(persist::read_optional(path)?
        .map(|text| IniDocument::parse(&text))
        .unwrap_or_default())
}

fn save(path: &Path, doc: &IniDocument) -> Result<()> {
    persist::write_atomic(path, doc.render().as_bytes())
}

fn set_all(section: &mut Section, entries: &[(&str, &str)]) -> bool {
    entries
        .iter()
        .fold(false, |changed, (key, value)| section.set(key, value) || changed)
}

fn apply_session(doc: &mut IniDocument, config: &Config) -> bool {
    let (section, created) = doc.section_or_insert(SSO_SESSION_SECTION);
    let changed = set_all(
        section,
        &[
            ("sso_start_url", config.sso_start_url.as_str()),
            ("sso_region", config.sso_region.as_str()),
            ("sso_registration_scopes", REGISTRATION_SCOPES),
        ],
    );
    created || changed
}

/// Create or refresh the shared `sso-session` section only.
///
/// Returns whether the file changed (or would change, when `dry_run`).
pub fn ensure_session(path: &Path, config: &Config, dry_run: bool) -> Result<bool> {
    let mut doc = load(path)?;
    let changed = apply_session(&mut doc, config);
    if changed && !dry_run {
        save(path, &doc)?;
    }
    Ok(changed)
}

/// Create or refresh the `profile rift-auth` section used for legacy logins.
pub fn ensure_legacy_auth_profile(path: &Path, config: &Config, dry_run: bool) -> Result<bool> {
    let mut doc = load(path)?;
    let (section, created) = doc.section_or_insert(&profile_section(LEGACY_AUTH_PROFILE));
    let changed = set_all(
        section,
        &[
            ("sso_start_url", config.sso_start_url.as_str()),
            ("sso_region", config.sso_region.as_str()),
            ("output", OUTPUT_FORMAT),
        ],
    ) || created;
    if changed && !dry_run {
        save(path, &doc)?;
    }
    Ok(changed)
}

/// Bring the generated profiles in the file at `path` in line with `state`.
///
/// Only `profile rift-*` sections are read for diffing, created, updated or
/// removed; `profile rift-auth` is never removed. Everything else in the file
/// is left untouched. The file is only written when something changed and
/// never in a dry run.
pub fn reconcile(
    path: &Path,
    config: &Config,
    state: &State,
    dry_run: bool,
) -> Result<ProfileSyncResult> {
    let mut doc = load(path)?;
    let session_changed = apply_session(&mut doc, config);
    let mut result = ProfileSyncResult {
        updated: usize::from(session_changed),
        session_changed,
        ..ProfileSyncResult::default()
    };

    let desired: BTreeMap<&str, _> = state
        .roles
        .iter()
        .map(|role| (role.aws_profile.as_str(), role))
        .collect();

    let stale: Vec<String> = doc
        .section_names()
        .filter_map(owned_profile)
        .filter(|profile| !desired.contains_key(profile))
        .map(str::to_string)
        .collect();
    for profile in stale {
        if doc.remove_section(&profile_section(&profile)) {
            debug!(profile = %profile, "removing stale profile");
            result.removed += 1;
        }
    }

    let region = config.default_region().unwrap_or_default();
    for (profile, role) in desired {
        let (section, created) = doc.section_or_insert(&profile_section(profile));
        let mut entries = vec![
            ("sso_session", SSO_SESSION_NAME),
            ("sso_account_id", role.account_id.as_str()),
            ("sso_role_name", role.role_name.as_str()),
        ];
        if !region.is_empty() {
            entries.push(("region", region));
        }
        entries.push(("output", OUTPUT_FORMAT));

        let changed = set_all(section, &entries);
        if created {
            result.added += 1;
        } else if changed {
            debug!(profile = %profile, "updating profile");
            result.updated += 1;
        }
    }

    info!(
        path = %path.display(),
        added = result.added,
        updated = result.updated,
        removed = result.removed,
        session_changed = result.session_changed,
        dry_run,
        "reconciled aws profiles"
    );
    if !result.is_noop() && !dry_run {
        save(path, &doc)?;
    }
    Ok(result)
}
