//! Deterministic naming of generated profiles and contexts.

use std::collections::HashMap;

/// Prefix shared by every profile and context this crate owns.
pub const OWNED_PREFIX: &str = "rift-";

/// Normalize `input` into an identifier-safe slug.
///
/// Lowercases, collapses every run of characters outside `[a-z0-9]` into a
/// single `-`, trims leading/trailing hyphens and returns `"unknown"` when
/// nothing is left.
pub fn slug(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut pending_hyphen = false;
    for ch in input.trim().chars().flat_map(char::to_lowercase) {
        if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
            if pending_hyphen && !out.is_empty() {
                out.push('-');
            }
            pending_hyphen = false;
            out.push(ch);
        } else {
            pending_hyphen = true;
        }
    }
    if out.is_empty() {
        String::from("unknown")
    } else {
        out
    }
}

/// Infer the environment tier from free-form names.
///
/// Plain substring matching in priority order: `prod`, `staging`/`stage`,
/// `development`/`dev`, `integration`/`int`, else `other`. Matching is not
/// word-aware ("sprint" yields `int`); generated names depend on this exact
/// rule, so it must not be tightened.
pub fn infer_env(parts: &[&str]) -> &'static str {
    let combined = parts.join(" ").to_lowercase();
    let has = |needle: &str| combined.contains(needle);
    if has("prod") {
        "prod"
    } else if has("staging") || has("stage") {
        "staging"
    } else if has("development") || has("dev") {
        "dev"
    } else if has("integration") || has("int") {
        "int"
    } else {
        "other"
    }
}

/// Account slug, falling back to the account id when the name is unusable.
pub fn account_slug(account_name: &str, account_id: &str) -> String {
    match slug(account_name) {
        s if s == "unknown" => slug(account_id),
        s => s,
    }
}

pub fn profile_base(env: &str, account_slug: &str, role_slug: &str) -> String {
    format!("{OWNED_PREFIX}{env}-{account_slug}-{role_slug}")
}

pub fn context_base(env: &str, account_slug: &str, cluster_slug: &str) -> String {
    format!("{OWNED_PREFIX}{env}-{account_slug}-{cluster_slug}")
}

/// Hands out unique names within one namespace for the duration of one sync.
///
/// The first request for a base name returns it unchanged; the n-th request
/// (n ≥ 2) returns `<base>-<n>`.
#[derive(Debug, Default)]
pub struct NameRegistry {
    counts: HashMap<String, usize>,
}

impl NameRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&mut self, base: &str) -> String {
        let base = slug(base);
        let count = self.counts.entry(base.clone()).or_default();
        *count += 1;
        match *count {
            1 => base,
            n => format!("{base}-{n}"),
        }
    }
}
