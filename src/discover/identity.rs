use anyhow::Context;
use tracing::warn;

use super::{
    RoleAccess,
    client::{Account, SsoPortal, collect_pages},
};

/// Every account visible to the token. Any failure is fatal.
pub async fn list_accounts<P>(portal: &P, access_token: &str) -> anyhow::Result<Vec<Account>>
where
    P: SsoPortal + ?Sized,
{
    collect_pages(|next| async move {
        portal
            .list_accounts_page(access_token, next.as_deref())
            .await
            .context("list accounts page")
    })
    .await
}

/// Every role assumable in `accounts`.
///
/// An account whose roles cannot be listed is logged and skipped; roles
/// collected from earlier pages of that account are dropped with it.
pub async fn list_roles<P>(portal: &P, access_token: &str, accounts: &[Account]) -> Vec<RoleAccess>
where
    P: SsoPortal + ?Sized,
{
    let mut roles = Vec::new();
    for account in accounts {
        let listed = collect_pages(|next| async move {
            portal
                .list_account_roles_page(access_token, &account.id, next.as_deref())
                .await
        })
        .await;
        match listed {
            Ok(names) => roles.extend(names.into_iter().map(|role_name| RoleAccess {
                account_id: account.id.clone(),
                account_name: account.name.clone(),
                role_name,
            })),
            Err(err) => warn!(
                account_id = %account.id,
                account = %account.name,
                error = %format!("{err:#}"),
                "unable to list account roles"
            ),
        }
    }
    roles
}
