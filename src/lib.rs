#![cfg_attr(not(doctest), doc = include_str!("../README.md"))]
#![cfg_attr(docsrs, feature(doc_cfg))]

use std::future::Future;

use tokio_util::sync::CancellationToken;

pub use k8s_openapi;
pub use kube;

pub mod awsconfig;
pub mod config;
pub mod discover;
pub mod error;
pub mod inventory;
pub mod kubeconfig;
pub mod login;
pub mod names;
pub mod namespaces;
pub mod persist;
pub mod retry;
pub mod state;
pub mod sync;
pub mod token;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};

/// Run `work` until it completes or `cancel` fires, whichever comes first.
pub(crate) async fn cancellable<T>(
    cancel: &CancellationToken,
    work: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        result = work => result,
    }
}
