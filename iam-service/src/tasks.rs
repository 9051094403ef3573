//! Periodic maintenance: session expiry, cache GC, usage flush and purges.

use futures::future::join_all;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::IamConfig;
use crate::services::AuthResult;
use crate::IamCore;

const CACHE_GC_INTERVAL: Duration = Duration::from_secs(60);
const PURGE_INTERVAL: Duration = Duration::from_secs(600);

/// Handles of the running maintenance tasks. All stop on one token.
pub struct BackgroundTasks {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
    core: IamCore,
}

impl BackgroundTasks {
    pub fn spawn(core: &IamCore, config: &IamConfig) -> Self {
        let cancel = CancellationToken::new();
        let mut handles = Vec::new();

        let sessions = core.sessions.clone();
        handles.push(spawn_ticker(
            "session_sweep",
            config.session.sweep_interval,
            cancel.clone(),
            move || {
                let sessions = sessions.clone();
                async move {
                    match sessions.sweep_expired().await {
                        Ok(0) => {}
                        Ok(count) => tracing::info!(count, "Expired sessions swept"),
                        Err(e) => tracing::warn!(error = %e, "Session sweep failed"),
                    }
                }
            },
        ));

        let sessions = core.sessions.clone();
        let api_tokens = core.api_tokens.clone();
        handles.push(spawn_ticker(
            "cache_gc",
            CACHE_GC_INTERVAL,
            cancel.clone(),
            move || {
                let sessions = sessions.clone();
                let api_tokens = api_tokens.clone();
                async move {
                    let cache_entries = sessions.gc_caches();
                    let buckets = api_tokens.limiter().evict_idle();
                    if cache_entries > 0 || buckets > 0 {
                        tracing::debug!(cache_entries, buckets, "In-memory caches trimmed");
                    }
                }
            },
        ));

        let api_tokens = core.api_tokens.clone();
        handles.push(spawn_ticker(
            "usage_flush",
            config.api_token.usage_flush_interval,
            cancel.clone(),
            move || {
                let api_tokens = api_tokens.clone();
                async move {
                    if let Err(e) = api_tokens.flush_usage().await {
                        tracing::warn!(error = %e, "API token usage flush failed");
                    }
                }
            },
        ));

        let purge_core = core.clone();
        handles.push(spawn_ticker(
            "purge",
            PURGE_INTERVAL,
            cancel.clone(),
            move || {
                let core = purge_core.clone();
                async move {
                    if let Err(e) = purge_expired(&core).await {
                        tracing::warn!(error = %e, "Expired credential purge failed");
                    }
                }
            },
        ));

        tracing::info!(tasks = handles.len(), "Background tasks started");
        Self {
            cancel,
            handles,
            core: core.clone(),
        }
    }

    /// Stops every task, then flushes the last usage batch.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for result in join_all(self.handles).await {
            if let Err(e) = result {
                tracing::warn!(error = %e, "Background task ended abnormally");
            }
        }
        match self.core.api_tokens.flush_usage().await {
            Ok(flushed) => tracing::info!(flushed, "Final API token usage flush"),
            Err(e) => tracing::warn!(error = %e, "Final API token usage flush failed"),
        }
    }
}

/// Removes expired refresh tokens and MFA challenges of every tenant, and the
/// hashes of expired API tokens.
pub async fn purge_expired(core: &IamCore) -> AuthResult<()> {
    let now = core.clock.now();
    let mut refresh_tokens = 0;
    let mut challenges = 0;
    for tenant_id in core.stores.tenants.list_tenant_ids().await? {
        refresh_tokens += core
            .stores
            .refresh_tokens
            .delete_expired_refresh_tokens(tenant_id, now)
            .await?;
        challenges += core.mfa.purge_expired_challenges(tenant_id).await?;
    }
    let api_token_hashes = core.api_tokens.purge_expired().await?;

    if refresh_tokens + challenges + api_token_hashes > 0 {
        tracing::info!(
            refresh_tokens,
            challenges,
            api_token_hashes,
            "Expired credentials purged"
        );
    }
    Ok(())
}

fn spawn_ticker<F, Fut>(
    name: &'static str,
    period: Duration,
    cancel: CancellationToken,
    mut job: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period.max(Duration::from_millis(100)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!(task = name, "Background task stopped");
                    break;
                }
                _ = ticker.tick() => job().await,
            }
        }
    })
}
