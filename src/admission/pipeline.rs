//! The per-request admission state machine.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::admission::context::RequestContext;
use crate::admission::outcome::{DependencyResponse, FailureReason, Outcome, OutcomeKind, RejectReason, Stage};
use crate::admission::throttle::ConcurrencyThrottle;
use crate::cache::{etag_matches, CacheEntry, Conditional, ResponseCache};
use crate::clock::SharedClock;
use crate::config::AdmissionConfig;
use crate::observability::{logging::DECISION_TARGET, metrics};
use crate::resilience::{CallKind, DependencyError, DependencyGuard, GuardError};
use crate::security::{RateLimitDecision, RateLimitStatus, RateLimiter, TokenRevocationStore};
use crate::store::SharedStore;

/// Retry hint sent with pool and throttle rejections.
const BACKPRESSURE_RETRY_AFTER: Duration = Duration::from_secs(1);

/// Stage trace and quota state collected while a request moves through.
struct Progress {
    trace: Vec<Stage>,
    rate_limit: Option<RateLimitStatus>,
    started: Instant,
}

impl Progress {
    fn new() -> Self {
        Self {
            trace: vec![Stage::Received],
            rate_limit: None,
            started: Instant::now(),
        }
    }

    fn reached(&mut self, stage: Stage) {
        self.trace.push(stage);
    }
}

pub struct AdmissionPipeline {
    revocations: Arc<TokenRevocationStore>,
    limiter: Arc<RateLimiter>,
    cache: Arc<ResponseCache>,
    throttle: ConcurrencyThrottle,
    guard: Arc<DependencyGuard>,
    clock: SharedClock,
    revocation_enabled: bool,
}

impl AdmissionPipeline {
    /// Build every component over one shared store.
    pub fn from_config(config: &AdmissionConfig, store: SharedStore, clock: SharedClock) -> Self {
        Self {
            revocations: Arc::new(TokenRevocationStore::new(
                store.clone(),
                clock.clone(),
                Duration::from_secs(config.revocation.max_token_lifetime_secs),
            )),
            limiter: Arc::new(RateLimiter::new(store.clone(), config.rate_limit.clone(), clock.clone())),
            cache: Arc::new(ResponseCache::new(store, &config.cache, clock.clone())),
            throttle: ConcurrencyThrottle::new(&config.throttle),
            guard: Arc::new(DependencyGuard::new(
                config.upstream.name.clone(),
                &config.dependency,
                clock.clone(),
            )),
            clock,
            revocation_enabled: config.revocation.enabled,
        }
    }

    pub fn revocations(&self) -> &Arc<TokenRevocationStore> {
        &self.revocations
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    pub fn guard(&self) -> &Arc<DependencyGuard> {
        &self.guard
    }

    pub fn throttle(&self) -> &ConcurrencyThrottle {
        &self.throttle
    }

    pub fn revocation_enabled(&self) -> bool {
        self.revocation_enabled
    }

    /// Apply the hot-reloadable parts of a new configuration.
    pub fn apply_config(&self, config: &AdmissionConfig) {
        self.limiter.update_policy(config.rate_limit.clone());
        self.cache.update_policy(&config.cache);
    }

    /// Run only the admission stages (revocation, rate limit).
    pub async fn evaluate(&self, ctx: &RequestContext) -> Outcome {
        let mut progress = Progress::new();
        let kind = match self.admit(ctx, &mut progress).await {
            Ok(()) => OutcomeKind::Admitted,
            Err(rejected) => rejected,
        };
        self.finish(ctx, progress, kind)
    }

    /// Run the full state machine, calling `loader` on a cache miss.
    ///
    /// The guarded call runs on its own task: if the caller goes away the
    /// call still completes, is accounted for and its result cached.
    pub async fn run<L, Fut>(&self, ctx: &RequestContext, loader: L) -> Outcome
    where
        L: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<DependencyResponse, DependencyError>> + Send + 'static,
    {
        let mut progress = Progress::new();
        if let Err(rejected) = self.admit(ctx, &mut progress).await {
            return self.finish(ctx, progress, rejected);
        }

        let kind = ctx.call_kind();
        let cacheable = kind == CallKind::IdempotentRead;
        let cache_key = self.cache.key_for(&ctx.resource, ctx.tier(), &ctx.identifier());

        if cacheable {
            let lookup = self.cache.conditional(&cache_key, ctx.if_none_match.as_deref()).await;
            progress.reached(Stage::CacheChecked);
            let served = match lookup {
                Conditional::NotModified(entry) => Some(OutcomeKind::NotModified(entry)),
                Conditional::Fresh(entry) => Some(OutcomeKind::Cached(entry)),
                Conditional::Miss => None,
            };
            if let Some(served) = served {
                progress.reached(Stage::CacheHit);
                progress.reached(Stage::Responded);
                return self.finish(ctx, progress, served);
            }
            progress.reached(Stage::CacheMiss);
        }

        let permit = match self.throttle.admit().await {
            Ok(permit) => permit,
            Err(_) => {
                let rejected = OutcomeKind::Rejected {
                    reason: RejectReason::Overloaded,
                    retry_after: Some(BACKPRESSURE_RETRY_AFTER),
                };
                return self.finish(ctx, progress, rejected);
            }
        };
        progress.reached(Stage::ConcurrencyAdmitted);

        let guard = self.guard.clone();
        let cache = self.cache.clone();
        let task = tokio::spawn(async move {
            let _permit = permit;
            let result = guard.call(kind, loader).await;
            let entry = match &result {
                Ok(response) if cacheable && response.is_storable() => {
                    cache
                        .put_with_policy(&cache_key, response.body.clone(), response.content_type.clone())
                        .await
                }
                _ => None,
            };
            (result, entry)
        });

        let (result, entry) = match task.await {
            Ok(done) => done,
            Err(err) => {
                tracing::error!(request_id = %ctx.request_id, error = %err, "Guarded call task failed");
                return self.finish(ctx, progress, OutcomeKind::Failed(FailureReason::UpstreamError));
            }
        };

        let kind = match result {
            Ok(response) => {
                progress.reached(Stage::DependencyCalled);
                if entry.is_some() {
                    progress.reached(Stage::CacheStored);
                }
                progress.reached(Stage::Responded);
                self.loaded(ctx, response, entry)
            }
            Err(GuardError::CircuitOpen) => OutcomeKind::Rejected {
                reason: RejectReason::CircuitOpen,
                retry_after: Some(self.guard.breaker().retry_after().unwrap_or(BACKPRESSURE_RETRY_AFTER)),
            },
            Err(GuardError::PoolExhausted) => OutcomeKind::Rejected {
                reason: RejectReason::PoolExhausted,
                retry_after: Some(BACKPRESSURE_RETRY_AFTER),
            },
            Err(GuardError::Timeout(_)) => {
                progress.reached(Stage::DependencyCalled);
                OutcomeKind::Failed(FailureReason::UpstreamTimeout)
            }
            Err(GuardError::Dependency(err)) => {
                progress.reached(Stage::DependencyCalled);
                tracing::warn!(request_id = %ctx.request_id, error = %err, "Dependency call failed");
                OutcomeKind::Failed(FailureReason::UpstreamError)
            }
        };
        self.finish(ctx, progress, kind)
    }

    /// Revocation then rate limit. `Err` carries the rejection.
    async fn admit(&self, ctx: &RequestContext, progress: &mut Progress) -> Result<(), OutcomeKind> {
        if let (true, Some(claims)) = (self.revocation_enabled, &ctx.claims) {
            let revoked = self
                .revocations
                .is_revoked(&claims.token_id, &claims.subject_id, claims.issued_at_ms)
                .await;
            if revoked {
                if self.limiter.policy().enabled() {
                    progress.rate_limit = self
                        .limiter
                        .status(&ctx.identifier(), ctx.tier(), &ctx.endpoint, self.clock.now_millis())
                        .await;
                }
                return Err(OutcomeKind::Rejected {
                    reason: RejectReason::Revoked,
                    retry_after: None,
                });
            }
        }
        progress.reached(Stage::RevocationChecked);

        if !self.limiter.policy().enabled() {
            progress.reached(Stage::RateLimitPassed);
            return Ok(());
        }

        let decision = self
            .limiter
            .check_and_increment(&ctx.identifier(), ctx.tier(), &ctx.endpoint, self.clock.now_millis())
            .await;
        progress.rate_limit = Some(decision.status());
        match decision {
            RateLimitDecision::Allowed(_) => {
                progress.reached(Stage::RateLimitPassed);
                Ok(())
            }
            RateLimitDecision::Denied { retry_after, .. } => Err(OutcomeKind::Rejected {
                reason: RejectReason::RateLimited,
                retry_after: Some(retry_after),
            }),
        }
    }

    fn loaded(&self, ctx: &RequestContext, response: DependencyResponse, entry: Option<CacheEntry>) -> OutcomeKind {
        match (&entry, ctx.if_none_match.as_deref()) {
            (Some(stored), Some(tags)) if etag_matches(tags, &stored.etag) => OutcomeKind::NotModified(stored.clone()),
            _ => OutcomeKind::Loaded { response, entry },
        }
    }

    fn finish(&self, ctx: &RequestContext, progress: Progress, kind: OutcomeKind) -> Outcome {
        let latency_ms = progress.started.elapsed().as_millis() as u64;
        tracing::info!(
            target: DECISION_TARGET,
            request_id = %ctx.request_id,
            identifier = %ctx.identifier(),
            tier = %ctx.tier(),
            endpoint = %ctx.endpoint,
            outcome = kind.label(),
            reason = kind.reason(),
            latency_ms,
        );
        metrics::record_decision(kind.label(), kind.reason(), progress.started);

        Outcome {
            kind,
            rate_limit: progress.rate_limit,
            trace: progress.trace,
        }
    }
}
