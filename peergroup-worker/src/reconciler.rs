use std::future::Future;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use peergroup_topology::{AppliedConfiguration, Topology};
use rand::Rng;
use tokio::sync::watch;

use crate::clock::Clock;
use crate::error::{ConfigError, SessionError};
use crate::session::{ReplicaSetConfig, Session};
use crate::statistics::PeerGroupStatistics;

#[derive(Debug, Clone, PartialEq)]
/// How transient store failures are retried within a single cycle.
pub struct RetryPolicy {
    /// The delay after the first failed attempt.
    pub initial_delay: Duration,
    /// The growth factor applied to the delay after every failed attempt.
    pub multiplier: f64,
    /// The ceiling of the delay between attempts.
    pub max_delay: Duration,
    /// The total number of attempts made before the cycle is abandoned.
    pub max_attempts: u32,
    /// The limit of each individual store round-trip.
    pub operation_timeout: Duration,
    /// The wall-clock limit for all attempts within a cycle.
    pub cycle_budget: Duration,
    /// The fraction each delay is randomly spread by.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_secs(5),
            max_attempts: 5,
            operation_timeout: Duration::from_secs(30),
            cycle_budget: Duration::from_secs(120),
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidRetryPolicy("at least one attempt is required"));
        }

        if self.multiplier < 1.0 {
            return Err(ConfigError::InvalidRetryPolicy("multiplier must be at least 1"));
        }

        if !(0.0..1.0).contains(&self.jitter) {
            return Err(ConfigError::InvalidRetryPolicy("jitter must be within 0..1"));
        }

        if self.operation_timeout.is_zero() {
            return Err(ConfigError::ZeroDuration("operation timeout"));
        }

        if self.cycle_budget.is_zero() {
            return Err(ConfigError::ZeroDuration("cycle budget"));
        }

        Ok(())
    }
}

#[derive(Debug, Clone)]
/// The bounded retry state of a single cycle.
pub struct Backoff {
    attempt: u32,
    next_delay: Duration,
    policy: RetryPolicy,
}

impl Backoff {
    pub fn new(policy: &RetryPolicy) -> Self {
        Self {
            attempt: 0,
            next_delay: policy.initial_delay,
            policy: policy.clone(),
        }
    }

    /// The number of failed attempts recorded so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Records a failed attempt and returns how long to wait before the next,
    /// or `None` once every attempt has been used.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.attempt += 1;
        if self.attempt >= self.policy.max_attempts {
            return None;
        }

        let delay = self.next_delay;
        self.next_delay = delay
            .mul_f64(self.policy.multiplier)
            .min(self.policy.max_delay);

        if self.policy.jitter > 0.0 {
            let spread = self.policy.jitter;
            let factor = rand::thread_rng().gen_range(1.0 - spread..=1.0 + spread);
            return Some(delay.mul_f64(factor));
        }

        Some(delay)
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ApplyOutcome {
    /// The store confirmed the topology at the given version.
    Applied(AppliedConfiguration),
    /// Every attempt failed transiently, the step is retried next cycle.
    Exhausted { attempts: u32 },
    /// A stop was requested between attempts.
    Cancelled,
}

/// Applies topologies to the store's live session.
///
/// The store, not the worker, is the source of truth for the configuration
/// version. Each attempt reads the current configuration, writes the target
/// one version ahead and reads it back to confirm.
pub struct SessionReconciler<S> {
    session: S,
    name: String,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
    statistics: PeerGroupStatistics,
}

impl<S> SessionReconciler<S>
where
    S: Session,
{
    pub fn new(
        session: S,
        name: impl Into<String>,
        policy: RetryPolicy,
        clock: Arc<dyn Clock>,
        statistics: PeerGroupStatistics,
    ) -> Self {
        Self {
            session,
            name: name.into(),
            policy,
            clock,
            statistics,
        }
    }

    /// Reads the configuration currently held by the store.
    pub async fn load(&mut self) -> Result<AppliedConfiguration, SessionError> {
        let config = self.timed(self.session.current_config()).await?;
        if !config.name.is_empty() {
            self.name = config.name.clone();
        }

        let topology = config.to_topology()?;
        Ok(AppliedConfiguration::new(topology, config.version))
    }

    /// Writes `target` to the store, retrying transient failures with backoff.
    ///
    /// Only rejected or unreadable configurations are returned as errors.
    /// A stop request is checked between attempts, an attempt already
    /// in flight is allowed to finish.
    pub async fn apply(
        &mut self,
        target: &Topology,
        stop: &mut watch::Receiver<bool>,
    ) -> Result<ApplyOutcome, SessionError> {
        let started = self.clock.now();
        let mut backoff = Backoff::new(&self.policy);

        loop {
            if *stop.borrow() {
                return Ok(ApplyOutcome::Cancelled);
            }

            let error = match self.round_trip(target).await {
                Ok(version) => {
                    let applied = AppliedConfiguration::new(target.clone(), version);
                    return Ok(ApplyOutcome::Applied(applied));
                },
                Err(e) if e.is_transient() => e,
                Err(e) => return Err(e),
            };

            self.statistics
                .num_transient_failures
                .fetch_add(1, Ordering::Relaxed);

            let attempts = backoff.attempt() + 1;
            let delay = match backoff.next_delay() {
                Some(delay) => delay,
                None => return Ok(ApplyOutcome::Exhausted { attempts }),
            };

            let elapsed = self.clock.now() - started;
            if elapsed + delay > self.policy.cycle_budget {
                warn!(
                    error = %error,
                    attempts = attempts,
                    elapsed = ?elapsed,
                    "Cycle budget spent, deferring the configuration change to the next cycle."
                );
                return Ok(ApplyOutcome::Exhausted { attempts });
            }

            warn!(
                error = %error,
                attempt = attempts,
                retry_in = ?delay,
                "Failed to apply replica set configuration, retrying."
            );

            tokio::select! {
                _ = crate::wait_for_stop(stop) => return Ok(ApplyOutcome::Cancelled),
                _ = self.clock.sleep(delay) => {},
            }
        }
    }

    async fn round_trip(&self, target: &Topology) -> Result<u64, SessionError> {
        let current = self.timed(self.session.current_config()).await?;
        if current.to_topology().ok().as_ref() == Some(target) {
            // A previous attempt already landed.
            return Ok(current.version);
        }

        let config = ReplicaSetConfig::from_topology(&self.name, current.version + 1, target);
        let acknowledged = self.timed(self.session.set_config(config)).await?;

        let read_back = self.timed(self.session.current_config()).await?;
        if read_back.to_topology()? != *target {
            return Err(SessionError::NotConfirmed {
                version: read_back.version,
            });
        }

        debug!(
            acknowledged_version = acknowledged,
            version = read_back.version,
            "Replica set configuration confirmed."
        );

        Ok(read_back.version)
    }

    async fn timed<T>(
        &self,
        operation: impl Future<Output = Result<T, SessionError>>,
    ) -> Result<T, SessionError> {
        let limit = self.policy.operation_timeout;
        tokio::select! {
            result = operation => result,
            _ = self.clock.sleep(limit) => Err(SessionError::Timeout(limit)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use peergroup_topology::{Address, ReplicaSetMember};

    use super::*;
    use crate::clock::TokioClock;
    use crate::test_utils::MemorySession;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            jitter: 0.0,
            ..RetryPolicy::default()
        }
    }

    fn topology(voters: &[u64]) -> Topology {
        voters
            .iter()
            .map(|id| {
                let addr = Address::derive(format!("10.0.0.{}", id));
                ReplicaSetMember::new(*id, addr.with_port(37017), true)
            })
            .collect()
    }

    fn reconciler(session: MemorySession) -> SessionReconciler<MemorySession> {
        SessionReconciler::new(
            session,
            "juju",
            policy(),
            Arc::new(TokioClock),
            PeerGroupStatistics::default(),
        )
    }

    #[test]
    fn test_backoff_is_bounded() {
        let policy = RetryPolicy {
            max_attempts: 6,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            ..policy()
        };
        let mut backoff = Backoff::new(&policy);

        let delays = std::iter::from_fn(|| backoff.next_delay()).collect::<Vec<_>>();
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(5),
                Duration::from_secs(5),
            ]
        );
        assert_eq!(backoff.attempt(), 6);
    }

    #[test]
    fn test_backoff_jitter_stays_in_range() {
        let policy = RetryPolicy {
            jitter: 0.5,
            initial_delay: Duration::from_secs(2),
            ..RetryPolicy::default()
        };
        let mut backoff = Backoff::new(&policy);
        let delay = backoff.next_delay().expect("Delay should be produced.");
        assert!(delay >= Duration::from_secs(1) && delay <= Duration::from_secs(3));
    }

    #[test]
    fn test_policy_validation() {
        assert!(RetryPolicy::default().validate().is_ok());

        let policy = RetryPolicy {
            max_attempts: 0,
            ..RetryPolicy::default()
        };
        assert!(matches!(policy.validate(), Err(ConfigError::InvalidRetryPolicy(_))));

        let policy = RetryPolicy {
            operation_timeout: Duration::ZERO,
            ..RetryPolicy::default()
        };
        assert_eq!(
            policy.validate(),
            Err(ConfigError::ZeroDuration("operation timeout"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_apply_and_load() {
        let _ = tracing_subscriber::fmt::try_init();

        let session = MemorySession::new("juju");
        let mut reconciler = reconciler(session.clone());
        let (_tx, mut stop) = watch::channel(false);

        let target = topology(&[1, 2, 3]);
        let outcome = reconciler.apply(&target, &mut stop).await.expect("Apply.");
        assert_eq!(
            outcome,
            ApplyOutcome::Applied(AppliedConfiguration::new(target.clone(), 1))
        );
        assert_eq!(session.writes(), 1);

        let loaded = reconciler.load().await.expect("Load.");
        assert_eq!(loaded.version, 1);
        assert_eq!(loaded.topology.voters(), BTreeSet::from([1, 2, 3]));

        // Re-applying what the store already holds does not write again.
        let outcome = reconciler.apply(&target, &mut stop).await.expect("Apply.");
        assert!(matches!(outcome, ApplyOutcome::Applied(applied) if applied.version == 1));
        assert_eq!(session.writes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried() {
        let _ = tracing_subscriber::fmt::try_init();

        let session = MemorySession::new("juju");
        session.fail_next(SessionError::Electing);
        session.fail_next(SessionError::Unavailable("connection reset".into()));
        let mut reconciler = reconciler(session.clone());
        let (_tx, mut stop) = watch::channel(false);

        let outcome = reconciler
            .apply(&topology(&[1]), &mut stop)
            .await
            .expect("Apply.");
        assert!(matches!(outcome, ApplyOutcome::Applied(applied) if applied.version == 1));
        assert_eq!(reconciler.statistics.num_transient_failures(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_attempts_defer() {
        let session = MemorySession::new("juju");
        for _ in 0..5 {
            session.fail_next(SessionError::Electing);
        }
        let mut reconciler = reconciler(session.clone());
        let (_tx, mut stop) = watch::channel(false);

        let outcome = reconciler
            .apply(&topology(&[1]), &mut stop)
            .await
            .expect("Apply.");
        assert_eq!(outcome, ApplyOutcome::Exhausted { attempts: 5 });
        assert_eq!(session.writes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_budget_limits_retries() {
        let session = MemorySession::new("juju");
        for _ in 0..5 {
            session.fail_next(SessionError::Electing);
        }
        let mut reconciler = SessionReconciler::new(
            session.clone(),
            "juju",
            RetryPolicy {
                initial_delay: Duration::from_millis(400),
                cycle_budget: Duration::from_secs(1),
                ..policy()
            },
            Arc::new(TokioClock),
            PeerGroupStatistics::default(),
        );
        let (_tx, mut stop) = watch::channel(false);

        let started = tokio::time::Instant::now();
        let outcome = reconciler
            .apply(&topology(&[1]), &mut stop)
            .await
            .expect("Apply.");

        // The second retry would wait 800ms on top of the first 400ms.
        assert_eq!(outcome, ApplyOutcome::Exhausted { attempts: 2 });
        assert_eq!(reconciler.statistics.num_transient_failures(), 2);
        assert_eq!(session.writes(), 0);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_is_not_retried() {
        let session = MemorySession::new("juju");
        session.fail_next(SessionError::Rejected("bad config".into()));
        let mut reconciler = reconciler(session.clone());
        let (_tx, mut stop) = watch::channel(false);

        let err = reconciler
            .apply(&topology(&[1]), &mut stop)
            .await
            .expect_err("Rejected configurations are fatal.");
        assert_eq!(err, SessionError::Rejected("bad config".into()));
        assert_eq!(reconciler.statistics.num_transient_failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_between_attempts() {
        let session = MemorySession::new("juju");
        session.fail_next(SessionError::Electing);
        let mut reconciler = reconciler(session.clone());
        let (tx, mut stop) = watch::channel(false);
        tx.send(true).expect("Send stop.");

        let outcome = reconciler
            .apply(&topology(&[1]), &mut stop)
            .await
            .expect("Apply.");
        assert_eq!(outcome, ApplyOutcome::Cancelled);
        assert_eq!(session.writes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_store_times_out() {
        let session = MemorySession::new("juju");
        session.hang_next(Duration::from_secs(60));
        let mut reconciler = reconciler(session.clone());
        let (_tx, mut stop) = watch::channel(false);

        let outcome = reconciler
            .apply(&topology(&[1]), &mut stop)
            .await
            .expect("Apply.");
        assert!(matches!(outcome, ApplyOutcome::Applied(_)));
        assert_eq!(reconciler.statistics.num_transient_failures(), 1);
    }
}
