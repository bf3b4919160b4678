//! TTL conformance suite.
//!
//! Runs the expiration contract against any engine, one fresh engine per
//! case. Waits are derived from the backend's declared precision, so a
//! backend with one-second resolution gets proportionally longer TTLs and
//! delays instead of spurious failures. Backends that cannot query TTLs have
//! every case skipped.

use std::time::Duration;

use serde::Serialize;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::{
    backend::Capabilities,
    engine::{SetOptions, TtlEngine},
    Error, ErrorKind, Result,
};

/// Timing constants for one precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    pub precision: Duration,
    /// About 1s at 1ms precision, about 3s at 1s precision.
    pub initial_ttl: Duration,
    /// Long enough for the backend to settle; 1ms for fine-grained backends.
    pub small_delay: Duration,
}

impl Timings {
    pub fn for_precision(precision: Duration) -> Self {
        let precision = precision.max(Duration::from_millis(1));
        Self {
            precision,
            initial_ttl: (precision + Duration::from_millis(1000)).max(precision * 3),
            small_delay: Duration::from_millis(1).max(
                Duration::from_millis((precision.as_millis() / 10) as u64),
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "lowercase")]
pub enum Outcome {
    Passed,
    Failed(String),
    Skipped(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct CaseReport {
    pub name: &'static str,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConformanceReport {
    pub backend: String,
    pub ttl_precision_ms: u64,
    pub can_query_ttl: bool,
    pub cases: Vec<CaseReport>,
}

impl ConformanceReport {
    /// True when no case failed. Skipped cases do not count against it.
    pub fn passed(&self) -> bool {
        self.failures().next().is_none()
    }

    pub fn failures(&self) -> impl Iterator<Item = &CaseReport> {
        self.cases
            .iter()
            .filter(|case| matches!(case.outcome, Outcome::Failed(_)))
    }

    pub fn count(&self, pred: impl Fn(&Outcome) -> bool) -> usize {
        self.cases.iter().filter(|case| pred(&case.outcome)).count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Case {
    UnexpiredTtlAwaited,
    UnexpiredTtlSpawned,
    KeyWithoutTtl,
    ExpiredKey,
    MissingKey,
    SetWithoutTtlClearsTtl,
    ExpireReplacesDeadline,
    TtlIsNonIncreasing,
    GetHidesExpiredKey,
}

impl Case {
    const ALL: [Case; 9] = [
        Case::UnexpiredTtlAwaited,
        Case::UnexpiredTtlSpawned,
        Case::KeyWithoutTtl,
        Case::ExpiredKey,
        Case::MissingKey,
        Case::SetWithoutTtlClearsTtl,
        Case::ExpireReplacesDeadline,
        Case::TtlIsNonIncreasing,
        Case::GetHidesExpiredKey,
    ];

    fn name(self) -> &'static str {
        match self {
            Case::UnexpiredTtlAwaited => "gets TTL when key with unexpired TTL exists (awaited)",
            Case::UnexpiredTtlSpawned => "gets TTL when key with unexpired TTL exists (spawned)",
            Case::KeyWithoutTtl => "succeeds when key without TTL exists",
            Case::ExpiredKey => "fails when getting TTL for a key with expired TTL",
            Case::MissingKey => "fails when key does not exist",
            Case::SetWithoutTtlClearsTtl => "set without TTL clears a previous TTL",
            Case::ExpireReplacesDeadline => "expire replaces the deadline and keeps the value",
            Case::TtlIsNonIncreasing => "repeated TTL queries do not increase",
            Case::GetHidesExpiredKey => "get does not return an expired key",
        }
    }

    async fn run(self, engine: TtlEngine, t: Timings) -> std::result::Result<(), String> {
        match self {
            Case::UnexpiredTtlAwaited => {
                engine
                    .set("a-key", "a-value", SetOptions::with_ttl(t.initial_ttl))
                    .await
                    .map_err(unexpected)?;
                sleep(t.small_delay).await;
                let ttl = engine.ttl("a-key").await.map_err(unexpected)?;
                expect_within(ttl, t.initial_ttl)
            }
            Case::UnexpiredTtlSpawned => {
                let initial_ttl = t.initial_ttl;
                let ttl = tokio::spawn(async move {
                    engine
                        .set("a-key", "a-value", SetOptions::with_ttl(initial_ttl))
                        .await?;
                    engine.ttl("a-key").await
                })
                .await
                .map_err(|e| format!("task did not complete: {}", e))?
                .map_err(unexpected)?;
                expect_within(ttl, t.initial_ttl)
            }
            Case::KeyWithoutTtl => {
                engine
                    .set("a-key", "a-value", SetOptions::default())
                    .await
                    .map_err(unexpected)?;
                match engine.ttl("a-key").await.map_err(unexpected)? {
                    None => Ok(()),
                    Some(ttl) => Err(format!("expected no TTL, got {:?}", ttl)),
                }
            }
            Case::ExpiredKey => {
                engine
                    .set("expired-key", "a-value", SetOptions::with_ttl(t.precision))
                    .await
                    .map_err(unexpected)?;
                sleep(t.precision * 2).await;
                expect_not_found(engine.ttl("expired-key").await, "expired-key")
            }
            Case::MissingKey => {
                expect_not_found(engine.ttl("key-does-not-exist").await, "key-does-not-exist")
            }
            Case::SetWithoutTtlClearsTtl => {
                engine
                    .set("a-key", "a-value", SetOptions::with_ttl(t.precision))
                    .await
                    .map_err(unexpected)?;
                engine
                    .set("a-key", "b-value", SetOptions::default())
                    .await
                    .map_err(unexpected)?;
                sleep(t.precision * 2).await;
                match engine.ttl("a-key").await.map_err(unexpected)? {
                    None => Ok(()),
                    Some(ttl) => Err(format!("expected no TTL, got {:?}", ttl)),
                }
            }
            Case::ExpireReplacesDeadline => {
                engine
                    .set("a-key", "a-value", SetOptions::default())
                    .await
                    .map_err(unexpected)?;
                engine
                    .expire("a-key", t.initial_ttl)
                    .await
                    .map_err(unexpected)?;
                sleep(t.small_delay).await;
                expect_within(engine.ttl("a-key").await.map_err(unexpected)?, t.initial_ttl)?;
                match engine.get("a-key").await.map_err(unexpected)? {
                    Some(value) if value == b"a-value" => {}
                    other => return Err(format!("expire changed the value: {:?}", other)),
                }
                expect_not_found(
                    engine
                        .expire("key-does-not-exist", t.initial_ttl)
                        .await
                        .map(|()| None),
                    "key-does-not-exist",
                )
            }
            Case::TtlIsNonIncreasing => {
                engine
                    .set("a-key", "a-value", SetOptions::with_ttl(t.initial_ttl))
                    .await
                    .map_err(unexpected)?;
                let mut last = t.initial_ttl;
                for _ in 0..3 {
                    let ttl = engine.ttl("a-key").await.map_err(unexpected)?;
                    expect_within(ttl, last)?;
                    last = ttl.unwrap_or(last);
                    sleep(t.small_delay).await;
                }
                Ok(())
            }
            Case::GetHidesExpiredKey => {
                engine
                    .set("expired-key", "a-value", SetOptions::with_ttl(t.precision))
                    .await
                    .map_err(unexpected)?;
                sleep(t.precision * 2).await;
                match engine.get("expired-key").await.map_err(unexpected)? {
                    None => Ok(()),
                    Some(_) => Err("expired key is still readable".to_string()),
                }
            }
        }
    }
}

fn unexpected(e: Error) -> String {
    format!("unexpected error: {}", e)
}

fn expect_within(ttl: Option<Duration>, max: Duration) -> std::result::Result<(), String> {
    match ttl {
        Some(ttl) if ttl >= Duration::from_millis(1) && ttl <= max => Ok(()),
        other => Err(format!("expected TTL within [1ms, {:?}], got {:?}", max, other)),
    }
}

fn expect_not_found(
    result: Result<Option<Duration>>,
    key: &str,
) -> std::result::Result<(), String> {
    match result {
        Ok(ttl) => Err(format!("expected NotFound for {:?}, got Ok({:?})", key, ttl)),
        Err(e) if e.kind() != ErrorKind::NotFound => Err(unexpected(e)),
        Err(e) if !e.to_string().contains(key) => {
            Err(format!("error message {:?} does not mention {:?}", e.to_string(), key))
        }
        Err(e) if e.status_code() != 404 => {
            Err(format!("expected status 404, got {}", e.status_code()))
        }
        Err(_) => Ok(()),
    }
}

/// Runs every case against engines produced by `factory`.
pub struct ConformanceSuite<F> {
    factory: F,
}

impl<F> ConformanceSuite<F>
where
    F: Fn() -> Result<TtlEngine>,
{
    pub fn new(factory: F) -> Self {
        Self { factory }
    }

    /// Fails only if the factory cannot produce an engine; contract
    /// violations are reported per case.
    pub async fn run(&self) -> Result<ConformanceReport> {
        let sample = (self.factory)()?;
        let backend = sample.backend_name().to_string();
        let capabilities: Capabilities = sample.capabilities();
        drop(sample);

        let timings = Timings::for_precision(capabilities.ttl_precision);
        info!(
            "Running TTL conformance against {} backend ({:?})",
            backend, timings
        );

        let mut cases = Vec::with_capacity(Case::ALL.len());
        for case in Case::ALL {
            let outcome = if !capabilities.can_query_ttl {
                Outcome::Skipped("backend cannot query TTL".to_string())
            } else {
                let engine = (self.factory)()?;
                match case.run(engine, timings).await {
                    Ok(()) => Outcome::Passed,
                    Err(reason) => {
                        warn!("{}: {}", case.name(), reason);
                        Outcome::Failed(reason)
                    }
                }
            };
            cases.push(CaseReport {
                name: case.name(),
                outcome,
            });
        }

        Ok(ConformanceReport {
            backend,
            ttl_precision_ms: timings.precision.as_millis() as u64,
            can_query_ttl: capabilities.can_query_ttl,
            cases,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::backend::MemoryBackend;

    #[test]
    fn timings_scale_with_precision() {
        let fine = Timings::for_precision(Duration::from_millis(1));
        assert_eq!(fine.initial_ttl, Duration::from_millis(1001));
        assert_eq!(fine.small_delay, Duration::from_millis(1));

        let coarse = Timings::for_precision(Duration::from_secs(1));
        assert_eq!(coarse.initial_ttl, Duration::from_secs(3));
        assert_eq!(coarse.small_delay, Duration::from_millis(100));

        let zero = Timings::for_precision(Duration::ZERO);
        assert_eq!(zero.precision, Duration::from_millis(1));
    }

    #[test]
    fn not_found_checks() {
        assert!(expect_not_found(Err(Error::not_found("k1")), "k1").is_ok());
        assert!(expect_not_found(Err(Error::not_found("other")), "k1").is_err());
        assert!(expect_not_found(Ok(None), "k1").is_err());
        assert!(expect_not_found(Err(Error::Unsupported("ttl")), "k1").is_err());
    }

    #[tokio::test]
    async fn memory_backend_conforms() -> Result<()> {
        let suite = ConformanceSuite::new(|| Ok(TtlEngine::new(Arc::new(MemoryBackend::new()))));
        let report = suite.run().await?;

        assert!(report.passed(), "{:?}", report.failures().collect::<Vec<_>>());
        assert_eq!(report.count(|o| *o == Outcome::Passed), Case::ALL.len());

        Ok(())
    }

    #[tokio::test]
    async fn skips_when_ttl_queries_unsupported() -> Result<()> {
        let caps = MemoryBackend::DEFAULT_CAPABILITIES.with_ttl_queries(false);
        let suite = ConformanceSuite::new(move || {
            Ok(TtlEngine::new(Arc::new(MemoryBackend::with_capabilities(caps))))
        });
        let report = suite.run().await?;

        assert!(report.passed());
        assert_eq!(
            report.count(|o| matches!(o, Outcome::Skipped(_))),
            Case::ALL.len()
        );

        Ok(())
    }

    #[tokio::test]
    async fn reports_contract_violations() -> Result<()> {
        // A backend that claims millisecond precision but is read through a
        // frozen clock never expires anything.
        let suite = ConformanceSuite::new(|| {
            let clock = Arc::new(crate::clock::ManualClock::new(
                crate::clock::Timestamp::from_millis(0),
            ));
            Ok(TtlEngine::with_clock(Arc::new(MemoryBackend::new()), clock))
        });
        let report = suite.run().await?;

        let failed: Vec<_> = report.failures().map(|case| case.name).collect();
        assert!(failed.contains(&Case::ExpiredKey.name()), "{:?}", failed);
        assert!(failed.contains(&Case::GetHidesExpiredKey.name()), "{:?}", failed);
        assert!(!report.passed());

        let json = serde_json::to_value(&report)?;
        assert_eq!(json["backend"], "memory");

        Ok(())
    }
}
