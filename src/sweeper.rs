use std::time::Duration;

use tokio::{task::JoinHandle, time};
use tracing::{debug, error};

use crate::engine::TtlEngine;

/// Background task that proactively evicts expired entries.
///
/// Reads already hide expired entries; the sweeper only reclaims space held
/// by keys nobody reads again.
pub struct Sweeper;

impl Sweeper {
    /// Sweeps every `every`. The task ends once the engine's backend is dropped.
    pub fn spawn(engine: &TtlEngine, every: Duration) -> JoinHandle<()> {
        let engine = engine.downgrade();

        tokio::spawn(async move {
            let mut interval = time::interval(every);
            interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

            loop {
                interval.tick().await;

                let Some(engine) = engine.upgrade() else {
                    debug!("Engine dropped, stopping sweeper");
                    break;
                };

                match engine.evict_expired().await {
                    Ok(0) => {}
                    Ok(n) => debug!("Swept {} expired keys from {}", n, engine.backend_name()),
                    Err(e) => error!("Failed to sweep expired keys: {}", e),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        backend::MemoryBackend,
        clock::{ManualClock, Timestamp},
        engine::SetOptions,
        Result,
    };

    #[tokio::test]
    async fn sweeps_expired_keys_in_background() -> Result<()> {
        let clock = Arc::new(ManualClock::new(Timestamp::from_millis(0)));
        let backend = Arc::new(MemoryBackend::new());
        let engine = TtlEngine::with_clock(backend.clone(), clock.clone());

        for i in 0..5 {
            engine
                .set(
                    &format!("expire_key{}", i),
                    "v",
                    SetOptions::with_ttl(Duration::from_millis(100)),
                )
                .await?;
        }
        engine.set("perm_key", "v", SetOptions::default()).await?;

        let handle = Sweeper::spawn(&engine, Duration::from_millis(5));
        clock.advance(Duration::from_millis(100));
        time::sleep(Duration::from_millis(50)).await;

        assert_eq!(backend.len(), 1);

        drop(engine);
        drop(backend);
        time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweeper should stop")
            .expect("sweeper should not panic");

        Ok(())
    }
}
