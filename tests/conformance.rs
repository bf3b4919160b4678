use std::{sync::Arc, time::Duration};

use kvttl::{
    conformance::{ConformanceSuite, Outcome},
    Capabilities, FileBackend, MemoryBackend, Result, SetOptions, SystemClock, TtlEngine,
};

#[tokio::test]
async fn memory_backend_passes_ttl_contract() -> Result<()> {
    let suite = ConformanceSuite::new(|| Ok(TtlEngine::new(Arc::new(MemoryBackend::new()))));
    let report = suite.run().await?;

    assert_eq!(report.backend, "memory");
    assert_eq!(report.ttl_precision_ms, 1);
    assert!(report.passed(), "{:#?}", report);

    Ok(())
}

#[tokio::test]
async fn file_backend_passes_ttl_contract_at_one_second_precision() -> Result<()> {
    let root = tempfile::tempdir()?;
    let next = std::sync::atomic::AtomicUsize::new(0);

    let suite = ConformanceSuite::new(|| {
        let n = next.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let backend = FileBackend::open(root.path().join(format!("case-{}", n)), &SystemClock)?;
        Ok(TtlEngine::new(Arc::new(backend)))
    });
    let report = suite.run().await?;

    assert_eq!(report.backend, "file");
    assert_eq!(report.ttl_precision_ms, 1000);
    assert!(report.passed(), "{:#?}", report);

    Ok(())
}

#[tokio::test]
async fn backend_without_ttl_queries_is_skipped_not_failed() -> Result<()> {
    let caps = Capabilities::new(Duration::from_millis(1), false);
    let suite = ConformanceSuite::new(move || {
        Ok(TtlEngine::new(Arc::new(MemoryBackend::with_capabilities(caps))))
    });
    let report = suite.run().await?;

    assert!(report.passed());
    assert!(report
        .cases
        .iter()
        .all(|case| matches!(case.outcome, Outcome::Skipped(_))));

    Ok(())
}

#[tokio::test]
async fn file_backend_keeps_deadlines_across_restart() -> Result<()> {
    let dir = tempfile::tempdir()?;

    {
        let backend = Arc::new(FileBackend::open(dir.path(), &SystemClock)?);
        let engine = TtlEngine::new(backend.clone());
        engine
            .set("a-key", "a-value", SetOptions::with_ttl(Duration::from_secs(60)))
            .await?;
        engine.set("b-key", "b-value", SetOptions::default()).await?;
        backend.sync().await?;
    }

    let engine = TtlEngine::new(Arc::new(FileBackend::open(dir.path(), &SystemClock)?));
    let ttl = engine.ttl("a-key").await?.expect("deadline kept");
    assert!(ttl > Duration::from_secs(50) && ttl <= Duration::from_secs(60));
    assert_eq!(engine.ttl("b-key").await?, None);
    assert_eq!(engine.get("b-key").await?, Some(b"b-value".to_vec()));

    Ok(())
}
