use std::{
    fs,
    process::ExitCode,
    sync::atomic::{AtomicUsize, Ordering},
};

use kvttl::{
    config::BackendKind,
    conformance::{ConformanceSuite, Outcome},
    Config, Result,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

async fn run(config: Config) -> Result<bool> {
    let base_dir = config.data_dir.join("conformance");
    let next_case = AtomicUsize::new(0);

    // Every case gets an empty store, like a fresh fixture.
    let suite = ConformanceSuite::new(|| {
        let mut config = config.clone();
        if config.backend == BackendKind::File {
            let dir = base_dir.join(format!("case-{}", next_case.fetch_add(1, Ordering::SeqCst)));
            if dir.exists() {
                fs::remove_dir_all(&dir)?;
            }
            config.data_dir = dir;
        }
        config.open_engine()
    });

    let report = suite.run().await?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    info!(
        "{} passed, {} failed, {} skipped",
        report.count(|o| *o == Outcome::Passed),
        report.count(|o| matches!(o, Outcome::Failed(_))),
        report.count(|o| matches!(o, Outcome::Skipped(_))),
    );

    Ok(report.passed())
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::from_env();
    info!("Starting TTL conformance run with {:?}", config);

    match run(config).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("Conformance run aborted: {}", e);
            ExitCode::from(2)
        }
    }
}
