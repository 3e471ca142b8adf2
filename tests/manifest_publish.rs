// tests/manifest_publish.rs

mod common;
use crate::common::{
    bootstrap_scripts, harness, init_tracing, sample_workspace, server_manifest, with_timeout,
};

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use uibuild::engine::driver;
use uibuild::manifest::flush;
use uibuild::types::Stage;

type TestResult = Result<(), Box<dyn Error>>;

#[tokio::test]
async fn repeated_identical_results_publish_once() -> TestResult {
    init_tracing();
    let ws = sample_workspace();
    let h = harness(&ws, false, &[]);
    let ctx = h.session.create_context()?;

    with_timeout(driver::build(Arc::clone(&ctx))).await;
    flush(&ctx).await?;
    let published = bootstrap_scripts(&ws);
    assert_eq!(published.len(), 1, "{published:?}");

    // Remove the outputs so any second write would be visible.
    for name in &published {
        std::fs::remove_file(ws.path("public/compiled").join(name))?;
    }
    std::fs::remove_file(ws.path("public/compiled/manifest.dev.json"))?;

    ctx.done(Stage::Bundle, 0);
    ctx.done(Stage::Bundle, 0);
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(!flush(&ctx).await?, "nothing changed since the last write");
    assert!(bootstrap_scripts(&ws).is_empty());
    assert!(server_manifest(&ws).is_none());
    Ok(())
}
