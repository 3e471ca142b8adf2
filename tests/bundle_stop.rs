// tests/bundle_stop.rs

mod common;
use crate::common::{
    eventually, harness_with, init_tracing, sample_workspace, with_timeout, FakeBundler,
    FakeWorkerBackend,
};

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use uibuild::bundle::{bundle, stop};

type TestResult = Result<(), Box<dyn Error>>;

#[tokio::test]
async fn stop_returns_while_a_rebuild_is_in_flight() -> TestResult {
    init_tracing();
    let ws = sample_workspace();
    let bundler = FakeBundler::gated(ws.root());
    let h = harness_with(&ws, false, &[], bundler.clone(), FakeWorkerBackend::new());
    let ctx = h.session.create_context()?;

    let stage = bundle(Arc::clone(&ctx));
    let stopper = async {
        eventually(|| (bundler.started() > 0).then_some(())).await;
        let stopped = tokio::time::timeout(Duration::from_secs(1), stop(&ctx)).await;
        bundler.release();
        stopped.is_ok()
    };
    let (result, stopped) = with_timeout(async { tokio::join!(stage, stopper) }).await;
    result?;

    assert!(stopped, "stop waited for the held rebuild");
    // The stale build disposed its own context once it finished.
    assert_eq!(bundler.started(), 1);
    assert_eq!(bundler.disposed(), 1);
    Ok(())
}
