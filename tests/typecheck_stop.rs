// tests/typecheck_stop.rs

mod common;
use crate::common::{
    eventually, harness_with, init_tracing, sample_workspace, with_timeout, FakeBundler,
    FakeWorkerBackend,
};

use std::error::Error;
use std::sync::Arc;

use uibuild::typecheck::typecheck;
use uibuild::types::PassKind;

type TestResult = Result<(), Box<dyn Error>>;

#[tokio::test]
async fn stopping_during_the_fast_pass_never_starts_the_full_pass() -> TestResult {
    init_tracing();
    let ws = sample_workspace();
    let workers = FakeWorkerBackend::silent();
    let h = harness_with(&ws, false, &[], FakeBundler::new(ws.root()), workers.clone());
    let ctx = h.session.create_context()?;

    let stage = typecheck(Arc::clone(&ctx));
    let stopper = async {
        eventually(|| (!workers.jobs().is_empty()).then_some(())).await;
        ctx.stop().await;
    };
    let (result, ()) = with_timeout(async { tokio::join!(stage, stopper) }).await;
    result?;

    let kinds: Vec<PassKind> = workers.jobs().iter().map(|j| j.kind).collect();
    assert!(!kinds.is_empty());
    assert!(kinds.iter().all(|k| *k == PassKind::Fast), "{kinds:?}");
    Ok(())
}
