// tests/watch_rebuild.rs

mod common;
use crate::common::{eventually, harness, init_tracing, sample_workspace, server_manifest, with_timeout};

use uibuild::engine::BuildEvent;

fn main_hash(ws: &common::Workspace) -> Option<String> {
    let manifest = server_manifest(ws)?;
    manifest["js"]["main"]["hash"].as_str().map(str::to_string)
}

#[tokio::test]
async fn editing_a_bundled_source_republishes_the_manifest() {
    init_tracing();
    let ws = sample_workspace();
    let h = harness(&ws, true, &[]);
    let events = h.events.clone();
    let bundler = h.bundler.clone();

    let script = async {
        let first = eventually(|| main_hash(&ws)).await;

        ws.write("ui/app/src/main.ts", "export const edited = true;\n");
        let second = eventually(|| main_hash(&ws).filter(|h| *h != first)).await;
        assert_ne!(first, second);

        // The live context was rebuilt, not replaced.
        assert!(bundler.builds().len() >= 2);
        assert_eq!(bundler.disposed(), 0);

        events
            .send(BuildEvent::ShutdownRequested)
            .expect("runtime listening");
    };

    let (code, ()) = with_timeout(async { tokio::join!(h.runtime.run(), script) }).await;
    assert_eq!(code.expect("runtime ran"), 0);
    // Shutdown disposed the live bundle context.
    assert_eq!(bundler.disposed(), 1);
}
