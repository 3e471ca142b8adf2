// tests/workspace_graph.rs

mod common;
use crate::common::{init_tracing, WorkspaceBuilder};

use std::collections::HashSet;
use std::error::Error;
use std::path::Path;

use proptest::prelude::*;
use serde_json::json;

use uibuild::errors::BuildError;
use uibuild::fs::RealFileSystem;
use uibuild::workspace::{Package, PackageGraph};

type TestResult = Result<(), Box<dyn Error>>;

#[test]
fn discovery_reads_every_package_and_skips_scoped_dirs() -> TestResult {
    init_tracing();
    let ws = WorkspaceBuilder::new()
        .package("base", json!({}))
        .package(
            "app",
            json!({
                "dependencies": {"base": "workspace:*", "lodash": "^4"},
                "build": {"bundle": "src/main.ts"}
            }),
        )
        .file("ui/@types/lib/package.json", r#"{"name": "@types/lib"}"#)
        .file("ui/notes/README.md", "no declaration here")
        .build();

    let graph = PackageGraph::discover(&RealFileSystem, &ws.path("ui"))?;
    let names: Vec<&str> = graph.packages().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["app", "base"]);
    // External dependencies are not part of the workspace graph.
    assert_eq!(graph.workspace_deps("app"), ["base".to_string()]);

    let order: Vec<&str> = graph.deps("app")?.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(order, vec!["base", "app"]);
    Ok(())
}

#[test]
fn building_set_rejects_unknown_packages() -> TestResult {
    let ws = WorkspaceBuilder::new().package("base", json!({})).build();
    let graph = PackageGraph::discover(&RealFileSystem, &ws.path("ui"))?;

    let err = graph.building_set(&["missing".to_string()]).unwrap_err();
    assert!(matches!(err, BuildError::UnknownPackage(ref name) if name == "missing"));
    Ok(())
}

#[test]
fn discovery_reports_dependency_cycles() {
    let ws = WorkspaceBuilder::new()
        .package("a", json!({"dependencies": {"b": "*"}}))
        .package("b", json!({"dependencies": {"c": "*"}}))
        .package("c", json!({"dependencies": {"a": "*"}}))
        .build();

    let err = PackageGraph::discover(&RealFileSystem, &ws.path("ui")).unwrap_err();
    assert!(matches!(err, BuildError::DependencyCycle(_)), "{err}");
}

/// Package `i` may only depend on packages with a lower index, so every
/// generated graph is acyclic.
fn acyclic_packages() -> impl Strategy<Value = Vec<Package>> {
    (1usize..8).prop_flat_map(|n| {
        proptest::collection::vec(proptest::collection::vec(any::<prop::sample::Index>(), 0..4), n)
            .prop_map(move |picks| {
                picks
                    .into_iter()
                    .enumerate()
                    .map(|(i, deps)| {
                        let deps: serde_json::Map<String, serde_json::Value> = if i == 0 {
                            serde_json::Map::new()
                        } else {
                            deps.iter()
                                .map(|ix| (format!("p{}", ix.index(i)), json!("workspace:*")))
                                .collect()
                        };
                        let text = json!({"name": format!("p{i}"), "dependencies": deps});
                        Package::parse(&Path::new("/ws/ui").join(format!("p{i}")), &text.to_string())
                            .expect("generated declaration parses")
                    })
                    .collect()
            })
    })
}

proptest! {
    #[test]
    fn deps_put_every_dependency_before_its_dependents(packages in acyclic_packages()) {
        let graph = PackageGraph::from_packages(packages).expect("acyclic by construction");
        for pkg in graph.packages() {
            let order = graph.deps(&pkg.name).expect("known package");
            let names: Vec<&str> = order.iter().map(|p| p.name.as_str()).collect();

            prop_assert_eq!(names.last().copied(), Some(pkg.name.as_str()));
            let unique: HashSet<&str> = names.iter().copied().collect();
            prop_assert_eq!(unique.len(), names.len());

            for (pos, name) in names.iter().enumerate() {
                for dep in graph.workspace_deps(name) {
                    let dep_pos = names.iter().position(|n| n == dep);
                    prop_assert!(matches!(dep_pos, Some(d) if d < pos), "{dep} before {name}");
                }
            }
        }
    }
}
