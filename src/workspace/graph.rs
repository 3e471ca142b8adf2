// src/workspace/graph.rs

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use tracing::debug;

use crate::errors::{BuildError, Result};
use crate::fs::FileSystem;
use crate::workspace::package::{DECLARATION_FILE, Package};

/// All packages of the workspace plus the workspace-internal dependency
/// edges between them.
#[derive(Debug, Clone, Default)]
pub struct PackageGraph {
    packages: BTreeMap<String, Package>,
    /// Direct workspace dependencies, in declaration order.
    workspace_deps: HashMap<String, Vec<String>>,
}

impl PackageGraph {
    /// Scan `ui_dir` one level down for package declarations.
    ///
    /// Directories starting with `@` or `.` are skipped. A malformed
    /// declaration or a dependency cycle is a configuration error.
    pub fn discover(fs: &dyn FileSystem, ui_dir: &Path) -> Result<Self> {
        let mut packages = Vec::new();
        for dir in fs.read_dir(ui_dir)? {
            let Some(name) = dir.file_name().map(|n| n.to_string_lossy().into_owned()) else {
                continue;
            };
            if name.starts_with('@') || name.starts_with('.') || !fs.is_dir(&dir) {
                continue;
            }
            let declaration = dir.join(DECLARATION_FILE);
            if !fs.is_file(&declaration) {
                continue;
            }
            let text = fs.read_to_string(&declaration)?;
            packages.push(Package::parse(&dir, &text)?);
        }
        Self::from_packages(packages)
    }

    /// Build the graph from already-parsed packages.
    pub fn from_packages(packages: impl IntoIterator<Item = Package>) -> Result<Self> {
        let packages: BTreeMap<String, Package> =
            packages.into_iter().map(|p| (p.name.clone(), p)).collect();

        let mut workspace_deps = HashMap::new();
        for pkg in packages.values() {
            let deps: Vec<String> = pkg
                .dependency_names()
                .filter(|dep| packages.contains_key(*dep))
                .map(str::to_string)
                .collect();
            debug!(pkg = %pkg.name, ?deps, "workspace dependencies");
            workspace_deps.insert(pkg.name.clone(), deps);
        }

        let graph = Self {
            packages,
            workspace_deps,
        };
        graph.validate_acyclic()?;
        Ok(graph)
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.packages.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Package> {
        self.packages.get(name)
    }

    /// All packages, ordered by name.
    pub fn packages(&self) -> impl Iterator<Item = &Package> {
        self.packages.values()
    }

    /// Direct workspace dependencies of `name`.
    pub fn workspace_deps(&self, name: &str) -> &[String] {
        self.workspace_deps
            .get(name)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Transitive workspace dependencies of `name`, dependencies first and
    /// `name` itself last. Duplicates keep their first-seen position.
    pub fn deps(&self, name: &str) -> Result<Vec<&Package>> {
        let Some((key, _)) = self.packages.get_key_value(name) else {
            return Err(BuildError::UnknownPackage(name.to_string()));
        };

        let mut order: Vec<&Package> = Vec::new();
        let mut done: HashSet<&str> = HashSet::new();
        let mut path: Vec<&str> = Vec::new();
        self.visit(key, &mut done, &mut path, &mut order)?;
        Ok(order)
    }

    fn visit<'a>(
        &'a self,
        name: &'a str,
        done: &mut HashSet<&'a str>,
        path: &mut Vec<&'a str>,
        order: &mut Vec<&'a Package>,
    ) -> Result<()> {
        if done.contains(name) {
            return Ok(());
        }
        if let Some(start) = path.iter().position(|p| *p == name) {
            let mut cycle: Vec<&str> = path[start..].to_vec();
            cycle.push(name);
            return Err(BuildError::DependencyCycle(cycle.join(" -> ")));
        }

        path.push(name);
        for dep in self.workspace_deps(name) {
            self.visit(dep, done, path, order)?;
        }
        path.pop();

        done.insert(name);
        if let Some(pkg) = self.packages.get(name) {
            order.push(pkg);
        }
        Ok(())
    }

    /// Packages to build for the requested names: everything when the
    /// request is empty, otherwise the union of each name's `deps`.
    pub fn building_set(&self, requested: &[String]) -> Result<Vec<Package>> {
        if requested.is_empty() {
            return Ok(self.packages.values().cloned().collect());
        }

        let mut seen: HashSet<&str> = HashSet::new();
        let mut building = Vec::new();
        for name in requested {
            for pkg in self.deps(name)? {
                if seen.insert(pkg.name.as_str()) {
                    building.push(pkg.clone());
                }
            }
        }
        Ok(building)
    }

    fn validate_acyclic(&self) -> Result<()> {
        // Edge direction: dependency -> dependent.
        let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
        for name in self.packages.keys() {
            graph.add_node(name.as_str());
        }
        for (name, deps) in &self.workspace_deps {
            for dep in deps {
                graph.add_edge(dep.as_str(), name.as_str(), ());
            }
        }

        match toposort(&graph, None) {
            Ok(_) => Ok(()),
            Err(cycle) => Err(BuildError::DependencyCycle(format!(
                "cycle in workspace dependencies involving package '{}'",
                cycle.node_id()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::mock::MockFileSystem;

    fn pkg(name: &str, deps: &[&str]) -> Package {
        let deps: serde_json::Map<String, serde_json::Value> = deps
            .iter()
            .map(|d| (d.to_string(), serde_json::Value::from("workspace:*")))
            .collect();
        let text = serde_json::json!({ "name": name, "dependencies": deps }).to_string();
        Package::parse(&Path::new("/ws/ui").join(name), &text).unwrap()
    }

    fn names(pkgs: &[&Package]) -> Vec<String> {
        pkgs.iter().map(|p| p.name.clone()).collect()
    }

    #[test]
    fn deps_lists_dependencies_before_dependents() {
        let graph = PackageGraph::from_packages([
            pkg("base", &[]),
            pkg("app", &["base"]),
        ])
        .unwrap();

        assert_eq!(names(&graph.deps("app").unwrap()), vec!["base", "app"]);
        assert_eq!(names(&graph.deps("base").unwrap()), vec!["base"]);
    }

    #[test]
    fn deps_keeps_first_seen_order_for_diamonds() {
        let graph = PackageGraph::from_packages([
            pkg("common", &[]),
            pkg("a", &["common"]),
            pkg("b", &["common", "a"]),
            pkg("site", &["a", "b", "lodash"]),
        ])
        .unwrap();

        assert_eq!(
            names(&graph.deps("site").unwrap()),
            vec!["common", "a", "b", "site"]
        );
        assert_eq!(graph.workspace_deps("site"), ["a", "b"]);
    }

    #[test]
    fn unknown_package_is_an_error() {
        let graph = PackageGraph::from_packages([pkg("base", &[])]).unwrap();
        assert!(matches!(
            graph.deps("nope"),
            Err(BuildError::UnknownPackage(name)) if name == "nope"
        ));
        assert!(graph.building_set(&["nope".to_string()]).is_err());
    }

    #[test]
    fn cyclic_declarations_are_rejected() {
        let err = PackageGraph::from_packages([pkg("a", &["b"]), pkg("b", &["a"])]).unwrap_err();
        assert!(matches!(err, BuildError::DependencyCycle(_)));
    }

    #[test]
    fn discover_skips_scoped_and_hidden_directories() {
        let fs = MockFileSystem::new();
        fs.add_file("/ws/ui/base/package.json", r#"{"name":"base"}"#);
        fs.add_file(
            "/ws/ui/app/package.json",
            r#"{"dependencies":{"base":"*"},"build":{"bundle":"src/main.ts"}}"#,
        );
        fs.add_file("/ws/ui/@types/lib/package.json", r#"{}"#);
        fs.add_file("/ws/ui/.build/package.json", r#"{}"#);
        fs.add_file("/ws/ui/notes/readme.md", "no declaration");

        let graph = PackageGraph::discover(&fs, Path::new("/ws/ui")).unwrap();
        assert_eq!(graph.len(), 2);
        assert_eq!(
            graph
                .building_set(&["app".to_string()])
                .unwrap()
                .iter()
                .map(|p| p.name.as_str())
                .collect::<Vec<_>>(),
            vec!["base", "app"]
        );
    }
}
