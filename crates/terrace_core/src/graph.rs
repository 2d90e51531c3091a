//! Dependency graph of definitions.
//!
//! Edges run from a dependency to its dependent. The graph is layered with
//! Kahn's algorithm: every definition lands in the first layer after all of
//! its dependencies, and definitions within a layer keep declaration order.

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;
use tracing::debug;

use terrace_config::Definition;

use crate::error::{CoreResult, GraphError};

/// Validated, acyclic dependency graph.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    /// Definition names in declaration order.
    nodes: Vec<String>,
    /// Direct dependencies of each node, first binding first.
    dependencies: IndexMap<String, Vec<String>>,
    /// Direct dependents of each node, in declaration order.
    dependents: IndexMap<String, Vec<String>>,
    layers: Vec<Vec<String>>,
}

impl DependencyGraph {
    /// Build the graph from the remote bindings of `definitions`.
    ///
    /// Fails on a binding to an unknown definition, on a binding to the
    /// definition itself, and on cycles. Output names are not checked here.
    pub fn build(definitions: &IndexMap<String, Definition>) -> CoreResult<Self> {
        let nodes: Vec<String> = definitions.keys().cloned().collect();
        let mut dependencies: IndexMap<String, Vec<String>> =
            nodes.iter().map(|name| (name.clone(), Vec::new())).collect();
        let mut dependents: IndexMap<String, Vec<String>> =
            nodes.iter().map(|name| (name.clone(), Vec::new())).collect();

        for (name, definition) in definitions {
            for binding in definition.bindings()? {
                if binding.source_definition == *name {
                    return Err(GraphError::SelfReference {
                        definition: name.clone(),
                        variable: binding.variable,
                    }
                    .into());
                }
                if !definitions.contains_key(&binding.source_definition) {
                    return Err(GraphError::UnknownSource {
                        definition: name.clone(),
                        variable: binding.variable,
                        source_definition: binding.source_definition,
                    }
                    .into());
                }

                let deps = dependencies.entry(name.clone()).or_default();
                if !deps.contains(&binding.source_definition) {
                    deps.push(binding.source_definition.clone());
                }
            }
        }

        // Dependents are collected after the fact so they follow declaration
        // order rather than binding order.
        for name in &nodes {
            for dependency in &dependencies[name] {
                dependents
                    .entry(dependency.clone())
                    .or_default()
                    .push(name.clone());
            }
        }

        let layers = layer(&nodes, &dependencies, &dependents)?;
        debug!("Built dependency graph with {} layer(s)", layers.len());

        Ok(Self {
            nodes,
            dependencies,
            dependents,
            layers,
        })
    }

    /// Layers in execution order. Each layer only depends on earlier ones.
    pub fn layers(&self) -> &[Vec<String>] {
        &self.layers
    }

    /// Layers in teardown order: dependents before their dependencies.
    pub fn reverse_layers(&self) -> Vec<Vec<String>> {
        self.layers.iter().rev().cloned().collect()
    }

    /// The flattened execution order.
    pub fn order(&self) -> Vec<&str> {
        self.layers
            .iter()
            .flat_map(|layer| layer.iter().map(String::as_str))
            .collect()
    }

    pub fn dependencies(&self, name: &str) -> &[String] {
        self.dependencies.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn dependents(&self, name: &str) -> &[String] {
        self.dependents.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.dependencies.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

fn layer(
    nodes: &[String],
    dependencies: &IndexMap<String, Vec<String>>,
    dependents: &IndexMap<String, Vec<String>>,
) -> Result<Vec<Vec<String>>, GraphError> {
    let position: HashMap<&str, usize> = nodes
        .iter()
        .enumerate()
        .map(|(index, name)| (name.as_str(), index))
        .collect();
    let mut in_degree: HashMap<&str, usize> = nodes
        .iter()
        .map(|name| (name.as_str(), dependencies[name].len()))
        .collect();

    let mut current: Vec<&str> = nodes
        .iter()
        .map(String::as_str)
        .filter(|name| in_degree[name] == 0)
        .collect();
    let mut layers = Vec::new();
    let mut placed = 0;

    while !current.is_empty() {
        let mut next = Vec::new();
        for name in &current {
            for dependent in &dependents[*name] {
                if let Some(degree) = in_degree.get_mut(dependent.as_str()) {
                    *degree -= 1;
                    if *degree == 0 {
                        next.push(dependent.as_str());
                    }
                }
            }
        }
        next.sort_by_key(|name| position[name]);

        placed += current.len();
        layers.push(current.iter().map(|name| name.to_string()).collect());
        current = next;
    }

    if placed < nodes.len() {
        let remaining: HashSet<&str> = in_degree
            .iter()
            .filter(|(_, degree)| **degree > 0)
            .map(|(name, _)| *name)
            .collect();
        return Err(GraphError::Cycle {
            path: find_cycle(nodes, dependencies, &remaining),
        });
    }

    Ok(layers)
}

/// A concrete cycle among nodes Kahn could not place.
///
/// Each such node still has a dependency among them, so following
/// dependencies from any of them must revisit a node.
fn find_cycle(
    nodes: &[String],
    dependencies: &IndexMap<String, Vec<String>>,
    remaining: &HashSet<&str>,
) -> Vec<String> {
    let Some(start) = nodes.iter().find(|name| remaining.contains(name.as_str())) else {
        return Vec::new();
    };

    let mut walk: Vec<&str> = vec![start.as_str()];
    loop {
        let current = walk[walk.len() - 1];
        let Some(next) = dependencies[current]
            .iter()
            .map(String::as_str)
            .find(|dep| remaining.contains(dep))
        else {
            return walk.iter().map(|name| name.to_string()).collect();
        };

        if let Some(seen) = walk.iter().position(|name| *name == next) {
            // The walk follows dependencies; report it in edge direction.
            let mut cycle: Vec<String> = walk[seen..].iter().map(|name| name.to_string()).collect();
            cycle.push(next.to_string());
            cycle.reverse();
            return cycle;
        }
        walk.push(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;

    fn definitions(specs: &[(&str, &[&str])]) -> IndexMap<String, Definition> {
        specs
            .iter()
            .map(|(name, sources)| {
                let mut definition = Definition::new(*name, format!("modules/{}", name));
                for source in *sources {
                    definition = definition
                        .with_remote_var(format!("{}_id", source), format!("{}.id", source));
                }
                (name.to_string(), definition)
            })
            .collect()
    }

    fn cycle_of(result: CoreResult<DependencyGraph>) -> Vec<String> {
        match result {
            Err(CoreError::Graph(GraphError::Cycle { path })) => path,
            other => panic!("expected a cycle, got {:?}", other.map(|g| g.layers)),
        }
    }

    #[test]
    fn test_layers_follow_dependencies() {
        let graph = DependencyGraph::build(&definitions(&[
            ("network", &[]),
            ("database", &["network"]),
            ("dns", &[]),
            ("app", &["database", "network"]),
        ]))
        .unwrap();

        assert_eq!(
            graph.layers(),
            &[
                vec!["network".to_string(), "dns".to_string()],
                vec!["database".to_string()],
                vec!["app".to_string()],
            ]
        );
        assert_eq!(graph.order(), vec!["network", "dns", "database", "app"]);
        assert_eq!(graph.dependencies("app"), &["database".to_string(), "network".to_string()]);
        assert_eq!(graph.dependents("network"), &["database".to_string(), "app".to_string()]);
        assert!(graph.dependents("app").is_empty());
    }

    #[test]
    fn test_ties_keep_declaration_order() {
        let specs: &[(&str, &[&str])] = &[("zeta", &[]), ("alpha", &[]), ("mid", &["zeta"]), ("beta", &["alpha"])];
        let first = DependencyGraph::build(&definitions(specs)).unwrap();
        for _ in 0..10 {
            let again = DependencyGraph::build(&definitions(specs)).unwrap();
            assert_eq!(again.order(), first.order());
        }
        assert_eq!(first.order(), vec!["zeta", "alpha", "mid", "beta"]);
    }

    #[test]
    fn test_reverse_layers() {
        let graph = DependencyGraph::build(&definitions(&[
            ("network", &[]),
            ("database", &["network"]),
        ]))
        .unwrap();
        assert_eq!(
            graph.reverse_layers(),
            vec![vec!["database".to_string()], vec!["network".to_string()]]
        );
    }

    #[test]
    fn test_two_node_cycle() {
        let path = cycle_of(DependencyGraph::build(&definitions(&[
            ("a", &["b"]),
            ("b", &["a"]),
        ])));
        assert_eq!(path.first(), path.last());
        assert_eq!(path.len(), 3);
    }

    #[test]
    fn test_longer_cycle_is_reported_in_edge_order() {
        // a -> b -> c -> a, plus an unrelated root and a node hanging off the cycle
        let path = cycle_of(DependencyGraph::build(&definitions(&[
            ("root", &[]),
            ("a", &["c", "root"]),
            ("b", &["a"]),
            ("c", &["b"]),
            ("tail", &["c"]),
        ])));
        assert_eq!(path, vec!["a", "b", "c", "a"]);
    }

    #[test]
    fn test_unknown_source_and_self_reference() {
        let unknown = DependencyGraph::build(&definitions(&[("database", &["network"])]));
        assert!(matches!(
            unknown,
            Err(CoreError::Graph(GraphError::UnknownSource { ref source_definition, .. })) if source_definition == "network"
        ));

        let own = DependencyGraph::build(&definitions(&[("loop", &["loop"])]));
        assert!(matches!(
            own,
            Err(CoreError::Graph(GraphError::SelfReference { ref definition, .. })) if definition == "loop"
        ));
    }

    #[test]
    fn test_repeated_source_is_one_edge() {
        let mut defs = definitions(&[("network", &[])]);
        defs.insert(
            "database".to_string(),
            Definition::new("database", "modules/database")
                .with_remote_var("vpc_id", "network.vpc_id")
                .with_remote_var("subnet_ids", "network.private_subnet_ids"),
        );
        let graph = DependencyGraph::build(&defs).unwrap();
        assert_eq!(graph.dependencies("database"), &["network".to_string()]);
        assert_eq!(graph.dependents("network"), &["database".to_string()]);
        assert_eq!(graph.len(), 2);
    }
}
