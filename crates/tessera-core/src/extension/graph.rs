//! Dependency ordering over manifests.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use super::manifest::Manifest;
use crate::error::{Error, Result};

/// Order `roots` and everything they transitively depend on so that each
/// extension comes after its dependencies.
///
/// Uses Kahn's algorithm; ties are broken by id so the order is stable.
pub fn dependency_order(
    manifests: &HashMap<String, Arc<Manifest>>,
    roots: &[String],
) -> Result<Vec<String>> {
    // Collect the closure of the roots.
    let mut nodes: BTreeSet<String> = BTreeSet::new();
    let mut stack: Vec<String> = roots.to_vec();
    while let Some(id) = stack.pop() {
        if !nodes.insert(id.clone()) {
            continue;
        }
        let manifest = manifests
            .get(&id)
            .ok_or_else(|| Error::ManifestNotFound(id.clone()))?;
        for dep in &manifest.dependencies {
            if !manifests.contains_key(dep) {
                return Err(Error::MissingDependency {
                    id: id.clone(),
                    dependency: dep.clone(),
                });
            }
            stack.push(dep.clone());
        }
    }

    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    for id in &nodes {
        in_degree.entry(id.as_str()).or_insert(0);
        if let Some(manifest) = manifests.get(id) {
            let unique: HashSet<&str> = manifest.dependencies.iter().map(String::as_str).collect();
            for dep in unique {
                dependents.entry(dep).or_default().push(id.as_str());
                *in_degree.entry(id.as_str()).or_insert(0) += 1;
            }
        }
    }

    let mut ready: BTreeSet<&str> = in_degree
        .iter()
        .filter(|&(_, d)| *d == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut order = Vec::with_capacity(nodes.len());

    while let Some(id) = ready.pop_first() {
        order.push(id.to_string());
        if let Some(children) = dependents.get(id) {
            for &child in children {
                if let Some(degree) = in_degree.get_mut(child) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert(child);
                    }
                }
            }
        }
    }

    if order.len() != nodes.len() {
        let mut remaining: Vec<String> = in_degree
            .iter()
            .filter(|&(_, d)| *d > 0)
            .map(|(id, _)| id.to_string())
            .collect();
        remaining.sort();
        return Err(Error::DependencyCycle(remaining));
    }

    Ok(order)
}

/// Ids among `candidates` whose manifest lists `id` as a dependency.
pub fn direct_dependents<'a, I>(id: &str, candidates: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a Arc<Manifest>>,
{
    let mut out: Vec<String> = candidates
        .into_iter()
        .filter(|m| m.dependencies.iter().any(|d| d == id))
        .map(|m| m.id.clone())
        .collect();
    out.sort();
    out
}
