//! Package set resolution.
//!
//! Given a loaded project and one or more requested package names, this module
//! computes the ordered list of package identifiers that must be loaded into a
//! build session. The order is a topological order of the declared dependency
//! graph (dependencies before dependents); ties between independent packages
//! are broken by name so the same manifest always yields the same order.
//!
//! Resolution has no side effects: it only reads the manifest pair.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use semver::Version;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::manifest::{PackageDef, Project};
use crate::util::hash::{ContentHash, Hashable, ObjectHash, hash_file};

/// A version-resolved package identity.
///
/// The hash is taken from the lock file when the locked version matches the
/// manifest, otherwise it is computed from the manifest entry itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageId {
  pub name: String,
  pub version: Version,
  pub hash: ObjectHash,
}

impl std::fmt::Display for PackageId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}@{}", self.name, self.version)
  }
}

/// Errors that can occur during package set resolution.
#[derive(Debug, Error)]
pub enum ResolveError {
  /// No package names were requested.
  #[error("no packages requested")]
  EmptyRequest,

  /// A requested or transitively required package is not in the manifest.
  #[error("package '{name}' not found in manifest{}", wanted_by.as_ref().map(|w| format!(" (required by '{w}')")).unwrap_or_default())]
  Unknown {
    name: String,
    wanted_by: Option<String>,
  },

  /// The dependency graph contains a cycle.
  #[error("dependency cycle involving package '{0}'")]
  Cycle(String),

  /// Package identity could not be computed.
  #[error("failed to compute identity for package '{name}': {source}")]
  Identity {
    name: String,
    #[source]
    source: serde_json::Error,
  },
}

/// Fingerprint hashed to derive a package's content identity when no lock
/// entry pins one. Includes the source file's content hash when the source
/// is readable, so editing a package changes its identity.
#[derive(Serialize)]
struct PackageFingerprint<'a> {
  name: &'a str,
  def: &'a PackageDef,
  content: Option<ContentHash>,
}

impl Hashable for PackageFingerprint<'_> {}

/// Resolve the requested names into an ordered package list.
///
/// Returns the manifest closure of `names` in a topological order consistent
/// with the declared dependency edges. The order is deterministic: among
/// packages whose dependencies are all satisfied, the lexicographically
/// smallest name is emitted first.
///
/// # Errors
///
/// Returns [`ResolveError`] if `names` is empty, a requested or transitive
/// name is absent from the manifest, or the dependency graph is cyclic.
pub fn resolve(project: &Project, names: &[String]) -> Result<Vec<PackageId>, ResolveError> {
  if names.is_empty() {
    return Err(ResolveError::EmptyRequest);
  }

  // Collect the manifest closure of the requested names.
  let mut closure: BTreeMap<&str, &PackageDef> = BTreeMap::new();
  let mut pending: Vec<(String, Option<String>)> =
    names.iter().map(|n| (n.clone(), None)).collect();

  while let Some((name, wanted_by)) = pending.pop() {
    if closure.contains_key(name.as_str()) {
      continue;
    }
    let (key, def) = project
      .manifest
      .packages
      .get_key_value(name.as_str())
      .ok_or(ResolveError::Unknown {
        name: name.clone(),
        wanted_by,
      })?;
    closure.insert(key.as_str(), def);
    for dep in &def.deps {
      pending.push((dep.clone(), Some(name.clone())));
    }
  }

  // Build the dependency graph: edge from dependency to dependent.
  let mut graph: DiGraph<&str, ()> = DiGraph::new();
  let mut nodes: HashMap<&str, NodeIndex> = HashMap::new();
  for name in closure.keys() {
    nodes.insert(name, graph.add_node(name));
  }
  for (name, def) in &closure {
    for dep in &def.deps {
      // Deps are in the closure by construction.
      graph.add_edge(nodes[dep.as_str()], nodes[name], ());
    }
  }

  // Kahn's algorithm with an ordered ready set for deterministic output.
  let mut in_degree: HashMap<NodeIndex, usize> = graph
    .node_indices()
    .map(|idx| (idx, graph.neighbors_directed(idx, Direction::Incoming).count()))
    .collect();

  let mut ready: BTreeSet<&str> = graph
    .node_indices()
    .filter(|idx| in_degree[idx] == 0)
    .map(|idx| graph[idx])
    .collect();

  let mut ordered = Vec::with_capacity(closure.len());
  while let Some(name) = ready.pop_first() {
    ordered.push(name);
    let idx = nodes[name];
    for dependent in graph.neighbors_directed(idx, Direction::Outgoing) {
      let degree = in_degree.get_mut(&dependent).unwrap();
      *degree -= 1;
      if *degree == 0 {
        ready.insert(graph[dependent]);
      }
    }
  }

  if ordered.len() != closure.len() {
    // Any package not emitted participates in (or depends on) a cycle.
    let stuck = closure
      .keys()
      .copied()
      .find(|name| !ordered.contains(name))
      .expect("cycle implies a leftover node");
    return Err(ResolveError::Cycle(stuck.to_string()));
  }

  let list = ordered
    .into_iter()
    .map(|name| package_id(project, name, closure[name]))
    .collect::<Result<Vec<_>, _>>()?;

  debug!(requested = names.len(), resolved = list.len(), "resolved package set");

  Ok(list)
}

fn package_id(project: &Project, name: &str, def: &PackageDef) -> Result<PackageId, ResolveError> {
  // A lock entry pins the identity as long as it still matches the manifest.
  if let Some(lock) = &project.lock
    && let Some(entry) = lock.get(name)
    && entry.version == def.version
  {
    return Ok(PackageId {
      name: name.to_string(),
      version: def.version.clone(),
      hash: entry.checksum.clone(),
    });
  }

  let content = hash_file(&project.source_path(def)).ok();
  let hash = PackageFingerprint { name, def, content }
    .compute_hash()
    .map_err(|e| ResolveError::Identity {
      name: name.to_string(),
      source: e,
    })?;

  Ok(PackageId {
    name: name.to_string(),
    version: def.version.clone(),
    hash,
  })
}
