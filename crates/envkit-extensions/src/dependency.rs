//! Dependency resolution into ordered install and removal plans.
//!
//! Requests are expanded to the transitive closure of their `dependencies`
//! edges and ordered with Kahn's algorithm. Nodes that become ready at the
//! same time are taken in id order, so the same request against the same
//! catalog always produces the same plan.
//!
//! # Example
//!
//! ```rust,ignore
//! let plan = resolve_install(&catalog, &ResolveRequest::Profile("minimal".into()))?;
//! assert_eq!(plan.ids(), vec!["nodejs", "claude-code"]);
//! ```

use std::collections::{BTreeMap, BTreeSet};

use envkit_catalog::{Catalog, ExtensionDefinition};

use crate::error::ResolutionError;

type Result<T> = std::result::Result<T, ResolutionError>;

/// What the caller asked to resolve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveRequest {
    /// One or more extension ids.
    Extensions(Vec<String>),
    /// A profile name, expanded through the catalog.
    Profile(String),
}

impl ResolveRequest {
    pub fn extension(id: impl Into<String>) -> Self {
        Self::Extensions(vec![id.into()])
    }

    pub fn profile(name: impl Into<String>) -> Self {
        Self::Profile(name.into())
    }
}

/// Direction a plan is meant to be executed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanDirection {
    /// Dependencies first.
    Install,
    /// Dependents first.
    Remove,
}

/// Ordered, duplicate-free list of definitions to act on.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolutionPlan {
    direction: PlanDirection,
    members: Vec<ExtensionDefinition>,
}

impl ResolutionPlan {
    /// Wrap members that are already in execution order.
    pub(crate) fn new(direction: PlanDirection, members: Vec<ExtensionDefinition>) -> Self {
        Self { direction, members }
    }

    pub fn direction(&self) -> PlanDirection {
        self.direction
    }

    pub fn members(&self) -> &[ExtensionDefinition] {
        &self.members
    }

    pub fn ids(&self) -> Vec<&str> {
        self.members.iter().map(|d| d.id.as_str()).collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.members.iter().any(|d| d.id == id)
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.members.iter().position(|d| d.id == id)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExtensionDefinition> {
        self.members.iter()
    }
}

/// Resolve an install request into a dependencies-first plan.
pub fn resolve_install(catalog: &Catalog, request: &ResolveRequest) -> Result<ResolutionPlan> {
    let roots = request_roots(catalog, request)?;
    let closure = dependency_closure(catalog, &roots)?;
    let order = topological_order(catalog, &closure)?;

    tracing::debug!(request = ?request, plan = ?order, "Resolved install plan");

    Ok(ResolutionPlan::new(
        PlanDirection::Install,
        definitions(catalog, &order),
    ))
}

/// Resolve the removal of `target` into a dependents-first plan.
///
/// `active` is the set of currently active extension ids. Any active
/// extension that transitively depends on `target` must be removed too;
/// without `cascade` that is a [`ResolutionError::DependentsStillActive`].
pub fn resolve_removal(
    catalog: &Catalog,
    target: &str,
    active: &BTreeSet<String>,
    cascade: bool,
) -> Result<ResolutionPlan> {
    if !catalog.contains(target) {
        return Err(ResolutionError::UnknownExtension(target.to_string()));
    }

    let mut removal: BTreeSet<String> = BTreeSet::from([target.to_string()]);
    loop {
        let added: Vec<String> = active
            .iter()
            .filter(|id| !removal.contains(id.as_str()))
            .filter(|id| {
                catalog
                    .get(id)
                    .is_some_and(|def| def.dependencies.iter().any(|d| removal.contains(d)))
            })
            .cloned()
            .collect();
        if added.is_empty() {
            break;
        }
        removal.extend(added);
    }

    if removal.len() > 1 && !cascade {
        let dependents = removal.iter().filter(|id| *id != target).cloned().collect();
        return Err(ResolutionError::DependentsStillActive {
            extension: target.to_string(),
            dependents,
        });
    }

    let mut order = topological_order(catalog, &removal)?;
    order.reverse();

    tracing::debug!(extension = target, plan = ?order, "Resolved removal plan");

    Ok(ResolutionPlan::new(
        PlanDirection::Remove,
        definitions(catalog, &order),
    ))
}

fn request_roots(catalog: &Catalog, request: &ResolveRequest) -> Result<Vec<String>> {
    let ids = match request {
        ResolveRequest::Extensions(ids) => ids.clone(),
        ResolveRequest::Profile(name) => catalog
            .profile(name)
            .map(|p| p.extensions.clone())
            .ok_or_else(|| ResolutionError::UnknownProfile(name.clone()))?,
    };

    if let Some(missing) = ids.iter().find(|id| !catalog.contains(id)) {
        return Err(ResolutionError::UnknownExtension(missing.clone()));
    }
    Ok(ids)
}

/// Every id reachable from `roots` along dependency edges.
fn dependency_closure(catalog: &Catalog, roots: &[String]) -> Result<BTreeSet<String>> {
    let mut closure = BTreeSet::new();
    let mut stack: Vec<String> = roots.iter().rev().cloned().collect();

    while let Some(id) = stack.pop() {
        if !closure.insert(id.clone()) {
            continue;
        }
        let Some(def) = catalog.get(&id) else {
            continue;
        };
        for dep in def.dependencies.iter().rev() {
            if !catalog.contains(dep) {
                return Err(ResolutionError::UnknownDependency {
                    extension: id.clone(),
                    dependency: dep.clone(),
                });
            }
            if !closure.contains(dep) {
                stack.push(dep.clone());
            }
        }
    }

    Ok(closure)
}

/// Kahn's algorithm over `nodes`, ignoring edges that leave the set.
fn topological_order(catalog: &Catalog, nodes: &BTreeSet<String>) -> Result<Vec<String>> {
    let mut in_degree: BTreeMap<&str, usize> = BTreeMap::new();
    let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for id in nodes {
        let deps = deps_within(catalog, nodes, id);
        in_degree.insert(id.as_str(), deps.len());
        for dep in deps {
            dependents.entry(dep).or_default().push(id.as_str());
        }
    }

    let mut ready: BTreeSet<&str> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(id, _)| *id)
        .collect();

    let mut order = Vec::with_capacity(nodes.len());
    while let Some(id) = ready.pop_first() {
        order.push(id.to_string());
        for dependent in dependents.get(id).into_iter().flatten() {
            if let Some(degree) = in_degree.get_mut(dependent) {
                *degree -= 1;
                if *degree == 0 {
                    ready.insert(*dependent);
                }
            }
        }
    }

    if order.len() < nodes.len() {
        let placed: BTreeSet<&str> = order.iter().map(String::as_str).collect();
        let remaining: BTreeSet<&str> = nodes
            .iter()
            .map(String::as_str)
            .filter(|id| !placed.contains(id))
            .collect();
        return Err(ResolutionError::CycleDetected {
            members: cycle_members(&remaining, |id| deps_within(catalog, nodes, id)),
        });
    }

    Ok(order)
}

/// Dependencies of `id` that are themselves in `nodes`.
fn deps_within<'a>(catalog: &'a Catalog, nodes: &BTreeSet<String>, id: &str) -> BTreeSet<&'a str> {
    catalog
        .get(id)
        .map(|def| {
            def.dependencies
                .iter()
                .filter(|d| nodes.contains(d.as_str()))
                .map(String::as_str)
                .collect()
        })
        .unwrap_or_default()
}

/// Nodes among `remaining` that can reach themselves.
///
/// Kahn's leftovers also include nodes that merely depend on a cycle; those
/// are not part of it and are left out.
fn cycle_members<'a>(
    remaining: &BTreeSet<&'a str>,
    deps_of: impl Fn(&str) -> BTreeSet<&'a str>,
) -> Vec<String> {
    remaining
        .iter()
        .filter(|start| {
            let mut seen = BTreeSet::new();
            let mut stack: Vec<&str> = deps_of(start).into_iter().collect();
            while let Some(id) = stack.pop() {
                if id == **start {
                    return true;
                }
                if remaining.contains(id) && seen.insert(id) {
                    stack.extend(deps_of(id));
                }
            }
            false
        })
        .map(|id| id.to_string())
        .collect()
}

fn definitions(catalog: &Catalog, order: &[String]) -> Vec<ExtensionDefinition> {
    order
        .iter()
        .filter_map(|id| catalog.get(id).cloned())
        .collect()
}
