//! Typed dependency graph of declared resources
//!
//! Nodes are cloud resources or cluster manifests. Ordering edges that the
//! provider cannot infer are part of the builder API: a workload can only be
//! added against the [`NamespaceRef`] of its namespace, and a service only
//! against a [`ServiceAnchor`]. Forgetting an edge is therefore a type error
//! rather than an apply-time race.

mod render;

pub use render::{render_template, RenderOptions};

use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap};

use thiserror::Error;
use tracing::debug;

use crate::k8s::{Manifest, Namespace, Service, SYSTEM_NAMESPACES};
use crate::template::CfnResource;

/// Errors raised while building the graph
#[derive(Error, Debug, PartialEq)]
pub enum GraphError {
    #[error("Logical id '{0}' is already declared")]
    DuplicateLogicalId(String),

    #[error("Manifest '{id}' targets namespace '{found}' but was anchored on namespace '{expected}'")]
    NamespaceMismatch {
        id: String,
        expected: String,
        found: String,
    },

    #[error("Manifest '{id}' targets namespace '{namespace}', which is neither declared nor a system namespace")]
    UndeclaredNamespace { id: String, namespace: String },

    #[error("Manifest '{0}' is not a workload")]
    NotAWorkload(String),

    #[error("Manifest '{0}' was added before a cluster was declared")]
    NoCluster(String),

    #[error("A cluster is already declared as '{0}'")]
    ClusterAlreadyDeclared(String),

    #[error("Dependency of '{dependent}' on '{on}' would create a cycle")]
    Cycle { dependent: String, on: String },

    #[error("Unknown node index {0}")]
    UnknownNode(usize),
}

/// Index of a node in its graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// The cluster every manifest is applied to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterRef(NodeId);

impl ClusterRef {
    pub fn node(&self) -> NodeId {
        self.0
    }
}

/// A declared namespace manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceRef {
    node: NodeId,
    name: String,
}

impl NamespaceRef {
    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// A workload manifest, ordered after its namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadRef {
    node: NodeId,
    namespace: String,
}

impl WorkloadRef {
    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }
}

/// A service manifest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceRef(NodeId);

impl ServiceRef {
    pub fn node(&self) -> NodeId {
        self.0
    }
}

/// What a service is ordered after
#[derive(Debug, Clone, Copy)]
pub enum ServiceAnchor<'a> {
    /// The deployment whose pods it exposes
    Deployment(&'a WorkloadRef),
    /// Only the namespace; the deployment may come up later
    Namespace(&'a NamespaceRef),
}

impl ServiceAnchor<'_> {
    fn node(&self) -> NodeId {
        match self {
            ServiceAnchor::Deployment(w) => w.node,
            ServiceAnchor::Namespace(ns) => ns.node,
        }
    }

    fn namespace(&self) -> &str {
        match self {
            ServiceAnchor::Deployment(w) => &w.namespace,
            ServiceAnchor::Namespace(ns) => &ns.name,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeBody {
    Cloud(CfnResource),
    Manifest(Manifest),
}

#[derive(Debug, Clone, PartialEq)]
pub struct GraphNode {
    pub logical_id: String,
    pub body: NodeBody,
    depends_on: BTreeSet<NodeId>,
}

impl GraphNode {
    pub fn manifest(&self) -> Option<&Manifest> {
        match &self.body {
            NodeBody::Manifest(m) => Some(m),
            NodeBody::Cloud(_) => None,
        }
    }

    pub fn cloud(&self) -> Option<&CfnResource> {
        match &self.body {
            NodeBody::Cloud(r) => Some(r),
            NodeBody::Manifest(_) => None,
        }
    }

    /// Provider type name, or `Kind` for manifests
    pub fn type_name(&self) -> &str {
        match &self.body {
            NodeBody::Cloud(r) => &r.resource_type,
            NodeBody::Manifest(m) => m.kind(),
        }
    }

    /// Direct dependencies
    pub fn dependencies(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.depends_on.iter().copied()
    }
}

/// The declared resource graph of one stack
#[derive(Debug, Clone, Default)]
pub struct StackGraph {
    nodes: Vec<GraphNode>,
    index: HashMap<String, NodeId>,
    cluster: Option<ClusterRef>,
}

impl StackGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> &GraphNode {
        &self.nodes[id.0]
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &GraphNode)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeId(i), n))
    }

    /// Find a node by logical id
    pub fn find(&self, logical_id: &str) -> Option<NodeId> {
        self.index.get(logical_id).copied()
    }

    pub fn logical_id(&self, id: NodeId) -> &str {
        &self.nodes[id.0].logical_id
    }

    pub fn cluster(&self) -> Option<ClusterRef> {
        self.cluster
    }

    fn insert(
        &mut self,
        logical_id: &str,
        body: NodeBody,
        depends_on: BTreeSet<NodeId>,
    ) -> Result<NodeId, GraphError> {
        if self.index.contains_key(logical_id) {
            return Err(GraphError::DuplicateLogicalId(logical_id.to_string()));
        }
        let id = NodeId(self.nodes.len());
        debug!(
            "Declared {} ({} dependencies)",
            logical_id,
            depends_on.len()
        );
        self.nodes.push(GraphNode {
            logical_id: logical_id.to_string(),
            body,
            depends_on,
        });
        self.index.insert(logical_id.to_string(), id);
        Ok(id)
    }

    fn check_known(&self, id: NodeId) -> Result<(), GraphError> {
        if id.0 < self.nodes.len() {
            Ok(())
        } else {
            Err(GraphError::UnknownNode(id.0))
        }
    }

    /// Declare a cloud resource with no ordering requirement
    pub fn add_resource(
        &mut self,
        logical_id: &str,
        resource: CfnResource,
    ) -> Result<NodeId, GraphError> {
        self.add_resource_after(logical_id, resource, &[])
    }

    /// Declare a cloud resource ordered after `after`
    pub fn add_resource_after(
        &mut self,
        logical_id: &str,
        resource: CfnResource,
        after: &[NodeId],
    ) -> Result<NodeId, GraphError> {
        for id in after {
            self.check_known(*id)?;
        }
        self.insert(
            logical_id,
            NodeBody::Cloud(resource),
            after.iter().copied().collect(),
        )
    }

    /// Declare the cluster that receives every manifest
    pub fn add_cluster(
        &mut self,
        logical_id: &str,
        resource: CfnResource,
    ) -> Result<ClusterRef, GraphError> {
        if let Some(existing) = self.cluster {
            return Err(GraphError::ClusterAlreadyDeclared(
                self.logical_id(existing.0).to_string(),
            ));
        }
        let id = self.add_resource(logical_id, resource)?;
        let cluster = ClusterRef(id);
        self.cluster = Some(cluster);
        Ok(cluster)
    }

    fn manifest_deps(&self, logical_id: &str) -> Result<BTreeSet<NodeId>, GraphError> {
        let cluster = self
            .cluster
            .ok_or_else(|| GraphError::NoCluster(logical_id.to_string()))?;
        Ok(BTreeSet::from([cluster.0]))
    }

    /// Declare a namespace
    pub fn add_namespace(
        &mut self,
        logical_id: &str,
        namespace: Namespace,
    ) -> Result<NamespaceRef, GraphError> {
        let deps = self.manifest_deps(logical_id)?;
        let name = namespace.name().to_string();
        let node = self.insert(logical_id, NodeBody::Manifest(namespace.into()), deps)?;
        Ok(NamespaceRef { node, name })
    }

    /// Declare a deployment or daemon set in a declared namespace
    pub fn add_workload(
        &mut self,
        logical_id: &str,
        namespace: &NamespaceRef,
        workload: impl Into<Manifest>,
    ) -> Result<WorkloadRef, GraphError> {
        let manifest = workload.into();
        if manifest.pod_spec().is_none() {
            return Err(GraphError::NotAWorkload(logical_id.to_string()));
        }
        check_namespace(logical_id, &manifest, namespace.name())?;

        let mut deps = self.manifest_deps(logical_id)?;
        deps.insert(namespace.node);
        let node = self.insert(logical_id, NodeBody::Manifest(manifest), deps)?;
        Ok(WorkloadRef {
            node,
            namespace: namespace.name.clone(),
        })
    }

    /// Declare a service ordered after its anchor
    pub fn add_service(
        &mut self,
        logical_id: &str,
        anchor: ServiceAnchor<'_>,
        service: Service,
    ) -> Result<ServiceRef, GraphError> {
        let manifest: Manifest = service.into();
        check_namespace(logical_id, &manifest, anchor.namespace())?;

        let mut deps = self.manifest_deps(logical_id)?;
        deps.insert(anchor.node());
        let node = self.insert(logical_id, NodeBody::Manifest(manifest), deps)?;
        Ok(ServiceRef(node))
    }

    /// Declare a manifest living in a namespace every cluster already has
    pub fn add_system_manifest(
        &mut self,
        logical_id: &str,
        manifest: impl Into<Manifest>,
    ) -> Result<NodeId, GraphError> {
        let manifest = manifest.into();
        let namespace = manifest.namespace().unwrap_or_default();
        if !SYSTEM_NAMESPACES.contains(&namespace) {
            return Err(GraphError::UndeclaredNamespace {
                id: logical_id.to_string(),
                namespace: namespace.to_string(),
            });
        }
        let deps = self.manifest_deps(logical_id)?;
        self.insert(logical_id, NodeBody::Manifest(manifest), deps)
    }

    /// Add an explicit ordering edge: `dependent` is applied after `on`
    pub fn add_dependency(&mut self, dependent: NodeId, on: NodeId) -> Result<(), GraphError> {
        self.check_known(dependent)?;
        self.check_known(on)?;
        if dependent == on || self.depends_transitively(on, dependent) {
            return Err(GraphError::Cycle {
                dependent: self.logical_id(dependent).to_string(),
                on: self.logical_id(on).to_string(),
            });
        }
        self.nodes[dependent.0].depends_on.insert(on);
        Ok(())
    }

    /// Whether `dependent` has a direct edge to `on`
    pub fn depends_on(&self, dependent: NodeId, on: NodeId) -> bool {
        self.nodes[dependent.0].depends_on.contains(&on)
    }

    /// Whether `dependent` reaches `on` through any chain of edges
    pub fn depends_transitively(&self, dependent: NodeId, on: NodeId) -> bool {
        let mut stack = vec![dependent];
        let mut seen = BTreeSet::new();
        while let Some(id) = stack.pop() {
            for &dep in &self.nodes[id.0].depends_on {
                if dep == on {
                    return true;
                }
                if seen.insert(dep) {
                    stack.push(dep);
                }
            }
        }
        false
    }

    /// Nodes in apply order; ties keep declaration order
    pub fn topological_order(&self) -> Vec<NodeId> {
        let mut in_degree: Vec<usize> = self.nodes.iter().map(|n| n.depends_on.len()).collect();
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); self.nodes.len()];
        for (i, node) in self.nodes.iter().enumerate() {
            for dep in &node.depends_on {
                dependents[dep.0].push(i);
            }
        }

        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, &deg)| deg == 0)
            .map(|(i, _)| Reverse(i))
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(Reverse(i)) = ready.pop() {
            order.push(NodeId(i));
            for &next in &dependents[i] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    ready.push(Reverse(next));
                }
            }
        }

        order
    }

    /// Manifest nodes in apply order
    pub fn manifests_in_order(&self) -> Vec<&GraphNode> {
        self.topological_order()
            .into_iter()
            .map(|id| self.node(id))
            .filter(|n| n.manifest().is_some())
            .collect()
    }
}

fn check_namespace(
    logical_id: &str,
    manifest: &Manifest,
    expected: &str,
) -> Result<(), GraphError> {
    let found = manifest.namespace().unwrap_or_default();
    if found != expected {
        return Err(GraphError::NamespaceMismatch {
            id: logical_id.to_string(),
            expected: expected.to_string(),
            found: found.to_string(),
        });
    }
    Ok(())
}
