//! Read-only access to the cluster objects the admission decision depends on.

use anyhow::Context as _;
use futures::future::BoxFuture;
use k8s_openapi::api::{
    apps::v1::{Deployment, ReplicaSet, StatefulSet},
    core::v1::Node,
};
use kube::{api::ListParams, Api};
use std::{collections::BTreeMap, future::Future};
use tokio::time::Instant;

/// Node label carrying the capacity class of a node.
pub const CAPACITY_LABEL: &str = "node.kubernetes.io/capacity";
pub const CAPACITY_SPOT: &str = "spot";
pub const CAPACITY_ON_DEMAND: &str = "on-demand";

/// Number of schedulable nodes per capacity class at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NodeCapacityCensus {
    pub spot: u32,
    pub on_demand: u32,
}

/// Counts nodes by their `node.kubernetes.io/capacity` label.
/// Nodes with any other value (or none) are not counted.
pub fn census_from_nodes(nodes: &[Node]) -> NodeCapacityCensus {
    let mut census = NodeCapacityCensus::default();
    for node in nodes {
        let class = node
            .metadata
            .labels
            .as_ref()
            .and_then(|labels| labels.get(CAPACITY_LABEL));
        match class.map(String::as_str) {
            Some(CAPACITY_SPOT) => census.spot += 1,
            Some(CAPACITY_ON_DEMAND) => census.on_demand += 1,
            _ => (),
        }
    }
    census
}

/// Runs a cluster read that must complete before `deadline`.
pub async fn within_deadline<T>(
    deadline: Instant,
    fut: impl Future<Output = anyhow::Result<T>>,
) -> anyhow::Result<T> {
    anyhow::ensure!(Instant::now() < deadline, "lookup deadline exceeded");
    match tokio::time::timeout_at(deadline, fut).await {
        Ok(res) => res,
        Err(_) => anyhow::bail!("lookup deadline exceeded"),
    }
}

pub trait NodeInventory: Send + Sync {
    fn census(&self) -> BoxFuture<'_, anyhow::Result<NodeCapacityCensus>>;
}

/// Lookups of the controllers a Pod can be owned by.
pub trait WorkloadSource: Send + Sync {
    fn replica_set<'a>(
        &'a self,
        ns: &'a str,
        name: &'a str,
    ) -> BoxFuture<'a, anyhow::Result<ReplicaSet>>;

    fn deployment<'a>(
        &'a self,
        ns: &'a str,
        name: &'a str,
    ) -> BoxFuture<'a, anyhow::Result<Deployment>>;

    fn stateful_set<'a>(
        &'a self,
        ns: &'a str,
        name: &'a str,
    ) -> BoxFuture<'a, anyhow::Result<StatefulSet>>;
}

pub trait Cluster: Send + Sync {
    fn nodes(&self) -> &dyn NodeInventory;
    fn workloads(&self) -> &dyn WorkloadSource;
}

impl<T: NodeInventory + WorkloadSource> Cluster for T {
    fn nodes(&self) -> &dyn NodeInventory {
        self
    }

    fn workloads(&self) -> &dyn WorkloadSource {
        self
    }
}

/// Cluster access backed by the Kubernetes API server.
#[derive(Clone)]
pub struct KubeCluster {
    k: kube::Client,
}

impl KubeCluster {
    pub fn new(k: kube::Client) -> Self {
        KubeCluster { k }
    }

    pub async fn try_default() -> anyhow::Result<Self> {
        let k = kube::Client::try_default()
            .await
            .context("failed to create kubernetes client")?;
        Ok(KubeCluster::new(k))
    }

    pub fn client(&self) -> &kube::Client {
        &self.k
    }

    async fn get<K>(&self, ns: &str, name: &str) -> anyhow::Result<K>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>
            + k8s_openapi::Resource
            + Clone
            + serde::de::DeserializeOwned
            + std::fmt::Debug,
        <K as kube::Resource>::DynamicType: Default,
    {
        let api = Api::<K>::namespaced(self.k.clone(), ns);
        api.get(name)
            .await
            .with_context(|| format!("failed to get {} {}/{}", K::KIND, ns, name))
    }
}

impl NodeInventory for KubeCluster {
    fn census(&self) -> BoxFuture<'_, anyhow::Result<NodeCapacityCensus>> {
        Box::pin(async move {
            let api = Api::<Node>::all(self.k.clone());
            let nodes = api
                .list(&ListParams::default().labels(CAPACITY_LABEL))
                .await
                .context("failed to list nodes")?
                .items;
            Ok(census_from_nodes(&nodes))
        })
    }
}

impl WorkloadSource for KubeCluster {
    fn replica_set<'a>(
        &'a self,
        ns: &'a str,
        name: &'a str,
    ) -> BoxFuture<'a, anyhow::Result<ReplicaSet>> {
        Box::pin(self.get(ns, name))
    }

    fn deployment<'a>(
        &'a self,
        ns: &'a str,
        name: &'a str,
    ) -> BoxFuture<'a, anyhow::Result<Deployment>> {
        Box::pin(self.get(ns, name))
    }

    fn stateful_set<'a>(
        &'a self,
        ns: &'a str,
        name: &'a str,
    ) -> BoxFuture<'a, anyhow::Result<StatefulSet>> {
        Box::pin(self.get(ns, name))
    }
}

type ObjectKey = (String, String);

fn key(ns: &str, name: &str) -> ObjectKey {
    (ns.to_string(), name.to_string())
}

/// Cluster snapshot held in memory. Used for dry runs and tests.
///
/// Missing objects and the `fail_*` switches both surface as lookup errors.
#[derive(Default, Clone)]
pub struct MemoryCluster {
    replica_sets: BTreeMap<ObjectKey, ReplicaSet>,
    deployments: BTreeMap<ObjectKey, Deployment>,
    stateful_sets: BTreeMap<ObjectKey, StatefulSet>,
    nodes: Vec<Node>,
    pub fail_nodes: bool,
    pub fail_workloads: bool,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Default::default()
    }

    fn object_key(meta: &k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta) -> ObjectKey {
        key(
            meta.namespace.as_deref().unwrap_or("default"),
            meta.name.as_deref().unwrap_or_default(),
        )
    }

    pub fn with_replica_set(mut self, rs: ReplicaSet) -> Self {
        self.replica_sets.insert(Self::object_key(&rs.metadata), rs);
        self
    }

    pub fn with_deployment(mut self, d: Deployment) -> Self {
        self.deployments.insert(Self::object_key(&d.metadata), d);
        self
    }

    pub fn with_stateful_set(mut self, sts: StatefulSet) -> Self {
        self.stateful_sets.insert(Self::object_key(&sts.metadata), sts);
        self
    }

    pub fn with_node(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    /// Adds `spot` spot nodes and `on_demand` on-demand nodes.
    pub fn with_capacity(mut self, spot: u32, on_demand: u32) -> Self {
        for (class, count) in [(CAPACITY_SPOT, spot), (CAPACITY_ON_DEMAND, on_demand)] {
            for i in 0..count {
                let mut labels = BTreeMap::new();
                labels.insert(CAPACITY_LABEL.to_string(), class.to_string());
                let mut node = Node::default();
                node.metadata.name = Some(format!("{}-{}-{}", class, self.nodes.len(), i));
                node.metadata.labels = Some(labels);
                self.nodes.push(node);
            }
        }
        self
    }

    fn lookup<T: Clone>(
        &self,
        objects: &BTreeMap<ObjectKey, T>,
        kind: &str,
        ns: &str,
        name: &str,
    ) -> anyhow::Result<T> {
        anyhow::ensure!(!self.fail_workloads, "injected failure getting {}", kind);
        objects
            .get(&key(ns, name))
            .cloned()
            .with_context(|| format!("{} {}/{} not found", kind, ns, name))
    }
}

impl NodeInventory for MemoryCluster {
    fn census(&self) -> BoxFuture<'_, anyhow::Result<NodeCapacityCensus>> {
        Box::pin(async move {
            anyhow::ensure!(!self.fail_nodes, "injected failure listing nodes");
            Ok(census_from_nodes(&self.nodes))
        })
    }
}

impl WorkloadSource for MemoryCluster {
    fn replica_set<'a>(
        &'a self,
        ns: &'a str,
        name: &'a str,
    ) -> BoxFuture<'a, anyhow::Result<ReplicaSet>> {
        Box::pin(async move { self.lookup(&self.replica_sets, "ReplicaSet", ns, name) })
    }

    fn deployment<'a>(
        &'a self,
        ns: &'a str,
        name: &'a str,
    ) -> BoxFuture<'a, anyhow::Result<Deployment>> {
        Box::pin(async move { self.lookup(&self.deployments, "Deployment", ns, name) })
    }

    fn stateful_set<'a>(
        &'a self,
        ns: &'a str,
        name: &'a str,
    ) -> BoxFuture<'a, anyhow::Result<StatefulSet>> {
        Box::pin(async move { self.lookup(&self.stateful_sets, "StatefulSet", ns, name) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str, class: Option<&str>) -> Node {
        let mut n = Node::default();
        n.metadata.name = Some(name.to_string());
        if let Some(class) = class {
            let mut labels = BTreeMap::new();
            labels.insert(CAPACITY_LABEL.to_string(), class.to_string());
            n.metadata.labels = Some(labels);
        }
        n
    }

    #[test]
    fn census_counts_only_known_classes() {
        let nodes = vec![
            node("a", Some("spot")),
            node("b", Some("spot")),
            node("c", Some("on-demand")),
            node("d", Some("reserved")),
            node("e", None),
        ];
        assert_eq!(
            census_from_nodes(&nodes),
            NodeCapacityCensus {
                spot: 2,
                on_demand: 1
            }
        );
    }

    #[test]
    fn census_of_empty_cluster() {
        assert_eq!(census_from_nodes(&[]), NodeCapacityCensus::default());
    }

    #[tokio::test]
    async fn memory_cluster_census() {
        let cluster = MemoryCluster::new()
            .with_capacity(5, 2)
            .with_node(node("gpu-0", Some("reserved")))
            .with_node(node("edge-0", None))
            .with_node(node("spot-extra", Some("spot")));
        let census = cluster.census().await.unwrap();
        assert_eq!(census.spot, 6);
        assert_eq!(census.on_demand, 2);
    }

    #[tokio::test]
    async fn memory_cluster_injected_failures() {
        let mut cluster = MemoryCluster::new().with_capacity(1, 1);
        cluster.fail_nodes = true;
        assert!(cluster.census().await.is_err());
        cluster.fail_workloads = true;
        assert!(cluster.replica_set("default", "web").await.is_err());
    }

    #[tokio::test]
    async fn deadline_in_the_past_fails_before_polling() {
        let deadline = Instant::now() - std::time::Duration::from_millis(1);
        let res = within_deadline(deadline, async { Ok(1) }).await;
        assert_eq!(res.unwrap_err().to_string(), "lookup deadline exceeded");
    }

    #[tokio::test]
    async fn slow_read_hits_deadline() {
        let deadline = Instant::now() + std::time::Duration::from_millis(10);
        let res = within_deadline(deadline, async {
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(res.is_err());
    }

    #[tokio::test]
    async fn memory_cluster_missing_object() {
        let cluster = MemoryCluster::new();
        let err = cluster.stateful_set("db", "pg").await.unwrap_err();
        assert_eq!(err.to_string(), "StatefulSet db/pg not found");
    }
}
