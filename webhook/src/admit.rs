//! Admission decisions for Pods and Deployments.

use crate::{
    cluster::{within_deadline, Cluster, NodeCapacityCensus},
    labels,
    ownership::{OwnershipResolver, ResolvedWorkload, DEFAULT_REPLICAS},
    patch::{self, Placement},
    policy,
    telemetry::ReplicaSink,
    typings::{Decision, GroupVersionResource, Operation, Request},
};
use k8s_openapi::api::{apps::v1::Deployment, core::v1::Pod};
use std::collections::BTreeMap;
use tokio::time::Instant;

/// Reasons an admission request is denied.
#[derive(Debug, thiserror::Error)]
pub enum ReviewError {
    #[error("expect resource to be {expected}, got {got}")]
    UnexpectedResource {
        expected: GroupVersionResource,
        got: GroupVersionResource,
    },
    #[error("admission request has no object")]
    MissingObject,
    #[error("failed to decode {kind}: {source}")]
    Decode {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode patch: {0}")]
    Encode(#[source] serde_json::Error),
}

impl ReviewError {
    pub fn code(&self) -> u16 {
        match self {
            ReviewError::Encode(_) => 500,
            _ => 400,
        }
    }
}

impl From<Result<Option<Vec<u8>>, ReviewError>> for Decision {
    fn from(res: Result<Option<Vec<u8>>, ReviewError>) -> Self {
        match res {
            Ok(patch) => Decision::Allow { patch },
            Err(err) => {
                tracing::error!("denying admission: {}", err);
                Decision::Deny {
                    code: err.code(),
                    message: err.to_string(),
                }
            }
        }
    }
}

fn expect_resource(request: &Request, expected: GroupVersionResource) -> Result<(), ReviewError> {
    if request.resource != expected {
        return Err(ReviewError::UnexpectedResource {
            expected,
            got: request.resource.clone(),
        });
    }
    Ok(())
}

fn decode_object<T: serde::de::DeserializeOwned>(
    request: &Request,
    kind: &'static str,
) -> Result<T, ReviewError> {
    let object = request.object.clone().ok_or(ReviewError::MissingObject)?;
    serde_json::from_value(object).map_err(|source| ReviewError::Decode { kind, source })
}

/// Placement for a workload, given node counts (if known) and the Pod's labels.
pub fn plan(
    workload: &ResolvedWorkload,
    census: Option<NodeCapacityCensus>,
    pod_labels: Option<&BTreeMap<String, String>>,
) -> Placement {
    Placement {
        class: policy::preferred_class(workload.kind),
        max_skew: policy::max_skew(workload.replicas, census),
        selector: labels::sanitize(pod_labels),
    }
}

/// Everything the webhook learned about a Pod while deciding its placement.
#[derive(Debug, Clone)]
pub struct Assessment {
    pub workload: ResolvedWorkload,
    pub census: Option<NodeCapacityCensus>,
    pub placement: Placement,
}

pub struct PodReviewer<'a> {
    cluster: &'a dyn Cluster,
    deadline: Instant,
}

impl<'a> PodReviewer<'a> {
    /// Cluster reads made during the review are abandoned at `deadline`.
    pub fn new(cluster: &'a dyn Cluster, deadline: Instant) -> Self {
        PodReviewer { cluster, deadline }
    }

    async fn census(&self) -> Option<NodeCapacityCensus> {
        match within_deadline(self.deadline, self.cluster.nodes().census()).await {
            Ok(census) => Some(census),
            Err(err) => {
                tracing::warn!("failed to count nodes: {:#}", err);
                None
            }
        }
    }

    pub async fn assess(&self, pod: &Pod, ns: &str) -> Assessment {
        let owners = pod.metadata.owner_references.as_deref().unwrap_or_default();
        let workload = OwnershipResolver::new(self.cluster.workloads(), self.deadline)
            .resolve(ns, owners)
            .await;
        // node counts cannot change the skew of a single replica
        let census = if workload.replicas == DEFAULT_REPLICAS {
            None
        } else {
            self.census().await
        };
        let placement = plan(&workload, census, pod.metadata.labels.as_ref());
        tracing::info!(
            kind = ?workload.kind,
            replicas = workload.replicas,
            class = %placement.class,
            max_skew = placement.max_skew,
            "placement decided"
        );
        Assessment {
            workload,
            census,
            placement,
        }
    }

    /// Returns the serialized JSON Patch for an admitted Pod, or `None` when
    /// the Pod passes unchanged.
    pub async fn review(&self, request: &Request) -> Result<Option<Vec<u8>>, ReviewError> {
        expect_resource(request, GroupVersionResource::pods())?;
        if request.operation != Operation::Create {
            tracing::info!(operation = ?request.operation, "not a create, allowing unchanged");
            return Ok(None);
        }
        let pod: Pod = decode_object(request, "Pod")?;
        let ns = request
            .namespace
            .as_deref()
            .or(pod.metadata.namespace.as_deref())
            .unwrap_or("default");
        let assessment = self.assess(&pod, ns).await;
        let patch = patch::build(&assessment.placement).map_err(ReviewError::Encode)?;
        let bytes = serde_json::to_vec(&patch).map_err(ReviewError::Encode)?;
        Ok(Some(bytes))
    }
}

/// Records the replica count of an admitted Deployment. Never patches.
pub fn review_deployment(
    request: &Request,
    replicas: &ReplicaSink,
) -> Result<Option<Vec<u8>>, ReviewError> {
    expect_resource(request, GroupVersionResource::deployments())?;
    let deployment: Deployment = decode_object(request, "Deployment")?;
    let count = deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(DEFAULT_REPLICAS);
    replicas.record(count);
    Ok(None)
}
