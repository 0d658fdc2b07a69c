//! Resolution of the workload controlling a Pod.
//!
//! The walk is bounded: Pod -> StatefulSet, or Pod -> ReplicaSet -> Deployment.
//! Every lookup failure degrades to a conservative answer instead of failing
//! the admission request.

use crate::cluster::{within_deadline, WorkloadSource};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use std::future::Future;
use tokio::time::Instant;

/// Replica count assumed when a workload does not declare one or cannot be read.
pub const DEFAULT_REPLICAS: i32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadKind {
    Deployment,
    /// Owned by a ReplicaSet whose Deployment could not be determined.
    ReplicaSet,
    StatefulSet,
    Unowned,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedWorkload {
    pub kind: WorkloadKind,
    /// Name of the controller the replica count came from, if any.
    pub name: Option<String>,
    pub replicas: i32,
}

impl ResolvedWorkload {
    pub fn unowned() -> Self {
        ResolvedWorkload {
            kind: WorkloadKind::Unowned,
            name: None,
            replicas: DEFAULT_REPLICAS,
        }
    }

    fn new(kind: WorkloadKind, name: &str, replicas: Option<i32>) -> Self {
        ResolvedWorkload {
            kind,
            name: Some(name.to_string()),
            replicas: replicas.unwrap_or(DEFAULT_REPLICAS),
        }
    }
}

pub struct OwnershipResolver<'a> {
    workloads: &'a dyn WorkloadSource,
    deadline: Instant,
}

impl<'a> OwnershipResolver<'a> {
    /// All lookups made by this resolver must finish before `deadline`.
    pub fn new(workloads: &'a dyn WorkloadSource, deadline: Instant) -> Self {
        OwnershipResolver {
            workloads,
            deadline,
        }
    }

    async fn fetch<T>(
        &self,
        fut: impl Future<Output = anyhow::Result<T>>,
    ) -> anyhow::Result<T> {
        within_deadline(self.deadline, fut).await
    }

    /// Walks `owners` in order; the first StatefulSet or ReplicaSet owner that
    /// yields an answer wins.
    pub async fn resolve(&self, ns: &str, owners: &[OwnerReference]) -> ResolvedWorkload {
        for owner in owners {
            match owner.kind.as_str() {
                "StatefulSet" => {
                    match self.fetch(self.workloads.stateful_set(ns, &owner.name)).await {
                        Ok(sts) => {
                            let replicas = sts.spec.as_ref().and_then(|s| s.replicas);
                            tracing::info!(
                                owner = owner.name.as_str(),
                                replicas = ?replicas,
                                "pod is owned by StatefulSet"
                            );
                            return ResolvedWorkload::new(
                                WorkloadKind::StatefulSet,
                                &owner.name,
                                replicas,
                            );
                        }
                        Err(err) => {
                            tracing::warn!(
                                owner = owner.name.as_str(),
                                "failed to get StatefulSet: {:#}",
                                err
                            );
                        }
                    }
                }
                "ReplicaSet" => return self.resolve_replica_set(ns, &owner.name).await,
                other => {
                    tracing::debug!(owner = owner.name.as_str(), kind = other, "ignoring owner");
                }
            }
        }
        tracing::info!("no StatefulSet or ReplicaSet owner found, using defaults");
        ResolvedWorkload::unowned()
    }

    async fn resolve_replica_set(&self, ns: &str, rs_name: &str) -> ResolvedWorkload {
        let rs_only = ResolvedWorkload::new(WorkloadKind::ReplicaSet, rs_name, None);
        let rs = match self.fetch(self.workloads.replica_set(ns, rs_name)).await {
            Ok(rs) => rs,
            Err(err) => {
                tracing::warn!(owner = rs_name, "failed to get ReplicaSet: {:#}", err);
                return rs_only;
            }
        };
        let rs_owners = rs.metadata.owner_references.as_deref().unwrap_or_default();
        for rs_owner in rs_owners.iter().filter(|o| o.kind == "Deployment") {
            match self.fetch(self.workloads.deployment(ns, &rs_owner.name)).await {
                Ok(deployment) => {
                    let replicas = deployment.spec.as_ref().and_then(|s| s.replicas);
                    tracing::info!(
                        replica_set = rs_name,
                        owner = rs_owner.name.as_str(),
                        replicas = ?replicas,
                        "pod is owned by Deployment"
                    );
                    return ResolvedWorkload::new(
                        WorkloadKind::Deployment,
                        &rs_owner.name,
                        replicas,
                    );
                }
                Err(err) => {
                    tracing::warn!(
                        owner = rs_owner.name.as_str(),
                        "failed to get Deployment: {:#}",
                        err
                    );
                }
            }
        }
        tracing::info!(replica_set = rs_name, "ReplicaSet has no readable Deployment owner");
        rs_only
    }
}
