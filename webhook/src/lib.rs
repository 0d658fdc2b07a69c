//! Mutating admission webhook steering Pods toward a node capacity class.
//!
//! Pods of stateless workloads are nudged toward spot nodes and Pods of
//! StatefulSets toward on-demand nodes, through a preferred node affinity
//! and a topology spread constraint over `node.kubernetes.io/capacity`.

pub mod admit;
pub mod cluster;
pub mod config;
pub mod labels;
pub mod ownership;
pub mod patch;
pub mod policy;
pub mod server;
pub mod telemetry;
pub mod tls;
pub mod typings;
