//! Pure placement rules: which capacity class a workload prefers and how much
//! imbalance its topology spread may tolerate.

use crate::{
    cluster::{NodeCapacityCensus, CAPACITY_ON_DEMAND, CAPACITY_SPOT},
    ownership::WorkloadKind,
};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapacityClass {
    Spot,
    OnDemand,
}

impl CapacityClass {
    /// Value of the `node.kubernetes.io/capacity` node label for this class.
    pub fn label_value(self) -> &'static str {
        match self {
            CapacityClass::Spot => CAPACITY_SPOT,
            CapacityClass::OnDemand => CAPACITY_ON_DEMAND,
        }
    }

    /// Stateless workloads are held to their spread strictly; stateful ones
    /// may still be scheduled when the spread cannot be satisfied.
    pub fn when_unsatisfiable(self) -> &'static str {
        match self {
            CapacityClass::Spot => "DoNotSchedule",
            CapacityClass::OnDemand => "ScheduleAnyway",
        }
    }
}

impl fmt::Display for CapacityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label_value())
    }
}

pub fn preferred_class(kind: WorkloadKind) -> CapacityClass {
    match kind {
        WorkloadKind::StatefulSet => CapacityClass::OnDemand,
        WorkloadKind::Deployment | WorkloadKind::ReplicaSet | WorkloadKind::Unowned => {
            CapacityClass::Spot
        }
    }
}

pub const MIN_SKEW: i32 = 1;

/// `replicas - |spot - on_demand|`, never below [`MIN_SKEW`].
///
/// Single-replica workloads and unknown node counts always get [`MIN_SKEW`].
pub fn max_skew(replicas: i32, census: Option<NodeCapacityCensus>) -> i32 {
    if replicas == 1 {
        return MIN_SKEW;
    }
    let census = match census {
        Some(c) => c,
        None => return MIN_SKEW,
    };
    let imbalance = (i64::from(census.spot) - i64::from(census.on_demand)).abs();
    let skew = i64::from(replicas) - imbalance;
    skew.clamp(i64::from(MIN_SKEW), i64::from(i32::MAX)) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn census(spot: u32, on_demand: u32) -> Option<NodeCapacityCensus> {
        Some(NodeCapacityCensus { spot, on_demand })
    }

    #[test]
    fn stateful_prefers_on_demand() {
        assert_eq!(preferred_class(WorkloadKind::StatefulSet), CapacityClass::OnDemand);
        assert_eq!(preferred_class(WorkloadKind::Deployment), CapacityClass::Spot);
        assert_eq!(preferred_class(WorkloadKind::ReplicaSet), CapacityClass::Spot);
        assert_eq!(preferred_class(WorkloadKind::Unowned), CapacityClass::Spot);
    }

    #[test]
    fn label_values() {
        assert_eq!(CapacityClass::Spot.to_string(), "spot");
        assert_eq!(CapacityClass::OnDemand.to_string(), "on-demand");
        assert_eq!(CapacityClass::Spot.when_unsatisfiable(), "DoNotSchedule");
        assert_eq!(CapacityClass::OnDemand.when_unsatisfiable(), "ScheduleAnyway");
    }

    #[test]
    fn single_replica_is_one() {
        for (s, o) in [(0, 0), (10, 0), (0, 10), (3, 3)] {
            assert_eq!(max_skew(1, census(s, o)), 1);
        }
    }

    #[test]
    fn skew_subtracts_imbalance() {
        assert_eq!(max_skew(5, census(5, 2)), 2);
        assert_eq!(max_skew(5, census(2, 5)), 2);
        assert_eq!(max_skew(4, census(3, 3)), 4);
        assert_eq!(max_skew(10, census(0, 0)), 10);
    }

    #[test]
    fn skew_matches_formula_when_positive() {
        for r in 2..12 {
            for s in 0..8u32 {
                for o in 0..8u32 {
                    let raw = r - (s as i32 - o as i32).abs();
                    let expected = if raw >= 1 { raw } else { 1 };
                    assert_eq!(max_skew(r, census(s, o)), expected, "r={} s={} o={}", r, s, o);
                }
            }
        }
    }

    #[test]
    fn skew_is_clamped_to_one() {
        assert_eq!(max_skew(3, census(1, 4)), 1);
        assert_eq!(max_skew(2, census(0, 9)), 1);
        assert_eq!(max_skew(0, census(0, 0)), 1);
        assert_eq!(max_skew(-3, census(1, 1)), 1);
        assert_eq!(max_skew(2, census(u32::MAX, 0)), 1);
    }

    #[test]
    fn unknown_census_is_one() {
        assert_eq!(max_skew(7, None), 1);
    }
}
