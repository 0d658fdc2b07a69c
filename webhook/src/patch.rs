//! JSON Patch carrying the scheduling hints for an admitted Pod.

use crate::{cluster::CAPACITY_LABEL, policy::CapacityClass};
use json_patch::{AddOperation, Patch, PatchOperation};
use jsonptr::PointerBuf;
use k8s_openapi::{
    api::core::v1::{
        Affinity, NodeAffinity, NodeSelectorRequirement, NodeSelectorTerm,
        PreferredSchedulingTerm, TopologySpreadConstraint,
    },
    apimachinery::pkg::apis::meta::v1::LabelSelector,
};
use std::collections::BTreeMap;

pub const PREFERENCE_WEIGHT: i32 = 100;

/// Everything the patch is derived from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub class: CapacityClass,
    pub max_skew: i32,
    pub selector: BTreeMap<String, String>,
}

fn affinity(class: CapacityClass) -> Affinity {
    Affinity {
        node_affinity: Some(NodeAffinity {
            preferred_during_scheduling_ignored_during_execution: Some(vec![
                PreferredSchedulingTerm {
                    weight: PREFERENCE_WEIGHT,
                    preference: NodeSelectorTerm {
                        match_expressions: Some(vec![NodeSelectorRequirement {
                            key: CAPACITY_LABEL.to_string(),
                            operator: "In".to_string(),
                            values: Some(vec![class.label_value().to_string()]),
                        }]),
                        match_fields: None,
                    },
                },
            ]),
            required_during_scheduling_ignored_during_execution: None,
        }),
        ..Default::default()
    }
}

fn spread(placement: &Placement) -> Vec<TopologySpreadConstraint> {
    vec![TopologySpreadConstraint {
        max_skew: placement.max_skew,
        topology_key: CAPACITY_LABEL.to_string(),
        when_unsatisfiable: placement.class.when_unsatisfiable().to_string(),
        label_selector: Some(LabelSelector {
            match_labels: Some(placement.selector.clone()),
            match_expressions: None,
        }),
        ..Default::default()
    }]
}

/// Two `add` operations: `/spec/affinity` then `/spec/topologySpreadConstraints`.
///
/// `add` on an existing member replaces it, so any affinity or spread
/// constraints already present on the Pod are overwritten.
pub fn build(placement: &Placement) -> serde_json::Result<Patch> {
    Ok(Patch(vec![
        PatchOperation::Add(AddOperation {
            path: PointerBuf::from_tokens(["spec", "affinity"]),
            value: serde_json::to_value(affinity(placement.class))?,
        }),
        PatchOperation::Add(AddOperation {
            path: PointerBuf::from_tokens(["spec", "topologySpreadConstraints"]),
            value: serde_json::to_value(spread(placement))?,
        }),
    ]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn placement(class: CapacityClass, max_skew: i32) -> Placement {
        let mut selector = BTreeMap::new();
        selector.insert("app".to_string(), "checkout".to_string());
        Placement {
            class,
            max_skew,
            selector,
        }
    }

    #[test]
    fn spot_patch_document() {
        let patch = build(&placement(CapacityClass::Spot, 2)).unwrap();
        let doc = serde_json::to_value(&patch).unwrap();
        assert_eq!(
            doc,
            json!([
                {
                    "op": "add",
                    "path": "/spec/affinity",
                    "value": {
                        "nodeAffinity": {
                            "preferredDuringSchedulingIgnoredDuringExecution": [{
                                "weight": 100,
                                "preference": {
                                    "matchExpressions": [{
                                        "key": "node.kubernetes.io/capacity",
                                        "operator": "In",
                                        "values": ["spot"]
                                    }]
                                }
                            }]
                        }
                    }
                },
                {
                    "op": "add",
                    "path": "/spec/topologySpreadConstraints",
                    "value": [{
                        "maxSkew": 2,
                        "topologyKey": "node.kubernetes.io/capacity",
                        "whenUnsatisfiable": "DoNotSchedule",
                        "labelSelector": {"matchLabels": {"app": "checkout"}}
                    }]
                }
            ])
        );
    }

    #[test]
    fn on_demand_patch_is_looser() {
        let patch = build(&placement(CapacityClass::OnDemand, 1)).unwrap();
        let doc = serde_json::to_value(&patch).unwrap();
        let values = &doc[0]["value"]["nodeAffinity"]
            ["preferredDuringSchedulingIgnoredDuringExecution"][0]["preference"]
            ["matchExpressions"][0]["values"];
        assert_eq!(values, &json!(["on-demand"]));
        assert_eq!(doc[1]["value"][0]["whenUnsatisfiable"], "ScheduleAnyway");
        assert_eq!(doc[1]["value"][0]["maxSkew"], 1);
    }

    #[test]
    fn patch_applies_over_existing_spec() {
        let mut pod = json!({
            "spec": {
                "containers": [{"name": "app", "image": "nginx"}],
                "affinity": {"podAntiAffinity": {}},
                "topologySpreadConstraints": []
            }
        });
        let patch = build(&placement(CapacityClass::Spot, 3)).unwrap();
        json_patch::patch(&mut pod, &patch.0).unwrap();
        assert!(pod["spec"]["affinity"].get("podAntiAffinity").is_none());
        assert_eq!(pod["spec"]["topologySpreadConstraints"][0]["maxSkew"], 3);
        assert_eq!(pod["spec"]["containers"][0]["name"], "app");
    }
}
