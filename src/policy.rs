use anyhow::{anyhow, Error};
use binding_policy_k8s_api::{self as k8s, labels};
pub use binding_policy_k8s_api::{
    DeploymentType, Operator, PropagationMode, Resource, SchedulingRule, UpdateStrategy,
    DEFAULT_NAMESPACE,
};
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;

/// Everything a user configures about a binding policy before it is handed
/// off to the backend.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyConfiguration {
    pub name: String,

    #[serde(default = "default_namespace")]
    pub namespace: String,

    #[serde(default)]
    pub propagation_mode: PropagationMode,

    #[serde(default)]
    pub update_strategy: UpdateStrategy,

    #[serde(default)]
    pub deployment_type: DeploymentType,

    /// Kept in the order the user added them. Duplicates are allowed.
    #[serde(default)]
    pub scheduling_rules: Vec<SchedulingRule>,

    #[serde(default)]
    pub custom_labels: labels::Map,

    #[serde(default)]
    pub tolerations: Vec<String>,
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

// === impl PolicyConfiguration ===

impl PolicyConfiguration {
    /// Returns a configuration with the given name and every other field at
    /// its default.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Builds the `BindingPolicy` resource this configuration describes.
    ///
    /// The custom labels are used both as the resource's own labels and as
    /// the cluster selector's `matchLabels`.
    pub fn to_resource(&self) -> k8s::BindingPolicy {
        let scheduling = if self.scheduling_rules.is_empty() {
            None
        } else {
            Some(k8s::Scheduling {
                rules: self.scheduling_rules.clone(),
            })
        };

        let mut policy = k8s::BindingPolicy::new(
            &self.name,
            k8s::BindingPolicySpec {
                deployment_type: self.deployment_type,
                propagation_mode: self.propagation_mode,
                update_strategy: self.update_strategy,
                cluster_selector: k8s::ClusterSelector {
                    match_labels: self.custom_labels.clone(),
                },
                scheduling,
                tolerations: self.tolerations.clone(),
            },
        );
        policy.metadata.namespace = Some(self.namespace.clone());
        policy.metadata.labels = Some(self.custom_labels.clone());
        policy
    }
}

impl Default for PolicyConfiguration {
    fn default() -> Self {
        Self {
            name: String::new(),
            namespace: default_namespace(),
            propagation_mode: PropagationMode::default(),
            update_strategy: UpdateStrategy::default(),
            deployment_type: DeploymentType::default(),
            scheduling_rules: Vec::new(),
            custom_labels: labels::Map::new(),
            tolerations: Vec::new(),
        }
    }
}

impl TryFrom<k8s::BindingPolicy> for PolicyConfiguration {
    type Error = Error;

    fn try_from(policy: k8s::BindingPolicy) -> Result<Self, Self::Error> {
        let name = policy
            .metadata
            .name
            .ok_or_else(|| anyhow!("BindingPolicy must have a name"))?;
        let namespace = policy.metadata.namespace.unwrap_or_else(default_namespace);
        // Older policies may only carry the selector, not the metadata labels.
        let custom_labels = match policy.metadata.labels {
            Some(labels) if !labels.is_empty() => labels,
            _ => policy.spec.cluster_selector.match_labels,
        };
        let scheduling_rules = policy
            .spec
            .scheduling
            .map(|s| s.rules)
            .unwrap_or_default();
        Ok(Self {
            name,
            namespace,
            propagation_mode: policy.spec.propagation_mode,
            update_strategy: policy.spec.update_strategy,
            deployment_type: policy.spec.deployment_type,
            scheduling_rules,
            custom_labels,
            tolerations: policy.spec.tolerations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::btreemap;

    #[test]
    fn defaults_match_a_fresh_form() {
        let config = PolicyConfiguration::named("nginx-to-edge");
        assert_eq!(config.namespace, "default");
        assert_eq!(config.propagation_mode, PropagationMode::DownsyncOnly);
        assert_eq!(config.update_strategy, UpdateStrategy::ServerSideApply);
        assert_eq!(config.deployment_type, DeploymentType::SelectedClusters);
        assert!(config.scheduling_rules.is_empty());
        assert!(config.custom_labels.is_empty());
        assert!(config.tolerations.is_empty());
    }

    #[test]
    fn resource_mirrors_labels_into_selector() {
        let config = PolicyConfiguration {
            custom_labels: btreemap! { "env".to_string() => "prod".to_string() },
            ..PolicyConfiguration::named("p")
        };
        let policy = config.to_resource();
        assert_eq!(policy.metadata.name.as_deref(), Some("p"));
        assert_eq!(policy.metadata.namespace.as_deref(), Some("default"));
        assert_eq!(policy.metadata.labels.as_ref(), Some(&config.custom_labels));
        assert_eq!(policy.spec.cluster_selector.match_labels, config.custom_labels);
        assert!(policy.spec.scheduling.is_none());
    }

    #[test]
    fn converts_back_from_resource() {
        let config = PolicyConfiguration {
            namespace: "apps".to_string(),
            propagation_mode: PropagationMode::BidirectionalSync,
            scheduling_rules: vec![SchedulingRule {
                resource: Resource::Memory,
                operator: Operator::Ge,
                value: "4Gi".to_string(),
            }],
            tolerations: vec!["gpu=true:NoSchedule".to_string()],
            ..PolicyConfiguration::named("p")
        };
        let back = PolicyConfiguration::try_from(config.to_resource()).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn unnamed_resource_is_rejected() {
        let mut policy = PolicyConfiguration::named("p").to_resource();
        policy.metadata.name = None;
        assert!(PolicyConfiguration::try_from(policy).is_err());
    }

    #[test]
    fn reads_camel_case_json() {
        let config: PolicyConfiguration = serde_json::from_str(
            r#"{
                "name": "web-to-east",
                "updateStrategy": "RollingUpdate",
                "schedulingRules": [{"resource": "pods", "operator": "Exists"}],
                "customLabels": {"tier": "frontend"}
            }"#,
        )
        .unwrap();
        assert_eq!(config.namespace, "default");
        assert_eq!(config.update_strategy, UpdateStrategy::RollingUpdate);
        assert_eq!(config.scheduling_rules[0].operator, Operator::Exists);
        assert_eq!(config.scheduling_rules[0].value, "");
        assert_eq!(config.custom_labels["tier"], "frontend");
    }
}
