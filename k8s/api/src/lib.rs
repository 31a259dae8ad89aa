#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod binding_policy;

pub use self::binding_policy::{
    BindingPolicy, BindingPolicySpec, ClusterSelector, DeploymentType, Operator,
    PropagationMode, Resource, Scheduling, SchedulingRule, UpdateStrategy,
};
pub use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

pub mod labels {
    /// Label key/value pairs, ordered by key so that rendered manifests are
    /// stable.
    pub type Map = std::collections::BTreeMap<String, String>;
}

/// The namespace a policy lands in when the user does not pick one.
pub const DEFAULT_NAMESPACE: &str = "default";
