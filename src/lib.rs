#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod api;
pub mod connection;
pub mod form;
pub mod inventory;
pub mod policy;
pub mod poll;
pub mod stream;
pub mod validate;
pub mod yaml;

pub use self::{
    connection::{Coordinator, EndpointKind, Notice, PolicySink},
    form::PolicyForm,
    inventory::Inventory,
    policy::PolicyConfiguration,
    validate::{validate, Validation},
};
pub use binding_policy_k8s_api as k8s;
