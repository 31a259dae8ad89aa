//! Renders policy configurations as `BindingPolicy` manifests.
//!
//! All YAML produced by this crate goes through [`to_yaml`], so the preview a
//! user sees is always a document that parses back to the same resource.

use crate::policy::PolicyConfiguration;
use anyhow::{ensure, Context, Result};
use binding_policy_k8s_api::BindingPolicy;
use kube::{core::TypeMeta, Resource as _};

/// Shown in place of a preview when the manifest cannot be rendered.
pub const PREVIEW_ERROR: &str = "# Error generating YAML preview";

/// Projects a configuration onto its manifest text.
///
/// Rendering never fails from the caller's point of view: errors are logged
/// and replaced by [`PREVIEW_ERROR`].
pub fn project(config: &PolicyConfiguration) -> String {
    match to_yaml(&config.to_resource()) {
        Ok(text) => text,
        Err(error) => {
            tracing::warn!(%error, name = %config.name, "failed to render policy preview");
            PREVIEW_ERROR.to_string()
        }
    }
}

pub fn to_yaml(policy: &BindingPolicy) -> Result<String> {
    serde_yaml::to_string(policy).context("failed to serialize BindingPolicy")
}

/// Reads a `BindingPolicy` manifest, rejecting documents of any other kind.
pub fn parse(text: &str) -> Result<BindingPolicy> {
    let types: TypeMeta = serde_yaml::from_str(text).context("manifest has no type information")?;
    let (api_version, kind) = (BindingPolicy::api_version(&()), BindingPolicy::kind(&()));
    ensure!(
        types.api_version == api_version && types.kind == kind,
        "expected {api_version} {kind}, found {} {}",
        types.api_version,
        types.kind,
    );
    serde_yaml::from_str(text).context("failed to parse BindingPolicy manifest")
}
