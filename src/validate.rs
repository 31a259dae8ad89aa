//! Checks that decide whether a policy configuration, or a single entry
//! being added to one, is acceptable.
//!
//! Nothing here mutates the configuration; callers decide what to do with
//! the errors.

use crate::policy::{PolicyConfiguration, SchedulingRule};
use binding_policy_k8s_api::labels;
use std::{collections::BTreeMap, fmt};

/// The form fields that can carry an error message.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
    Name,
    Namespace,
    Label,
    Rule,
    Toleration,
}

pub type Errors = BTreeMap<Field, String>;

/// The outcome of validating a whole configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Validation {
    errors: Errors,
}

/// A configuration that cannot be saved.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("invalid policy configuration: {}", summarize(.errors))]
pub struct Invalid {
    errors: Errors,
}

/// Rejection of a single label, rule, or toleration entry.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum InputError {
    #[error("Both key and value are required")]
    IncompleteLabel,

    #[error("Label key already exists")]
    DuplicateLabel(String),

    #[error("Value is required for this operator")]
    MissingRuleValue,

    #[error("Toleration is required")]
    EmptyToleration,
}

/// Validates the fields required to save a configuration.
pub fn validate(config: &PolicyConfiguration) -> Validation {
    let mut errors = Errors::new();

    if config.name.is_empty() {
        errors.insert(Field::Name, "Name is required".to_string());
    }

    if config.namespace.is_empty() {
        errors.insert(Field::Namespace, "Namespace is required".to_string());
    }

    if let Some(err) = config
        .scheduling_rules
        .iter()
        .find_map(|rule| check_rule(rule).err())
    {
        errors.insert(Field::Rule, err.to_string());
    }

    if !errors.is_empty() {
        tracing::debug!(?errors, name = %config.name, "policy configuration rejected");
    }
    Validation { errors }
}

/// Checks that a label may be added to `labels` without overwriting an
/// existing entry.
pub fn check_label(labels: &labels::Map, key: &str, value: &str) -> Result<(), InputError> {
    if key.is_empty() || value.is_empty() {
        return Err(InputError::IncompleteLabel);
    }
    if labels.contains_key(key) {
        return Err(InputError::DuplicateLabel(key.to_string()));
    }
    Ok(())
}

pub fn check_rule(rule: &SchedulingRule) -> Result<(), InputError> {
    if rule.operator.requires_value() && rule.value.is_empty() {
        return Err(InputError::MissingRuleValue);
    }
    Ok(())
}

/// Tolerations are opaque: any non-empty text is accepted as-is.
pub fn check_toleration(toleration: &str) -> Result<(), InputError> {
    if toleration.is_empty() {
        return Err(InputError::EmptyToleration);
    }
    Ok(())
}

fn summarize(errors: &Errors) -> String {
    errors
        .iter()
        .map(|(field, msg)| format!("{field}: {msg}"))
        .collect::<Vec<_>>()
        .join(", ")
}

// === impl Field ===

impl Field {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Namespace => "namespace",
            Self::Label => "label",
            Self::Rule => "rule",
            Self::Toleration => "toleration",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// === impl Validation ===

impl Validation {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn errors(&self) -> &Errors {
        &self.errors
    }

    pub fn error(&self, field: Field) -> Option<&str> {
        self.errors.get(&field).map(String::as_str)
    }

    pub fn into_result(self) -> Result<(), Invalid> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(Invalid {
                errors: self.errors,
            })
        }
    }
}

// === impl Invalid ===

impl Invalid {
    pub fn errors(&self) -> &Errors {
        &self.errors
    }

    pub fn into_errors(self) -> Errors {
        self.errors
    }
}

// === impl InputError ===

impl InputError {
    /// The form field this error is reported against.
    pub fn field(&self) -> Field {
        match self {
            Self::IncompleteLabel | Self::DuplicateLabel(_) => Field::Label,
            Self::MissingRuleValue => Field::Rule,
            Self::EmptyToleration => Field::Toleration,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{Operator, Resource};
    use maplit::btreemap;

    fn rule(operator: Operator, value: &str) -> SchedulingRule {
        SchedulingRule {
            resource: Resource::Cpu,
            operator,
            value: value.to_string(),
        }
    }

    #[test]
    fn requires_name_and_namespace() {
        let config = PolicyConfiguration {
            namespace: String::new(),
            ..PolicyConfiguration::named("")
        };
        let validation = validate(&config);
        assert!(!validation.is_valid());
        assert_eq!(validation.error(Field::Name), Some("Name is required"));
        assert_eq!(
            validation.error(Field::Namespace),
            Some("Namespace is required")
        );

        let err = validation.into_result().unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid policy configuration: name: Name is required, namespace: Namespace is required"
        );
    }

    #[test]
    fn accepts_minimal_configuration() {
        let validation = validate(&PolicyConfiguration::named("w1-to-c1"));
        assert!(validation.is_valid(), "{:?}", validation);
        assert!(validation.into_result().is_ok());
    }

    #[test]
    fn rejects_stored_rule_without_value() {
        let config = PolicyConfiguration {
            scheduling_rules: vec![rule(Operator::Exists, ""), rule(Operator::Lt, "")],
            ..PolicyConfiguration::named("p")
        };
        let validation = validate(&config);
        assert_eq!(
            validation.error(Field::Rule),
            Some("Value is required for this operator")
        );
    }

    #[test]
    fn existence_rules_need_no_value() {
        assert_eq!(check_rule(&rule(Operator::Exists, "")), Ok(()));
        assert_eq!(check_rule(&rule(Operator::DoesNotExist, "")), Ok(()));
        assert_eq!(
            check_rule(&rule(Operator::Eq, "")),
            Err(InputError::MissingRuleValue)
        );
        assert_eq!(check_rule(&rule(Operator::In, "a,b")), Ok(()));
    }

    #[test]
    fn labels_must_be_complete_and_new() {
        let labels = btreemap! { "env".to_string() => "prod".to_string() };
        assert_eq!(
            check_label(&labels, "", "x"),
            Err(InputError::IncompleteLabel)
        );
        assert_eq!(
            check_label(&labels, "tier", ""),
            Err(InputError::IncompleteLabel)
        );
        let err = check_label(&labels, "env", "dev").unwrap_err();
        assert_eq!(err.to_string(), "Label key already exists");
        assert_eq!(err.field(), Field::Label);
        assert_eq!(check_label(&labels, "tier", "web"), Ok(()));
    }

    #[test]
    fn tolerations_are_opaque() {
        assert_eq!(check_toleration(""), Err(InputError::EmptyToleration));
        assert_eq!(check_toleration("not even key=value"), Ok(()));
    }
}
