use crate::{
    connection::Connection,
    policy::{
        DeploymentType, PolicyConfiguration, PropagationMode, SchedulingRule, UpdateStrategy,
    },
    validate::{self, Errors, Field, Invalid, InputError},
    yaml,
};
use binding_policy_k8s_api::labels;

/// The editable state behind the policy dialog: the configuration being
/// built, the entry buffers for labels, rules, and tolerations, and the
/// error message currently shown next to each field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PolicyForm {
    config: PolicyConfiguration,

    /// When unset, the submitted policy carries no custom labels.
    add_labels: bool,

    label_key: String,
    label_value: String,
    toleration_input: String,
    draft_rule: SchedulingRule,

    errors: Errors,
}

// === impl PolicyForm ===

impl PolicyForm {
    pub fn new() -> Self {
        Self {
            config: PolicyConfiguration::default(),
            add_labels: true,
            label_key: String::new(),
            label_value: String::new(),
            toleration_input: String::new(),
            draft_rule: default_rule(),
            errors: Errors::new(),
        }
    }

    /// Starts a form for a workload-to-cluster connection, named after both
    /// ends.
    pub fn for_connection(connection: &Connection) -> Self {
        let name = format!(
            "{}-to-{}",
            connection.workload.name, connection.cluster.name
        );
        Self {
            config: PolicyConfiguration::named(name),
            ..Self::new()
        }
    }

    pub fn config(&self) -> &PolicyConfiguration {
        &self.config
    }

    pub fn errors(&self) -> &Errors {
        &self.errors
    }

    pub fn error(&self, field: Field) -> Option<&str> {
        self.errors.get(&field).map(String::as_str)
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.config.name = name.into();
    }

    pub fn set_namespace(&mut self, namespace: impl Into<String>) {
        self.config.namespace = namespace.into();
    }

    pub fn set_propagation_mode(&mut self, mode: PropagationMode) {
        self.config.propagation_mode = mode;
    }

    pub fn set_update_strategy(&mut self, strategy: UpdateStrategy) {
        self.config.update_strategy = strategy;
    }

    pub fn set_deployment_type(&mut self, deployment_type: DeploymentType) {
        self.config.deployment_type = deployment_type;
    }

    pub fn set_add_labels(&mut self, add_labels: bool) {
        self.add_labels = add_labels;
    }

    // --- labels ---

    pub fn set_label_input(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.label_key = key.into();
        self.label_value = value.into();
    }

    /// Adds the buffered label. An existing key is never overwritten.
    pub fn add_label(&mut self) -> Result<(), InputError> {
        let res = validate::check_label(&self.config.custom_labels, &self.label_key, &self.label_value);
        self.record(Field::Label, res)?;
        let key = std::mem::take(&mut self.label_key);
        let value = std::mem::take(&mut self.label_value);
        tracing::trace!(%key, %value, "label added");
        self.config.custom_labels.insert(key, value);
        Ok(())
    }

    pub fn remove_label(&mut self, key: &str) -> Option<String> {
        self.config.custom_labels.remove(key)
    }

    pub fn labels(&self) -> &labels::Map {
        &self.config.custom_labels
    }

    // --- scheduling rules ---

    pub fn set_rule_draft(&mut self, rule: SchedulingRule) {
        self.draft_rule = rule;
    }

    pub fn rule_draft(&self) -> &SchedulingRule {
        &self.draft_rule
    }

    /// Appends the draft rule and resets the draft.
    pub fn add_rule(&mut self) -> Result<(), InputError> {
        let res = validate::check_rule(&self.draft_rule);
        self.record(Field::Rule, res)?;
        let rule = std::mem::replace(&mut self.draft_rule, default_rule());
        self.config.scheduling_rules.push(rule);
        Ok(())
    }

    pub fn remove_rule(&mut self, index: usize) -> Option<SchedulingRule> {
        if index < self.config.scheduling_rules.len() {
            Some(self.config.scheduling_rules.remove(index))
        } else {
            None
        }
    }

    // --- tolerations ---

    pub fn set_toleration_input(&mut self, toleration: impl Into<String>) {
        self.toleration_input = toleration.into();
    }

    pub fn add_toleration(&mut self) -> Result<(), InputError> {
        let res = validate::check_toleration(&self.toleration_input);
        self.record(Field::Toleration, res)?;
        let toleration = std::mem::take(&mut self.toleration_input);
        self.config.tolerations.push(toleration);
        Ok(())
    }

    pub fn remove_toleration(&mut self, index: usize) -> Option<String> {
        if index < self.config.tolerations.len() {
            Some(self.config.tolerations.remove(index))
        } else {
            None
        }
    }

    // ---

    /// The manifest the current fields would produce.
    pub fn preview(&self) -> String {
        yaml::project(&self.submission())
    }

    /// Validates the form. On success the completed configuration is
    /// returned and the form is reset; on failure the field errors replace
    /// whatever errors were shown before.
    pub fn submit(&mut self) -> Result<PolicyConfiguration, Invalid> {
        let config = self.submission();
        if let Err(invalid) = validate::validate(&config).into_result() {
            self.errors = invalid.errors().clone();
            return Err(invalid);
        }
        self.reset();
        Ok(config)
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    fn submission(&self) -> PolicyConfiguration {
        let mut config = self.config.clone();
        if !self.add_labels {
            config.custom_labels.clear();
        }
        config
    }

    fn record(&mut self, field: Field, res: Result<(), InputError>) -> Result<(), InputError> {
        match res {
            Ok(()) => {
                self.errors.remove(&field);
                Ok(())
            }
            Err(error) => {
                self.errors.insert(field, error.to_string());
                Err(error)
            }
        }
    }
}

impl Default for PolicyForm {
    fn default() -> Self {
        Self::new()
    }
}

fn default_rule() -> SchedulingRule {
    SchedulingRule {
        resource: Default::default(),
        operator: Default::default(),
        value: String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        connection::Endpoint,
        policy::{Operator, Resource},
    };

    fn connection(workload: &str, cluster: &str) -> Connection {
        Connection {
            workload: Endpoint::workload(workload, workload),
            workload_namespace: "default".to_string(),
            cluster: Endpoint::cluster(cluster, cluster),
        }
    }

    #[test]
    fn connection_names_the_policy() {
        let mut form = PolicyForm::for_connection(&connection("w1", "c1"));
        assert_eq!(form.config().name, "w1-to-c1");
        assert_eq!(form.config().namespace, "default");
        assert_eq!(form.rule_draft().operator, Operator::Ge);
        assert_eq!(form.rule_draft().resource, Resource::Cpu);

        let config = form.submit().unwrap();
        assert_eq!(config, PolicyConfiguration::named("w1-to-c1"));
    }

    #[test]
    fn separate_forms_do_not_share_state() {
        let mut a = PolicyForm::for_connection(&connection("w1", "c1"));
        let b = PolicyForm::for_connection(&connection("w1", "c1"));
        a.set_label_input("env", "prod");
        a.add_label().unwrap();
        assert!(b.labels().is_empty());
    }

    #[test]
    fn duplicate_label_is_rejected_without_overwrite() {
        let mut form = PolicyForm::new();
        form.set_label_input("env", "prod");
        form.add_label().unwrap();
        assert_eq!(form.error(Field::Label), None);

        form.set_label_input("env", "dev");
        assert_eq!(
            form.add_label(),
            Err(InputError::DuplicateLabel("env".to_string()))
        );
        assert_eq!(form.labels()["env"], "prod");
        assert_eq!(form.error(Field::Label), Some("Label key already exists"));

        form.set_label_input("tier", "web");
        form.add_label().unwrap();
        assert_eq!(form.error(Field::Label), None);
        assert_eq!(form.labels().len(), 2);
        assert_eq!(form.remove_label("env").as_deref(), Some("prod"));
    }

    #[test]
    fn rules_require_values_unless_existence() {
        let mut form = PolicyForm::new();
        form.set_rule_draft(SchedulingRule {
            resource: Resource::Memory,
            operator: Operator::Eq,
            value: String::new(),
        });
        assert_eq!(form.add_rule(), Err(InputError::MissingRuleValue));
        assert!(form.config().scheduling_rules.is_empty());
        assert!(form.error(Field::Rule).is_some());

        form.set_rule_draft(SchedulingRule {
            resource: Resource::Storage,
            operator: Operator::Exists,
            value: String::new(),
        });
        form.add_rule().unwrap();
        assert_eq!(form.config().scheduling_rules.len(), 1);
        assert_eq!(form.error(Field::Rule), None);
        assert_eq!(form.rule_draft(), &default_rule());

        assert!(form.remove_rule(3).is_none());
        assert_eq!(form.remove_rule(0).unwrap().resource, Resource::Storage);
    }

    #[test]
    fn tolerations_are_appended_verbatim() {
        let mut form = PolicyForm::new();
        assert_eq!(form.add_toleration(), Err(InputError::EmptyToleration));
        form.set_toleration_input("anything goes");
        form.add_toleration().unwrap();
        form.set_toleration_input("anything goes");
        form.add_toleration().unwrap();
        assert_eq!(form.config().tolerations, vec!["anything goes"; 2]);
        assert_eq!(form.error(Field::Toleration), None);
    }

    #[test]
    fn failed_submit_keeps_fields_and_reports_errors() {
        let mut form = PolicyForm::new();
        form.set_namespace("");
        form.set_toleration_input("t");
        form.add_toleration().unwrap();

        let invalid = form.submit().unwrap_err();
        assert_eq!(invalid.errors().len(), 2);
        assert_eq!(form.error(Field::Name), Some("Name is required"));
        assert_eq!(form.error(Field::Namespace), Some("Namespace is required"));
        assert_eq!(form.config().tolerations, vec!["t"]);

        form.set_name("fixed");
        form.set_namespace("ops");
        let config = form.submit().unwrap();
        assert_eq!(config.namespace, "ops");
        assert_eq!(form, PolicyForm::new());
    }

    #[test]
    fn disabled_labels_are_left_out() {
        let mut form = PolicyForm::new();
        form.set_name("p");
        form.set_label_input("env", "prod");
        form.add_label().unwrap();
        form.set_add_labels(false);
        assert!(!form.preview().contains("env: prod"));
        assert!(form.submit().unwrap().custom_labels.is_empty());
    }

    #[test]
    fn preview_tracks_fields() {
        let mut form = PolicyForm::new();
        form.set_name("preview-me");
        form.set_update_strategy(UpdateStrategy::RollingUpdate);
        let preview = form.preview();
        assert!(preview.contains("name: preview-me"), "{preview}");
        assert!(preview.contains("updateStrategy: RollingUpdate"), "{preview}");
    }
}
