//! Admission validation for experiments.
//!
//! Runs before any create or update is accepted by the store, so malformed
//! specs never reach a reconcile loop.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::OnceLock;

use regex::Regex;
use tracing::instrument;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    template, CollectorKind, Experiment, ParameterSpec, ParameterType, TemplateSource,
};
use crate::domain::models::common::ParameterAssignment;
use crate::domain::ports::{JobProvider, RuntimeCatalog};

fn identifier_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap())
}

/// Validates experiments on admission.
pub struct ExperimentValidator {
    catalog: Arc<dyn RuntimeCatalog>,
    job_provider: Arc<dyn JobProvider>,
}

impl ExperimentValidator {
    pub fn new(catalog: Arc<dyn RuntimeCatalog>, job_provider: Arc<dyn JobProvider>) -> Self {
        Self {
            catalog,
            job_provider,
        }
    }

    /// Validate a new experiment, or an update when `old` is given.
    #[instrument(skip_all, fields(experiment = %experiment.name))]
    pub async fn validate(
        &self,
        experiment: &Experiment,
        old: Option<&Experiment>,
    ) -> DomainResult<()> {
        self.validate_objective(experiment)?;
        self.validate_algorithm(experiment, old).await?;
        self.validate_budgets(experiment)?;
        self.validate_search_space(experiment)?;
        self.validate_trial_template(experiment).await?;
        self.validate_metrics_collector(experiment).await?;
        Ok(())
    }

    fn validate_objective(&self, experiment: &Experiment) -> DomainResult<()> {
        if experiment.spec.objective.objective_metric_name.is_empty() {
            return Err(DomainError::ValidationFailed(
                "objective metric name must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    async fn validate_algorithm(
        &self,
        experiment: &Experiment,
        old: Option<&Experiment>,
    ) -> DomainResult<()> {
        let name = &experiment.spec.algorithm.algorithm_name;
        if name.is_empty() {
            return Err(DomainError::ValidationFailed(
                "algorithm name must not be empty".to_string(),
            ));
        }
        if let Some(old) = old {
            if old.spec.algorithm.algorithm_name != *name {
                return Err(DomainError::ValidationFailed(format!(
                    "algorithm cannot change on a resumed experiment (was '{}', got '{}')",
                    old.spec.algorithm.algorithm_name, name
                )));
            }
        }
        if !self.catalog.has_algorithm(name).await {
            return Err(DomainError::ValidationFailed(format!(
                "unknown algorithm '{name}': not registered in the runtime catalog"
            )));
        }
        Ok(())
    }

    fn validate_budgets(&self, experiment: &Experiment) -> DomainResult<()> {
        let spec = &experiment.spec;
        if spec.parallel_trial_count == 0 {
            return Err(DomainError::ValidationFailed(
                "parallel trial count must be at least 1".to_string(),
            ));
        }
        if let Some(max) = spec.max_trial_count {
            if spec.parallel_trial_count > max {
                return Err(DomainError::ValidationFailed(format!(
                    "parallel trial count {} exceeds max trial count {}",
                    spec.parallel_trial_count, max
                )));
            }
        }
        Ok(())
    }

    fn validate_search_space(&self, experiment: &Experiment) -> DomainResult<()> {
        let has_parameters = !experiment.spec.parameters.is_empty();
        let has_nas = experiment.spec.nas_config.is_some();
        match (has_parameters, has_nas) {
            (false, false) => {
                return Err(DomainError::ValidationFailed(
                    "one of parameters or nasConfig must be set".to_string(),
                ))
            }
            (true, true) => {
                return Err(DomainError::ValidationFailed(
                    "parameters and nasConfig are mutually exclusive".to_string(),
                ))
            }
            _ => {}
        }

        for parameter in &experiment.spec.parameters {
            validate_parameter(parameter)?;
        }
        if let Some(nas) = &experiment.spec.nas_config {
            for operation in &nas.operations {
                for parameter in &operation.parameters {
                    validate_parameter(parameter)?;
                }
            }
        }
        Ok(())
    }

    async fn validate_trial_template(&self, experiment: &Experiment) -> DomainResult<()> {
        let template_spec = &experiment.spec.trial_template;

        // Trial parameter names are legal identifiers and unique; so are
        // their references.
        let mut names = HashSet::new();
        let mut references = HashSet::new();
        for param in &template_spec.trial_parameters {
            if !identifier_regex().is_match(&param.name) {
                return Err(DomainError::ValidationFailed(format!(
                    "trial parameter name '{}' is not a legal identifier",
                    param.name
                )));
            }
            if !names.insert(param.name.as_str()) {
                return Err(DomainError::ValidationFailed(format!(
                    "duplicate trial parameter name '{}'",
                    param.name
                )));
            }
            if !references.insert(param.reference.as_str()) {
                return Err(DomainError::ValidationFailed(format!(
                    "duplicate trial parameter reference '{}'",
                    param.reference
                )));
            }
        }

        let template_doc = match &template_spec.source {
            TemplateSource::Inline(value) => value.clone(),
            TemplateSource::Named(name) => self.catalog.trial_template(name).await?,
        };
        let template_text = serde_json::to_string(&template_doc)?;

        // Every declared parameter referenced exactly once, nothing
        // undeclared. Both sides of the mismatch are named.
        let referenced = template::placeholders(&template_text);
        let undeclared: Vec<&String> = referenced
            .iter()
            .filter(|r| !names.contains(r.as_str()))
            .collect();
        let unused: Vec<&str> = template_spec
            .trial_parameters
            .iter()
            .map(|p| p.name.as_str())
            .filter(|n| !referenced.iter().any(|r| r == n))
            .collect();
        if !undeclared.is_empty() || !unused.is_empty() {
            let mut parts = Vec::new();
            if !undeclared.is_empty() {
                parts.push(format!(
                    "template references undeclared trial parameters {undeclared:?}"
                ));
            }
            if !unused.is_empty() {
                parts.push(format!("declared trial parameters {unused:?} are never referenced"));
            }
            return Err(DomainError::ValidationFailed(parts.join("; ")));
        }
        for param in &template_spec.trial_parameters {
            let occurrences = template_text
                .matches(&template::placeholder_token(&param.name))
                .count();
            if occurrences != 1 {
                return Err(DomainError::ValidationFailed(format!(
                    "trial parameter '{}' must be referenced exactly once, found {}",
                    param.name, occurrences
                )));
            }
        }

        // Render with placeholder values and inspect the resulting document.
        let probe_assignments: Vec<ParameterAssignment> = template_spec
            .trial_parameters
            .iter()
            .map(|p| ParameterAssignment {
                name: p.reference.clone(),
                value: "1".to_string(),
            })
            .collect();
        let rendered = template::render_run_spec(
            &template_doc,
            &template_spec.trial_parameters,
            &probe_assignments,
        )
        .map_err(|e| DomainError::ValidationFailed(e.to_string()))?;

        let api_version = rendered
            .get("apiVersion")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        if api_version.is_empty() {
            return Err(DomainError::ValidationFailed(
                "trial template must set a non-empty apiVersion".to_string(),
            ));
        }
        let kind = rendered.get("kind").and_then(|v| v.as_str()).unwrap_or("");
        if kind.is_empty() {
            return Err(DomainError::ValidationFailed(
                "trial template must set a non-empty kind".to_string(),
            ));
        }
        if let Some(metadata) = rendered.get("metadata") {
            if metadata.get("name").is_some() || metadata.get("namespace").is_some() {
                return Err(DomainError::ValidationFailed(
                    "trial template must not set metadata.name or metadata.namespace".to_string(),
                ));
            }
        }
        if !self.job_provider.recognizes(kind) {
            return Err(DomainError::ValidationFailed(format!(
                "trial template kind '{kind}' is not supported by the job provider"
            )));
        }
        if template_spec.primary_container_name.is_empty() {
            return Err(DomainError::ValidationFailed(
                "primary container name must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    async fn validate_metrics_collector(&self, experiment: &Experiment) -> DomainResult<()> {
        let collector = &experiment.spec.metrics_collector;
        if let Some((path, _)) = collector.mount_path() {
            if !path.starts_with('/') {
                return Err(DomainError::ValidationFailed(format!(
                    "metrics collector path '{path}' must be absolute"
                )));
            }
        }

        // Custom collectors run as a user-supplied sidecar; one has to be
        // registered in the runtime catalog.
        if collector.kind == CollectorKind::Custom {
            self.catalog.collector_config(collector.kind).await?;
        }

        if collector.kind == CollectorKind::File {
            for pattern in collector.metrics_formats() {
                let compiled = Regex::new(pattern).map_err(|e| {
                    DomainError::ValidationFailed(format!(
                        "metrics format '{pattern}' does not compile: {e}"
                    ))
                })?;
                // Two capture groups: metric name and value.
                if compiled.captures_len() != 3 {
                    return Err(DomainError::ValidationFailed(format!(
                        "metrics format '{pattern}' must have exactly two capture groups"
                    )));
                }
            }
        }

        if collector.kind == CollectorKind::Prometheus {
            let http_get = collector
                .source
                .as_ref()
                .and_then(|s| s.http_get.as_ref())
                .ok_or_else(|| {
                    DomainError::ValidationFailed(
                        "prometheus collector requires source.httpGet".to_string(),
                    )
                })?;
            if http_get.port <= 0 || http_get.port > 65535 {
                return Err(DomainError::ValidationFailed(format!(
                    "prometheus collector port {} is not a valid port",
                    http_get.port
                )));
            }
            if !http_get.path.starts_with('/') {
                return Err(DomainError::ValidationFailed(format!(
                    "prometheus collector path '{}' must begin with '/'",
                    http_get.path
                )));
            }
        }
        Ok(())
    }
}

fn validate_parameter(parameter: &ParameterSpec) -> DomainResult<()> {
    let space = &parameter.feasible_space;
    match parameter.parameter_type {
        ParameterType::Int | ParameterType::Double => {
            if space.min.is_none() || space.max.is_none() {
                return Err(DomainError::ValidationFailed(format!(
                    "parameter '{}' of type {} requires min and max",
                    parameter.name,
                    parameter.parameter_type.as_str()
                )));
            }
            if !space.list.is_empty() {
                return Err(DomainError::ValidationFailed(format!(
                    "parameter '{}' of type {} must not set a list",
                    parameter.name,
                    parameter.parameter_type.as_str()
                )));
            }
            let parse = |field: &str, value: &str| -> DomainResult<f64> {
                value.parse::<f64>().map_err(|_| {
                    DomainError::ValidationFailed(format!(
                        "parameter '{}': {field} '{value}' is not numeric",
                        parameter.name
                    ))
                })
            };
            let min = parse("min", space.min.as_deref().unwrap())?;
            let max = parse("max", space.max.as_deref().unwrap())?;
            if min > max {
                return Err(DomainError::ValidationFailed(format!(
                    "parameter '{}': min {min} exceeds max {max}",
                    parameter.name
                )));
            }
        }
        ParameterType::Discrete | ParameterType::Categorical => {
            if space.list.is_empty() {
                return Err(DomainError::ValidationFailed(format!(
                    "parameter '{}' of type {} requires a non-empty list",
                    parameter.name,
                    parameter.parameter_type.as_str()
                )));
            }
            if space.min.is_some() || space.max.is_some() {
                return Err(DomainError::ValidationFailed(format!(
                    "parameter '{}' of type {} must not set min or max",
                    parameter.name,
                    parameter.parameter_type.as_str()
                )));
            }
        }
    }
    Ok(())
}
