//! Trial template rendering.
//!
//! Substitution is literal text replacement of `${trialParameters.NAME}`
//! tokens in the serialized template, followed by a re-parse. Unresolved
//! tokens are an error.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::common::ParameterAssignment;
use crate::domain::models::experiment::TrialParameterSpec;

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{trialParameters\.([A-Za-z_][A-Za-z0-9_]*)\}").unwrap())
}

/// The placeholder token for a trial parameter name.
pub fn placeholder_token(name: &str) -> String {
    format!("${{trialParameters.{name}}}")
}

/// Placeholder names referenced by the template text, in order of first
/// appearance, deduplicated.
pub fn placeholders(text: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for cap in placeholder_regex().captures_iter(text) {
        let name = cap[1].to_string();
        if !seen.contains(&name) {
            seen.push(name);
        }
    }
    seen
}

/// Render the template into a concrete run spec by substituting every
/// declared trial parameter with the value of the assignment its
/// `reference` points at.
pub fn render_run_spec(
    template: &Value,
    trial_parameters: &[TrialParameterSpec],
    assignments: &[ParameterAssignment],
) -> DomainResult<Value> {
    let mut text = serde_json::to_string(template)?;

    for param in trial_parameters {
        let assignment = assignments
            .iter()
            .find(|a| a.name == param.reference)
            .ok_or_else(|| {
                DomainError::TemplateRender(format!(
                    "no assignment for trial parameter '{}' (reference '{}')",
                    param.name, param.reference
                ))
            })?;
        text = text.replace(&placeholder_token(&param.name), &assignment.value);
    }

    if let Some(unresolved) = placeholders(&text).first() {
        return Err(DomainError::TemplateRender(format!(
            "unresolved placeholder '{}' in trial template",
            placeholder_token(unresolved)
        )));
    }

    serde_json::from_str(&text)
        .map_err(|e| DomainError::TemplateRender(format!("rendered template is not valid JSON: {e}")))
}

/// Recover the assignments a rendered document was produced with, by
/// aligning the literal segments of the template text against the rendered
/// text. The left inverse of `render_run_spec`.
pub fn extract_assignments(
    template_text: &str,
    rendered_text: &str,
    trial_parameters: &[TrialParameterSpec],
) -> Option<Vec<ParameterAssignment>> {
    let re = placeholder_regex();

    let mut caps: Vec<(usize, usize, String)> = Vec::new();
    for cap in re.captures_iter(template_text) {
        let m = cap.get(0).unwrap();
        caps.push((m.start(), m.end(), cap[1].to_string()));
    }

    let mut values: Vec<(String, String)> = Vec::new();
    let mut template_pos = 0;
    let mut rendered_pos = 0;

    for (i, (start, end, name)) in caps.iter().enumerate() {
        // Literal text before this token must match verbatim.
        let literal = &template_text[template_pos..*start];
        if !rendered_text[rendered_pos..].starts_with(literal) {
            return None;
        }
        rendered_pos += literal.len();

        // The substituted value runs until the next literal segment.
        let next_literal_start = caps
            .get(i + 1)
            .map(|(s, _, _)| *s)
            .unwrap_or(template_text.len());
        let next_literal = &template_text[*end..next_literal_start];
        let value_end = if next_literal.is_empty() {
            rendered_text.len()
        } else {
            rendered_pos + rendered_text[rendered_pos..].find(next_literal)?
        };
        values.push((name.clone(), rendered_text[rendered_pos..value_end].to_string()));
        rendered_pos = value_end;
        template_pos = *end;
    }

    if rendered_text[rendered_pos..] != template_text[template_pos..] {
        return None;
    }

    // Map placeholder names back to search-space parameter names.
    let mut assignments = Vec::new();
    for (placeholder, value) in values {
        let param = trial_parameters.iter().find(|p| p.name == placeholder)?;
        assignments.push(ParameterAssignment {
            name: param.reference.clone(),
            value,
        });
    }
    Some(assignments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params() -> Vec<TrialParameterSpec> {
        vec![
            TrialParameterSpec {
                name: "learningRate".to_string(),
                description: String::new(),
                reference: "lr".to_string(),
            },
            TrialParameterSpec {
                name: "numLayers".to_string(),
                description: String::new(),
                reference: "layers".to_string(),
            },
        ]
    }

    fn assignments() -> Vec<ParameterAssignment> {
        vec![
            ParameterAssignment {
                name: "lr".to_string(),
                value: "0.05".to_string(),
            },
            ParameterAssignment {
                name: "layers".to_string(),
                value: "4".to_string(),
            },
        ]
    }

    fn template() -> Value {
        json!({
            "apiVersion": "tunelab.dev/v1",
            "kind": "ShellJob",
            "spec": {
                "containers": [{
                    "name": "training",
                    "command": [
                        "python3", "train.py",
                        "--lr=${trialParameters.learningRate}",
                        "--layers=${trialParameters.numLayers}"
                    ]
                }]
            }
        })
    }

    #[test]
    fn test_render_substitutes_all_tokens() {
        let rendered = render_run_spec(&template(), &params(), &assignments()).unwrap();
        let command = rendered["spec"]["containers"][0]["command"]
            .as_array()
            .unwrap();
        assert_eq!(command[2], "--lr=0.05");
        assert_eq!(command[3], "--layers=4");
    }

    #[test]
    fn test_render_fails_on_missing_assignment() {
        let err = render_run_spec(&template(), &params(), &assignments()[..1]).unwrap_err();
        assert!(err.to_string().contains("numLayers"));
    }

    #[test]
    fn test_render_fails_on_undeclared_placeholder() {
        let mut trial_params = params();
        trial_params.pop();
        let err = render_run_spec(&template(), &trial_params, &assignments()).unwrap_err();
        assert!(err.to_string().contains("${trialParameters.numLayers}"));
    }

    #[test]
    fn test_placeholders_deduplicated_in_order() {
        let text = "a=${trialParameters.x} b=${trialParameters.y} c=${trialParameters.x}";
        assert_eq!(placeholders(text), vec!["x".to_string(), "y".to_string()]);
    }

    #[test]
    fn test_extract_is_left_inverse_of_render() {
        let template_text = serde_json::to_string(&template()).unwrap();
        let mut rendered_text = template_text.clone();
        for (p, a) in params().iter().zip(assignments().iter()) {
            rendered_text = rendered_text.replace(&placeholder_token(&p.name), &a.value);
        }

        let extracted = extract_assignments(&template_text, &rendered_text, &params()).unwrap();
        assert_eq!(extracted, assignments());
    }

    #[test]
    fn test_extract_rejects_mismatched_document() {
        let template_text = r#"{"cmd":"--lr=${trialParameters.learningRate}"}"#;
        let rendered_text = r#"{"cmd":"--other=0.05"}"#;
        assert!(extract_assignments(template_text, rendered_text, &params()).is_none());
    }
}
