//! Template interpolation for chain step inputs.
//!
//! Templates contain `{{ expr }}` placeholders where `expr` is a dotted
//! path: `var.NAME` reads a chain variable, `steps.N.FIELD` reads a
//! predecessor's result (`run_id`, `conclusion`, `status`). Interpolation
//! reads a snapshot of step results, never a live reference.

use crate::chain::executor::StepResult;
use crate::github::conclusion_str;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InterpError {
    #[error("unknown variable {0:?}")]
    UnknownVariable(String),
    #[error("unknown field {field:?} on steps.{step} (expected run_id, conclusion, or status)")]
    UnknownField { step: usize, field: String },
    #[error("steps.{0} has no recorded result")]
    StepNotMaterialized(usize),
    #[error("malformed template expression {0:?}")]
    Malformed(String),
}

/// Snapshot of the values visible to templates.
pub struct Context<'a> {
    pub vars: &'a BTreeMap<String, String>,
    pub steps: &'a BTreeMap<usize, StepResult>,
}

/// Render a single template string.
pub fn interpolate(template: &str, ctx: &Context<'_>) -> Result<String, InterpError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];
        let Some(end) = after_open.find("}}") else {
            return Err(InterpError::Malformed(rest[start..].to_string()));
        };
        let expr = after_open[..end].trim();
        out.push_str(&resolve(expr, ctx)?);
        rest = &after_open[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Render every value of an input map. Keys pass through untouched.
pub fn interpolate_inputs(
    inputs: &BTreeMap<String, String>,
    ctx: &Context<'_>,
) -> Result<BTreeMap<String, String>, InterpError> {
    inputs
        .iter()
        .map(|(k, v)| interpolate(v, ctx).map(|rendered| (k.clone(), rendered)))
        .collect()
}

fn resolve(expr: &str, ctx: &Context<'_>) -> Result<String, InterpError> {
    if expr.is_empty() {
        return Err(InterpError::Malformed(expr.to_string()));
    }
    let mut parts = expr.split('.');
    match parts.next() {
        Some("var") => {
            let name = parts.next().filter(|n| !n.is_empty());
            let Some(name) = name else {
                return Err(InterpError::Malformed(expr.to_string()));
            };
            if parts.next().is_some() {
                return Err(InterpError::Malformed(expr.to_string()));
            }
            ctx.vars
                .get(name)
                .cloned()
                .ok_or_else(|| InterpError::UnknownVariable(name.to_string()))
        }
        Some("steps") => {
            let (Some(index), Some(field), None) = (parts.next(), parts.next(), parts.next())
            else {
                return Err(InterpError::Malformed(expr.to_string()));
            };
            let index: usize = index
                .parse()
                .map_err(|_| InterpError::Malformed(expr.to_string()))?;
            let result = ctx
                .steps
                .get(&index)
                .ok_or(InterpError::StepNotMaterialized(index))?;
            match field {
                "run_id" => Ok(result.run_id.to_string()),
                "conclusion" => Ok(conclusion_str(result.conclusion).to_string()),
                "status" => Ok(result.status.as_str().to_string()),
                other => Err(InterpError::UnknownField {
                    step: index,
                    field: other.to_string(),
                }),
            }
        }
        _ => Err(InterpError::Malformed(expr.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::github::{Conclusion, RunStatus};

    fn ctx_fixtures() -> (BTreeMap<String, String>, BTreeMap<usize, StepResult>) {
        let mut vars = BTreeMap::new();
        vars.insert("env".to_string(), "staging".to_string());
        vars.insert("region".to_string(), "eu-west-1".to_string());

        let mut steps = BTreeMap::new();
        steps.insert(
            0,
            StepResult {
                workflow: "build.yml".to_string(),
                inputs: BTreeMap::new(),
                run_id: 4200,
                status: RunStatus::Completed,
                conclusion: Some(Conclusion::Success),
            },
        );
        (vars, steps)
    }

    #[test]
    fn renders_variable() {
        let (vars, steps) = ctx_fixtures();
        let ctx = Context { vars: &vars, steps: &steps };
        assert_eq!(interpolate("{{ var.env }}", &ctx).unwrap(), "staging");
    }

    #[test]
    fn renders_step_fields() {
        let (vars, steps) = ctx_fixtures();
        let ctx = Context { vars: &vars, steps: &steps };
        assert_eq!(interpolate("{{ steps.0.run_id }}", &ctx).unwrap(), "4200");
        assert_eq!(
            interpolate("{{ steps.0.conclusion }}", &ctx).unwrap(),
            "success"
        );
        assert_eq!(
            interpolate("{{ steps.0.status }}", &ctx).unwrap(),
            "completed"
        );
    }

    #[test]
    fn renders_mixed_text_and_multiple_placeholders() {
        let (vars, steps) = ctx_fixtures();
        let ctx = Context { vars: &vars, steps: &steps };
        assert_eq!(
            interpolate("deploy-{{ var.env }}-{{ var.region }}", &ctx).unwrap(),
            "deploy-staging-eu-west-1"
        );
    }

    #[test]
    fn whitespace_inside_braces_ignored() {
        let (vars, steps) = ctx_fixtures();
        let ctx = Context { vars: &vars, steps: &steps };
        assert_eq!(interpolate("{{var.env}}", &ctx).unwrap(), "staging");
        assert_eq!(interpolate("{{   var.env   }}", &ctx).unwrap(), "staging");
    }

    #[test]
    fn plain_text_passes_through() {
        let (vars, steps) = ctx_fixtures();
        let ctx = Context { vars: &vars, steps: &steps };
        assert_eq!(interpolate("no placeholders", &ctx).unwrap(), "no placeholders");
        assert_eq!(interpolate("", &ctx).unwrap(), "");
    }

    #[test]
    fn unknown_variable_errors() {
        let (vars, steps) = ctx_fixtures();
        let ctx = Context { vars: &vars, steps: &steps };
        assert_eq!(
            interpolate("{{ var.missing }}", &ctx).unwrap_err(),
            InterpError::UnknownVariable("missing".to_string())
        );
    }

    #[test]
    fn step_out_of_range_errors() {
        let (vars, steps) = ctx_fixtures();
        let ctx = Context { vars: &vars, steps: &steps };
        assert_eq!(
            interpolate("{{ steps.3.run_id }}", &ctx).unwrap_err(),
            InterpError::StepNotMaterialized(3)
        );
    }

    #[test]
    fn unknown_step_field_errors() {
        let (vars, steps) = ctx_fixtures();
        let ctx = Context { vars: &vars, steps: &steps };
        match interpolate("{{ steps.0.url }}", &ctx).unwrap_err() {
            InterpError::UnknownField { step, field } => {
                assert_eq!(step, 0);
                assert_eq!(field, "url");
            }
            other => panic!("expected UnknownField, got {other:?}"),
        }
    }

    #[test]
    fn malformed_expressions_error() {
        let (vars, steps) = ctx_fixtures();
        let ctx = Context { vars: &vars, steps: &steps };
        for template in [
            "{{ }}",
            "{{ var }}",
            "{{ var. }}",
            "{{ steps.0 }}",
            "{{ steps.x.run_id }}",
            "{{ bogus.path }}",
            "{{ var.env.extra }}",
            "{{ unclosed",
        ] {
            assert!(
                matches!(
                    interpolate(template, &ctx),
                    Err(InterpError::Malformed(_))
                ),
                "expected malformed error for {template:?}"
            );
        }
    }

    #[test]
    fn interpolate_inputs_renders_every_value() {
        let (vars, steps) = ctx_fixtures();
        let ctx = Context { vars: &vars, steps: &steps };
        let mut inputs = BTreeMap::new();
        inputs.insert("environment".to_string(), "{{ var.env }}".to_string());
        inputs.insert("upstream".to_string(), "{{ steps.0.run_id }}".to_string());
        inputs.insert("literal".to_string(), "fixed".to_string());

        let rendered = interpolate_inputs(&inputs, &ctx).unwrap();
        assert_eq!(rendered["environment"], "staging");
        assert_eq!(rendered["upstream"], "4200");
        assert_eq!(rendered["literal"], "fixed");
    }

    #[test]
    fn interpolate_inputs_fails_on_first_bad_value() {
        let (vars, steps) = ctx_fixtures();
        let ctx = Context { vars: &vars, steps: &steps };
        let mut inputs = BTreeMap::new();
        inputs.insert("bad".to_string(), "{{ var.nope }}".to_string());
        assert!(interpolate_inputs(&inputs, &ctx).is_err());
    }

    #[test]
    fn conclusion_of_unfinished_step_renders_empty() {
        let vars = BTreeMap::new();
        let mut steps = BTreeMap::new();
        steps.insert(
            0,
            StepResult {
                workflow: "build.yml".to_string(),
                inputs: BTreeMap::new(),
                run_id: 1,
                status: RunStatus::InProgress,
                conclusion: None,
            },
        );
        let ctx = Context { vars: &vars, steps: &steps };
        assert_eq!(interpolate("{{ steps.0.conclusion }}", &ctx).unwrap(), "");
    }
}
