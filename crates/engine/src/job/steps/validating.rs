//! `validating` step (spec §4.5.3): input validation against the manifest's
//! `InputSpec`s, `show_when` conditional requirement, and the privileged
//! container policy gate.

use regex::Regex;

use crate::error::{EngineError, EngineResult};
use crate::job::context::JobContext;
use crate::manifest::InputKind;
use crate::store::models::JobState;

/// Global policy: privileged containers are never allowed regardless of
/// manifest request (spec §4.5.3: "reject app if privileged container
/// requested while the global policy forbids it" — this deployment's
/// policy is always-forbid; a future config knob could relax it).
const PRIVILEGED_CONTAINERS_ALLOWED: bool = false;

pub async fn run(ctx: &mut JobContext) -> EngineResult<()> {
    ctx.transition(JobState::Validating).await?;
    validate_inputs(&ctx.manifest, &ctx.job.inputs)?;
    ctx.info("inputs validated").await;
    Ok(())
}

/// The manifest/input-checking core of `run`, pulled out so a stack install
/// (which validates several apps' manifests under one `validating` job
/// state) can reuse it without re-entering the state machine per app.
pub(crate) fn validate_inputs(
    manifest: &crate::manifest::Manifest,
    inputs: &std::collections::HashMap<String, String>,
) -> EngineResult<()> {
    if manifest.privileged && !PRIVILEGED_CONTAINERS_ALLOWED {
        return Err(EngineError::validation(
            "manifest requests a privileged container, which this deployment forbids",
        ));
    }

    for input in &manifest.inputs {
        let required = match &input.show_when {
            Some(expr) => input.required && eval_show_when(expr, inputs),
            None => input.required,
        };

        let value = inputs.get(&input.key).cloned().or_else(|| input.default.clone());

        let value = match value {
            Some(v) => v,
            None if required => {
                return Err(EngineError::validation(format!("missing required input '{}'", input.key)))
            }
            None => continue,
        };

        validate_one(&input.key, input, &value)?;
    }

    Ok(())
}

fn validate_one(key: &str, spec: &crate::manifest::InputSpec, value: &str) -> EngineResult<()> {
    if let Some(min_len) = spec.min_length {
        if value.len() < min_len {
            return Err(EngineError::validation(format!("'{key}' shorter than {min_len} chars")));
        }
    }
    if let Some(max_len) = spec.max_length {
        if value.len() > max_len {
            return Err(EngineError::validation(format!("'{key}' longer than {max_len} chars")));
        }
    }
    if let Some(pattern) = &spec.regex {
        let re = Regex::new(pattern).map_err(|e| EngineError::validation(format!("'{key}' has an invalid regex: {e}")))?;
        if !re.is_match(value) {
            return Err(EngineError::validation(format!("'{key}' does not match required pattern")));
        }
    }
    match spec.kind {
        InputKind::Number | InputKind::Port => {
            let n: f64 = value
                .parse()
                .map_err(|_| EngineError::validation(format!("'{key}' is not a number")))?;
            if let Some(min) = spec.min {
                if n < min {
                    return Err(EngineError::validation(format!("'{key}' below minimum {min}")));
                }
            }
            if let Some(max) = spec.max {
                if n > max {
                    return Err(EngineError::validation(format!("'{key}' above maximum {max}")));
                }
            }
            if spec.kind == InputKind::Port && !(1.0..=65535.0).contains(&n) {
                return Err(EngineError::validation(format!("'{key}' is not a valid port")));
            }
        }
        InputKind::Bool => {
            if value != "true" && value != "false" {
                return Err(EngineError::validation(format!("'{key}' must be true or false")));
            }
        }
        InputKind::Enum => {
            if !spec.enum_values.iter().any(|v| v == value) {
                return Err(EngineError::validation(format!("'{key}' is not one of the allowed values")));
            }
        }
        InputKind::String => {}
    }
    Ok(())
}

/// Evaluates `"other_key == value"`; any other shape is treated as false.
fn eval_show_when(expr: &str, inputs: &std::collections::HashMap<String, String>) -> bool {
    let Some((key, expected)) = expr.split_once("==") else {
        return false;
    };
    let key = key.trim();
    let expected = expected.trim().trim_matches('"');
    inputs.get(key).map(|v| v == expected).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn show_when_matches_equal_value() {
        let mut inputs = HashMap::new();
        inputs.insert("mode".to_string(), "advanced".to_string());
        assert!(eval_show_when("mode == \"advanced\"", &inputs));
        assert!(!eval_show_when("mode == \"basic\"", &inputs));
    }

    #[test]
    fn port_kind_rejects_out_of_range_values() {
        let spec = crate::manifest::InputSpec {
            key: "port".into(),
            kind: InputKind::Port,
            required: true,
            secret: false,
            default: None,
            regex: None,
            min: None,
            max: None,
            min_length: None,
            max_length: None,
            enum_values: vec![],
            show_when: None,
        };
        assert!(validate_one("port", &spec, "70000").is_err());
        assert!(validate_one("port", &spec, "8080").is_ok());
    }
}
