//! Validation for egg descriptors and instance configurations
//!
//! Two layers live here: structural checks over descriptors (an egg must
//! carry an id, a name, and at least one docker image) and the
//! pipe-separated variable `rules` DSL applied to every effective variable
//! value on configure.

use crate::types::{Egg, Plan, ServerConfig};
use thiserror::Error;

/// Structural problems with an egg descriptor
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EggError {
    #[error("egg id must not be empty")]
    MissingId,

    #[error("egg '{id}' has no name")]
    MissingName { id: String },

    #[error("egg '{id}' declares no docker images")]
    NoImages { id: String },

    #[error("egg '{id}' variable '{name}' has no env_variable")]
    VariableWithoutKey { id: String, name: String },
}

/// A variable value that failed its declared rules
#[derive(Debug, Error, PartialEq, Eq)]
#[error("variable '{variable}' {reason}")]
pub struct RuleViolation {
    pub variable: String,
    pub reason: String,
}

/// Validate an egg descriptor before it is persisted or used
pub fn validate_egg(egg: &Egg) -> Result<(), EggError> {
    if egg.id.trim().is_empty() {
        return Err(EggError::MissingId);
    }
    if egg.name.trim().is_empty() {
        return Err(EggError::MissingName {
            id: egg.id.clone(),
        });
    }
    if egg.docker_images.is_empty() {
        return Err(EggError::NoImages {
            id: egg.id.clone(),
        });
    }
    for var in &egg.variables {
        if var.env_variable.trim().is_empty() {
            return Err(EggError::VariableWithoutKey {
                id: egg.id.clone(),
                name: var.name.clone(),
            });
        }
    }
    Ok(())
}

/// Apply a pipe-separated rules string to a variable value.
///
/// Recognized tokens: `required`, `nullable`, `string`, `numeric`, `min:n`,
/// `max:n`, `between:a,b`, `in:v1,v2,…`. Unknown tokens are ignored so that
/// descriptors written against a richer control plane still load.
///
/// `min`/`max`/`between` compare numerically when the rules also declare
/// `numeric`, and by character length otherwise.
pub fn validate_rules(variable: &str, rules: &str, value: &str) -> Result<(), RuleViolation> {
    let tokens: Vec<&str> = rules
        .split('|')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect();

    if tokens.is_empty() {
        return Ok(());
    }

    let nullable = tokens.iter().any(|t| *t == "nullable");
    if value.is_empty() {
        return if tokens.iter().any(|t| *t == "required") && !nullable {
            Err(violation(variable, "is required"))
        } else {
            Ok(())
        };
    }

    let numeric = tokens.iter().any(|t| *t == "numeric");
    let parsed: Option<f64> = value.parse().ok();

    if numeric && parsed.is_none() {
        return Err(violation(variable, format!("must be numeric, got '{value}'")));
    }

    for token in &tokens {
        let (rule, arg) = match token.split_once(':') {
            Some((r, a)) => (r, a),
            None => (*token, ""),
        };

        match rule {
            "required" | "nullable" | "string" | "numeric" => {}
            "min" => {
                let bound: f64 = parse_bound(variable, arg)?;
                if measure(value, parsed, numeric) < bound {
                    return Err(violation(variable, format!("must be at least {arg}")));
                }
            }
            "max" => {
                let bound: f64 = parse_bound(variable, arg)?;
                if measure(value, parsed, numeric) > bound {
                    return Err(violation(variable, format!("must be at most {arg}")));
                }
            }
            "between" => {
                let (lo, hi) = arg
                    .split_once(',')
                    .ok_or_else(|| violation(variable, format!("has malformed rule '{token}'")))?;
                let lo: f64 = parse_bound(variable, lo)?;
                let hi: f64 = parse_bound(variable, hi)?;
                let m = measure(value, parsed, numeric);
                if m < lo || m > hi {
                    return Err(violation(
                        variable,
                        format!("must be between {lo} and {hi}"),
                    ));
                }
            }
            "in" => {
                if !arg.split(',').any(|candidate| candidate == value) {
                    return Err(violation(variable, format!("must be one of [{arg}]")));
                }
            }
            _ => {}
        }
    }

    Ok(())
}

fn measure(value: &str, parsed: Option<f64>, numeric: bool) -> f64 {
    if numeric {
        parsed.unwrap_or(0.0)
    } else {
        value.chars().count() as f64
    }
}

fn parse_bound(variable: &str, raw: &str) -> Result<f64, RuleViolation> {
    raw.trim()
        .parse()
        .map_err(|_| violation(variable, format!("has malformed rule bound '{raw}'")))
}

fn violation(variable: &str, reason: impl Into<String>) -> RuleViolation {
    RuleViolation {
        variable: variable.to_string(),
        reason: reason.into(),
    }
}

/// Run every egg variable's rules over its effective value for `cfg`
pub fn validate_config_variables(egg: &Egg, cfg: &ServerConfig) -> Result<(), RuleViolation> {
    for var in &egg.variables {
        let value = egg.variable_value(var, cfg);
        validate_rules(&var.env_variable, &var.rules, value)?;
    }
    Ok(())
}

// Wrapper functions matching the signature expected by
// #[validate(custom(function = "..."))] on ServerConfig.

fn make_validation_error(
    code: &'static str,
    message: impl Into<std::borrow::Cow<'static, str>>,
) -> validator::ValidationError {
    let mut err = validator::ValidationError::new(code);
    err.message = Some(message.into());
    err
}

/// Primary ports live in the unprivileged range
pub fn validate_port_wrapper(port: u16) -> Result<(), validator::ValidationError> {
    if (1024..=65535).contains(&port) {
        Ok(())
    } else {
        Err(make_validation_error(
            "invalid_port",
            format!("port must be in [1024,65535], found {}", port),
        ))
    }
}

/// All three plan fields must be positive
pub fn validate_plan_wrapper(plan: &Plan) -> Result<(), validator::ValidationError> {
    if plan.ram == 0 || plan.cpu == 0 || plan.disk == 0 {
        Err(make_validation_error(
            "invalid_plan",
            "plan requires ram, cpu, and disk to all be > 0",
        ))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Egg, EggVariable};
    use std::collections::BTreeMap;
    use validator::Validate;

    fn minimal_egg() -> Egg {
        serde_json::from_str(
            r#"{
                "id": "vanilla",
                "name": "Vanilla",
                "docker_images": { "Java 21": "eclipse-temurin:21-jre-jammy" },
                "startup": "java -jar server.jar"
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn egg_requires_id_name_and_images() {
        assert!(validate_egg(&minimal_egg()).is_ok());

        let mut egg = minimal_egg();
        egg.id = "  ".to_string();
        assert_eq!(validate_egg(&egg), Err(EggError::MissingId));

        let mut egg = minimal_egg();
        egg.name.clear();
        assert!(matches!(validate_egg(&egg), Err(EggError::MissingName { .. })));

        let mut egg = minimal_egg();
        egg.docker_images.clear();
        assert!(matches!(validate_egg(&egg), Err(EggError::NoImages { .. })));
    }

    #[test]
    fn egg_rejects_variable_without_env_key() {
        let mut egg = minimal_egg();
        egg.variables.push(EggVariable {
            name: "Broken".to_string(),
            env_variable: "".to_string(),
            default_value: "".to_string(),
            user_viewable: true,
            user_editable: true,
            rules: String::new(),
        });
        assert!(matches!(
            validate_egg(&egg),
            Err(EggError::VariableWithoutKey { .. })
        ));
    }

    #[test]
    fn required_numeric_min_boundary() {
        let rules = "required|numeric|min:128";
        assert!(validate_rules("MEM", rules, "abc").is_err());
        assert!(validate_rules("MEM", rules, "127").is_err());
        assert!(validate_rules("MEM", rules, "128").is_ok());
        assert!(validate_rules("MEM", rules, "129").is_ok());
    }

    #[test]
    fn required_rejects_empty_nullable_allows_it() {
        assert!(validate_rules("X", "required", "").is_err());
        assert!(validate_rules("X", "required|nullable", "").is_ok());
        assert!(validate_rules("X", "string", "").is_ok());
    }

    #[test]
    fn string_rules_measure_length() {
        assert!(validate_rules("NAME", "string|max:5", "abcde").is_ok());
        assert!(validate_rules("NAME", "string|max:5", "abcdef").is_err());
        assert!(validate_rules("NAME", "string|min:2", "a").is_err());
    }

    #[test]
    fn between_and_in_rules() {
        assert!(validate_rules("SIZE", "numeric|between:1,3", "2").is_ok());
        assert!(validate_rules("SIZE", "numeric|between:1,3", "4").is_err());
        assert!(validate_rules("MODE", "in:survival,creative", "creative").is_ok());
        assert!(validate_rules("MODE", "in:survival,creative", "hardcore").is_err());
    }

    #[test]
    fn unknown_tokens_are_ignored() {
        assert!(validate_rules("X", "required|alpha_dash|string", "ok").is_ok());
    }

    #[test]
    fn malformed_bounds_are_violations() {
        assert!(validate_rules("X", "min:notanumber", "abc").is_err());
        assert!(validate_rules("X", "between:1", "2").is_err());
    }

    #[test]
    fn config_port_boundaries() {
        let mut cfg = crate::template::tests::test_config();
        cfg.port = 1024;
        assert!(cfg.validate().is_ok());
        cfg.port = 1023;
        assert!(cfg.validate().is_err());
        cfg.port = 65535;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn config_plan_must_be_positive() {
        let mut cfg = crate::template::tests::test_config();
        cfg.plan.ram = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn config_variables_run_their_rules() {
        let mut egg = minimal_egg();
        egg.variables.push(EggVariable {
            name: "Max Players".to_string(),
            env_variable: "MAX_PLAYERS".to_string(),
            default_value: "8".to_string(),
            user_viewable: true,
            user_editable: true,
            rules: "required|numeric|between:1,255".to_string(),
        });

        let mut cfg = crate::template::tests::test_config();
        assert!(validate_config_variables(&egg, &cfg).is_ok());

        cfg.variables = BTreeMap::from([("MAX_PLAYERS".to_string(), "999".to_string())]);
        assert!(validate_config_variables(&egg, &cfg).is_err());
    }
}
