//! Task `condition` expressions (§3, §6.1, §9 design notes).
//!
//! Modeled as a recursive discriminated union the way the teacher models
//! `TaskAction` (`ast/action.rs`) — a tagged `serde` enum with an `#[instrument]`-free
//! pure evaluator function, no interpreter state.

use serde::{Deserialize, Serialize};

/// Git/env context a `Condition` is evaluated against.
#[derive(Debug, Clone, Default)]
pub struct ConditionContext {
    pub branch: Option<String>,
    pub tag: Option<String>,
    pub env: std::collections::HashMap<String, String>,
}

/// A boolean expression over git state and environment (§3, §6.1).
///
/// The wire shape is flat per variant (`{branch:pattern}`, `{tag:pattern}`,
/// `{env:name, equals|starts_with|contains:value}`, `{and:[C]}`, `{or:[C]}`,
/// `{not:C}`, `{always:bool}`) rather than serde's externally-tagged default,
/// so `Env` (the one variant with more than one field) needs a hand-rolled
/// `Deserialize`/`Serialize` pair instead of the derive.
#[derive(Debug, Clone)]
pub enum Condition {
    Branch(String),
    Tag(String),
    Env { env: String, op: EnvOp },
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Not(Box<Condition>),
    Always(bool),
}

#[derive(Debug, Clone)]
pub enum EnvOp {
    Equals(String),
    StartsWith(String),
    Contains(String),
}

impl<'de> Deserialize<'de> for Condition {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;
        condition_from_value(&value).map_err(serde::de::Error::custom)
    }
}

fn condition_from_value(value: &serde_json::Value) -> Result<Condition, String> {
    let obj = value.as_object().ok_or("condition must be a JSON object")?;
    let str_field = |key: &str| -> Result<String, String> {
        obj.get(key)
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| format!("condition.{key} must be a string"))
    };

    if let Some(env) = obj.get("env") {
        let env = env.as_str().ok_or("condition.env must be a string")?.to_string();
        let op = if let Some(v) = obj.get("equals") {
            EnvOp::Equals(v.as_str().ok_or("condition.equals must be a string")?.to_string())
        } else if let Some(v) = obj.get("starts_with") {
            EnvOp::StartsWith(v.as_str().ok_or("condition.starts_with must be a string")?.to_string())
        } else if let Some(v) = obj.get("contains") {
            EnvOp::Contains(v.as_str().ok_or("condition.contains must be a string")?.to_string())
        } else {
            return Err("condition.env requires one of equals, starts_with, contains".to_string());
        };
        return Ok(Condition::Env { env, op });
    }
    if obj.contains_key("branch") {
        return Ok(Condition::Branch(str_field("branch")?));
    }
    if obj.contains_key("tag") {
        return Ok(Condition::Tag(str_field("tag")?));
    }
    if let Some(v) = obj.get("and") {
        let items = v.as_array().ok_or("condition.and must be an array")?;
        return Ok(Condition::And(
            items.iter().map(condition_from_value).collect::<Result<_, _>>()?,
        ));
    }
    if let Some(v) = obj.get("or") {
        let items = v.as_array().ok_or("condition.or must be an array")?;
        return Ok(Condition::Or(
            items.iter().map(condition_from_value).collect::<Result<_, _>>()?,
        ));
    }
    if let Some(v) = obj.get("not") {
        return Ok(Condition::Not(Box::new(condition_from_value(v)?)));
    }
    if let Some(v) = obj.get("always") {
        return Ok(Condition::Always(v.as_bool().ok_or("condition.always must be a bool")?));
    }
    Err("condition matched no known shape (branch, tag, env, and, or, not, always)".to_string())
}

impl Serialize for Condition {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeMap;
        match self {
            Condition::Branch(pattern) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("branch", pattern)?;
                map.end()
            }
            Condition::Tag(pattern) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("tag", pattern)?;
                map.end()
            }
            Condition::Env { env, op } => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("env", env)?;
                match op {
                    EnvOp::Equals(v) => map.serialize_entry("equals", v)?,
                    EnvOp::StartsWith(v) => map.serialize_entry("starts_with", v)?,
                    EnvOp::Contains(v) => map.serialize_entry("contains", v)?,
                }
                map.end()
            }
            Condition::And(conditions) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("and", conditions)?;
                map.end()
            }
            Condition::Or(conditions) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("or", conditions)?;
                map.end()
            }
            Condition::Not(inner) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("not", inner.as_ref())?;
                map.end()
            }
            Condition::Always(value) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("always", value)?;
                map.end()
            }
        }
    }
}

/// Glob-style `*`/`?` match used for branch/tag patterns. `**` has no
/// special meaning here (branch/tag names have no path segments); plain
/// glob semantics suffice.
fn glob_match(pattern: &str, value: &str) -> bool {
    globset::Glob::new(pattern)
        .map(|g| g.compile_matcher().is_match(value))
        .unwrap_or(false)
}

impl Condition {
    /// Pure evaluation — no IO, no task state (§9 design notes).
    pub fn eval(&self, ctx: &ConditionContext) -> bool {
        match self {
            Condition::Branch(pattern) => ctx
                .branch
                .as_deref()
                .map(|b| glob_match(pattern, b))
                .unwrap_or(false),
            Condition::Tag(pattern) => ctx
                .tag
                .as_deref()
                .map(|t| glob_match(pattern, t))
                .unwrap_or(false),
            Condition::Env { env, op } => {
                let value = ctx.env.get(env);
                match (value, op) {
                    (Some(v), EnvOp::Equals(expected)) => v == expected,
                    (Some(v), EnvOp::StartsWith(prefix)) => v.starts_with(prefix.as_str()),
                    (Some(v), EnvOp::Contains(needle)) => v.contains(needle.as_str()),
                    (None, _) => false,
                }
            }
            Condition::And(conditions) => conditions.iter().all(|c| c.eval(ctx)),
            Condition::Or(conditions) => conditions.iter().any(|c| c.eval(ctx)),
            Condition::Not(inner) => !inner.eval(ctx),
            Condition::Always(value) => *value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(branch: &str) -> ConditionContext {
        ConditionContext {
            branch: Some(branch.to_string()),
            tag: None,
            env: Default::default(),
        }
    }

    #[test]
    fn branch_glob_matches() {
        let c = Condition::Branch("release/*".into());
        assert!(c.eval(&ctx("release/1.0")));
        assert!(!c.eval(&ctx("main")));
    }

    #[test]
    fn and_or_not_compose() {
        let c = Condition::And(vec![
            Condition::Branch("main".into()),
            Condition::Not(Box::new(Condition::Tag("v*".into()))),
        ]);
        assert!(c.eval(&ctx("main")));
    }

    #[test]
    fn env_equals_missing_var_is_false() {
        let c = Condition::Env {
            env: "CI".into(),
            op: EnvOp::Equals("true".into()),
        };
        assert!(!c.eval(&ConditionContext::default()));
    }

    #[test]
    fn always_short_circuits() {
        assert!(Condition::Always(true).eval(&ConditionContext::default()));
        assert!(!Condition::Always(false).eval(&ConditionContext::default()));
    }

    #[test]
    fn parses_flat_env_condition_from_spec_json() {
        let c: Condition = serde_json::from_str(r#"{"env":"CI","equals":"true"}"#).unwrap();
        let mut env = std::collections::HashMap::new();
        env.insert("CI".to_string(), "true".to_string());
        assert!(c.eval(&ConditionContext { branch: None, tag: None, env }));

        match c {
            Condition::Env { env, op: EnvOp::Equals(v) } => {
                assert_eq!(env, "CI");
                assert_eq!(v, "true");
            }
            other => panic!("expected flat Env condition, got {other:?}"),
        }
    }

    #[test]
    fn parses_flat_env_starts_with_and_contains() {
        let c: Condition = serde_json::from_str(r#"{"env":"STAGE","starts_with":"prod"}"#).unwrap();
        assert!(matches!(c, Condition::Env { op: EnvOp::StartsWith(_), .. }));

        let c: Condition = serde_json::from_str(r#"{"env":"MSG","contains":"retry"}"#).unwrap();
        assert!(matches!(c, Condition::Env { op: EnvOp::Contains(_), .. }));
    }

    #[test]
    fn parses_nested_and_or_not_from_spec_json() {
        let json = r#"{"and":[{"branch":"main"},{"not":{"tag":"v*"}}]}"#;
        let c: Condition = serde_json::from_str(json).unwrap();
        assert!(c.eval(&ctx("main")));
    }

    #[test]
    fn round_trips_through_serialize_and_deserialize() {
        let original = Condition::Env { env: "CI".to_string(), op: EnvOp::Equals("true".to_string()) };
        let json = serde_json::to_string(&original).unwrap();
        assert_eq!(json, r#"{"env":"CI","equals":"true"}"#);
        let parsed: Condition = serde_json::from_str(&json).unwrap();
        assert!(matches!(parsed, Condition::Env { op: EnvOp::Equals(_), .. }));
    }

    #[test]
    fn rejects_env_condition_without_an_operator() {
        let err = serde_json::from_str::<Condition>(r#"{"env":"CI"}"#).unwrap_err();
        assert!(err.to_string().contains("equals"));
    }
}
