//! Matrix expansion (§4.1): Cartesian product of a task's matrix dimensions,
//! one task per combination, with dependency fan-out for anything that
//! depended on the base task name.

use std::collections::BTreeMap;

use rustc_hash::FxHashMap;

use super::task::Task;

/// Expand every matrix task into its Cartesian-product variants and rewrite
/// `depends_on` edges that pointed at a since-expanded base name.
pub fn expand_matrices(tasks: Vec<Task>) -> Vec<Task> {
    let mut fan_out: FxHashMap<String, Vec<String>> = FxHashMap::default();
    let mut expanded: Vec<Task> = Vec::with_capacity(tasks.len());

    for task in tasks {
        match &task.matrix {
            None => expanded.push(task),
            Some(spec) => {
                let variants = expand_one(&task, spec);
                fan_out.insert(
                    task.name.clone(),
                    variants.iter().map(|t| t.name.clone()).collect(),
                );
                expanded.extend(variants);
            }
        }
    }

    if fan_out.is_empty() {
        return expanded;
    }

    for task in &mut expanded {
        if task.depends_on.iter().any(|d| fan_out.contains_key(d)) {
            task.depends_on = task
                .depends_on
                .iter()
                .flat_map(|d| match fan_out.get(d) {
                    Some(variants) => variants.clone(),
                    None => vec![d.clone()],
                })
                .collect();
        }
    }

    expanded
}

fn expand_one(base: &Task, spec: &super::task::MatrixSpec) -> Vec<Task> {
    // BTreeMap for a stable dimension order independent of JSON key order.
    let dims: BTreeMap<&str, &Vec<serde_json::Value>> =
        spec.iter().map(|(k, v)| (k.as_str(), v)).collect();

    let mut combinations: Vec<Vec<(String, serde_json::Value)>> = vec![vec![]];
    for (dim, values) in &dims {
        let mut next = Vec::with_capacity(combinations.len() * values.len());
        for combo in &combinations {
            for value in values.iter() {
                let mut extended = combo.clone();
                extended.push((dim.to_string(), value.clone()));
                next.push(extended);
            }
        }
        combinations = next;
    }

    combinations
        .into_iter()
        .map(|combo| materialize(base, &combo))
        .collect()
}

fn materialize(base: &Task, combo: &[(String, serde_json::Value)]) -> Task {
    let mut task = base.clone();
    task.matrix = None;

    let suffix: String = combo
        .iter()
        .map(|(_, v)| value_to_name_part(v))
        .collect::<Vec<_>>()
        .join("-");
    task.name = format!("{}-{suffix}", base.name);

    for (dim, value) in combo {
        task.env.insert(dim.clone(), value_to_env_string(value));
    }

    task
}

fn value_to_name_part(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn value_to_env_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(name: &str, json: serde_json::Value) -> Task {
        let mut value = json;
        value["name"] = serde_json::json!(name);
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn expands_single_dimension() {
        let t = task(
            "test",
            serde_json::json!({"matrix": {"version": ["1.15", "1.16"]}}),
        );
        let expanded = expand_matrices(vec![t]);
        let names: Vec<&str> = expanded.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["test-1.15", "test-1.16"]);
        assert_eq!(expanded[0].env.get("version").map(String::as_str), Some("1.15"));
    }

    #[test]
    fn expands_cartesian_product_of_two_dimensions() {
        let t = task(
            "test",
            serde_json::json!({"matrix": {"version": ["1.15", "1.16"], "os": ["linux", "darwin"]}}),
        );
        let expanded = expand_matrices(vec![t]);
        assert_eq!(expanded.len(), 4);
    }

    #[test]
    fn fans_out_dependencies_on_expanded_base() {
        let base = task("test", serde_json::json!({"matrix": {"version": ["1.15", "1.16"]}}));
        let downstream = task("publish", serde_json::json!({"depends_on": ["test"]}));
        let expanded = expand_matrices(vec![base, downstream]);
        let publish = expanded.iter().find(|t| t.name == "publish").unwrap();
        assert_eq!(publish.depends_on, vec!["test-1.15", "test-1.16"]);
    }
}
