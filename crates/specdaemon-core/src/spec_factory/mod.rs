//! C5 Spec Factory (spec.md §4.5): programmatic creation of child specs
//! under a parent, with a reference-resolution pass that rewrites
//! placeholder dependency IDs (as written by an upstream planning agent)
//! into the actual generated spec IDs.
//!
//! Builder-function / validation-error-enum style adapted from
//! `gator-core/src/plan/generate.rs`; the concrete two-pass batch +
//! reference-resolution algorithm has no teacher analog and is built
//! fresh, grounded in `original_source/.../services/spec_factory.py`'s
//! `_resolve_batch_dependencies`/`_resolve_single_dep` for exact
//! resolution-order semantics (SPEC_FULL.md §9(a)).

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde_json::Value;

use crate::error::{PlanFileError, SpecFactoryError};
use crate::model::{Origin, PlanRecord, Priority, Requirements, TaskType};
use crate::planfile;
use crate::state::persist::{atomic_write_json, read_json};

/// A single spec-creation request (spec.md §4.5 "Create one").
#[derive(Debug, Clone)]
pub struct SpecDef {
    pub task: String,
    pub task_type: TaskType,
    pub priority: Priority,
    /// Raw, possibly double-serialized `dependsOn`/`depends_on` value as an
    /// upstream planning agent might have written it (array, single
    /// string, or JSON-encoded-string-of-array); normalized via
    /// [`normalize_list_field`] before use.
    pub depends_on: Value,
    pub complexity: Option<String>,
    pub files_to_modify: Vec<String>,
    pub acceptance_criteria: Vec<String>,
    pub context: Value,
}

impl SpecDef {
    pub fn new(task: impl Into<String>) -> Self {
        SpecDef {
            task: task.into(),
            task_type: TaskType::Impl,
            priority: Priority::Normal,
            depends_on: Value::Array(Vec::new()),
            complexity: None,
            files_to_modify: Vec::new(),
            acceptance_criteria: Vec::new(),
            context: Value::Object(serde_json::Map::new()),
        }
    }
}

/// Lowercase, ASCII-word-normalize, and truncate to 50 characters (spec.md
/// §4.5 "Create one"). Runs of whitespace/`_`/`-` collapse to a single
/// `-`; any other non-alphanumeric character is dropped entirely.
pub fn slugify(text: &str) -> String {
    let mut out = String::new();
    let mut pending_dash = false;
    for ch in text.chars() {
        let low = ch.to_ascii_lowercase();
        if low.is_ascii_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(low);
        } else if low.is_whitespace() || low == '_' || low == '-' {
            pending_dash = true;
        }
    }
    let trimmed = out.trim_matches('-');
    trimmed.chars().take(50).collect()
}

fn strip_numeric_prefix(s: &str) -> &str {
    let digits = s.chars().take_while(|c| c.is_ascii_digit()).count();
    s[digits..].strip_prefix('-').unwrap_or(&s[digits..])
}

fn next_sequence(specs_dir: &Path) -> u32 {
    let mut max_num = 0u32;
    if let Ok(entries) = std::fs::read_dir(specs_dir) {
        for entry in entries.flatten() {
            if !entry.path().is_dir() {
                continue;
            }
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.len() >= 3 && name.as_bytes()[..3].iter().all(u8::is_ascii_digit) {
                if let Ok(n) = name[..3].parse::<u32>() {
                    max_num = max_num.max(n);
                }
            }
        }
    }
    max_num + 1
}

/// Generate a unique `<seq>-<slug>` id (spec.md §4.5).
pub fn generate_spec_id(specs_dir: &Path, task: &str) -> String {
    format!("{:03}-{}", next_sequence(specs_dir), slugify(task))
}

/// Normalize a field that should be a list but might arrive as a bare
/// string or a JSON-encoded string (spec.md §4.5 "normalize first"; MCP
/// tools double-serialize lists in the original system).
pub fn normalize_list_field(value: &Value) -> Vec<String> {
    match value {
        Value::Null => Vec::new(),
        Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        Value::String(s) => {
            let s = s.trim();
            if s.starts_with('[') {
                if let Ok(parsed) = serde_json::from_str::<Vec<String>>(s) {
                    return parsed;
                }
            }
            if s.is_empty() {
                Vec::new()
            } else {
                vec![s.to_string()]
            }
        }
        _ => Vec::new(),
    }
}

fn render_spec_md(task: &str, parent_spec_id: Option<&str>, criteria: &[String], files: &[String]) -> String {
    let mut lines = vec![format!("# {task}"), String::new()];
    if let Some(parent) = parent_spec_id {
        lines.push(format!("> Parent Spec: `{parent}`"));
        lines.push(String::new());
    }
    lines.push("## Overview".to_string());
    lines.push(String::new());
    lines.push(task.to_string());
    lines.push(String::new());
    if !criteria.is_empty() {
        lines.push("## Acceptance Criteria".to_string());
        lines.push(String::new());
        for c in criteria {
            lines.push(format!("- [ ] {c}"));
        }
        lines.push(String::new());
    }
    if !files.is_empty() {
        lines.push("## Files to Modify".to_string());
        lines.push(String::new());
        for f in files {
            lines.push(format!("- `{f}`"));
        }
        lines.push(String::new());
    }
    lines.push("## Notes".to_string());
    lines.push(String::new());
    lines.push("This spec was auto-generated by the spec factory from a design task.".to_string());
    lines.push(String::new());
    lines.join("\n")
}

/// Create one child spec directory under `specs_dir` (spec.md §4.5
/// "Create one"), enforcing the depth guard (I6) before writing anything.
///
/// `depth` is the *parent's* depth (0 for a root-level spec); the child's
/// depth is `depth + 1`.
pub fn create_one(
    specs_dir: &Path,
    parent_spec_id: Option<&str>,
    def: &SpecDef,
    origin: Origin,
    depth: u32,
    max_child_depth: u32,
) -> Result<PathBuf, SpecFactoryError> {
    let child_depth = depth + 1;
    if child_depth > max_child_depth {
        return Err(SpecFactoryError::DepthExceeded {
            depth: child_depth,
            max: max_child_depth,
        });
    }
    if def.task_type.is_design_class() && child_depth >= 2 {
        return Err(SpecFactoryError::DesignAtDepth(def.task_type.to_string()));
    }

    let spec_id = generate_spec_id(specs_dir, &def.task);
    let spec_dir = specs_dir.join(&spec_id);
    if spec_dir.exists() {
        return Err(SpecFactoryError::AlreadyExists(spec_dir));
    }
    std::fs::create_dir_all(&spec_dir)?;

    let now = Utc::now();
    std::fs::write(
        spec_dir.join("spec.md"),
        render_spec_md(&def.task, parent_spec_id, &def.acceptance_criteria, &def.files_to_modify),
    )?;

    let requirements = Requirements {
        task: def.task.clone(),
        parent_spec: parent_spec_id.map(str::to_string),
        complexity: def.complexity.clone(),
        files_to_modify: def.files_to_modify.clone(),
        acceptance_criteria: def.acceptance_criteria.clone(),
        created_at: now,
        created_by: origin,
    };
    let req_path = spec_dir.join("requirements.json");
    atomic_write_json(&req_path, &requirements)
        .map_err(|source| PlanFileError::Write { path: req_path, source })?;

    let mut plan = PlanRecord::new(def.task_type, def.priority, parent_spec_id.map(str::to_string));
    plan.depends_on = normalize_list_field(&def.depends_on);
    plan.context = def.context.clone();
    planfile::write_plan(&spec_dir, &plan)?;

    Ok(spec_dir)
}

/// Create the synthetic `verify-<parent_id>` (or `verify-<parent_id>-N`)
/// spec for the auto-verify chain (spec.md §4.4 "Auto-verify chain").
/// Bypasses the depth guard: a verify spec mirrors its parent's position
/// in the tree rather than descending one level.
pub fn create_verify_spec(spec_dir: &Path, parent_id: &str) -> Result<(), SpecFactoryError> {
    std::fs::create_dir_all(spec_dir)?;
    let now = Utc::now();
    std::fs::write(
        spec_dir.join("spec.md"),
        format!(
            "# Verify {parent_id}\n\n> Parent Spec: `{parent_id}`\n\n## Overview\n\nAuto-verify check for `{parent_id}`.\n"
        ),
    )?;
    let requirements = Requirements {
        task: format!("Verify {parent_id}"),
        parent_spec: Some(parent_id.to_string()),
        complexity: None,
        files_to_modify: Vec::new(),
        acceptance_criteria: Vec::new(),
        created_at: now,
        created_by: Origin::SpecFactory,
    };
    let req_path = spec_dir.join("requirements.json");
    atomic_write_json(&req_path, &requirements)
        .map_err(|source| PlanFileError::Write { path: req_path, source })?;

    let mut plan = PlanRecord::new(TaskType::Verify, Priority::High, Some(parent_id.to_string()));
    plan.depends_on = vec![parent_id.to_string()];
    planfile::write_plan(spec_dir, &plan)?;
    Ok(())
}

/// Resolve a single dependency reference against the batch's ref map and
/// sibling id list, per the four ordered rules in spec.md §4.5 (exact,
/// numeric-prefix, slug fuzzy match `> 0.3`, pass-through).
fn resolve_single_dep(dep: &str, ref_map: &HashMap<String, String>, sibling_ids: &[String]) -> String {
    if let Some(actual) = ref_map.get(dep) {
        return actual.clone();
    }

    let digit_prefix: String = dep.chars().take_while(char::is_ascii_digit).collect();
    if !digit_prefix.is_empty() {
        if let Ok(n) = digit_prefix.parse::<u32>() {
            let padded = format!("{n:03}");
            if let Some(actual) = ref_map.get(&padded) {
                return actual.clone();
            }
        }
        if let Some(actual) = ref_map.get(&digit_prefix) {
            return actual.clone();
        }
    }

    let dep_slug = strip_numeric_prefix(dep).to_ascii_lowercase();
    if !dep_slug.is_empty() {
        let mut best: Option<(String, f64)> = None;
        for actual_id in sibling_ids {
            let actual_slug = strip_numeric_prefix(actual_id).to_ascii_lowercase();
            if actual_slug.is_empty() {
                continue;
            }
            if actual_slug.contains(&dep_slug) || actual_slug.starts_with(&dep_slug) {
                let score = dep_slug.len() as f64 / actual_slug.len() as f64;
                if best.as_ref().is_none_or(|(_, s)| score > *s) {
                    best = Some((actual_id.clone(), score));
                }
            }
        }
        if let Some((actual, score)) = best {
            if score > 0.3 {
                return actual;
            }
        }
    }

    dep.to_string()
}

/// Build the reference-pattern → actual-id map for one batch/sibling group
/// (spec.md §4.5 "register these keys"). `task_slug_of` supplies the
/// slugified task description for the `NNN-slug` key pattern (from the
/// original `SpecDef` during a fresh batch, or from `requirements.json`
/// during legacy repair).
fn build_ref_map(sibling_ids: &[String], task_slug_of: impl Fn(usize) -> Option<String>) -> HashMap<String, String> {
    let mut ref_map = HashMap::new();
    for (i, actual_id) in sibling_ids.iter().enumerate() {
        let internal_num = i as u32 + 2; // parent = 001, children start at 002
        let batch_1based = i + 1;
        let actual_slug = strip_numeric_prefix(actual_id).to_ascii_lowercase();

        ref_map.insert(format!("{internal_num:03}"), actual_id.clone());
        ref_map.insert(format!("{batch_1based}"), actual_id.clone());
        ref_map.insert(actual_id.clone(), actual_id.clone());
        if !actual_slug.is_empty() {
            ref_map.insert(actual_slug, actual_id.clone());
        }
        if let Some(task_slug) = task_slug_of(i) {
            if !task_slug.is_empty() {
                ref_map.insert(format!("{internal_num:03}-{task_slug}"), actual_id.clone());
            }
        }
    }
    ref_map
}

/// Create a batch of child specs under `parent_spec_id` with two-pass
/// reference resolution (spec.md §4.5 "Create batch").
///
/// Refuses (idempotency guard, spec.md §4.5) if the parent plan already
/// has `childSpecs` recorded or is already `complete`.
pub fn create_batch(
    specs_dir: &Path,
    parent_spec_id: &str,
    parent_depth: u32,
    max_child_depth: u32,
    defs: Vec<SpecDef>,
) -> Result<Vec<PathBuf>, SpecFactoryError> {
    let parent_dir = specs_dir.join(parent_spec_id);
    let mut parent_plan = planfile::read_plan(&parent_dir)?;
    if !parent_plan.child_specs.is_empty() {
        return Err(SpecFactoryError::AlreadyBatched(
            parent_spec_id.to_string(),
            parent_plan.child_specs.clone(),
        ));
    }
    if parent_plan.status.is_completed() {
        return Err(SpecFactoryError::ParentComplete(parent_spec_id.to_string()));
    }

    // Pass 1: create every child with empty dependsOn.
    let mut created_dirs = Vec::with_capacity(defs.len());
    let mut original_deps = Vec::with_capacity(defs.len());
    for def in &defs {
        let mut pass1_def = def.clone();
        original_deps.push(def.depends_on.clone());
        pass1_def.depends_on = Value::Array(Vec::new());
        let dir = create_one(
            specs_dir,
            Some(parent_spec_id),
            &pass1_def,
            Origin::SpecFactory,
            parent_depth,
            max_child_depth,
        )?;
        created_dirs.push(dir);
    }

    let sibling_ids: Vec<String> = created_dirs
        .iter()
        .map(|d| d.file_name().and_then(|n| n.to_str()).unwrap_or("").to_string())
        .collect();

    // Pass 2: reference resolution.
    let ref_map = build_ref_map(&sibling_ids, |i| Some(slugify(&defs[i].task)));
    for (i, dir) in created_dirs.iter().enumerate() {
        let raw = normalize_list_field(&original_deps[i]);
        if raw.is_empty() {
            continue;
        }
        let resolved: Vec<String> = raw
            .iter()
            .map(|dep| resolve_single_dep(dep, &ref_map, &sibling_ids))
            .collect();
        let mut plan = planfile::read_plan(dir)?;
        plan.depends_on = resolved;
        plan.touch();
        planfile::write_plan(dir, &plan)?;
    }

    parent_plan.child_specs = sibling_ids;
    parent_plan.touch();
    planfile::write_plan(&parent_dir, &parent_plan)?;

    Ok(created_dirs)
}

fn read_requirements_task(spec_dir: &Path) -> Option<String> {
    let value: Value = read_json(&spec_dir.join("requirements.json")).ok()?;
    value.get("task").and_then(|v| v.as_str()).map(str::to_string)
}

fn read_plan_raw(spec_dir: &Path) -> Result<Value, SpecFactoryError> {
    let path = planfile::plan_path(spec_dir);
    read_json(&path).map_err(|source| {
        SpecFactoryError::PlanFile(PlanFileError::Read { path, source })
    })
}

fn write_plan_raw(spec_dir: &Path, value: &Value) -> Result<(), SpecFactoryError> {
    let path = planfile::plan_path(spec_dir);
    atomic_write_json(&path, value).map_err(|source| SpecFactoryError::PlanFile(PlanFileError::Write { path, source }))
}

/// Legacy repair pass (spec.md §4.5 "Legacy repair"): run reference
/// resolution over all existing plans grouped by `parentTask`, fixing
/// string-encoded arrays along the way. Returns the number of plans
/// mutated. Safe to call repeatedly — already-correct refs are untouched.
pub fn repair_all_dependencies(specs_dir: &Path) -> Result<u32, SpecFactoryError> {
    if !specs_dir.exists() {
        return Ok(0);
    }

    let mut entries: Vec<PathBuf> = std::fs::read_dir(specs_dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    entries.sort();

    let mut specs_by_parent: HashMap<String, Vec<PathBuf>> = HashMap::new();
    let mut all_spec_ids: HashSet<String> = HashSet::new();

    for spec_dir in &entries {
        let name = spec_dir.file_name().and_then(|n| n.to_str()).unwrap_or("");
        if name.starts_with('.') || !planfile::is_schedulable(spec_dir) {
            continue;
        }
        all_spec_ids.insert(name.to_string());
        let Ok(value) = read_plan_raw(spec_dir) else { continue };
        let parent = value
            .get("parentTask")
            .or_else(|| value.get("parent_task"))
            .and_then(|v| v.as_str())
            .filter(|p| !p.is_empty());
        if let Some(parent) = parent {
            specs_by_parent.entry(parent.to_string()).or_default().push(spec_dir.clone());
        }
    }

    let mut repaired = 0u32;
    for siblings in specs_by_parent.into_values() {
        let sibling_ids: Vec<String> = siblings
            .iter()
            .map(|d| d.file_name().and_then(|n| n.to_str()).unwrap_or("").to_string())
            .collect();
        let ref_map = build_ref_map(&sibling_ids, |i| {
            read_requirements_task(&siblings[i]).map(|t| slugify(&t))
        });

        for spec_dir in &siblings {
            let Ok(mut value) = read_plan_raw(spec_dir) else { continue };
            let raw_deps = value
                .get("dependsOn")
                .or_else(|| value.get("depends_on"))
                .cloned()
                .unwrap_or(Value::Array(Vec::new()));
            let was_string_encoded = raw_deps.is_string() && raw_deps.as_str() != Some("[]");
            let deps = normalize_list_field(&raw_deps);

            let mut resolved = Vec::with_capacity(deps.len());
            let mut needs_repair = was_string_encoded;
            for dep in &deps {
                let dep = dep.trim();
                if dep.is_empty() {
                    continue;
                }
                if all_spec_ids.contains(dep) {
                    resolved.push(dep.to_string());
                    continue;
                }
                let actual = resolve_single_dep(dep, &ref_map, &sibling_ids);
                if actual != dep {
                    needs_repair = true;
                }
                resolved.push(actual);
            }

            if needs_repair || resolved != deps {
                if let Value::Object(map) = &mut value {
                    map.insert(
                        "dependsOn".to_string(),
                        Value::Array(resolved.into_iter().map(Value::String).collect()),
                    );
                    map.insert("updated_at".to_string(), Value::String(Utc::now().to_rfc3339()));
                }
                if write_plan_raw(spec_dir, &value).is_ok() {
                    repaired += 1;
                }
            }
        }
    }

    Ok(repaired)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PlanStatus;
    use tempfile::tempdir;

    fn specs_dir(dir: &Path) -> PathBuf {
        let d = dir.join("specs");
        std::fs::create_dir_all(&d).unwrap();
        d
    }

    #[test]
    fn slugify_collapses_and_truncates() {
        assert_eq!(slugify("Implement User Auth!!"), "implement-user-auth");
        assert_eq!(slugify("  multi   space__here-- "), "multi-space-here");
        let long = "a".repeat(100);
        assert_eq!(slugify(&long).len(), 50);
    }

    #[test]
    fn generate_spec_id_increments_sequence() {
        let dir = tempdir().unwrap();
        let specs = specs_dir(dir.path());
        std::fs::create_dir_all(specs.join("001-first")).unwrap();
        std::fs::create_dir_all(specs.join("002-second")).unwrap();
        let id = generate_spec_id(&specs, "Third Task");
        assert_eq!(id, "003-third-task");
    }

    #[test]
    fn normalize_list_field_handles_json_encoded_string() {
        let v: Value = serde_json::from_str("\"[\\\"002-a\\\", \\\"003-b\\\"]\"").unwrap();
        assert_eq!(normalize_list_field(&v), vec!["002-a", "003-b"]);
        let v2 = Value::String("single-dep".to_string());
        assert_eq!(normalize_list_field(&v2), vec!["single-dep"]);
        assert_eq!(normalize_list_field(&Value::Null), Vec::<String>::new());
    }

    #[test]
    fn create_one_writes_canonical_files() {
        let dir = tempdir().unwrap();
        let specs = specs_dir(dir.path());
        let spec_dir = create_one(
            &specs,
            Some("001-parent"),
            &SpecDef::new("Build the thing"),
            Origin::SpecFactory,
            0,
            2,
        )
        .unwrap();
        assert!(spec_dir.join("spec.md").exists());
        assert!(spec_dir.join("requirements.json").exists());
        let plan = planfile::read_plan(&spec_dir).unwrap();
        assert_eq!(plan.status, PlanStatus::Queue);
        assert_eq!(plan.parent_task.as_deref(), Some("001-parent"));
    }

    #[test]
    fn create_one_rejects_depth_exceeding_max() {
        let dir = tempdir().unwrap();
        let specs = specs_dir(dir.path());
        let err = create_one(&specs, Some("001-p"), &SpecDef::new("x"), Origin::SpecFactory, 2, 2).unwrap_err();
        assert!(matches!(err, SpecFactoryError::DepthExceeded { depth: 3, max: 2 }));
    }

    #[test]
    fn create_one_rejects_design_class_at_depth_two() {
        let dir = tempdir().unwrap();
        let specs = specs_dir(dir.path());
        let mut def = SpecDef::new("design more");
        def.task_type = TaskType::Design;
        let err = create_one(&specs, Some("001-p"), &def, Origin::SpecFactory, 1, 5).unwrap_err();
        assert!(matches!(err, SpecFactoryError::DesignAtDepth(_)));
    }

    #[test]
    fn create_batch_resolves_placeholder_reference_to_real_sibling_id() {
        let dir = tempdir().unwrap();
        let specs = specs_dir(dir.path());
        let parent_dir = specs.join("001-design");
        std::fs::create_dir_all(&parent_dir).unwrap();
        planfile::write_plan(&parent_dir, &PlanRecord::new(TaskType::Design, Priority::High, None)).unwrap();

        let mut backend = SpecDef::new("Backend API module");
        backend.depends_on = Value::Array(Vec::new());
        let frontend = SpecDef::new("Frontend widget");
        let mut integration = SpecDef::new("Integration tests");
        integration.depends_on = serde_json::json!(["002-backend-api-module"]);

        let created = create_batch(&specs, "001-design", 0, 5, vec![backend, frontend, integration]).unwrap();
        assert_eq!(created.len(), 3);

        let third_plan = planfile::read_plan(&created[2]).unwrap();
        assert_eq!(third_plan.depends_on.len(), 1);
        assert_eq!(third_plan.depends_on[0], created[0].file_name().unwrap().to_str().unwrap());
        assert_ne!(third_plan.depends_on[0], "002-backend-api-module");
    }

    #[test]
    fn create_batch_refuses_when_parent_already_has_child_specs() {
        let dir = tempdir().unwrap();
        let specs = specs_dir(dir.path());
        let parent_dir = specs.join("001-design");
        std::fs::create_dir_all(&parent_dir).unwrap();
        let mut plan = PlanRecord::new(TaskType::Design, Priority::High, None);
        plan.child_specs = vec!["002-existing".to_string()];
        planfile::write_plan(&parent_dir, &plan).unwrap();

        let err = create_batch(&specs, "001-design", 0, 5, vec![SpecDef::new("x")]).unwrap_err();
        assert!(matches!(err, SpecFactoryError::AlreadyBatched(_, _)));
    }

    #[test]
    fn create_batch_refuses_when_parent_already_complete() {
        let dir = tempdir().unwrap();
        let specs = specs_dir(dir.path());
        let parent_dir = specs.join("001-design");
        std::fs::create_dir_all(&parent_dir).unwrap();
        let mut plan = PlanRecord::new(TaskType::Design, Priority::High, None);
        plan.status = PlanStatus::Complete;
        planfile::write_plan(&parent_dir, &plan).unwrap();

        let err = create_batch(&specs, "001-design", 0, 5, vec![SpecDef::new("x")]).unwrap_err();
        assert!(matches!(err, SpecFactoryError::ParentComplete(_)));
    }

    #[test]
    fn repair_all_dependencies_fixes_string_encoded_array() {
        let dir = tempdir().unwrap();
        let specs = specs_dir(dir.path());
        let a_dir = specs.join("002-alpha");
        let b_dir = specs.join("003-beta");
        std::fs::create_dir_all(&a_dir).unwrap();
        std::fs::create_dir_all(&b_dir).unwrap();

        let mut a_plan = PlanRecord::new(TaskType::Impl, Priority::Normal, Some("001-design".to_string()));
        planfile::write_plan(&a_dir, &a_plan).unwrap();
        a_plan.depends_on = vec![];

        let mut b_value: Value = serde_json::to_value(PlanRecord::new(
            TaskType::Impl,
            Priority::Normal,
            Some("001-design".to_string()),
        ))
        .unwrap();
        b_value["dependsOn"] = Value::String("[\"002-alpha\"]".to_string());
        atomic_write_json(&planfile::plan_path(&b_dir), &b_value).unwrap();

        let repaired = repair_all_dependencies(&specs).unwrap();
        assert_eq!(repaired, 1);
        let fixed = planfile::read_plan(&b_dir).unwrap();
        assert_eq!(fixed.depends_on, vec!["002-alpha".to_string()]);
    }

    #[test]
    fn repair_all_dependencies_is_a_noop_on_already_correct_refs() {
        let dir = tempdir().unwrap();
        let specs = specs_dir(dir.path());
        let a_dir = specs.join("002-alpha");
        std::fs::create_dir_all(&a_dir).unwrap();
        let mut plan = PlanRecord::new(TaskType::Impl, Priority::Normal, Some("001-design".to_string()));
        plan.depends_on = vec!["does-not-exist".to_string()];
        planfile::write_plan(&a_dir, &plan).unwrap();

        let repaired = repair_all_dependencies(&specs).unwrap();
        assert_eq!(repaired, 0);
    }
}
