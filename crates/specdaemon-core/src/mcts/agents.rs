//! Opaque external-agent callers for the four LLM-backed MCTS roles
//! (spec.md §4.8: idea generation, debugging, improvement, lesson
//! extraction — "treated as an opaque callable that returns structured
//! ... records", §9(c): the external-CLI invocation surface is
//! ecosystem-specific).
//!
//! Grounded on `original_source/.../mcts/idea_generator.py`,
//! `debugger.py`, `improver.py`, `lesson_extractor.py`: each wraps a
//! single-turn LLM call, builds a text prompt, and parses a JSON object
//! or array out of a (possibly malformed) ```json code fence. This
//! module reuses the executor's external-CLI spawn idiom
//! (`executor::spawn`, process-group kill on drop) in place of the
//! Claude Agent SDK client those files construct, and consolidates their
//! four near-identical `_extract_json_block` functions into one.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::config::DaemonConfig;
use crate::model::Lesson;

/// One diverse solution approach (spec.md §4.8 step 2; `idea_generator.py`
/// return shape).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Idea {
    pub summary: String,
    #[serde(default)]
    pub strategy: String,
    #[serde(default)]
    pub pros: Vec<String>,
    #[serde(default)]
    pub cons: Vec<String>,
    #[serde(default)]
    pub estimated_complexity: String,
}

/// Root-cause analysis of a failed branch (`debugger.py` return shape).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebugPlan {
    #[serde(default)]
    pub root_cause: String,
    #[serde(default)]
    pub fix_direction: String,
    #[serde(default)]
    pub changes: Vec<String>,
    #[serde(default)]
    pub severity: String,
    #[serde(default)]
    pub retry_viable: bool,
}

impl DebugPlan {
    fn parse_failed(detail: &str) -> Self {
        DebugPlan {
            root_cause: format!("Analysis error: {detail}"),
            fix_direction: "Manual investigation needed".to_string(),
            changes: Vec::new(),
            severity: "major".to_string(),
            retry_viable: false,
        }
    }
}

/// Targeted refinement of an existing branch (`improver.py` return
/// shape).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Improvement {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub changes: Vec<String>,
    #[serde(default)]
    pub rationale: String,
    #[serde(default)]
    pub cited_lessons: Vec<String>,
    #[serde(default)]
    pub expected_score_delta: f64,
}

impl Improvement {
    fn parse_failed(detail: &str) -> Self {
        Improvement {
            summary: "Improvement plan (parse failed)".to_string(),
            changes: Vec::new(),
            rationale: detail.to_string(),
            cited_lessons: Vec::new(),
            expected_score_delta: 0.0,
        }
    }
}

/// Which MCTS role is being invoked (selects the `--mode` flag passed to
/// the external agent runner).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AgentRole {
    IdeaGenerator,
    Debugger,
    Improver,
    LessonExtractor,
}

impl AgentRole {
    fn mode_str(self) -> &'static str {
        match self {
            AgentRole::IdeaGenerator => "mcts-idea-generator",
            AgentRole::Debugger => "mcts-debugger",
            AgentRole::Improver => "mcts-improver",
            AgentRole::LessonExtractor => "mcts-lesson-extractor",
        }
    }
}

const AGENT_TIMEOUT: Duration = Duration::from_secs(180);

/// Run the external agent runner in `role`, feeding it `prompt` on stdin
/// and capturing stdout as the response text. Any spawn, timeout, or
/// nonzero-exit failure surfaces as `Err(detail)` so callers can fall
/// back to their own degraded-default record (spec.md §7 "MCTS parse
/// failure: degrade to minimal default record; do not crash the loop").
async fn run_agent(cfg: &DaemonConfig, role: AgentRole, prompt: &str, cwd: &Path) -> Result<String, String> {
    let program = cfg
        .external_cli_path
        .clone()
        .unwrap_or_else(|| std::path::PathBuf::from("external-cli"));

    let mut child = Command::new(&program)
        .args(["--mode", role.mode_str()])
        .current_dir(cwd)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| e.to_string())?;

    if let Some(mut stdin) = child.stdin.take() {
        let _ = stdin.write_all(prompt.as_bytes()).await;
    }

    let output = tokio::time::timeout(AGENT_TIMEOUT, child.wait_with_output())
        .await
        .map_err(|_| format!("{} timed out after {}s", role.mode_str(), AGENT_TIMEOUT.as_secs()))?
        .map_err(|e| e.to_string())?;

    if !output.status.success() {
        return Err(format!("{} exited with {}", role.mode_str(), output.status));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Pull a JSON object/array out of a ```json (or bare ```) code fence,
/// tolerating a missing closing fence by returning the raw text
/// unchanged (consolidated from the four `_extract_json_block` copies in
/// the idea/debug/improve/lesson modules).
fn extract_json_block(text: &str) -> &str {
    if let Some(start) = text.find("```json") {
        let body_start = start + "```json".len();
        if let Some(end) = text[body_start..].find("```") {
            return text[body_start..body_start + end].trim();
        }
    } else if let Some(start) = text.find("```") {
        let body_start = start + 3;
        if let Some(end) = text[body_start..].find("```") {
            return text[body_start..body_start + end].trim();
        }
    }
    text.trim()
}

fn idea_prompt(spec_content: &str, n_ideas: usize, past_lessons: &[Lesson]) -> String {
    let mut parts = vec![
        format!("Generate exactly {n_ideas} diverse solution approaches for the following task."),
        String::new(),
        "## Task Specification".to_string(),
        spec_content.to_string(),
    ];
    if !past_lessons.is_empty() {
        parts.push(String::new());
        parts.push("## Lessons from Previous Attempts".to_string());
        for lesson in past_lessons {
            parts.push(format!("- [{}] {}: {}", lesson.id, lesson.title, lesson.summary));
        }
    }
    parts.push(String::new());
    parts.push(format!("Output EXACTLY {n_ideas} ideas as a JSON array."));
    parts.push("Each idea must have: summary, strategy, pros, cons, estimated_complexity.".to_string());
    parts.push("Use ```json ... ``` code fence.".to_string());
    parts.join("\n")
}

/// Generate `n_ideas` diverse solution approaches (spec.md §4.8 step 2,
/// first round). Returns an empty vec on any agent failure, matching
/// `idea_generator.py`'s degrade-don't-crash contract.
pub async fn generate_ideas(
    cfg: &DaemonConfig,
    spec_content: &str,
    n_ideas: usize,
    past_lessons: &[Lesson],
    project_dir: &Path,
) -> Vec<Idea> {
    let prompt = idea_prompt(spec_content, n_ideas, past_lessons);
    match run_agent(cfg, AgentRole::IdeaGenerator, &prompt, project_dir).await {
        Ok(response) => parse_ideas(&response, n_ideas),
        Err(e) => {
            tracing::error!("idea generation failed: {e}");
            Vec::new()
        }
    }
}

fn parse_ideas(response: &str, n_ideas: usize) -> Vec<Idea> {
    let text = extract_json_block(response);
    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(serde_json::Value::Array(arr)) => arr
            .into_iter()
            .take(n_ideas)
            .filter_map(|v| serde_json::from_value(v).ok())
            .collect(),
        Ok(serde_json::Value::Object(map)) => map
            .get("ideas")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .take(n_ideas)
                    .filter_map(|v| serde_json::from_value(v.clone()).ok())
                    .collect()
            })
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

/// Analyze a failed branch and propose a fix direction (spec.md §4.8
/// step 2, "debug"). Falls back to a degraded `DebugPlan` on any failure.
pub async fn analyze_failure(
    cfg: &DaemonConfig,
    spec_content: &str,
    node_summary: &str,
    error_output: &str,
    project_dir: &Path,
) -> DebugPlan {
    const MAX_ERROR_LEN: usize = 3000;
    let truncated_error = if error_output.len() > MAX_ERROR_LEN {
        format!("{}\n... (truncated)", &error_output[..MAX_ERROR_LEN])
    } else {
        error_output.to_string()
    };
    let prompt = format!(
        "Analyze the root cause of a failed solution attempt and propose a fix direction.\n\n\
         ## Original Task\n{spec_content}\n\n## Failed Branch\n- Approach: {node_summary}\n\n\
         ## Error Output\n```\n{truncated_error}\n```\n\n\
         Output a JSON object with: root_cause, fix_direction, changes, severity, retry_viable.\n\
         Use ```json ... ``` code fence."
    );

    match run_agent(cfg, AgentRole::Debugger, &prompt, project_dir).await {
        Ok(response) => {
            let text = extract_json_block(&response);
            serde_json::from_str(text).unwrap_or_else(|_| DebugPlan::parse_failed("could not parse response"))
        }
        Err(e) => {
            tracing::error!("failure analysis failed: {e}");
            DebugPlan::parse_failed(&e)
        }
    }
}

/// Propose targeted improvements to an existing branch (spec.md §4.8
/// step 2, "improve"). Falls back to a degraded `Improvement` on any
/// failure.
pub async fn propose_improvement(
    cfg: &DaemonConfig,
    spec_content: &str,
    node_summary: &str,
    node_score: f64,
    lessons: &[Lesson],
    project_dir: &Path,
) -> Improvement {
    let mut parts = vec![
        "Propose targeted improvements for an existing solution branch.".to_string(),
        String::new(),
        "## Original Task".to_string(),
        spec_content.to_string(),
        String::new(),
        "## Current Branch".to_string(),
        format!("- Summary: {node_summary}"),
        format!("- Score: {node_score:.2} / 1.00"),
        String::new(),
    ];
    if !lessons.is_empty() {
        parts.push("## Lessons Learned".to_string());
        for lesson in lessons {
            parts.push(format!("- [{}] {}: {}", lesson.id, lesson.title, lesson.key_takeaway));
        }
        parts.push(String::new());
        parts.push("IMPORTANT: Cite relevant lessons by ID.".to_string());
    }
    parts.push(String::new());
    parts.push("Output a JSON object with: summary, changes, rationale, cited_lessons, expected_score_delta.".to_string());
    parts.push("Use ```json ... ``` code fence.".to_string());
    let prompt = parts.join("\n");

    match run_agent(cfg, AgentRole::Improver, &prompt, project_dir).await {
        Ok(response) => {
            let text = extract_json_block(&response);
            serde_json::from_str(text).unwrap_or_else(|_| Improvement::parse_failed(&response))
        }
        Err(e) => {
            tracing::error!("improvement proposal failed: {e}");
            Improvement::parse_failed(&e)
        }
    }
}

/// Node summary used as lesson-extraction/prompt input (spec.md §4.8
/// step 5 operates over "completed nodes", not raw `MctsNode`s, to keep
/// this module decoupled from the tree's arena shape).
pub struct CompletedNodeSummary<'a> {
    pub id: &'a str,
    pub score: f64,
    pub action: &'a str,
    pub idea_summary: &'a str,
    pub status: &'a str,
}

/// Compare completed branches and extract structured lessons (spec.md
/// §4.8 step 5). Requires at least two completed nodes, matching
/// `lesson_extractor.py`'s guard; returns an empty vec otherwise or on
/// any agent failure.
pub async fn extract_lessons(
    cfg: &DaemonConfig,
    completed: &[CompletedNodeSummary<'_>],
    spec_content: &str,
    project_dir: &Path,
) -> Vec<Lesson> {
    if completed.len() < 2 {
        return Vec::new();
    }

    let mut sorted: Vec<&CompletedNodeSummary> = completed.iter().collect();
    sorted.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut parts = vec![
        "Compare the following solution branches and extract structured lessons.".to_string(),
        String::new(),
        "## Task".to_string(),
        spec_content.chars().take(2000).collect::<String>(),
        String::new(),
        "## Completed Branches (sorted by score)".to_string(),
    ];
    for node in &sorted {
        let tag = if node.status == "completed" { "OK" } else { "FAIL" };
        parts.push(format!(
            "- [{tag}] {} (score={:.2}, action={}): {}",
            node.id, node.score, node.action, node.idea_summary
        ));
    }
    parts.push(String::new());
    parts.push("## Instructions".to_string());
    parts.push("For each lesson:".to_string());
    parts.push("1. Compare what worked (high score) vs what didn't (low score)".to_string());
    parts.push("2. Extract specific, actionable findings".to_string());
    parts.push("3. Include detection_signals for recognizing similar situations".to_string());
    parts.push(String::new());
    parts.push("Output a JSON array of lesson objects.".to_string());
    parts.push("Each lesson: {id, node_id, title, summary, findings, key_takeaway, detection_signals}.".to_string());
    parts.push("Use node IDs from the branches above. Use `lesson_<node_id>` for lesson IDs.".to_string());
    parts.push("Use ```json ... ``` code fence.".to_string());
    let prompt = parts.join("\n");

    match run_agent(cfg, AgentRole::LessonExtractor, &prompt, project_dir).await {
        Ok(response) => parse_lessons(&response),
        Err(e) => {
            tracing::error!("lesson extraction failed: {e}");
            Vec::new()
        }
    }
}

fn parse_lessons(response: &str) -> Vec<Lesson> {
    let text = extract_json_block(response);
    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(serde_json::Value::Array(arr)) => arr.into_iter().filter_map(|v| serde_json::from_value(v).ok()).collect(),
        Ok(serde_json::Value::Object(map)) => map
            .get("lessons")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|v| serde_json::from_value(v.clone()).ok()).collect())
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_json_block_handles_json_fence() {
        let text = "some preamble\n```json\n{\"a\": 1}\n```\ntrailer";
        assert_eq!(extract_json_block(text), "{\"a\": 1}");
    }

    #[test]
    fn extract_json_block_handles_bare_fence() {
        let text = "```\n[1, 2]\n```";
        assert_eq!(extract_json_block(text), "[1, 2]");
    }

    #[test]
    fn extract_json_block_falls_back_to_raw_text_on_malformed_fence() {
        let text = "```json\n{\"a\": 1}";
        assert_eq!(extract_json_block(text), "```json\n{\"a\": 1}");
    }

    #[test]
    fn parse_ideas_reads_top_level_array() {
        let response = "```json\n[{\"summary\": \"a\"}, {\"summary\": \"b\"}]\n```";
        let ideas = parse_ideas(response, 5);
        assert_eq!(ideas.len(), 2);
        assert_eq!(ideas[0].summary, "a");
    }

    #[test]
    fn parse_ideas_caps_at_n_ideas() {
        let response = "[{\"summary\": \"a\"}, {\"summary\": \"b\"}, {\"summary\": \"c\"}]";
        assert_eq!(parse_ideas(response, 2).len(), 2);
    }

    #[test]
    fn parse_lessons_reads_wrapped_object() {
        let response = serde_json::json!({"lessons": [{"id": "l1", "node_id": "n1"}]}).to_string();
        let lessons = parse_lessons(&response);
        assert_eq!(lessons.len(), 1);
        assert_eq!(lessons[0].id, "l1");
    }

    #[test]
    fn debug_plan_parse_failed_is_not_retry_viable() {
        let plan = DebugPlan::parse_failed("boom");
        assert!(!plan.retry_viable);
        assert!(plan.root_cause.contains("boom"));
    }
}
