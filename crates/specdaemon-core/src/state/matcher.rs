//! The dependency-met matcher (spec.md §4.1), normative per the resolved
//! Open Question in SPEC_FULL.md §9(a): the substring/prefix matcher, not
//! the exact-only variant.

use std::collections::HashSet;

/// Does `dep` resolve to an entry in `completed`, per the three ordered
/// rules in spec.md §4.1?
pub fn dependency_met(dep: &str, completed: &HashSet<String>) -> bool {
    // 1. Exact equality.
    if completed.contains(dep) {
        return true;
    }

    // 2. Numeric-prefix rule.
    let digit_prefix: String = dep.chars().take_while(|c| c.is_ascii_digit()).collect();
    if !digit_prefix.is_empty() {
        let n: u32 = digit_prefix.parse().unwrap_or(0);
        let padded = format!("{n:03}");

        if digit_prefix == dep {
            // Bare number: match any completed id starting with "N-".
            let prefix = format!("{padded}-");
            return completed.iter().any(|c| c.starts_with(&prefix));
        }

        // Has more than a bare number: normalize the prefix to its
        // zero-padded form and require the completed id to start with
        // the entire (normalized) dep string, case-insensitively.
        let rest = &dep[digit_prefix.len()..];
        let normalized = format!("{padded}{rest}").to_ascii_lowercase();
        return completed
            .iter()
            .any(|c| c.to_ascii_lowercase().starts_with(&normalized));
    }

    // 3. Generic case-insensitive prefix match, >= 3 characters.
    if dep.len() < 3 {
        return false;
    }
    let dep_lower = dep.to_ascii_lowercase();
    completed
        .iter()
        .any(|c| c.to_ascii_lowercase().starts_with(&dep_lower))
}

/// A task is dispatched only when every `dependsOn` entry resolves
/// (invariant I3 / property P2).
pub fn are_dependencies_met(deps: &[String], completed: &HashSet<String>) -> bool {
    deps.iter().all(|d| dependency_met(d, completed))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> HashSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn exact_match() {
        let completed = set(&["001-impl"]);
        assert!(dependency_met("001-impl", &completed));
    }

    #[test]
    fn bare_number_matches_any_sibling_with_that_prefix() {
        let completed = set(&["002-backend-api-module"]);
        assert!(dependency_met("2", &completed));
        assert!(dependency_met("002", &completed));
    }

    #[test]
    fn numbered_placeholder_resolves_to_real_sibling() {
        // As written by an upstream planner before ref-resolution runs;
        // the matcher itself must also tolerate it directly (P2/P6).
        let completed = set(&["002-backend-api-module-extended"]);
        assert!(dependency_met("002-backend-api-module", &completed));
        assert!(dependency_met("2-backend-api-module", &completed));
    }

    #[test]
    fn numbered_with_wrong_suffix_does_not_match() {
        let completed = set(&["002-frontend-widget"]);
        assert!(!dependency_met("002-backend-api-module", &completed));
    }

    #[test]
    fn generic_prefix_match_requires_three_chars() {
        let completed = set(&["auth-service"]);
        assert!(dependency_met("auth", &completed));
        assert!(!dependency_met("au", &completed));
    }

    #[test]
    fn generic_prefix_match_is_case_insensitive() {
        let completed = set(&["Auth-Service"]);
        assert!(dependency_met("auth", &completed));
    }

    #[test]
    fn are_dependencies_met_requires_all() {
        let completed = set(&["001-a"]);
        assert!(!are_dependencies_met(
            &["001-a".to_string(), "002-b".to_string()],
            &completed
        ));
        assert!(are_dependencies_met(&["001-a".to_string()], &completed));
    }

    #[test]
    fn empty_deps_are_trivially_met() {
        let completed = set(&[]);
        assert!(are_dependencies_met(&[], &completed));
    }
}
