//! Database validator (spec.md §4.6): applicable when
//! `capabilities.has_database`, non-blocking — surveys migration
//! directories and schema files and reports them.
//!
//! Grounded on `original_source/.../qa/validators/db_validator.py`.

use async_trait::async_trait;
use walkdir::WalkDir;

use super::{ProjectCapabilities, ValidateCtx, Validator, ValidatorResult};

pub struct DatabaseValidator;

const MIGRATION_DIRS: &[&str] = &["prisma/migrations", "drizzle", "migrations", "alembic/versions", "db/migrate"];
const SCHEMA_FILE_NAMES: &[&str] = &["schema.prisma", "schema.py", "models.py"];

#[async_trait]
impl Validator for DatabaseValidator {
    fn id(&self) -> &'static str {
        "database"
    }

    fn description(&self) -> &'static str {
        "Database migration and schema validation"
    }

    fn is_applicable(&self, capabilities: &ProjectCapabilities) -> bool {
        capabilities.has_database
    }

    async fn validate(&self, ctx: &ValidateCtx) -> ValidatorResult {
        let project_dir = ctx.project_dir.clone();
        let (found_migrations, schema_files): (Vec<String>, Vec<String>) = tokio::task::spawn_blocking(move || {
            let found: Vec<String> = MIGRATION_DIRS
                .iter()
                .filter(|d| project_dir.join(d).exists())
                .map(|d| d.to_string())
                .collect();
            let schemas: Vec<String> = WalkDir::new(&project_dir)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
                .filter(|e| {
                    e.file_name()
                        .to_str()
                        .is_some_and(|n| SCHEMA_FILE_NAMES.contains(&n))
                })
                .map(|e| e.path().display().to_string())
                .take(10)
                .collect();
            (found, schemas)
        })
        .await
        .unwrap_or_default();

        let mut report = vec!["## Database Validation\n".to_string()];
        if !found_migrations.is_empty() {
            report.push(format!("- Migration directories: {}\n", found_migrations.join(", ")));
        }
        if !schema_files.is_empty() {
            report.push(format!("- Schema files found: {}\n", schema_files.len()));
        }
        report.push("- Database validation configured\n".to_string());

        ValidatorResult {
            validator_id: self.id().to_string(),
            passed: true,
            issues: Vec::new(),
            screenshots: Vec::new(),
            report_section: report.join("\n"),
            metadata: serde_json::json!({
                "migration_dirs": found_migrations,
                "schema_files": schema_files,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn validate_reports_found_migration_dir() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("migrations")).unwrap();
        let ctx = ValidateCtx {
            project_dir: dir.path().to_path_buf(),
            spec_dir: dir.path().to_path_buf(),
            capabilities: ProjectCapabilities { has_database: true, ..Default::default() },
        };
        let result = DatabaseValidator.validate(&ctx).await;
        assert!(result.passed);
        assert_eq!(result.metadata["migration_dirs"][0], "migrations");
    }

    #[test]
    fn is_applicable_gated_by_has_database() {
        assert!(DatabaseValidator.is_applicable(&ProjectCapabilities { has_database: true, ..Default::default() }));
        assert!(!DatabaseValidator.is_applicable(&ProjectCapabilities::default()));
    }
}
