use std::collections::BTreeSet;

use assetdesk_core::config::{AppConfig, LoadOptions};
use assetdesk_db::migrations::MIGRATOR;
use serde::Serialize;

use crate::commands::{connect, CommandResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn pass(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Pass, details: details.into() }
    }

    fn fail(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Fail, details: details.into() }
    }

    fn skipped(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Skipped, details: details.into() }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

/// Exit code 0 when every check passes, 6 otherwise.
pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { 6 };

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        })
    } else {
        render_human(&report)
    };

    CommandResult { exit_code, output }
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck::pass(
                "config_validation",
                "configuration loaded and validated",
            ));
            checks.push(check_templates_dir(&config));
            checks.extend(check_database(&config));
        }
        Err(error) => {
            let skipped = "skipped because configuration did not load";
            checks.push(DoctorCheck::fail("config_validation", error.to_string()));
            checks.push(DoctorCheck::skipped("templates_dir", skipped));
            checks.push(DoctorCheck::skipped("database_connectivity", skipped));
            checks.push(DoctorCheck::skipped("migrations_applied", skipped));
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_templates_dir(config: &AppConfig) -> DoctorCheck {
    match &config.server.templates_dir {
        None => DoctorCheck::pass("templates_dir", "using embedded request board template"),
        Some(dir) if dir.is_dir() => DoctorCheck::pass(
            "templates_dir",
            format!("loading templates from `{}`", dir.display()),
        ),
        Some(dir) => DoctorCheck::fail(
            "templates_dir",
            format!("configured templates_dir `{}` is not a directory", dir.display()),
        ),
    }
}

fn check_database(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return vec![
                DoctorCheck::fail(
                    "database_connectivity",
                    format!("failed to initialize async runtime: {error}"),
                ),
                DoctorCheck::skipped("migrations_applied", "skipped because runtime failed"),
            ];
        }
    };

    runtime.block_on(async {
        let pool = match connect(config).await {
            Ok(pool) => pool,
            Err((_, message, _)) => {
                return vec![
                    DoctorCheck::fail(
                        "database_connectivity",
                        format!("failed to connect to database: {message}"),
                    ),
                    DoctorCheck::skipped(
                        "migrations_applied",
                        "skipped because database is unreachable",
                    ),
                ];
            }
        };

        let connectivity = DoctorCheck::pass(
            "database_connectivity",
            format!("connected using `{}`", config.database.url),
        );
        let applied = sqlx::query_scalar::<_, i64>(
            "SELECT version FROM _sqlx_migrations WHERE success = 1",
        )
        .fetch_all(&pool)
        .await;
        pool.close().await;

        let migrations = match applied {
            Ok(versions) => migration_check(&versions),
            Err(_) => DoctorCheck::fail(
                "migrations_applied",
                "no migrations applied yet; run `assetdesk migrate`",
            ),
        };
        vec![connectivity, migrations]
    })
}

fn migration_check(applied_versions: &[i64]) -> DoctorCheck {
    let known: BTreeSet<i64> = MIGRATOR.iter().map(|migration| migration.version).collect();
    let applied: BTreeSet<i64> = applied_versions.iter().copied().collect();
    let pending: Vec<String> = known.difference(&applied).map(ToString::to_string).collect();

    if pending.is_empty() {
        DoctorCheck::pass("migrations_applied", format!("{} migration(s) applied", applied.len()))
    } else {
        DoctorCheck::fail(
            "migrations_applied",
            format!("pending migrations: {}; run `assetdesk migrate`", pending.join(", ")),
        )
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use assetdesk_db::migrations::MIGRATOR;

    use super::{migration_check, render_human, CheckStatus, DoctorCheck, DoctorReport};

    #[test]
    fn migration_check_lists_pending_versions() {
        let check = migration_check(&[]);
        assert_eq!(check.status, CheckStatus::Fail);
        assert!(check.details.contains("assetdesk migrate"));

        let all: Vec<i64> = MIGRATOR.iter().map(|migration| migration.version).collect();
        assert_eq!(migration_check(&all).status, CheckStatus::Pass);
    }

    #[test]
    fn human_report_marks_each_check() {
        let report = DoctorReport {
            overall_status: CheckStatus::Fail,
            summary: "doctor: one or more readiness checks failed".to_string(),
            checks: vec![
                DoctorCheck::pass("config_validation", "ok"),
                DoctorCheck::skipped("migrations_applied", "skipped"),
            ],
        };

        let rendered = render_human(&report);
        assert!(rendered.contains("- [ok] config_validation: ok"));
        assert!(rendered.contains("- [skip] migrations_applied: skipped"));
    }
}
