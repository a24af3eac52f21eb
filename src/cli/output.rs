//! Output formatting for CLI commands.
//!
//! Every formatter returns a string in the selected format: coloured text
//! with tables for people, pretty-printed JSON for scripts.

use colored::Colorize;
use serde::Serialize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::ValidationResult;
use crate::planner::{ActionType, ResourcePlan};
use crate::reconciler::{ReconcileReport, ResultStatus};
use crate::state::{LockInfo, RecordStatus, StateFile};

use super::commands::OutputFormat;

/// Number of history entries shown by `state show`.
const HISTORY_SHOWN: usize = 5;

/// Output formatter for CLI.
#[derive(Debug, Clone, Copy)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Plan action row for table display.
#[derive(Tabled)]
struct PlanActionRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Type")]
    resource_type: String,
    #[tabled(rename = "Cause")]
    cause: String,
}

/// Result row for table display.
#[derive(Tabled)]
struct ResultRow {
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Outcome")]
    outcome: String,
    #[tabled(rename = "ID")]
    id: String,
}

/// Record row for table display.
#[derive(Tabled)]
struct RecordRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Type")]
    resource_type: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Updated")]
    updated: String,
}

/// JSON shape of a validation run.
#[derive(Serialize)]
struct ValidationJson<'a> {
    valid: bool,
    resource_types: usize,
    resources: usize,
    warnings: &'a [String],
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Returns the selected format.
    #[must_use]
    pub const fn format(&self) -> OutputFormat {
        self.format
    }

    /// Formats a plan for display.
    ///
    /// With `detailed`, the per-attribute drift of each change is listed
    /// below the table.
    #[must_use]
    pub fn format_plan(&self, plan: &ResourcePlan, detailed: bool) -> String {
        match self.format {
            OutputFormat::Json => to_json(plan),
            OutputFormat::Text => Self::format_plan_text(plan, detailed),
        }
    }

    fn format_plan_text(plan: &ResourcePlan, detailed: bool) -> String {
        if !plan.has_changes() {
            return format!(
                "{} No changes required, remote resources match the desired state.\n",
                "✓".green()
            );
        }

        let mut output = String::from("\nPlan\n\n");

        let rows: Vec<PlanActionRow> = plan
            .changes()
            .enumerate()
            .map(|(i, a)| PlanActionRow {
                index: i + 1,
                action: Self::format_action_type(a.action),
                resource: a.name.clone(),
                resource_type: a.resource_type.clone(),
                cause: Self::truncate(&a.cause.to_string(), 40),
            })
            .collect();
        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        let summary = plan.summary();
        let _ = writeln!(
            output,
            "\nPlan: {} to create, {} to update, {} to replace, {} to delete",
            summary.create.to_string().green(),
            summary.update.to_string().yellow(),
            summary.replace.to_string().magenta(),
            (summary.delete + summary.purge).to_string().red()
        );

        let replacements: Vec<&str> = plan
            .changes()
            .filter(|a| a.action == ActionType::Replace)
            .map(|a| a.name.as_str())
            .collect();
        if !replacements.is_empty() {
            let _ = writeln!(
                output,
                "\n{} Replacement needs --allow-replace: {}",
                "⚠".yellow(),
                replacements.join(", ")
            );
        }

        if detailed {
            output.push_str("\nDrift:\n");
            for action in plan.changes() {
                let _ = writeln!(output, "  {}:", action.name);
                match &action.drift {
                    Some(drift) if !drift.is_empty() => {
                        let _ = write!(output, "{drift}");
                    }
                    _ => {
                        let _ = writeln!(output, "    {}", action.cause.to_string().dimmed());
                    }
                }
            }
        }

        output
    }

    /// Formats the report of an apply, destroy, or refresh.
    #[must_use]
    pub fn format_report(&self, report: &ReconcileReport) -> String {
        match self.format {
            OutputFormat::Json => to_json(report),
            OutputFormat::Text => Self::format_report_text(report),
        }
    }

    fn format_report_text(report: &ReconcileReport) -> String {
        let status = if report.success() {
            format!("{} {} successful", "✓".green(), capitalize(report.command))
        } else {
            format!("{} {} failed", "✗".red(), capitalize(report.command))
        };
        let mut output = format!("{status}\n\n");

        let rows: Vec<ResultRow> = report
            .results
            .iter()
            .filter(|r| r.action != ActionType::Noop || r.status != ResultStatus::Succeeded)
            .map(|r| ResultRow {
                resource: r.name.clone(),
                action: Self::format_action_type(r.action),
                outcome: Self::format_outcome(&r.outcome, r.status),
                id: r
                    .id
                    .as_ref()
                    .map_or_else(|| String::from("-"), |id| Self::truncate(id.as_str(), 24)),
            })
            .collect();
        if !rows.is_empty() {
            output.push_str(&Table::new(rows).to_string());
            output.push_str("\n\n");
        }

        let _ = writeln!(output, "   Created: {}", report.summary.create);
        let _ = writeln!(output, "   Updated: {}", report.summary.update);
        let _ = writeln!(output, "   Replaced: {}", report.summary.replace);
        let _ = writeln!(output, "   Deleted: {}", report.summary.delete + report.summary.purge);
        let _ = writeln!(output, "   Unchanged: {}", report.summary.noop);

        let problems: Vec<_> = report.failed().chain(report.skipped()).collect();
        if !problems.is_empty() || !report.errors.is_empty() {
            let _ = write!(output, "\n{} Errors:\n", "⚠".yellow());
            for result in problems {
                let _ = writeln!(
                    output,
                    "   - {} ({}): {}",
                    result.name,
                    result.outcome,
                    result.message.as_deref().unwrap_or("unknown error")
                );
            }
            for error in &report.errors {
                let _ = writeln!(output, "   - {error}");
            }
        }

        output
    }

    /// Formats local state.
    #[must_use]
    pub fn format_state(&self, state: &StateFile) -> String {
        match self.format {
            OutputFormat::Json => to_json(state),
            OutputFormat::Text => {
                let mut output = String::from("\nState\n\n");
                let _ = writeln!(output, "   Version: {}", state.version);
                let _ = writeln!(output, "   Last updated: {}", state.last_updated.format("%Y-%m-%d %H:%M:%S"));
                let _ = writeln!(output, "   Resources: {}\n", state.resources.len());

                if !state.resources.is_empty() {
                    let rows: Vec<RecordRow> = state
                        .resources
                        .values()
                        .map(|r| RecordRow {
                            name: r.name.clone(),
                            resource_type: r.resource_type.clone(),
                            status: Self::format_record_status(r.status),
                            id: Self::truncate(r.id.as_str(), 24),
                            updated: r.updated_at.format("%Y-%m-%d %H:%M").to_string(),
                        })
                        .collect();
                    output.push_str(&Table::new(rows).to_string());
                    output.push('\n');
                }

                for record in state.tainted() {
                    let _ = writeln!(
                        output,
                        "   {} {} tainted: {}",
                        "⚠".yellow(),
                        record.name,
                        record.last_error.as_deref().unwrap_or("unknown error")
                    );
                }

                if !state.history.is_empty() {
                    let _ = writeln!(output, "\n   Recent history ({}):", state.history.len());
                    for entry in state.history.iter().rev().take(HISTORY_SHOWN) {
                        let status = if entry.success { "✓".green() } else { "✗".red() };
                        let _ = writeln!(
                            output,
                            "     {status} {} - {} {}",
                            entry.timestamp.format("%Y-%m-%d %H:%M"),
                            entry.operation,
                            entry.resource
                        );
                    }
                }

                output
            }
        }
    }

    /// Formats a successful validation run.
    #[must_use]
    pub fn format_validation(
        &self,
        result: &ValidationResult,
        resource_types: usize,
        resources: usize,
        show_warnings: bool,
    ) -> String {
        match self.format {
            OutputFormat::Json => to_json(&ValidationJson {
                valid: result.is_valid(),
                resource_types,
                resources,
                warnings: &result.warnings,
            }),
            OutputFormat::Text => {
                let mut output = format!(
                    "{} Configuration is valid ({resource_types} resource type(s), {resources} resource(s))\n",
                    "✓".green()
                );
                if show_warnings {
                    for warning in &result.warnings {
                        let _ = writeln!(output, "   {} {warning}", "⚠".yellow());
                    }
                } else if result.warning_count() > 0 {
                    let _ = writeln!(
                        output,
                        "   {} warning(s), rerun with --warnings to list them",
                        result.warning_count()
                    );
                }
                output
            }
        }
    }

    /// Formats the current state lock.
    #[must_use]
    pub fn format_lock(&self, lock: Option<&LockInfo>) -> String {
        match (self.format, lock) {
            (OutputFormat::Json, lock) => to_json(&lock),
            (OutputFormat::Text, None) => String::from("State is not locked.\n"),
            (OutputFormat::Text, Some(lock)) => format!(
                "State locked by {} for {} (lock {}, expires in {}s)\n",
                lock.holder,
                lock.operation,
                lock.lock_id,
                lock.remaining_secs()
            ),
        }
    }

    /// Formats a success message.
    #[must_use]
    pub fn success(&self, message: &str) -> String {
        self.message("success", &"✓".green(), message)
    }

    /// Formats an error message.
    #[must_use]
    pub fn error(&self, message: &str) -> String {
        self.message("error", &"✗".red(), message)
    }

    /// Formats a warning message.
    #[must_use]
    pub fn warning(&self, message: &str) -> String {
        self.message("warning", &"⚠".yellow(), message)
    }

    fn message(&self, status: &str, glyph: &colored::ColoredString, message: &str) -> String {
        match self.format {
            OutputFormat::Json => to_json(&serde_json::json!({ "status": status, "message": message })),
            OutputFormat::Text => format!("{glyph} {message}"),
        }
    }

    /// Formats an action type with color.
    fn format_action_type(action: ActionType) -> String {
        match action {
            ActionType::Create => "+create".green().to_string(),
            ActionType::Update => "~update".yellow().to_string(),
            ActionType::Replace => "±replace".magenta().to_string(),
            ActionType::Delete => "-delete".red().to_string(),
            ActionType::Purge => "-purge".red().to_string(),
            ActionType::Noop => "noop".dimmed().to_string(),
        }
    }

    fn format_outcome(outcome: &str, status: ResultStatus) -> String {
        match status {
            ResultStatus::Succeeded => outcome.green().to_string(),
            ResultStatus::Skipped => outcome.yellow().to_string(),
            ResultStatus::Failed => outcome.red().to_string(),
        }
    }

    fn format_record_status(status: RecordStatus) -> String {
        match status {
            RecordStatus::Applied => "applied".green().to_string(),
            RecordStatus::Tainted => "tainted".red().to_string(),
        }
    }

    /// Truncates a string to at most `max_len` characters.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{kept}...")
        }
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars).collect()
    })
}
