//! Terminal and JSON rendering for the CLI
//!
//! Human output goes to stdout with optional color. Diagnostics (errors,
//! warnings, hints) go to stderr; in JSON mode they become one-line JSON
//! objects so stdout stays a single parseable document.

use anyhow::Result;
use colored::{ColoredString, Colorize};
use indexmap::IndexMap;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::time::{Duration, Instant};

use stackform::executor::{ApplyReport, ChangeOutcome, OutcomeStatus};
use stackform::plan::{Action, Change, ChangeSet};

/// Diagnostic severity printed on stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Notice {
    Error,
    Warning,
    Hint,
}

impl Notice {
    fn label(self) -> &'static str {
        match self {
            Notice::Error => "error",
            Notice::Warning => "warning",
            Notice::Hint => "hint",
        }
    }

    fn paint(self, text: &str) -> ColoredString {
        match self {
            Notice::Error => text.red().bold(),
            Notice::Warning => text.yellow().bold(),
            Notice::Hint => text.cyan(),
        }
    }
}

pub struct OutputFormatter {
    use_color: bool,
    json_mode: bool,
    verbosity: u8,
    started: Instant,
}

impl OutputFormatter {
    /// `NO_COLOR` in the environment turns color off regardless of `use_color`.
    pub fn new(use_color: bool, json_mode: bool, verbosity: u8) -> Self {
        let use_color = use_color && std::env::var_os("NO_COLOR").is_none();
        colored::control::set_override(use_color);

        Self {
            use_color,
            json_mode,
            verbosity,
            started: Instant::now(),
        }
    }

    pub fn is_json(&self) -> bool {
        self.json_mode
    }

    fn human(&self) -> bool {
        !self.json_mode
    }

    fn styled(&self, text: &str, style: impl Fn(&str) -> ColoredString) -> String {
        if self.use_color {
            style(text).to_string()
        } else {
            text.to_string()
        }
    }

    /// Command title, e.g. `DEPLOY IacStack (123456789012/ca-central-1)`.
    pub fn banner(&self, title: &str) {
        if self.human() {
            println!("{}", self.styled(&format!("== {} ==", title), |t| t.bright_blue().bold()));
        }
    }

    fn section(&self, title: &str) {
        if self.human() {
            println!();
            println!("{}", self.styled(title, |t| t.bold().underline()));
        }
    }

    pub fn json<T: Serialize>(&self, value: &T) -> Result<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }

    fn notice(&self, notice: Notice, message: &str) {
        if self.json_mode {
            // Hints only make sense next to human output
            if notice != Notice::Hint {
                eprintln!(
                    "{}",
                    serde_json::json!({ "level": notice.label(), "message": message })
                );
            }
            return;
        }
        let label = format!("{}:", notice.label());
        let label = if self.use_color {
            notice.paint(&label).to_string()
        } else {
            label
        };
        eprintln!("{} {}", label, message);
    }

    pub fn error(&self, message: &str) {
        self.notice(Notice::Error, message);
    }

    pub fn warning(&self, message: &str) {
        self.notice(Notice::Warning, message);
    }

    pub fn hint(&self, message: &str) {
        self.notice(Notice::Hint, message);
    }

    /// Shown with `-v` and above.
    pub fn info(&self, message: &str) {
        if self.human() && self.verbosity > 0 {
            println!("{}", self.styled(message, |t| t.dimmed()));
        }
    }

    pub fn success(&self, message: &str) {
        if self.human() {
            println!("{}", self.styled(message, |t| t.green().bold()));
        }
    }

    fn marker(&self, action: Action) -> String {
        let symbol = format!("{:>3}", action.symbol());
        if !self.use_color {
            return symbol;
        }
        match action {
            Action::Create => symbol.green().bold().to_string(),
            Action::Update => symbol.yellow().bold().to_string(),
            Action::Replace => symbol.magenta().bold().to_string(),
            Action::Delete => symbol.red().bold().to_string(),
            Action::Orphan => symbol.cyan().bold().to_string(),
            Action::NoChange => symbol,
        }
    }

    /// Print one planned change
    pub fn change(&self, change: &Change) {
        let id = if self.use_color {
            change.logical_id.bright_white().bold().to_string()
        } else {
            change.logical_id.clone()
        };

        let mut line = format!("{} {} ({})", self.marker(change.action), id, change.resource_type);
        if let Some(ref reason) = change.reason {
            line.push_str(&format!(" - {}", reason));
        }
        println!("{}", line);

        if self.verbosity >= 1 || matches!(change.action, Action::Update | Action::Replace) {
            for diff_line in change.diff_text().lines() {
                let rendered = if !self.use_color {
                    diff_line.to_string()
                } else if diff_line.starts_with("  +") {
                    diff_line.green().to_string()
                } else if diff_line.starts_with("  -") {
                    diff_line.red().to_string()
                } else {
                    diff_line.bright_black().to_string()
                };
                println!("      {}", rendered);
            }
        }
    }

    /// Print a change-set
    pub fn plan(&self, change_set: &ChangeSet) -> Result<()> {
        if self.json_mode {
            return self.json(&serde_json::json!({
                "stack": change_set.stack,
                "summary": change_set.summary(),
                "changes": change_set.actionable().collect::<Vec<_>>(),
            }));
        }

        self.section(&format!("Plan for stack {}", change_set.stack));
        if change_set.is_empty() {
            println!("No changes. Deployed resources match the declaration.");
            return Ok(());
        }

        for change in change_set.actionable() {
            self.change(change);
        }

        let summary = change_set.summary();
        if self.use_color {
            println!("\n{} {}", "Plan:".bold(), summary);
        } else {
            println!("\nPlan: {}", summary);
        }
        Ok(())
    }

    fn outcome_status(&self, outcome: &ChangeOutcome) -> String {
        let (label, detail) = match outcome.status {
            OutcomeStatus::Succeeded => ("ok", None),
            OutcomeStatus::Failed(ref message) => ("failed", Some(message.as_str())),
            OutcomeStatus::Skipped => ("skipped", None),
        };

        let label = if !self.use_color {
            label.to_string()
        } else {
            match outcome.status {
                OutcomeStatus::Succeeded => label.green().to_string(),
                OutcomeStatus::Failed(_) => label.red().bold().to_string(),
                OutcomeStatus::Skipped => label.cyan().to_string(),
            }
        };

        match detail {
            Some(message) => format!("{} => {}", label, message),
            None => label,
        }
    }

    /// Print the result of an apply
    pub fn report(&self, report: &ApplyReport) {
        if self.json_mode {
            return;
        }

        self.section("Apply results");
        for outcome in &report.outcomes {
            let mut line = format!(
                "{} {} {}",
                self.marker(outcome.action),
                outcome.logical_id,
                self.outcome_status(outcome)
            );
            if let Some(ref physical_id) = outcome.physical_id {
                line.push_str(&format!(" [{}]", physical_id));
            }
            if outcome.attempts > 1 {
                line.push_str(&format!(" ({} attempts)", outcome.attempts));
            }
            println!("{}", line);
        }

        let summary = format!(
            "{} succeeded, {} failed, {} skipped in {}",
            report.succeeded().len(),
            report.failed().len(),
            report.skipped().len(),
            format_duration(report.duration)
        );

        if !self.use_color {
            println!("\n{}", summary);
        } else if report.is_success() {
            println!("\n{}", summary.green().bold());
        } else {
            println!("\n{}", summary.red().bold());
        }
    }

    /// Print resolved outputs with their descriptions
    pub fn outputs(&self, outputs: &IndexMap<String, String>, descriptions: &IndexMap<String, String>) {
        if self.json_mode {
            return;
        }

        self.section("Outputs");
        if outputs.is_empty() {
            println!("(none)");
            return;
        }

        let width = outputs.keys().map(String::len).max().unwrap_or(0);
        for (name, value) in outputs {
            let padded = format!("{:width$}", name, width = width);
            if self.use_color {
                println!("{} = {}", padded.bright_white().bold(), value);
            } else {
                println!("{} = {}", padded, value);
            }
            if self.verbosity >= 1 {
                if let Some(description) = descriptions.get(name) {
                    println!("{:width$}   {}", "", description.bright_black(), width = width);
                }
            }
        }
    }

    /// Spinner for the apply phase; none in JSON mode.
    pub fn spinner(&self, message: &str) -> Option<ProgressBar> {
        if self.json_mode {
            return None;
        }

        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg} [{elapsed}]") {
            spinner.set_style(style);
        }
        spinner.set_message(message.to_string());
        spinner.enable_steady_tick(Duration::from_millis(100));
        Some(spinner)
    }

    /// Wall time since the command started.
    pub fn elapsed(&self) -> String {
        format_duration(self.started.elapsed())
    }
}

fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    match total {
        0 => format!("{}ms", duration.subsec_millis()),
        1..=59 => format!("{:.1}s", duration.as_secs_f64()),
        _ => format!("{}m{:02}s", total / 60, total % 60),
    }
}
