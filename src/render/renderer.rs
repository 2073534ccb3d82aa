use console::style;
use crate::batch::{AggregateStats, UnitOutcome, UnitStatus};
use crate::catalog::{Service, Severity};
use crate::events::ConsoleEvent;
use crate::session::{LogClass, LogLine, SessionState};
use crate::utils::formatting::truncate_line;

const MAX_LINE_CHARS: usize = 400;

/// Render a console event as styled terminal output.
///
/// Events that only feed progress bars render to `None`.
pub fn render_event(event: &ConsoleEvent) -> Option<String> {
    match event {
        ConsoleEvent::StepChanged { step } => Some(format!(
            "\n{} {}",
            style("▶").green().bold(),
            style(step).cyan().bold(),
        )),
        ConsoleEvent::CatalogLoaded { services, source } => Some(format!(
            "  {} {} services loaded from {}",
            style("✓").green(),
            style(services).white().bold(),
            style(source).dim(),
        )),
        ConsoleEvent::CatalogFailed { unavailable, error } => {
            let label = if *unavailable { "No catalog:" } else { "Catalog unreadable:" };
            Some(format!("  {} {} {}", style("✗").red(), style(label).red().bold(), style(error).red()))
        }
        ConsoleEvent::SelectionChanged { selected } => Some(format!(
            "  {} {} selected",
            style("•").cyan(),
            selected,
        )),
        ConsoleEvent::SessionStateChanged { service, session_id, state, error } => {
            let id = session_id.as_ref()
                .map(|id| format!(" [{}]", id))
                .unwrap_or_default();
            let mut line = format!(
                "  {} {}{} {}",
                render_state_icon(*state),
                style(service).white().bold(),
                style(id).dim(),
                render_state(*state),
            );
            if let Some(error) = error {
                line.push_str(&format!(" ({})", style(error).red().dim()));
            }
            Some(line)
        }
        ConsoleEvent::LogAppended { line, .. } => Some(render_log_line(line)),
        ConsoleEvent::PollDegraded { service, consecutive_failures, error, .. } => Some(format!(
            "  {} Log polling for {} failing ({} in a row): {}",
            style("⚠").yellow().bold(),
            service,
            consecutive_failures,
            style(error).dim(),
        )),
        ConsoleEvent::UnitOutcome { service, outcome } if outcome.status.is_terminal() => {
            Some(render_unit_outcome(&service.to_string(), outcome))
        }
        ConsoleEvent::BatchFinished { stats, cancelled } => {
            let heading = if *cancelled {
                style("■ Batch cancelled:").yellow().bold()
            } else {
                style("✓ Batch complete:").green().bold()
            };
            Some(format!("\n{} {}\n", heading, render_stats(stats)))
        }
        ConsoleEvent::UnitOutcome { .. } | ConsoleEvent::StatsUpdated { .. } => None,
    }
}

/// One line of session output, styled by its classification.
pub fn render_log_line(line: &LogLine) -> String {
    let text = truncate_line(&line.text, MAX_LINE_CHARS);
    let time = style(line.timestamp.format("%H:%M:%S").to_string()).dim();
    if line.is_echo() {
        return format!("  {} {}", time, style(text).cyan().bold());
    }
    let body = match line.class {
        LogClass::Info => style(text).white(),
        LogClass::Success => style(text).green().bold(),
        LogClass::Warning => style(text).yellow(),
        LogClass::Error => style(text).red(),
        LogClass::Exploit => style(text).magenta().bold(),
    };
    format!("  {} {}", time, body)
}

pub fn render_state(state: SessionState) -> String {
    let label = state.as_str().to_uppercase();
    match state {
        SessionState::Ready => style(label).dim().to_string(),
        SessionState::Launching => style(label).yellow().to_string(),
        SessionState::Running => style(label).cyan().bold().to_string(),
        SessionState::Completed => style(label).green().bold().to_string(),
        SessionState::Failed => style(label).red().bold().to_string(),
        SessionState::Stopped => style(label).yellow().bold().to_string(),
    }
}

fn render_state_icon(state: SessionState) -> String {
    match state {
        SessionState::Ready => style("○").dim().to_string(),
        SessionState::Launching => style("⏳").yellow().to_string(),
        SessionState::Running => style("●").cyan().to_string(),
        SessionState::Completed => style("✓").green().to_string(),
        SessionState::Failed => style("✗").red().to_string(),
        SessionState::Stopped => style("■").yellow().to_string(),
    }
}

pub fn render_unit_outcome(service: &str, outcome: &UnitOutcome) -> String {
    let icon = match outcome.status {
        UnitStatus::Completed => style("✓").green(),
        UnitStatus::Failed => style("✗").red(),
        UnitStatus::Stopped => style("■").yellow(),
        UnitStatus::Running => style("●").cyan(),
        UnitStatus::Pending => style("○").dim(),
    };
    let mut tags = Vec::new();
    if outcome.flags.root_access {
        tags.push(style("root").red().bold().to_string());
    }
    if outcome.flags.shell_opened {
        tags.push(style("shell").magenta().to_string());
    }
    let tags = if tags.is_empty() { String::new() } else { format!(" [{}]", tags.join(", ")) };
    let error = outcome.error.as_ref()
        .map(|e| format!(" ({})", style(e).red().dim()))
        .unwrap_or_default();
    format!("  {} {} {}{}{}", icon, style(service).white().bold(), outcome.status, tags, error)
}

pub fn render_stats(stats: &AggregateStats) -> String {
    format!(
        "{}/{} done | {} running | {} pending | {} failed | {} root | {} shells",
        stats.completed,
        stats.total,
        stats.running,
        stats.pending,
        stats.failed,
        stats.root_access,
        stats.shells_opened,
    )
}

/// Render a severity badge with appropriate colors.
pub fn render_severity_badge(severity: &Severity) -> String {
    match severity {
        Severity::Critical => style(" CRITICAL ").on_red().white().bold().to_string(),
        Severity::High => style(" HIGH ").red().bold().to_string(),
        Severity::Medium => style(" MEDIUM ").yellow().bold().to_string(),
        Severity::Low => style(" LOW ").blue().to_string(),
        Severity::Info => style(" INFO ").dim().to_string(),
    }
}

/// Catalog as an aligned table, one service per line.
pub fn render_catalog(services: &[Service]) -> String {
    if services.is_empty() {
        return format!("  {}", style("No vulnerable services in catalog").dim());
    }
    let width = services.iter().map(|s| s.key().to_string().len()).max().unwrap_or(0);
    let mut out = String::new();
    for service in services {
        let cvss = service.cvss_score
            .map(|c| format!("{:.1}", c))
            .unwrap_or_else(|| "-".to_string());
        let cves = if service.known_vulnerabilities.is_empty() {
            String::new()
        } else {
            format!(" {}", style(service.known_vulnerabilities.join(", ")).dim())
        };
        out.push_str(&format!(
            "  {:<width$}  {} {:>4}  {}{}\n",
            service.key().to_string(),
            render_severity_badge(&service.severity),
            cvss,
            service.label(),
            cves,
            width = width,
        ));
    }
    out
}
