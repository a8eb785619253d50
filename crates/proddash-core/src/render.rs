use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;
use proddash_shared::Role;
use unicode_width::UnicodeWidthStr;

use crate::analytics::AnalyticsSummary;
use crate::billing::PlanCatalogue;
use crate::config::Config;
use crate::dashboard::{OverviewStats, TabView};
use crate::session::Session;
use crate::tasks::Task;

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color_cfg = cfg.get("color").unwrap_or_else(|| "on".to_string());
        let color = match color_cfg.to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "1" => true,
            "off" | "no" | "false" | "0" => false,
            other => return Err(anyhow!("invalid color setting: {other}")),
        };

        Ok(Self { color })
    }

    pub fn notice(&self, message: &str) -> anyhow::Result<()> {
        writeln!(io::stdout().lock(), "{message}")?;
        Ok(())
    }

    #[tracing::instrument(skip(self, tasks))]
    pub fn print_tasks(&self, tasks: &[Task]) -> anyhow::Result<()> {
        self.write_tasks(io::stdout().lock(), tasks)
    }

    fn write_tasks<W: Write>(&self, mut out: W, tasks: &[Task]) -> anyhow::Result<()> {
        if tasks.is_empty() {
            writeln!(out, "No tasks yet.")?;
            return Ok(());
        }

        let headers = vec![
            "ID".to_string(),
            "Done".to_string(),
            "Title".to_string(),
            "Description".to_string(),
        ];
        let rows = tasks
            .iter()
            .map(|task| {
                let done = if task.completed {
                    self.paint("[x]", "32")
                } else {
                    "[ ]".to_string()
                };
                vec![
                    self.paint(&task.id, "33"),
                    done,
                    task.title.clone(),
                    task.description.clone(),
                ]
            })
            .collect();

        write_table(&mut out, headers, rows)
    }

    #[tracing::instrument(skip(self, catalogue))]
    pub fn print_plans(&self, catalogue: &PlanCatalogue, current: Option<Role>) -> anyhow::Result<()> {
        self.write_plans(io::stdout().lock(), catalogue, current)
    }

    fn write_plans<W: Write>(
        &self,
        mut out: W,
        catalogue: &PlanCatalogue,
        current: Option<Role>,
    ) -> anyhow::Result<()> {
        if catalogue.fallback {
            writeln!(out, "{}", self.paint("Failed to load subscription plans; showing defaults.", "31"))?;
        }

        let headers = vec![
            "Plan".to_string(),
            "Price".to_string(),
            "Description".to_string(),
            "Features".to_string(),
        ];
        let rows = catalogue
            .plans
            .iter()
            .map(|plan| {
                let name = if Some(plan.id) == current {
                    self.paint(&format!("{} (current)", plan.name), "32")
                } else {
                    plan.name.clone()
                };
                vec![
                    name,
                    format!("${}/mo", plan.price),
                    plan.description.clone(),
                    plan.features.join(", "),
                ]
            })
            .collect();

        write_table(&mut out, headers, rows)
    }

    pub fn print_analytics(&self, summary: &AnalyticsSummary, locked: bool) -> anyhow::Result<()> {
        self.write_analytics(io::stdout().lock(), summary, locked)
    }

    fn write_analytics<W: Write>(
        &self,
        mut out: W,
        summary: &AnalyticsSummary,
        locked: bool,
    ) -> anyhow::Result<()> {
        if locked {
            writeln!(out, "Analytics are available on the Pro and Enterprise plans.")?;
            writeln!(out, "Run `proddash plans` to compare plans and upgrade.")?;
            return Ok(());
        }
        if summary.placeholder {
            writeln!(out, "{}", self.paint("Showing sample data; analytics are unavailable.", "33"))?;
        }

        let headers = vec![
            "Day".to_string(),
            "Completed".to_string(),
            "Pending".to_string(),
        ];
        let rows = summary
            .buckets
            .iter()
            .map(|bucket| {
                vec![
                    bucket.day.clone(),
                    bucket.completed.to_string(),
                    bucket.pending.to_string(),
                ]
            })
            .collect();
        write_table(&mut out, headers, rows)
    }

    pub fn print_session(&self, session: &Session) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        writeln!(out, "id     {}", session.identity.id)?;
        writeln!(out, "name   {}", session.identity.name)?;
        writeln!(out, "email  {}", session.identity.email)?;
        writeln!(out, "plan   {}", self.paint(session.role.as_str(), "36"))?;
        Ok(())
    }

    fn write_overview<W: Write>(&self, mut out: W, overview: &OverviewStats) -> anyhow::Result<()> {
        writeln!(out, "{}", overview.greeting)?;
        writeln!(out, "total      {}", overview.stats.total)?;
        writeln!(out, "completed  {}", overview.stats.completed)?;
        writeln!(out, "pending    {}", overview.stats.pending)?;
        writeln!(out, "progress   {}%", overview.completion_percent())?;
        Ok(())
    }

    #[tracing::instrument(skip(self, view))]
    pub fn print_view(&self, view: &TabView) -> anyhow::Result<()> {
        match view {
            TabView::Overview(overview) => self.write_overview(io::stdout().lock(), overview),
            TabView::Analytics { summary, locked } => self.print_analytics(summary, *locked),
            TabView::Tasks { tasks, error } => {
                if let Some(error) = error {
                    self.notice(&self.paint(error, "31"))?;
                }
                self.print_tasks(tasks)
            }
            TabView::Settings(session) => self.print_session(session),
            TabView::Billing {
                catalogue,
                current_plan,
            } => self.print_plans(catalogue, Some(*current_plan)),
        }
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color || !io::stdout().is_terminal() {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths: Vec<usize> = headers
        .iter()
        .map(|header| UnicodeWidthStr::width(header.as_str()))
        .collect();

    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for (header, &width) in headers.iter().zip(&widths) {
        write!(writer, "{header:width$} ")?;
    }
    writeln!(writer)?;

    for &width in &widths {
        write!(writer, "{:-<width$} ", "")?;
    }
    writeln!(writer)?;

    for row in rows {
        for (cell, &width) in row.iter().take(column_count).zip(&widths) {
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = width.saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::fallback_plans;

    fn plain() -> Renderer {
        Renderer { color: false }
    }

    fn lines(buffer: Vec<u8>) -> Vec<String> {
        String::from_utf8(buffer)
            .expect("utf8")
            .lines()
            .map(|line| line.trim_end().to_string())
            .collect()
    }

    #[test]
    fn task_table_aligns_wide_characters() {
        let tasks = vec![
            Task {
                id: "1".into(),
                title: "買い物".into(),
                description: String::new(),
                completed: true,
            },
            Task {
                id: "42".into(),
                title: "Buy milk".into(),
                description: "2%".into(),
                completed: false,
            },
        ];
        let mut buffer = Vec::new();
        plain().write_tasks(&mut buffer, &tasks).expect("render");

        let lines = lines(buffer);
        assert_eq!(lines[0], "ID Done Title    Description");
        assert_eq!(lines[2], "1  [x]  買い物");
        assert_eq!(lines[3], "42 [ ]  Buy milk 2%");
    }

    #[test]
    fn fallback_catalogue_is_flagged() {
        let catalogue = PlanCatalogue {
            plans: fallback_plans(),
            fallback: true,
        };
        let mut buffer = Vec::new();
        plain()
            .write_plans(&mut buffer, &catalogue, Some(Role::Pro))
            .expect("render");

        let lines = lines(buffer);
        assert!(lines[0].starts_with("Failed to load subscription plans"));
        assert!(lines.iter().any(|line| line.starts_with("Pro (current)") && line.contains("$9/mo")));
    }

    #[test]
    fn locked_analytics_hides_data() {
        let mut buffer = Vec::new();
        plain()
            .write_analytics(&mut buffer, &AnalyticsSummary::placeholder(), true)
            .expect("render");
        let lines = lines(buffer);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("Pro and Enterprise"));
    }

    #[test]
    fn strip_ansi_removes_escape_sequences() {
        assert_eq!(strip_ansi("\x1b[33m42\x1b[0m"), "42");
    }
}
