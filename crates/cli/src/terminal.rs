use std::io::{self, Write};

use anyhow::Result;
use crossterm::{
    execute,
    style::{Color, Print, ResetColor, SetForegroundColor},
};
use harness_scheduler::dispatch::Arity;
use harness_scheduler::BatchReport;

/// Color scheme for terminal output.
struct Colors;

impl Colors {
    const PASS: Color = Color::Green;
    const FAIL: Color = Color::Red;
    const DIM: Color = Color::DarkGrey;
    const HEADER: Color = Color::Magenta;
}

/// Human-facing output. Logs go through `tracing`; this is the final table.
pub struct Terminal;

impl Terminal {
    pub fn new() -> Self {
        Self
    }

    pub fn print_banner(&self, plan: &str, units: usize, capacity: usize) -> Result<()> {
        let mut stdout = io::stdout();
        execute!(
            stdout,
            SetForegroundColor(Colors::HEADER),
            Print("harness"),
            ResetColor,
            Print(format!(" - {units} units from {plan}\n")),
            SetForegroundColor(Colors::DIM),
            Print(format!(
                "At most {capacity} in flight. Ctrl+C fails units not yet admitted, twice aborts running ones.\n"
            )),
            Print("---\n"),
            ResetColor,
        )?;
        stdout.flush()?;
        Ok(())
    }

    /// One line per unit in plan order, then the summary.
    pub fn print_report(&self, report: &BatchReport) -> Result<()> {
        let mut stdout = io::stdout();
        let width = report
            .entries
            .iter()
            .map(|o| o.unit_name.len())
            .max()
            .unwrap_or(0);

        for outcome in &report.entries {
            let (label, color) = if outcome.passed {
                ("PASS", Colors::PASS)
            } else {
                ("FAIL", Colors::FAIL)
            };
            execute!(
                stdout,
                SetForegroundColor(color),
                Print(label),
                ResetColor,
                Print(format!(
                    "  {:<width$}  {:>4}s",
                    outcome.unit_name,
                    outcome.duration_secs,
                    width = width
                )),
            )?;
            if let Some(err) = &outcome.error {
                execute!(
                    stdout,
                    SetForegroundColor(Colors::DIM),
                    Print(format!("  {err}")),
                    ResetColor
                )?;
            }
            execute!(stdout, Print("\n"))?;
        }

        let s = &report.summary;
        let color = if s.all_passed() { Colors::PASS } else { Colors::FAIL };
        execute!(
            stdout,
            Print("---\n"),
            SetForegroundColor(color),
            Print(format!("{} passed, {} failed", s.passed, s.failed)),
            ResetColor,
            SetForegroundColor(Colors::DIM),
            Print(format!(
                " ({} unit-seconds, {:.1}s wall clock)\n",
                s.total_unit_seconds, s.wall_clock_seconds
            )),
            ResetColor,
        )?;
        stdout.flush()?;
        Ok(())
    }

    pub fn print_handlers(&self, handlers: &[(String, Option<Arity>)]) -> Result<()> {
        let mut stdout = io::stdout();
        for (name, arity) in handlers {
            execute!(stdout, Print(format!("{name:<12}")))?;
            if let Some(arity) = arity {
                execute!(
                    stdout,
                    SetForegroundColor(Colors::DIM),
                    Print(format!("takes {arity} arguments")),
                    ResetColor
                )?;
            }
            execute!(stdout, Print("\n"))?;
        }
        stdout.flush()?;
        Ok(())
    }

    pub fn print_error(&self, msg: &str) -> Result<()> {
        let mut stderr = io::stderr();
        execute!(
            stderr,
            SetForegroundColor(Colors::FAIL),
            Print(format!("Error: {msg}\n")),
            ResetColor
        )?;
        Ok(())
    }
}
