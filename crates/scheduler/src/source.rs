//! Work-unit sources.
//!
//! A batch is an ordered list of [`WorkUnit`]s, consumed once so the driver
//! knows the batch size before anything is submitted. Two input shapes are
//! supported:
//!
//! - a structured TOML plan of `[[unit]]` tables, and
//! - tabular rows `[id, name, handler1, handler2, ...]`, where each non-empty
//!   handler column becomes its own unit with the single argument `name`.
//!
//! Unit names are unique within a plan.

use std::collections::HashSet;
use std::path::Path;

use harness_core::WorkUnit;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Column holding the unit name in a tabular row.
const NAME_COLUMN: usize = 1;
/// First handler column in a tabular row.
const FIRST_HANDLER_COLUMN: usize = 2;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("plan parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("unit #{0} has an empty name")]
    EmptyName(usize),
    #[error("unit '{0}' has an empty handler name")]
    EmptyHandler(String),
    #[error("unit name '{0}' appears more than once")]
    DuplicateName(String),
}

/// Structured batch plan.
///
/// ```toml
/// [[unit]]
/// name = "TestCase1"
/// handler = "command"
/// args = ["cargo", "--version"]
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Plan {
    #[serde(rename = "unit", default)]
    pub units: Vec<WorkUnit>,
}

impl Plan {
    pub fn from_toml(s: &str) -> Result<Self, SourceError> {
        let plan: Plan = toml::from_str(s)?;
        plan.validate()?;
        Ok(plan)
    }

    pub fn from_file(path: &Path) -> Result<Self, SourceError> {
        let content = std::fs::read_to_string(path)?;
        let plan = Self::from_toml(&content)?;
        debug!(path = %path.display(), units = plan.units.len(), "loaded plan");
        Ok(plan)
    }

    /// Build a plan from tabular rows, see [`expand_rows`].
    pub fn from_rows(rows: &[Vec<String>]) -> Self {
        Self {
            units: expand_rows(rows),
        }
    }

    /// Load a comma-separated table. Blank lines and lines starting with `#`
    /// are skipped; cells are trimmed. A cell wrapped in double quotes may
    /// contain commas, and `""` inside it is a literal quote. Quoted cells
    /// cannot span lines.
    pub fn from_table_file(path: &Path) -> Result<Self, SourceError> {
        let content = std::fs::read_to_string(path)?;
        let rows = parse_table(&content);
        let plan = Self::from_rows(&rows);
        debug!(path = %path.display(), rows = rows.len(), units = plan.units.len(), "loaded table");
        Ok(plan)
    }

    /// Load by extension: `.toml` is a structured plan, anything else a table.
    pub fn load(path: &Path) -> Result<Self, SourceError> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_file(path),
            _ => Self::from_table_file(path),
        }
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    fn validate(&self) -> Result<(), SourceError> {
        let mut seen = HashSet::new();
        for (i, unit) in self.units.iter().enumerate() {
            if unit.name.trim().is_empty() {
                return Err(SourceError::EmptyName(i));
            }
            if unit.handler.trim().is_empty() {
                return Err(SourceError::EmptyHandler(unit.name.clone()));
            }
            if !seen.insert(unit.name.as_str()) {
                return Err(SourceError::DuplicateName(unit.name.clone()));
            }
        }
        Ok(())
    }
}

/// Expand tabular rows into work units, preserving row then column order.
///
/// A row with a single handler column yields a unit called `name`; a row with
/// several yields `name::handler` for each. Every unit gets the argument
/// `name`. A name already taken earlier in the table gets a `#2`, `#3`, ...
/// suffix. Rows with no name column, or an empty name, are skipped with a
/// warning.
pub fn expand_rows(rows: &[Vec<String>]) -> Vec<WorkUnit> {
    let mut units = Vec::new();
    let mut taken = HashSet::new();

    for (i, row) in rows.iter().enumerate() {
        let name = match row.get(NAME_COLUMN).map(|s| s.trim()) {
            Some(name) if !name.is_empty() => name,
            _ => {
                warn!(row = i, "row has no unit name, skipping");
                continue;
            }
        };

        let handlers: Vec<&str> = row
            .iter()
            .skip(FIRST_HANDLER_COLUMN)
            .map(|s| s.trim())
            .filter(|h| !h.is_empty())
            .collect();

        for handler in &handlers {
            let base = if handlers.len() == 1 {
                name.to_string()
            } else {
                format!("{name}::{handler}")
            };
            let unit_name = unique_name(&mut taken, base);
            units.push(WorkUnit::new(unit_name, *handler, vec![name.to_string()]));
        }
    }

    units
}

fn unique_name(taken: &mut HashSet<String>, base: String) -> String {
    if taken.insert(base.clone()) {
        return base;
    }
    let mut n = 2;
    loop {
        let candidate = format!("{base}#{n}");
        if taken.insert(candidate.clone()) {
            warn!(name = %base, renamed = %candidate, "duplicate unit name in table");
            return candidate;
        }
        n += 1;
    }
}

fn parse_table(content: &str) -> Vec<Vec<String>> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(split_cells)
        .collect()
}

/// Split one line on commas outside double quotes.
fn split_cells(line: &str) -> Vec<String> {
    let mut cells = Vec::new();
    let mut cell = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if quoted && chars.peek() == Some(&'"') => {
                cell.push('"');
                chars.next();
            }
            '"' => quoted = !quoted,
            ',' if !quoted => cells.push(std::mem::take(&mut cell).trim().to_string()),
            _ => cell.push(c),
        }
    }
    cells.push(cell.trim().to_string());
    cells
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn expands_each_handler_column() {
        let rows = vec![
            row(&["1", "TestCase1", "method1", "", "method3"]),
            row(&["2", "TestCase2", "method2"]),
        ];
        let units = expand_rows(&rows);

        assert_eq!(
            units,
            vec![
                WorkUnit::new("TestCase1::method1", "method1", vec!["TestCase1".into()]),
                WorkUnit::new("TestCase1::method3", "method3", vec!["TestCase1".into()]),
                WorkUnit::new("TestCase2", "method2", vec!["TestCase2".into()]),
            ]
        );
    }

    #[test]
    fn repeated_rows_get_distinct_names() {
        let rows = vec![
            row(&["1", "TestCase1", "method1"]),
            row(&["2", "TestCase1", "method1"]),
            row(&["3", "TestCase1", "method1", "method1"]),
        ];
        let names: Vec<String> = expand_rows(&rows).into_iter().map(|u| u.name).collect();
        assert_eq!(
            names,
            vec![
                "TestCase1",
                "TestCase1#2",
                "TestCase1::method1",
                "TestCase1::method1#2",
            ]
        );
    }

    #[test]
    fn quoted_cells_keep_commas() {
        assert_eq!(
            split_cells(r#"1, "Login, then logout", method1,"say ""hi""""#),
            vec!["1", "Login, then logout", "method1", r#"say "hi""#]
        );
        assert_eq!(split_cells("a,,b"), vec!["a", "", "b"]);
    }

    #[test]
    fn short_and_nameless_rows_are_skipped() {
        let rows = vec![row(&["1"]), row(&["2", "  ", "method1"]), row(&["3", "TestCase3"])];
        assert!(expand_rows(&rows).is_empty());
    }

    #[test]
    fn parse_structured_plan() {
        let toml = r#"
[[unit]]
name = "build"
handler = "command"
args = ["cargo", "build"]

[[unit]]
name = "wait"
handler = "sleep"
args = ["50"]

[[unit]]
name = "noargs"
handler = "fail"
"#;
        let plan = Plan::from_toml(toml).unwrap();
        assert_eq!(plan.len(), 3);
        assert_eq!(plan.units[0].args, vec!["cargo", "build"]);
        assert_eq!(plan.units[1].handler, "sleep");
        assert!(plan.units[2].args.is_empty());
    }

    #[test]
    fn empty_plan_is_valid() {
        let plan = Plan::from_toml("").unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn duplicate_plan_names_rejected() {
        let toml = r#"
[[unit]]
name = "login"
handler = "command"
args = ["true"]

[[unit]]
name = "login"
handler = "fail"
"#;
        assert!(matches!(
            Plan::from_toml(toml),
            Err(SourceError::DuplicateName(ref n)) if n == "login"
        ));
    }

    #[test]
    fn empty_name_rejected() {
        let toml = r#"
[[unit]]
name = ""
handler = "fail"
"#;
        assert!(matches!(Plan::from_toml(toml), Err(SourceError::EmptyName(0))));
    }

    #[test]
    fn malformed_plan_rejected() {
        assert!(matches!(
            Plan::from_toml("[[unit]]\nname = 3"),
            Err(SourceError::Parse(_))
        ));
    }

    #[test]
    fn table_file_skips_comments() {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(file, "# id,name,handlers...").unwrap();
        writeln!(file, "1, TestCase1, method1, method2").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "2,TestCase2,,method2").unwrap();

        let plan = Plan::load(file.path()).unwrap();
        let names: Vec<(&str, &str)> = plan
            .units
            .iter()
            .map(|u| (u.name.as_str(), u.handler.as_str()))
            .collect();
        assert_eq!(
            names,
            vec![
                ("TestCase1::method1", "method1"),
                ("TestCase1::method2", "method2"),
                ("TestCase2", "method2"),
            ]
        );
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = Plan::load(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, SourceError::Io(_)));
    }
}
