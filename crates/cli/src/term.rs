//! Terminal collaborators: an output sink printing tables and a presenter
//! that lists choices and takes picks from stdin.

use std::sync::Mutex;

use anyhow::{anyhow, bail, Result};
use kinspect_choice::{filter_choices, ChoicePresenter, PresentRequest};
use kinspect_core::{Cell, Choice, Output, OutputSink, OutputStyle};
use tracing::{debug, warn};

use crate::Format;

/// Column-aligned rendering. The first row is the header for table styles.
pub fn render_human(rows: &[Vec<Cell>], style: OutputStyle) -> String {
    if style == OutputStyle::Text {
        return rows.iter().map(|r| r.join(" ")).collect::<Vec<_>>().join("\n");
    }
    let cols = rows.iter().map(Vec::len).max().unwrap_or(0);
    let mut widths = vec![0usize; cols];
    for r in rows {
        for (i, c) in r.iter().enumerate() {
            widths[i] = widths[i].max(c.chars().count());
        }
    }
    let mut lines = Vec::with_capacity(rows.len());
    for r in rows {
        let mut line = String::new();
        for (i, c) in r.iter().enumerate() {
            if i + 1 == r.len() {
                line.push_str(c);
            } else {
                line.push_str(&format!("{:<w$}  ", c, w = widths[i]));
            }
        }
        lines.push(line.trim_end().to_string());
    }
    lines.join("\n")
}

pub struct TerminalSink {
    format: Format,
}

impl TerminalSink {
    pub fn new(format: Format) -> Self { Self { format } }

    fn render(&self, rows: &[Vec<Cell>], style: OutputStyle) -> Result<String> {
        let out = Output { rows: rows.to_vec(), style };
        Ok(match self.format {
            Format::Human => render_human(rows, style),
            Format::Json => serde_json::to_string_pretty(&out)?,
            Format::Yaml => serde_yaml::to_string(&out)?,
        })
    }
}

impl OutputSink for TerminalSink {
    fn output(&self, rows: &[Vec<Cell>], style: OutputStyle) {
        match self.render(rows, style) {
            Ok(s) => println!("{}", s),
            Err(e) => warn!(error = %e, "output: render failed"),
        }
    }
}

/// Parse a pick line such as `1,3` or `2 4` (1-based) into indices.
pub fn parse_picks(line: &str, available: usize, min: usize, max: Option<usize>) -> Result<Vec<usize>> {
    let mut picks = Vec::new();
    for tok in line.split(|c: char| c == ',' || c.is_whitespace()).filter(|t| !t.is_empty()) {
        let n: usize = tok.parse().map_err(|_| anyhow!("not a number: {}", tok))?;
        if n == 0 || n > available {
            bail!("pick {} out of range 1..={}", n, available);
        }
        if !picks.contains(&(n - 1)) {
            picks.push(n - 1);
        }
    }
    if picks.len() < min {
        bail!("pick at least {}", min);
    }
    if let Some(max) = max {
        if picks.len() > max {
            bail!("pick at most {}", max);
        }
    }
    Ok(picks)
}

/// Prints presented choices to stderr and remembers them so the caller can
/// map the user's numbered picks back.
#[derive(Default)]
pub struct TerminalPresenter {
    filter: Option<String>,
    shown: Mutex<Option<(PresentRequest, Vec<Choice>)>>,
}

impl TerminalPresenter {
    pub fn new(filter: Option<String>) -> Self { Self { filter, shown: Mutex::new(None) } }

    /// The last presented request together with the (filtered) list shown.
    pub fn take_shown(&self) -> Option<(PresentRequest, Vec<Choice>)> {
        self.shown.lock().ok().and_then(|mut s| s.take())
    }
}

impl ChoicePresenter for TerminalPresenter {
    fn init_choices(&self, request: PresentRequest) {
        let listed = match self.filter.as_deref() {
            Some(q) => filter_choices(&request.choices, q),
            None => request.choices.clone(),
        };
        eprintln!("{}:", request.prompt);
        for (i, c) in listed.iter().enumerate() {
            let mark = if request.previous_selections.contains(c) { "*" } else { " " };
            eprintln!("{}{:>3}) {}", mark, i + 1, c.display.iter().filter(|s| !s.is_empty()).cloned().collect::<Vec<_>>().join("  "));
        }
        if listed.is_empty() {
            eprintln!("  (nothing to choose from)");
        }
        if let Ok(mut s) = self.shown.lock() {
            *s = Some((request, listed));
        }
    }

    fn skip_choices(&self) { debug!("choice: resolved without prompting"); }

    fn cancel_choice(&self) { eprintln!("selection cancelled"); }
}
