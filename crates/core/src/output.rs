//! Tabular output produced by comparison routines.
//!
//! Rows are plain display strings; the header row comes first. Formatting is
//! left entirely to the sink.

use serde::{Deserialize, Serialize};

pub type Cell = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputStyle {
    Table,
    Compare,
    Text,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Output {
    pub rows: Vec<Vec<Cell>>,
    pub style: OutputStyle,
}

impl Output {
    pub fn new(style: OutputStyle, header: Vec<Cell>) -> Self {
        Self { rows: vec![header], style }
    }

    /// Single-message output, used when there is nothing to tabulate.
    pub fn message(text: impl Into<String>) -> Self {
        Self { rows: vec![vec![text.into()]], style: OutputStyle::Text }
    }

    pub fn push_row(&mut self, row: Vec<Cell>) { self.rows.push(row); }

    pub fn header(&self) -> &[Cell] { self.rows.first().map(Vec::as_slice).unwrap_or(&[]) }

    pub fn body(&self) -> &[Vec<Cell>] { self.rows.get(1..).unwrap_or(&[]) }

    pub fn emit(&self, sink: &dyn OutputSink) { sink.output(&self.rows, self.style); }
}

/// Consumer of comparison output (terminal, UI panel, test recorder).
pub trait OutputSink: Send + Sync {
    fn output(&self, rows: &[Vec<Cell>], style: OutputStyle);
}
