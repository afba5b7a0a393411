//! Single-line status output redrawn in place.

use std::fmt::Write as _;
use std::io::{self, Write};

use crossterm::cursor::MoveToColumn;
use crossterm::terminal::{self, Clear, ClearType};
use crossterm::Command;

use crate::util::truncate_to_width;

const FALLBACK_COLUMNS: usize = 80;

/// Control sequence that returns to column 0 and clears the current line.
pub fn clear_line_sequence() -> String {
    let mut seq = String::new();
    let _ = MoveToColumn(0).write_ansi(&mut seq);
    let _ = Clear(ClearType::CurrentLine).write_ansi(&mut seq);
    seq
}

fn columns() -> usize {
    terminal::size().map_or(FALLBACK_COLUMNS, |(cols, _)| usize::from(cols))
}

/// Text for one status redraw, cut to the terminal width.
pub fn render_status_line(title: &str, columns: usize) -> String {
    let flat = title.replace('\n', "");
    let mut line = clear_line_sequence();
    let _ = write!(line, "{}", truncate_to_width(&flat, columns.saturating_sub(1)));
    line
}

/// Overwrite the current stdout line with `title`.
pub fn write_status_line(title: &str) {
    let mut out = io::stdout().lock();
    let _ = out.write_all(render_status_line(title, columns()).as_bytes());
    let _ = out.flush();
}

/// Leave the status line and move to a fresh one.
pub fn finish_status_line() {
    let mut out = io::stdout().lock();
    let _ = out.write_all(b"\n");
    let _ = out.flush();
}
