// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Job parser: turns the received control and data files into an immutable,
// size-checked sequence of print lines.
//
// Control file lines start with a one-letter command (RFC 1179 §7):
//
//   H host   P owner   J job name   N source file name
//   f l o p r t n d g c v <file>   print <file> once per line
//
// Everything the client declares here is untrusted and only used for
// display and the nuisance filter.

use greenbar_core::error::{GreenbarError, Result};
use greenbar_core::types::JobId;

/// Printable columns on a print line.
pub const LINE_COLUMNS: usize = 132;

/// Control-file commands that print a data file.
const PRINT_COMMANDS: &[char] = &['c', 'd', 'f', 'g', 'l', 'n', 'o', 'p', 'r', 't', 'v'];

const TAB_STOP: usize = 8;

/// Metadata declared by the client in the control file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlFile {
    pub host: Option<String>,
    pub owner: Option<String>,
    pub job_name: Option<String>,
    pub source_name: Option<String>,
    /// Data file names referenced by print commands, once per command.
    pub print_files: Vec<String>,
}

impl ControlFile {
    /// How many print commands reference `data_file`.
    pub fn copies_of(&self, data_file: &str) -> u32 {
        self.print_files.iter().filter(|f| *f == data_file).count() as u32
    }
}

/// Parse a control file.  Unknown commands are ignored.
pub fn parse_control_file(bytes: &[u8]) -> ControlFile {
    let text = String::from_utf8_lossy(bytes);
    let mut control = ControlFile::default();

    for raw in text.lines() {
        let mut chars = raw.chars();
        let Some(cmd) = chars.next() else {
            continue;
        };
        let operand = chars.as_str().trim();
        if operand.is_empty() {
            continue;
        }

        match cmd {
            'H' => control.host = Some(operand.to_string()),
            'P' => control.owner = Some(operand.to_string()),
            'J' => control.job_name = Some(operand.to_string()),
            'N' => control.source_name = Some(operand.to_string()),
            c if PRINT_COMMANDS.contains(&c) => control.print_files.push(operand.to_string()),
            _ => {}
        }
    }

    control
}

/// One element of a job's print stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobLine {
    Text(String),
    /// Form feed: continue at the top of the next page.
    NewPage,
}

/// Split a data file into print lines.
///
/// CR is dropped, FF becomes a page break, TAB expands to the next 8-column
/// stop, and any other control character prints as a space.  Lines are cut
/// off at [`LINE_COLUMNS`].
pub fn parse_data_file(bytes: &[u8]) -> Vec<JobLine> {
    let text = String::from_utf8_lossy(bytes);
    let mut lines = Vec::new();
    let mut current = String::with_capacity(LINE_COLUMNS);
    let mut columns = 0usize;
    let mut pending = false;

    for ch in text.chars() {
        match ch {
            '\n' => {
                lines.push(JobLine::Text(std::mem::take(&mut current)));
                columns = 0;
                pending = false;
            }
            '\r' => {}
            '\x0c' => {
                if pending {
                    lines.push(JobLine::Text(std::mem::take(&mut current)));
                    columns = 0;
                    pending = false;
                }
                lines.push(JobLine::NewPage);
            }
            '\t' => {
                let spaces = TAB_STOP - columns % TAB_STOP;
                for _ in 0..spaces {
                    push(' ', &mut current, &mut columns);
                }
                pending = true;
            }
            c if c.is_control() => {
                push(' ', &mut current, &mut columns);
                pending = true;
            }
            c => {
                push(c, &mut current, &mut columns);
                pending = true;
            }
        }
    }

    if pending {
        lines.push(JobLine::Text(current));
    }
    lines
}

fn push(ch: char, current: &mut String, columns: &mut usize) {
    if *columns < LINE_COLUMNS {
        current.push(ch);
    }
    *columns += 1;
}

/// Limits applied while building a job.
#[derive(Debug, Clone, Copy)]
pub struct JobLimits {
    pub max_lines: usize,
    pub max_copies: u32,
}

/// A fully received, validated job ready for filtering and rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedJob {
    pub id: JobId,
    pub job_name: String,
    pub owner: Option<String>,
    pub host: Option<String>,
    pub copies: u32,
    pub lines: Vec<JobLine>,
}

impl ParsedJob {
    /// Combine the control and data files into a job, enforcing `limits`.
    ///
    /// The job name falls back to the source file name and then the data
    /// file name.  Fails with `JobTooLarge` when the printable lines across
    /// all copies exceed `limits.max_lines`.
    pub fn build(
        control: &ControlFile,
        data_file_name: &str,
        data: &[u8],
        limits: &JobLimits,
    ) -> Result<Self> {
        let copies = control
            .copies_of(data_file_name)
            .clamp(1, limits.max_copies.max(1));

        let lines = parse_data_file(data);
        let printable = lines
            .iter()
            .filter(|l| matches!(l, JobLine::Text(_)))
            .count();
        let total = printable.saturating_mul(copies as usize);
        if total > limits.max_lines {
            return Err(GreenbarError::JobTooLarge {
                lines: total,
                max: limits.max_lines,
            });
        }

        let job_name = control
            .job_name
            .clone()
            .or_else(|| control.source_name.clone())
            .unwrap_or_else(|| data_file_name.to_string());

        Ok(Self {
            id: JobId::new(),
            job_name,
            owner: control.owner.clone(),
            host: control.host.clone(),
            copies,
            lines,
        })
    }

    /// Printable lines in one copy.
    pub fn line_count(&self) -> usize {
        self.lines
            .iter()
            .filter(|l| matches!(l, JobLine::Text(_)))
            .count()
    }
}
