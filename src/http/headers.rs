//! Ordered, case-insensitive header container.
//!
//! # Responsibilities
//! - Parse a header block, merging repeats and continuation lines
//! - Keep `Cookie`/`Set-Cookie` lines apart, verbatim and unmerged
//! - Serialize headers then cookies then the blank terminator line
//!
//! # Design Decisions
//! - Lookups fold case, storage keeps the name as last written
//! - Insertion order is the serialization order
//! - A malformed line is logged and dropped, never fatal

use std::io;
use tokio::io::{AsyncBufRead, AsyncWrite, AsyncWriteExt};

use crate::http::line::{read_line, write_line};

/// Upper bound on lines in one header block.
const MAX_HEADER_LINES: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Field {
    name: String,
    value: String,
}

/// Header or trailer block of one message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    fields: Vec<Field>,
    cookies: Vec<String>,
}

/// `Cookie` and `Set-Cookie` never merge.
pub fn is_cookie_header(name: &str) -> bool {
    name.eq_ignore_ascii_case("Set-Cookie") || name.eq_ignore_ascii_case("Cookie")
}

/// Value part of a raw `Name: value` cookie line.
pub fn cookie_value(line: &str) -> &str {
    match line.find(':') {
        Some(pos) => trim(&line[pos + 1..]),
        None => "",
    }
}

fn trim(s: &str) -> &str {
    s.trim_matches(|c: char| c <= ' ')
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.fields
            .iter()
            .position(|f| f.name.eq_ignore_ascii_case(name))
    }

    /// Merged value of `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.position(name).map(|i| self.fields[i].value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Merged value split on commas, surrounding blanks trimmed.
    pub fn value_list(&self, name: &str) -> Option<Vec<&str>> {
        let value = self.get(name)?;
        let mut list: Vec<&str> = value
            .split(',')
            .map(|v| v.trim_matches([' ', '\t']))
            .collect();
        while list.len() > 1 && list.last().is_some_and(|v| v.is_empty()) {
            list.pop();
        }
        Some(list)
    }

    /// Set `name` to `value`, replacing an existing entry in place.
    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.position(name) {
            Some(i) => {
                self.fields[i] = Field {
                    name: name.to_string(),
                    value,
                };
            }
            None => self.fields.push(Field {
                name: name.to_string(),
                value,
            }),
        }
    }

    /// Delete `name`, returning its value.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.position(name).map(|i| self.fields.remove(i).value)
    }

    /// Raw `Name: value` cookie lines in arrival order.
    pub fn cookies(&self) -> &[String] {
        &self.cookies
    }

    pub fn cookies_mut(&mut self) -> &mut Vec<String> {
        &mut self.cookies
    }

    /// Regular fields as `(name, value)` pairs in insertion order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields
            .iter()
            .map(|f| (f.name.as_str(), f.value.as_str()))
    }

    /// Formatted `Name: value` lines, cookies after regular headers.
    pub fn lines(&self) -> impl Iterator<Item = String> + '_ {
        self.fields
            .iter()
            .map(|f| format!("{}: {}", f.name, f.value))
            .chain(self.cookies.iter().cloned())
    }

    pub fn len(&self) -> usize {
        self.fields.len() + self.cookies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.cookies.is_empty()
    }

    pub fn clear(&mut self) {
        self.fields.clear();
        self.cookies.clear();
    }

    /// Read lines up to and including the blank line, replacing the contents.
    pub async fn read<R>(&mut self, reader: &mut R) -> io::Result<()>
    where
        R: AsyncBufRead + Unpin + ?Sized,
    {
        let mut lines = Vec::new();
        loop {
            let line = read_line(reader).await?;
            if line.is_empty() {
                break;
            }
            if lines.len() == MAX_HEADER_LINES {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "too many header lines",
                ));
            }
            lines.push(line);
        }
        self.clear();
        self.extend_from_lines(&lines);
        Ok(())
    }

    /// Merge raw header lines (without terminators) into this block.
    pub fn extend_from_lines<S: AsRef<str>>(&mut self, lines: &[S]) {
        let mut i = 0;
        while i < lines.len() {
            let line = trim(lines[i].as_ref());
            i += 1;

            let pos = match line.find(':') {
                Some(pos) if pos >= 1 => pos,
                _ => {
                    tracing::warn!(line = %line, "Dropping malformed header line");
                    continue;
                }
            };

            let name = line[..pos].trim_end();
            let mut value = trim(&line[pos + 1..]).to_string();
            let empty_value = value.is_empty();
            let cookie = is_cookie_header(name);
            let existing = if cookie { None } else { self.position(name) };

            while let Some(next) = lines.get(i).map(|l| l.as_ref()) {
                if !next.starts_with([' ', '\t']) {
                    break;
                }
                value.push(' ');
                value.push_str(trim(next));
                i += 1;
            }

            if cookie {
                if !empty_value {
                    self.cookies.push(format!("{name}: {value}"));
                }
            } else if let Some(idx) = existing {
                if !empty_value {
                    let merged = &mut self.fields[idx].value;
                    merged.push_str(", ");
                    merged.push_str(&value);
                }
            } else {
                self.fields.push(Field {
                    name: name.to_string(),
                    value,
                });
            }
        }
    }

    /// Write all lines, the blank terminator line, then flush.
    pub async fn write<W>(&self, writer: &mut W) -> io::Result<()>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        for line in self.lines() {
            write_line(writer, &line).await?;
        }
        write_line(writer, "").await?;
        writer.flush().await
    }
}
