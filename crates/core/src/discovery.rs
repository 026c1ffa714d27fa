//! Heuristics run on freshly loaded text.

use rustc_hash::FxHashMap;
use strum_macros::{AsRefStr, Display};

use crate::cookie::extract_line;

/// Only this many bytes of a document are examined.
const SCAN_LIMIT: usize = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr)]
pub enum EndOfLine {
    #[strum(serialize = "LF")]
    Lf,
    #[strum(serialize = "CR")]
    Cr,
    #[strum(serialize = "CRLF")]
    CrLf,
}

impl EndOfLine {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndOfLine::Lf => "\n",
            EndOfLine::Cr => "\r",
            EndOfLine::CrLf => "\r\n",
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LineEndCounts {
    pub cr: usize,
    pub lf: usize,
    pub crlf: usize,
}

pub fn count_line_ends(text: &[u8]) -> LineEndCounts {
    let mut counts = LineEndCounts::default();
    let mut prev = b' ';

    for (i, &ch) in text.iter().enumerate() {
        let next = text.get(i + 1).copied().unwrap_or(0);
        match ch {
            b'\r' if next == b'\n' => counts.crlf += 1,
            b'\r' => counts.cr += 1,
            b'\n' if prev != b'\r' => counts.lf += 1,
            b'\n' => {}
            _ if i > SCAN_LIMIT => break,
            _ => {}
        }
        prev = ch;
    }

    counts
}

/// Line end style used by most lines, if any kind dominates
pub fn discover_eol(text: &[u8]) -> Option<EndOfLine> {
    let LineEndCounts { cr, lf, crlf } = count_line_ends(text);
    let wins = |a: usize, b: usize, c: usize| (a >= b && a > c) || (a > b && a >= c);

    if wins(lf, cr, crlf) {
        Some(EndOfLine::Lf)
    } else if wins(cr, lf, crlf) {
        Some(EndOfLine::Cr)
    } else if wins(crlf, lf, cr) {
        Some(EndOfLine::CrLf)
    } else {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Indent {
    Tabs,
    Spaces(u8),
}

/// Guess indentation from the differences in leading spaces between
/// consecutive lines.
pub fn discover_indent(text: &[u8]) -> Option<Indent> {
    let text = &text[..text.len().min(SCAN_LIMIT)];
    // Index 0 counts tab indented lines
    let mut sizes = [0usize; 9];
    let mut newline = true;
    let mut indent: i64 = 0;
    let mut prev_indent: i64 = 0;
    let mut prev_size: Option<usize> = None;

    for &ch in text {
        if ch == b'\r' || ch == b'\n' {
            indent = 0;
            newline = true;
        } else if newline && ch == b' ' {
            indent += 1;
        } else if newline {
            if indent != 0 {
                if indent == prev_indent && prev_size.is_some() {
                    if let Some(size) = prev_size {
                        sizes[size] += 1;
                    }
                } else if indent > prev_indent && prev_indent != -1 {
                    let diff = indent - prev_indent;
                    if diff <= 8 {
                        let size = diff as usize;
                        prev_size = Some(size);
                        sizes[size] += 1;
                    } else {
                        prev_size = None;
                    }
                }
                prev_indent = indent;
            } else if ch == b'\t' {
                sizes[0] += 1;
                prev_indent = -1;
            } else {
                prev_indent = 0;
            }
            newline = false;
        }
    }

    let mut top: Option<usize> = None;
    for (size, &count) in sizes.iter().enumerate() {
        let better = match top {
            None => count != 0,
            Some(t) => count > sizes[t],
        };
        if better {
            top = Some(size);
        }
    }

    match top? {
        0 => Some(Indent::Tabs),
        n => Some(Indent::Spaces(n as u8)),
    }
}

/// Language hinted by the first line: an XML declaration or a `#!` line
/// whose words are looked up in `shbang`. The last word found wins.
pub fn discover_language(text: &[u8], shbang: &FxHashMap<String, String>) -> Option<String> {
    let line = extract_line(text);

    if line.starts_with(b"<?xml") {
        return Some("xml".into());
    }

    let rest = line.strip_prefix(b"#!")?;
    let rest = String::from_utf8_lossy(rest);
    rest.split(|c: char| c == '/' || c == '\\' || c.is_whitespace())
        .filter(|word| !word.is_empty())
        .filter_map(|word| shbang.get(word))
        .last()
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eol_majority() {
        assert_eq!(discover_eol(b"a\nb\nc\r\n"), Some(EndOfLine::Lf));
        assert_eq!(discover_eol(b"a\r\nb\r\nc\n"), Some(EndOfLine::CrLf));
        assert_eq!(discover_eol(b"a\rb\r"), Some(EndOfLine::Cr));
        assert_eq!(discover_eol(b"no line ends"), None);
    }

    #[test]
    fn eol_ties() {
        // LF wins a tie with CR when it beats CRLF
        assert_eq!(discover_eol(b"a\nb\r"), Some(EndOfLine::Lf));
        // All equal, nothing dominates
        assert_eq!(discover_eol(b"a\nb\rc\r\n"), None);
    }

    #[test]
    fn counts() {
        let counts = count_line_ends(b"\r\n\n\r\r\n");
        assert_eq!(
            counts,
            LineEndCounts {
                cr: 1,
                lf: 1,
                crlf: 2
            }
        );
    }

    #[test]
    fn indent_spaces() {
        let text = b"fn main() {\n    let a = 1;\n    if a {\n        b();\n    }\n}\n";
        assert_eq!(discover_indent(text), Some(Indent::Spaces(4)));
    }

    #[test]
    fn indent_tabs() {
        let text = b"fn main() {\n\tlet a = 1;\n\tlet b = 2;\n\tlet c = 3;\n}\n";
        assert_eq!(discover_indent(text), Some(Indent::Tabs));
    }

    #[test]
    fn indent_unknown() {
        assert_eq!(discover_indent(b"a\nb\nc\n"), None);
    }

    #[test]
    fn language_from_first_line() {
        let mut shbang = FxHashMap::default();
        shbang.insert("python3".to_string(), "py".to_string());
        shbang.insert("sh".to_string(), "bash".to_string());

        assert_eq!(
            discover_language(b"#!/usr/bin/env python3\nprint()\n", &shbang),
            Some("py".into())
        );
        assert_eq!(discover_language(b"#! /bin/sh -e\n", &shbang), Some("bash".into()));
        assert_eq!(discover_language(b"<?xml version=\"1.0\"?>", &shbang), Some("xml".into()));
        assert_eq!(discover_language(b"#!/usr/bin/perl\n", &shbang), None);
        assert_eq!(discover_language(b"plain\n", &shbang), None);
    }
}
