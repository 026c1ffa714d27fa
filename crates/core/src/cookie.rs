//! Detection of `coding: utf-8` style cookies at the start of a file.

use crate::UniMode;

const CODING: &[u8] = b"coding";

/// Returns the first line of `buf` including its terminator. A line ends at
/// `\r`, `\n` or `\r\n`.
pub fn extract_line(buf: &[u8]) -> &[u8] {
    let mut end = 0;
    while end < buf.len() && buf[end] != b'\r' && buf[end] != b'\n' {
        end += 1;
    }

    if end + 1 < buf.len() && buf[end] == b'\r' && buf[end + 1] == b'\n' {
        end += 1;
    }

    if end < buf.len() {
        end += 1;
    }

    &buf[..end]
}

/// Scan the first line, and the second if the first has no cookie, for a
/// cookie declaring UTF-8.
pub fn coding_cookie_value(buf: &[u8]) -> UniMode {
    let first = extract_line(buf);
    let mode = cookie_value(first);
    if mode != UniMode::Raw8Bit {
        return mode;
    }

    let second = extract_line(&buf[first.len()..]);
    cookie_value(second)
}

fn cookie_value(line: &[u8]) -> UniMode {
    let Some(start) = line.windows(CODING.len()).position(|w| w == CODING) else {
        return UniMode::Raw8Bit;
    };

    let mut pos = start + CODING.len();
    if !matches!(line.get(pos), Some(b':') | Some(b'=')) {
        return UniMode::Raw8Bit;
    }
    pos += 1;

    if matches!(line.get(pos), Some(b'"') | Some(b'\'')) {
        pos += 1;
    }

    while pos < line.len() && matches!(line[pos], b' ' | b'\t') {
        pos += 1;
    }

    let mut end = pos;
    while end < line.len() && is_encoding_char(line[end]) {
        end += 1;
    }

    if line[pos..end].eq_ignore_ascii_case(b"utf-8") {
        UniMode::Cookie
    } else {
        UniMode::Raw8Bit
    }
}

fn is_encoding_char(ch: u8) -> bool {
    ch.is_ascii_alphanumeric() || matches!(ch, b'_' | b'-' | b'.')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emacs_style_first_line() {
        let text = b"# -*- coding: UTF-8 -*-\nprint('x')\n";
        assert_eq!(coding_cookie_value(text), UniMode::Cookie);
    }

    #[test]
    fn second_line_after_shebang() {
        let text = b"#!/usr/bin/env python\r\n# coding=utf-8\r\n";
        assert_eq!(coding_cookie_value(text), UniMode::Cookie);
    }

    #[test]
    fn third_line_is_ignored() {
        let text = b"one\ntwo\n# coding: utf-8\n";
        assert_eq!(coding_cookie_value(text), UniMode::Raw8Bit);
    }

    #[test]
    fn quoted_value() {
        assert_eq!(coding_cookie_value(b"<?xml coding=\"utf-8\"?>"), UniMode::Cookie);
        assert_eq!(coding_cookie_value(b"coding:'utf-8'"), UniMode::Cookie);
    }

    #[test]
    fn other_encodings_and_malformed() {
        assert_eq!(coding_cookie_value(b"# coding: latin-1\n"), UniMode::Raw8Bit);
        assert_eq!(coding_cookie_value(b"# coding utf-8\n"), UniMode::Raw8Bit);
        assert_eq!(coding_cookie_value(b"# coding: utf-8y\n"), UniMode::Raw8Bit);
        assert_eq!(coding_cookie_value(b"# coding:"), UniMode::Raw8Bit);
        assert_eq!(coding_cookie_value(b""), UniMode::Raw8Bit);
    }

    #[test]
    fn space_before_quote_keeps_quote_in_value() {
        // Quote is only skipped directly after the separator
        assert_eq!(coding_cookie_value(b"coding: \"utf-8\""), UniMode::Raw8Bit);
    }

    #[test]
    fn line_terminators() {
        assert_eq!(extract_line(b"ab\r\ncd"), b"ab\r\n");
        assert_eq!(extract_line(b"ab\rcd"), b"ab\r");
        assert_eq!(extract_line(b"ab\ncd"), b"ab\n");
        assert_eq!(extract_line(b"ab"), b"ab");
        assert_eq!(extract_line(b"\n\n"), b"\n");
        assert_eq!(extract_line(b""), b"");
    }
}
