// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2025-present Datadog, Inc.

/// Tags longer than this are truncated.
pub const MAX_TAG_LENGTH: usize = 200;

/// Normalize a full `key:value` tag or a tag key. Leading characters that are
/// not letters are dropped.
pub fn normalize_tag(tag: &str) -> String {
    normalize(tag, true)
}

/// Normalize a tag value. Unlike keys, values may start with a digit.
pub fn normalize_tag_value(value: &str) -> String {
    normalize(value, false)
}

fn is_valid_char(c: char) -> bool {
    c.is_alphabetic() || c.is_numeric() || matches!(c, ':' | '.' | '/' | '-')
}

fn lowercase(c: char) -> char {
    // Only keep the lowercased form when it is a single character.
    let mut lower = c.to_lowercase();
    match (lower.next(), lower.next()) {
        (Some(l), None) => l,
        _ => c,
    }
}

fn normalize(input: &str, trim_invalid_start: bool) -> String {
    if is_normalized_ascii(input, trim_invalid_start) {
        return input.to_string();
    }

    let mut out = String::with_capacity(input.len());
    let mut chars = 0usize;
    let mut pending_cut = false;

    for c in input.chars() {
        if chars >= MAX_TAG_LENGTH {
            break;
        }
        let c = lowercase(c);
        if trim_invalid_start && out.is_empty() && !pending_cut && !(c.is_alphabetic() || c == ':') {
            continue;
        }
        chars += 1;
        if is_valid_char(c) {
            if pending_cut {
                out.push('_');
                pending_cut = false;
            }
            out.push(c);
        } else {
            // Runs of invalid characters collapse into a single underscore,
            // and a trailing run is dropped.
            pending_cut = true;
        }
    }
    out
}

fn is_normalized_ascii(tag: &str, check_start: bool) -> bool {
    if tag.len() > MAX_TAG_LENGTH {
        return false;
    }
    let bytes = tag.as_bytes();
    if check_start
        && let Some(&first) = bytes.first()
        && !(first.is_ascii_lowercase() || first == b':')
    {
        return false;
    }
    let valid = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit() || matches!(b, b':' | b'.' | b'/' | b'-');
    let mut previous_underscore = false;
    for (i, &b) in bytes.iter().enumerate() {
        if b == b'_' {
            // An underscore is only fine between two valid characters.
            if i == 0 || previous_underscore || i + 1 == bytes.len() {
                return false;
            }
            previous_underscore = true;
            continue;
        }
        if !valid(b) {
            return false;
        }
        previous_underscore = false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_tag_value() {
        let cases = [
            ("already-ok", "already-ok"),
            ("Hello World", "hello_world"),
            ("a  !! b", "a_b"),
            ("trailing!!!", "trailing"),
            ("!leading", "_leading"),
            ("1.2.3", "1.2.3"),
            ("Key:Value/Path", "key:value/path"),
            ("snake_case", "snake_case"),
            ("double__underscore", "double_underscore"),
            ("ŞeRiF", "şerif"),
            ("", ""),
        ];
        for (input, expected) in cases {
            assert_eq!(normalize_tag_value(input), expected, "input: {input:?}");
        }
    }

    #[test]
    fn test_normalize_tag_trims_invalid_start() {
        assert_eq!(normalize_tag("1abc"), "abc");
        assert_eq!(normalize_tag("__env:prod"), "env:prod");
        assert_eq!(normalize_tag(":colon"), ":colon");
        assert_eq!(normalize_tag("Kube Node Role"), "kube_node_role");
    }

    #[test]
    fn test_normalize_truncates() {
        let long = "a".repeat(MAX_TAG_LENGTH + 50);
        assert_eq!(normalize_tag_value(&long).len(), MAX_TAG_LENGTH);
    }
}
