//! Wildcard pattern and query text helpers.
//!
//! Patterns are shell-style: `*` matches any run of characters, `?` exactly
//! one UTF-8 character, `[...]` a character set (`[!...]`/`[^...]` inverted,
//! `a-z` ranges), and `\` makes the following character literal.

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PatternError {
    #[error("escape character at end of pattern")]
    InvalidEscape,
    #[error("malformed character range")]
    InvalidRange,
    #[error("unterminated or empty character set")]
    InvalidSet,
    #[error("bad pattern")]
    BadPattern,
}

// ---------------------------------------------------------------------------
// Pattern inspection
// ---------------------------------------------------------------------------

/// Returns the byte offset of the first unescaped wildcard (`*`, `?`, `[`).
pub fn first_pattern_symbol(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    if memchr::memchr(b'\\', bytes).is_none() {
        return memchr::memchr3(b'*', b'?', b'[', bytes);
    }

    let mut index = 0usize;
    while index < bytes.len() {
        match bytes[index] {
            b'\\' => index += 2,
            b'*' | b'?' | b'[' => return Some(index),
            _ => index += 1,
        }
    }
    None
}

/// Returns true if `text` contains at least one unescaped wildcard.
pub fn is_pattern(text: &str) -> bool {
    first_pattern_symbol(text).is_some()
}

/// Checks that escapes and character sets in `pattern` are well formed.
pub fn validate_pattern(pattern: &str) -> Result<(), PatternError> {
    let bytes = pattern.as_bytes();
    let mut index = 0usize;

    while index < bytes.len() {
        let symbol = bytes[index];
        index += 1;
        match symbol {
            b'\\' => {
                if index >= bytes.len() {
                    return Err(PatternError::InvalidEscape);
                }
                index += 1;
            }
            b'[' => {
                if index >= bytes.len() || bytes[index] == b']' {
                    return Err(PatternError::InvalidSet);
                }
                while bytes[index] != b']' {
                    if bytes[index] == b'\\' {
                        index += 1;
                        if index >= bytes.len() {
                            return Err(PatternError::InvalidEscape);
                        }
                    }
                    if bytes[index] == b'-' && bytes.get(index + 1) == Some(&b'-') {
                        return Err(PatternError::InvalidRange);
                    }
                    index += 1;
                    if index >= bytes.len() {
                        return Err(PatternError::InvalidSet);
                    }
                }
            }
            _ => {}
        }
    }

    Ok(())
}

/// Returns the unescaped literal text before the first wildcard.
///
/// This is the part of a pattern an ordered index can seek to.
pub fn literal_prefix(pattern: &str) -> String {
    let end = first_pattern_symbol(pattern).unwrap_or(pattern.len());
    unescape(&pattern[..end])
}

/// Removes `\` escapes, keeping the escaped characters.
pub fn unescape(text: &str) -> String {
    let mut unescaped = String::with_capacity(text.len());
    let mut escaped = false;
    for ch in text.chars() {
        if escaped {
            unescaped.push(ch);
            escaped = false;
            continue;
        }
        if ch == '\\' {
            escaped = true;
            continue;
        }
        unescaped.push(ch);
    }
    unescaped
}

// ---------------------------------------------------------------------------
// Pattern matching
// ---------------------------------------------------------------------------

/// Matches `candidate` against a wildcard `pattern`.
///
/// Returns `Ok(false)` on a plain mismatch and an error only when the pattern
/// itself turns out to be malformed.
pub fn match_pattern(pattern: &[u8], candidate: &[u8]) -> Result<bool, PatternError> {
    let mut p = 0usize;
    let mut s = 0usize;

    while p < pattern.len() {
        // end of candidate: only trailing stars may remain
        if s >= candidate.len() {
            while p < pattern.len() && pattern[p] == b'*' {
                p += 1;
            }
            return Ok(p == pattern.len());
        }

        let symbol = pattern[p];
        p += 1;
        match symbol {
            b'?' => {
                decode_utf8(candidate, &mut s);
            }
            b'*' => {
                // collapse runs of '*' and '?', consuming one character per '?'
                loop {
                    match pattern.get(p) {
                        Some(b'?') => {
                            if s >= candidate.len() {
                                return Ok(false);
                            }
                            decode_utf8(candidate, &mut s);
                        }
                        Some(b'*') => {}
                        _ => break,
                    }
                    p += 1;
                }

                if p == pattern.len() {
                    return Ok(true);
                }

                loop {
                    if s >= candidate.len() {
                        return Ok(false);
                    }
                    let next = pattern[p];
                    if next == candidate[s] || next == b'[' || next == b'\\' {
                        if match_pattern(&pattern[p..], &candidate[s..])? {
                            return Ok(true);
                        }
                    }
                    decode_utf8(candidate, &mut s);
                }
            }
            b'[' => {
                if !match_set(pattern, &mut p, candidate, &mut s)? {
                    return Ok(false);
                }
            }
            b'\\' => {
                let Some(&literal) = pattern.get(p) else {
                    return Err(PatternError::BadPattern);
                };
                if literal != candidate[s] {
                    return Ok(false);
                }
                p += 1;
                s += 1;
            }
            literal => {
                if literal != candidate[s] {
                    return Ok(false);
                }
                s += 1;
            }
        }
    }

    Ok(s >= candidate.len())
}

/// Matches one candidate character against the set starting at `pattern[*p]`
/// (just after the `[`), leaving `p` after the closing `]` on success.
fn match_set(
    pattern: &[u8],
    p: &mut usize,
    candidate: &[u8],
    s: &mut usize,
) -> Result<bool, PatternError> {
    let mut invert = false;
    if matches!(pattern.get(*p), Some(b'^' | b'!')) {
        invert = true;
        *p += 1;
    }
    if matches!(pattern.get(*p), None | Some(b']')) {
        return Err(PatternError::BadPattern);
    }

    let ch = decode_utf8(candidate, s);
    let mut matched = false;

    loop {
        match pattern.get(*p) {
            None => return Err(PatternError::BadPattern),
            Some(b']') => break,
            Some(b'\\') => {
                *p += 1;
                if *p >= pattern.len() {
                    return Err(PatternError::BadPattern);
                }
            }
            Some(_) => {}
        }

        let first = decode_utf8(pattern, p);
        if first == ch {
            matched = true;
            break;
        }

        if pattern.get(*p) == Some(&b'-') && !matches!(pattern.get(*p + 1), None | Some(b']')) {
            *p += 1;
            if pattern[*p] == b'\\' {
                *p += 1;
                if *p >= pattern.len() {
                    return Err(PatternError::BadPattern);
                }
            }
            let last = decode_utf8(pattern, p);
            if first <= ch && ch <= last {
                matched = true;
                break;
            }
        }
    }

    if invert {
        matched = !matched;
    }
    if !matched {
        return Ok(false);
    }

    // skip the rest of the set
    loop {
        match pattern.get(*p) {
            None => return Err(PatternError::BadPattern),
            Some(b']') => break,
            Some(b'\\') => *p += 2,
            Some(_) => *p += 1,
        }
    }
    *p += 1;
    Ok(true)
}

/// Decodes one UTF-8 character at `bytes[*index]`, advancing the index.
///
/// Invalid sequences decode to their first byte and advance by one.
fn decode_utf8(bytes: &[u8], index: &mut usize) -> u32 {
    let Some(&lead) = bytes.get(*index) else {
        return 0;
    };
    let (length, mask) = match lead & 0xf0 {
        0xc0 | 0xd0 => (2, 0x1f),
        0xe0 => (3, 0x1f),
        0xf0 => (4, 0x0f),
        _ => {
            *index += 1;
            return u32::from(lead);
        }
    };

    let mut ch = u32::from(lead & mask);
    for offset in 1..length {
        match bytes.get(*index + offset) {
            Some(&byte) if byte & 0x80 != 0 => ch = (ch << 6) | u32::from(byte & 0x3f),
            _ => {
                *index += 1;
                return u32::from(lead);
            }
        }
    }
    *index += length;
    ch
}

// ---------------------------------------------------------------------------
// Query text scanning
// ---------------------------------------------------------------------------

fn is_blank(byte: u8) -> bool {
    byte == b' ' || byte == b'\t'
}

/// Returns the first position at or after `position` that is not a blank.
pub fn skip_whitespace(bytes: &[u8], position: usize) -> usize {
    let mut cursor = position;
    while cursor < bytes.len() && is_blank(bytes[cursor]) {
        cursor += 1;
    }
    cursor
}

/// Moves the exclusive `end` of `bytes[stop..end]` back over trailing blanks.
pub fn skip_whitespace_reverse(bytes: &[u8], end: usize, stop: usize) -> usize {
    let mut cursor = end.min(bytes.len());
    while cursor > stop && is_blank(bytes[cursor - 1]) {
        cursor -= 1;
    }
    cursor
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(pattern: &str, candidate: &str) -> bool {
        match_pattern(pattern.as_bytes(), candidate.as_bytes()).unwrap()
    }

    #[test]
    fn star_and_question_mark() {
        assert!(matches("*.txt", "a.txt"));
        assert!(!matches("*.txt", "b.cpp"));
        assert!(matches("report*", "report-2024.pdf"));
        assert!(matches("a?c", "abc"));
        assert!(!matches("a?c", "ac"));
        assert!(matches("*?", "a"));
        assert!(matches("**", ""));
        assert!(!matches("?", ""));
    }

    #[test]
    fn question_mark_consumes_one_utf8_character() {
        assert!(matches("caf?", "café"));
        assert!(matches("?x", "éx"));
    }

    #[test]
    fn character_sets_and_ranges() {
        assert!(matches("file[0-9].log", "file7.log"));
        assert!(!matches("file[0-9].log", "fileA.log"));
        assert!(matches("file[!0-9].log", "fileA.log"));
        assert!(matches("[abc]*", "beta"));
        assert!(!matches("[^abc]*", "beta"));
    }

    #[test]
    fn escapes_match_literally() {
        assert!(matches(r"a\*b", "a*b"));
        assert!(!matches(r"a\*b", "axb"));
        assert!(matches(r"\[x]", "[x]"));
    }

    #[test]
    fn malformed_sets_are_reported_while_matching() {
        assert_eq!(
            match_pattern(b"[abc", b"b"),
            Err(PatternError::BadPattern)
        );
    }

    #[test]
    fn first_symbol_skips_escapes() {
        assert_eq!(first_pattern_symbol("report*"), Some(6));
        assert_eq!(first_pattern_symbol("*.txt"), Some(0));
        assert_eq!(first_pattern_symbol("plain"), None);
        assert_eq!(first_pattern_symbol(r"a\*b?"), Some(4));
        assert!(!is_pattern(r"a\*b"));
    }

    #[test]
    fn literal_prefix_is_unescaped() {
        assert_eq!(literal_prefix("report*"), "report");
        assert_eq!(literal_prefix(r"a\*b*"), "a*b");
        assert_eq!(literal_prefix("*.txt"), "");
        assert_eq!(literal_prefix("plain"), "plain");
    }

    #[test]
    fn validate_rejects_broken_patterns() {
        assert_eq!(validate_pattern("abc\\"), Err(PatternError::InvalidEscape));
        assert_eq!(validate_pattern("a[]"), Err(PatternError::InvalidSet));
        assert_eq!(validate_pattern("a[bc"), Err(PatternError::InvalidSet));
        assert_eq!(validate_pattern("a[b--c]"), Err(PatternError::InvalidRange));
        assert_eq!(validate_pattern("a[b-c]*"), Ok(()));
        assert_eq!(validate_pattern(r"a\*"), Ok(()));
    }

    #[test]
    fn whitespace_scanning_is_bounded() {
        let text = b"  name  ";
        assert_eq!(skip_whitespace(text, 0), 2);
        assert_eq!(skip_whitespace_reverse(text, text.len(), 2), 6);
        assert_eq!(skip_whitespace_reverse(b"   ", 3, 1), 1);
        assert_eq!(skip_whitespace(b"\t x", 0), 2);
    }
}
