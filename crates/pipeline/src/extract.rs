//! Locating a JSON value inside free-form model output.
//!
//! This is the fallback path: callers try a direct parse of the raw text
//! first and only come here when that fails. The scan is heuristic. It finds
//! candidate boundaries and never validates what lies between them.

/// Returns the most likely JSON substring of `text`, if any.
///
/// Strategies, in order:
/// 1. the trimmed interior of the first fenced code block, minus its
///    language tag;
/// 2. the first `[` followed (after whitespace) by `{` or `[`, up to its
///    matching `]`;
/// 3. the first `{` followed (after whitespace) by `"`, up to its matching `}`.
pub fn extract_json(text: &str) -> Option<&str> {
    if let Some(block) = fenced_block(text) {
        return Some(block);
    }
    if let Some(span) = balanced_from(text, b'[', |next| next == b'{' || next == b'[') {
        return Some(span);
    }
    balanced_from(text, b'{', |next| next == b'"')
}

fn fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after_fence = &text[start + 3..];
    let after_tag = strip_info_string(after_fence);
    let end = after_tag.find("```")?;
    Some(after_tag[..end].trim())
}

/// Skips the info string (`json`, `JSON`, any language tag) on the opening
/// fence line. A first line holding `{` or `[` is content, minus a leading
/// `json` word.
fn strip_info_string(after_fence: &str) -> &str {
    let line_end = after_fence.find('\n').unwrap_or(after_fence.len());
    if !after_fence[..line_end].contains(['{', '[']) {
        return &after_fence[line_end..];
    }
    let tagged = after_fence
        .get(..4)
        .is_some_and(|tag| tag.eq_ignore_ascii_case("json"));
    match after_fence.get(4..) {
        Some(rest) if tagged && rest.starts_with(char::is_whitespace) => rest,
        _ => after_fence,
    }
}

/// Tries every `open` byte whose next non-whitespace byte satisfies `accept`,
/// returning the first one that closes.
fn balanced_from(text: &str, open: u8, accept: impl Fn(u8) -> bool) -> Option<&str> {
    let bytes = text.as_bytes();
    let mut from = 0;
    while let Some(offset) = bytes[from..].iter().position(|&b| b == open) {
        let start = from + offset;
        let next = bytes[start + 1..]
            .iter()
            .copied()
            .find(|b| !b.is_ascii_whitespace());
        if next.is_some_and(&accept) {
            if let Some(end) = matching_close(bytes, start) {
                return Some(&text[start..=end]);
            }
        }
        from = start + 1;
    }
    None
}

/// Index of the bracket closing the one at `start`. Brackets inside
/// double-quoted strings do not count.
fn matching_close(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' | b'[' => depth += 1,
            b'}' | b']' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}
