//! Stripping model formatting artifacts from conversational output.
//!
//! Best effort only; behaviour is pinned by the literal fixtures in the tests.

const SPEAKER_LABELS: &[&str] = &[
    "interviewer",
    "respondent",
    "assistant",
    "answer",
    "question",
    "q",
    "a",
];

/// Cleans one model utterance. `speaker_name` is an extra label accepted as a
/// leading prefix (the persona's first name for respondent turns).
///
/// Steps: drop `<think>`/`<thinking>` blocks, strip one leading speaker label
/// (plain, `**Label:**` or `**Label**:`), strip one layer of wrapping quotes, trim.
pub fn sanitize_utterance(text: &str, speaker_name: Option<&str>) -> String {
    let without_thoughts = strip_thinking(text);
    let unlabelled = strip_speaker_label(without_thoughts.trim(), speaker_name);
    strip_wrapping_quotes(unlabelled.trim()).trim().to_string()
}

fn strip_thinking(text: &str) -> String {
    let mut out = text.to_string();
    for tag in ["think", "thinking"] {
        let open = format!("<{tag}>");
        let close = format!("</{tag}>");
        while let Some(start) = out.find(&open) {
            match out[start..].find(&close) {
                Some(rel_end) => out.replace_range(start..start + rel_end + close.len(), ""),
                // An unclosed block means the answer never started.
                None => out.truncate(start),
            }
        }
    }
    out
}

fn strip_speaker_label<'a>(text: &'a str, speaker_name: Option<&str>) -> &'a str {
    let (bold, body) = match text.strip_prefix("**") {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let Some(colon) = body.find(':') else {
        return text;
    };
    let raw_label = body[..colon].trim();
    // `**Label**:` closes the emphasis before the colon, `**Label:**` after it.
    let closed_before = raw_label.ends_with('*');
    let label = raw_label.trim_matches('*').trim();
    let known = SPEAKER_LABELS
        .iter()
        .any(|l| l.eq_ignore_ascii_case(label))
        || speaker_name.is_some_and(|n| !n.is_empty() && n.eq_ignore_ascii_case(label));
    if !known {
        return text;
    }
    let mut rest = &body[colon + 1..];
    if bold && !closed_before {
        match rest.strip_prefix("**") {
            Some(after) => rest = after,
            None => return text,
        }
    }
    rest
}

fn strip_wrapping_quotes(text: &str) -> &str {
    for (open, close) in [('"', '"'), ('\u{201c}', '\u{201d}'), ('\'', '\'')] {
        let Some(inner) = text
            .strip_prefix(open)
            .and_then(|rest| rest.strip_suffix(close))
        else {
            continue;
        };
        if !inner.contains(open) && !inner.contains(close) {
            return inner;
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_only_trimmed() {
        assert_eq!(sanitize_utterance("  I cycle to work.\n", None), "I cycle to work.");
    }

    #[test]
    fn thinking_blocks_are_removed() {
        assert_eq!(
            sanitize_utterance("<think>persona is frugal</think>\nI rarely eat out.", None),
            "I rarely eat out."
        );
        assert_eq!(
            sanitize_utterance("<thinking>a</thinking>Yes.<think>b</think>", None),
            "Yes."
        );
    }

    #[test]
    fn unclosed_thinking_block_leaves_nothing() {
        assert_eq!(sanitize_utterance("<think>still going", None), "");
    }

    #[test]
    fn speaker_labels_are_stripped() {
        assert_eq!(sanitize_utterance("Respondent: Mostly by bus.", None), "Mostly by bus.");
        assert_eq!(
            sanitize_utterance("**Interviewer:** What do you value?", None),
            "What do you value?"
        );
        assert_eq!(sanitize_utterance("A: Twice a week.", None), "Twice a week.");
    }

    #[test]
    fn bold_label_closed_before_the_colon_is_stripped() {
        assert_eq!(
            sanitize_utterance("**Interviewer**: What do you value?", None),
            "What do you value?"
        );
        assert_eq!(
            sanitize_utterance("**Maria**: \"Honestly, price.\"", Some("Maria")),
            "Honestly, price."
        );
        assert_eq!(
            sanitize_utterance("**Note**: bring a helmet.", None),
            "**Note**: bring a helmet."
        );
    }

    #[test]
    fn persona_name_is_a_label() {
        assert_eq!(
            sanitize_utterance("Maria: Honestly, price.", Some("Maria")),
            "Honestly, price."
        );
        assert_eq!(
            sanitize_utterance("Maria: Honestly, price.", None),
            "Maria: Honestly, price."
        );
    }

    #[test]
    fn colons_in_ordinary_sentences_survive() {
        let text = "Here is the thing: I never budget.";
        assert_eq!(sanitize_utterance(text, None), text);
    }

    #[test]
    fn wrapping_quotes_are_stripped_once() {
        assert_eq!(
            sanitize_utterance("\"How often do you shop online?\"", None),
            "How often do you shop online?"
        );
        assert_eq!(
            sanitize_utterance("\u{201c}Tell me more.\u{201d}", None),
            "Tell me more."
        );
        assert_eq!(
            sanitize_utterance("Interviewer: \"What changed?\"", None),
            "What changed?"
        );
    }

    #[test]
    fn inner_quotes_keep_outer_ones() {
        let text = "\"I said \"no\" twice\"";
        assert_eq!(sanitize_utterance(text, None), text);
    }

    #[test]
    fn whitespace_only_becomes_empty() {
        assert_eq!(sanitize_utterance(" \n\t ", None), "");
    }
}
