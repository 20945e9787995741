//! Prompt construction for the interview and analysis stages.
//!
//! Prompt wording is not part of any contract; only the pieces of context a
//! prompt embeds are.

use pipeline::{FieldSpec, Persona, Segment, Session};

/// System prompt for analysis requests.
pub const ANALYST_SYSTEM_PROMPT: &str = "You are a qualitative research analyst. \
You read interview transcripts and fill in structured fields. \
You answer with a single JSON object and nothing else.";

/// Appended to the analysis prompt when the first answer was not parseable.
pub const JSON_ONLY_REMINDER: &str = "IMPORTANT: Respond with the JSON object only. \
No prose, no explanations, no markdown fences. Every key from the template must be present \
and every value must be a string.";

/// System prompt for respondent turns: the configured preamble followed by
/// the persona's profile, hidden traits and segment hints.
pub fn respondent_system_prompt(
    preamble: &str,
    persona: &Persona,
    segment: Option<&Segment>,
) -> String {
    let mut prompt = String::new();
    if !preamble.trim().is_empty() {
        prompt.push_str(preamble.trim());
        prompt.push_str("\n\n");
    }
    prompt.push_str(&format!(
        "You are {name}, {age}, working as {occupation}.\n\nBackground:\n{bio}\n\n",
        name = persona.name,
        age = persona.age,
        occupation = persona.occupation,
        bio = persona.biography.trim(),
    ));
    prompt.push_str(
        "Hidden traits (let them shape your answers, never state them outright):\n",
    );
    for trait_ in &persona.hidden_traits {
        prompt.push_str("- ");
        prompt.push_str(trait_.trim());
        prompt.push('\n');
    }
    if let Some(segment) = segment {
        prompt.push_str(&format!("\nYou belong to the \"{}\" segment.", segment.name));
        if !segment.hints.trim().is_empty() {
            prompt.push_str(&format!(" {}", segment.hints.trim()));
        }
        prompt.push('\n');
    }
    prompt.push_str(
        "\nAnswer the interviewer's questions in the first person, in plain conversational \
text, without speaker labels.",
    );
    prompt
}

/// Instruction asking the interviewer model for its next utterance.
pub fn interviewer_instruction(step: usize, total: usize, question: &str) -> String {
    format!(
        "Ask question {n} of {total} next. Paraphrase it naturally in light of the \
conversation so far, keep its meaning, and keep it to one or two sentences. \
Reply with the question only.\n\nQuestion: {question}",
        n = step + 1,
    )
}

/// Analysis prompt: field list with descriptions, a literal template, and the
/// transcript.
pub fn analysis_prompt(session: &Session, fields: &[FieldSpec]) -> String {
    let mut prompt = String::from("Analyse the interview transcript below and fill in these fields:\n");
    for field in fields {
        prompt.push_str("- ");
        prompt.push_str(field.key.as_str());
        if !field.description.trim().is_empty() {
            prompt.push_str(": ");
            prompt.push_str(field.description.trim());
        }
        prompt.push('\n');
    }
    prompt.push_str("\nReturn exactly this JSON object with every value filled in as a string:\n");
    prompt.push_str(&json_template(fields));
    prompt.push_str("\n\nTranscript:\n");
    prompt.push_str(&session.transcript());
    prompt
}

/// The analysis prompt followed by [`JSON_ONLY_REMINDER`].
pub fn reminder_prompt(base: &str) -> String {
    format!("{base}\n\n{JSON_ONLY_REMINDER}")
}

/// `{"key": "", ...}` over the configured fields, in configured order.
pub fn json_template(fields: &[FieldSpec]) -> String {
    if fields.is_empty() {
        return "{}".to_string();
    }
    let entries: Vec<String> = fields
        .iter()
        .map(|f| {
            let key = serde_json::to_string(f.key.as_str()).unwrap_or_default();
            format!("  {key}: \"\"")
        })
        .collect();
    format!("{{\n{}\n}}", entries.join(",\n"))
}
