//! Prompt rendering for the turn-taking tools.

use colloquy_context::{ContextCategory, Resolution};
use colloquy_session::Session;

pub(crate) const SYSTEM_PROMPT: &str = "You are a senior software engineer consulted through a \
tool interface. Answer precisely, reference the attached files by path, and say so when the \
context is insufficient.";

/// Earlier turns replayed into a follow-up prompt.
const HISTORY_TURNS: usize = 3;
const HISTORY_CHARS: usize = 2_000;

fn context_header(category: ContextCategory) -> &'static str {
    match category {
        ContextCategory::Code => "Given the following code:",
        ContextCategory::Docs => "Based on this documentation:",
        _ => "Context:",
    }
}

fn push_context(out: &mut String, resolution: &Resolution, category: ContextCategory) {
    if resolution.is_empty() {
        return;
    }
    out.push_str(context_header(category));
    out.push('\n');
    out.push_str(&resolution.render());
    out.push_str("\n\n");
}

fn clip(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => format!("{}...", &text[..end]),
        None => text.to_string(),
    }
}

pub(crate) fn ask(question: &str, resolution: &Resolution, category: ContextCategory) -> String {
    let mut out = String::new();
    push_context(&mut out, resolution, category);
    if out.is_empty() {
        return question.to_string();
    }
    out.push_str("Question: ");
    out.push_str(question);
    out
}

pub(crate) fn discuss_opening(
    topic: &str,
    baseline: Option<&str>,
    resolution: &Resolution,
    category: ContextCategory,
) -> String {
    let mut out = String::new();
    push_context(&mut out, resolution, category);
    match baseline {
        Some(document) => {
            out.push_str(
                "Based on the following baseline analysis, provide your insights on:\n",
            );
            out.push_str(topic);
            out.push_str("\n\nBaseline document:\n");
            out.push_str(document);
            out.push_str(
                "\n\nAddress the open questions and requirements the baseline lists.",
            );
        }
        None => {
            out.push_str("Provide comprehensive insights on the following topic:\n");
            out.push_str(topic);
            out.push_str(
                "\n\nConsider technical requirements, trade-offs, likely failure modes and an \
                 implementation approach.",
            );
        }
    }
    out
}

pub(crate) fn follow_up(session: &Session, message: &str, resolution: &Resolution) -> String {
    let mut out = format!("Discussion topic: {}\n\n", session.topic);
    let skip = session.transcript.len().saturating_sub(HISTORY_TURNS);
    for turn in session.transcript.iter().skip(skip) {
        out.push_str(&format!(
            "Turn {}:\nQ: {}\nA: {}\n\n",
            turn.index,
            clip(follow_up_input(&turn.prompt), HISTORY_CHARS),
            clip(&turn.response, HISTORY_CHARS)
        ));
    }
    push_context(&mut out, resolution, ContextCategory::General);
    out.push_str("Follow-up: ");
    out.push_str(message);
    out
}

/// A replayed follow-up prompt is shortened to the message it carried.
fn follow_up_input(prompt: &str) -> &str {
    match prompt.rfind("Follow-up: ") {
        Some(at) => &prompt[at + "Follow-up: ".len()..],
        None => prompt,
    }
}
