//! Prompt builder: short system line, reference documents, conversation so far.

use rag_store::ContextBlock;

use crate::message::ChatMessage;

pub const DEFAULT_SYSTEM: &str = "You are a helpful assistant. Answer from the reference documents \
when they are relevant; if they are missing or insufficient, say so plainly.";

/// Upper bound on the reference section, in bytes.
pub const MAX_CONTEXT_CHARS: usize = 6000;

/// Builds the completion prompt for one turn.
///
/// `history` is expected oldest first. An absent context block and an
/// explicit no-match are rendered differently so the model never invents
/// sources.
///
/// ```
/// # use chat_session::prompt::build_prompt;
/// let p = build_prompt("Can I sublet?", &[], None);
/// assert!(p.ends_with("user: Can I sublet?\nassistant:"));
/// ```
pub fn build_prompt(question: &str, history: &[ChatMessage], context: Option<&ContextBlock>) -> String {
    let mut out = String::new();
    out.push_str(DEFAULT_SYSTEM);
    out.push_str("\n\n");

    match context {
        Some(ContextBlock::Documents(text)) => {
            out.push_str("Reference documents:\n");
            out.push_str(safe_truncate(text.trim(), MAX_CONTEXT_CHARS));
            out.push_str("\n\n");
        }
        Some(ContextBlock::NoMatches) => {
            out.push_str("Reference documents: none matched this question.\n\n");
        }
        None => {}
    }

    if !history.is_empty() {
        out.push_str("Conversation so far:\n");
        for m in history {
            out.push_str(m.role.as_str());
            out.push_str(": ");
            out.push_str(m.content.trim());
            out.push('\n');
        }
        out.push('\n');
    }

    out.push_str("user: ");
    out.push_str(question.trim());
    out.push_str("\nassistant:");
    out
}

fn safe_truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Role;
    use chrono::Utc;

    fn m(id: i64, role: Role, content: &str) -> ChatMessage {
        ChatMessage {
            id,
            user_id: 1,
            topic: "t".into(),
            role,
            model: String::new(),
            content: content.into(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn history_precedes_question() {
        let history = vec![m(1, Role::User, "hi"), m(2, Role::Assistant, "hello")];
        let p = build_prompt("next?", &history, None);
        let hi = p.find("user: hi").unwrap();
        let hello = p.find("assistant: hello").unwrap();
        let q = p.find("user: next?").unwrap();
        assert!(hi < hello && hello < q);
        assert!(!p.contains("Reference documents"));
    }

    #[test]
    fn no_matches_is_stated() {
        let p = build_prompt("q", &[], Some(&ContextBlock::NoMatches));
        assert!(p.contains("none matched"));
    }

    #[test]
    fn documents_are_included_and_bounded() {
        let big = "é".repeat(MAX_CONTEXT_CHARS);
        let p = build_prompt("q", &[], Some(&ContextBlock::Documents(big)));
        assert!(p.contains("Reference documents:\n"));
        assert!(p.len() < MAX_CONTEXT_CHARS + DEFAULT_SYSTEM.len() + 100);
    }
}
