//! Builds the bounded prompt sent to the text backend.
//!
//! The prompt is: persona preamble, as many of the most recent history turns as
//! fit the token limit (in chronological order), the current turn, and a cue line
//! naming the responder. The walk over history stops at the first turn that does
//! not fit; older turns are never considered after that.

use crate::tokens::estimate;
use crate::types::Turn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledPrompt {
    pub prompt: String,
    pub kept_turns: usize,
    pub dropped_turns: usize,
    /// Estimated tokens contributed by kept history turns.
    pub history_tokens: usize,
    /// Preamble + current turn + kept history.
    pub used_tokens: usize,
}

/// Persona text plus the speaker's stored profile, if any.
pub fn persona_preamble(persona: &str, profile: Option<(&str, &str)>) -> String {
    let mut out = persona.trim().to_string();
    out.push('\n');
    if let Some((speaker, text)) = profile {
        let text = text.trim();
        if !text.is_empty() {
            out.push_str(&format!("\n[What {speaker} has shared about themselves]\n{text}\n"));
        }
    }
    out.push('\n');
    out
}

pub fn assemble(
    preamble: &str,
    history: &[Turn],
    current: &Turn,
    responder: &str,
    limit: usize,
) -> AssembledPrompt {
    let current_rendered = current.render();
    let mut used = estimate(preamble) + estimate(&current_rendered);

    let mut kept: Vec<String> = Vec::new();
    let mut history_tokens = 0usize;
    for turn in history.iter().rev() {
        let rendered = turn.render();
        let turn_tokens = estimate(&rendered);
        if used + turn_tokens > limit {
            break;
        }
        used += turn_tokens;
        history_tokens += turn_tokens;
        kept.push(rendered);
    }
    kept.reverse();

    let mut prompt = String::with_capacity(
        preamble.len() + kept.iter().map(String::len).sum::<usize>() + current_rendered.len() + responder.len() + 1,
    );
    prompt.push_str(preamble);
    for rendered in &kept {
        prompt.push_str(rendered);
    }
    prompt.push_str(&current_rendered);
    prompt.push_str(responder);
    prompt.push(':');

    AssembledPrompt {
        prompt,
        kept_turns: kept.len(),
        dropped_turns: history.len() - kept.len(),
        history_tokens,
        used_tokens: used,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(speaker: &str, text: &str) -> Turn {
        Turn::new(speaker, text)
    }

    #[test]
    fn small_history_is_kept_whole_and_in_order() {
        let history = vec![
            turn("alice", "hi"),
            turn("Atelier", "hello alice"),
            turn("alice", "draw me a cat"),
        ];
        let out = assemble("You are Atelier.\n\n", &history, &turn("alice", "thanks"), "Atelier", 1000);

        assert_eq!(out.kept_turns, 3);
        assert_eq!(out.dropped_turns, 0);
        assert_eq!(
            out.prompt,
            "You are Atelier.\n\nalice: hi\nAtelier: hello alice\nalice: draw me a cat\nalice: thanks\nAtelier:"
        );
    }

    #[test]
    fn keeps_only_the_trailing_turns_that_fit() {
        // each rendered turn is "uN: " + 36 x + "\n" = 41 chars = 10 tokens
        let history: Vec<Turn> = (0..10)
            .map(|i| turn(&format!("u{i}"), &"x".repeat(36)))
            .collect();
        let current = turn("me", "hey"); // "me: hey\n" = 8 chars = 2 tokens
        let out = assemble("", &history, &current, "bot", 2 + 20 + 5);

        assert_eq!(out.kept_turns, 2);
        assert_eq!(out.dropped_turns, 8);
        assert_eq!(out.history_tokens, 20);
        assert!(out.prompt.starts_with("u8: "));
        let u8_at = out.prompt.find("u8:").unwrap_or(usize::MAX);
        let u9_at = out.prompt.find("u9:").unwrap_or(usize::MAX);
        assert!(u8_at < u9_at);
        assert!(!out.prompt.contains("u7:"));
    }

    #[test]
    fn walk_stops_at_first_overflow_even_if_older_turns_are_small() {
        let history = vec![
            turn("a", "x"),                 // small, but older than the big one
            turn("b", &"y".repeat(400)),    // does not fit
            turn("c", "z"),
        ];
        let out = assemble("", &history, &turn("me", "q"), "bot", 20);
        assert_eq!(out.kept_turns, 1);
        assert!(out.prompt.starts_with("c: z\n"));
        assert!(!out.prompt.contains("a: x"));
    }

    #[test]
    fn oversized_current_turn_is_never_truncated() {
        let big = "w".repeat(4000);
        let history = vec![turn("a", "earlier")];
        let out = assemble("persona\n", &history, &turn("me", &big), "bot", 10);
        assert_eq!(out.kept_turns, 0);
        assert!(out.prompt.contains(&big));
        assert!(out.prompt.starts_with("persona\n"));
        assert!(out.prompt.ends_with("bot:"));
    }

    #[test]
    fn history_tokens_never_exceed_limit() {
        let history: Vec<Turn> = (0..50)
            .map(|i| turn("s", &"t".repeat((i * 7) % 60)))
            .collect();
        for limit in [0usize, 1, 5, 17, 64, 250, 1000] {
            let out = assemble("pre\n", &history, &turn("me", "now"), "bot", limit);
            assert!(out.history_tokens <= limit, "limit={limit} got={}", out.history_tokens);
            let recomputed: usize = history[history.len() - out.kept_turns..]
                .iter()
                .map(|t| estimate(&t.render()))
                .sum();
            assert_eq!(recomputed, out.history_tokens);
        }
    }

    #[test]
    fn preamble_includes_profile_when_present() {
        let with = persona_preamble("You are Atelier.", Some(("alice", "Likes watercolor.")));
        assert!(with.contains("Likes watercolor."));
        assert!(with.contains("alice"));
        let without = persona_preamble("You are Atelier.", Some(("alice", "   ")));
        assert_eq!(without, "You are Atelier.\n\n");
    }
}
