use serde::{Deserialize, Serialize};

/// Tone requested for the generated bios.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Vibe {
    #[default]
    Professional,
    Casual,
    Funny,
}

impl Vibe {
    fn adjective(self) -> &'static str {
        match self {
            Vibe::Professional => "Professional",
            Vibe::Casual => "relaxed",
            Vibe::Funny => "silly",
        }
    }
}

/// Builds the generation prompt from the user's context (a job, a hobby) and a vibe.
///
/// The upstream is asked for a JSON object keyed `"1."`, `"2."`, `"3."` so the
/// answer can be parsed into exactly three candidates.
pub fn build_prompt(context: &str, vibe: Vibe) -> String {
    let mut prompt = format!(
        "Generate 3 {} twitter biographies with no hashtags. \
         Return only a JSON object with the keys \"1.\", \"2.\" and \"3.\", \
         each holding one biography, and nothing else.",
        vibe.adjective()
    );
    if vibe == Vibe::Funny {
        prompt.push_str(" Make the biographies humorous.");
    }
    prompt.push_str(
        " Make sure each generated biography is less than 300 characters \
         and has short sentences that are found in Twitter bios.",
    );

    let context = context.trim();
    if !context.is_empty() {
        prompt.push_str(" Feel free to use this context as well: ");
        prompt.push_str(context);
        if !context.ends_with('.') {
            prompt.push('.');
        }
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vibe_picks_adjective() {
        assert!(build_prompt("x", Vibe::Professional).starts_with("Generate 3 Professional"));
        assert!(build_prompt("x", Vibe::Casual).starts_with("Generate 3 relaxed"));
        assert!(build_prompt("x", Vibe::Funny).starts_with("Generate 3 silly"));
    }

    #[test]
    fn only_funny_asks_for_humour() {
        assert!(build_prompt("chef", Vibe::Funny).contains("humorous"));
        assert!(!build_prompt("chef", Vibe::Casual).contains("humorous"));
    }

    #[test]
    fn context_gets_terminating_period() {
        assert!(build_prompt("Amazon CEO", Vibe::Professional).ends_with("as well: Amazon CEO."));
        assert!(build_prompt("Food lover.", Vibe::Casual).ends_with("as well: Food lover."));
    }

    #[test]
    fn empty_context_is_left_out() {
        let prompt = build_prompt("   ", Vibe::Professional);
        assert!(!prompt.contains("context"));
        assert!(prompt.contains("\"1.\""));
    }

    #[test]
    fn vibe_deserializes_from_label() {
        let vibe: Vibe = serde_json::from_str("\"Funny\"").unwrap();
        assert_eq!(vibe, Vibe::Funny);
        assert_eq!(Vibe::default(), Vibe::Professional);
    }
}
