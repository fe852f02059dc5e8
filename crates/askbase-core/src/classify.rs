//! Community message taxonomy and the keep/discard decision.
//!
//! A classification capability (usually the language model, prompted with
//! [`CLASSIFICATION_PROMPT`]) labels each chat message. The label is parsed
//! into a closed [`MessageCategory`] and [`should_store`] decides whether
//! the message feeds the next daily digest.

use std::fmt;

use serde::{Deserialize, Serialize};

pub const CLASSIFICATION_PROMPT: &str = "Classify the chat message into exactly one category: \
INFORMATION (useful facts, tips, or resources), QUESTION (asks something relevant), \
ANSWER (responds to a question with substance), JOKE (humor or banter), \
USELESS (greetings, filler, spam). Reply with the category name only.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageCategory {
    Information,
    Question,
    Answer,
    Joke,
    Useless,
}

impl MessageCategory {
    pub const ALL: [MessageCategory; 5] = [
        MessageCategory::Information,
        MessageCategory::Question,
        MessageCategory::Answer,
        MessageCategory::Joke,
        MessageCategory::Useless,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageCategory::Information => "INFORMATION",
            MessageCategory::Question => "QUESTION",
            MessageCategory::Answer => "ANSWER",
            MessageCategory::Joke => "JOKE",
            MessageCategory::Useless => "USELESS",
        }
    }

    /// Parse a classifier reply. Tolerates case, surrounding whitespace and
    /// punctuation; anything unrecognized is [`MessageCategory::Useless`].
    pub fn parse_label(label: &str) -> Self {
        let cleaned = label
            .trim()
            .trim_matches(|c: char| !c.is_ascii_alphabetic())
            .to_ascii_uppercase();
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == cleaned)
            .unwrap_or(MessageCategory::Useless)
    }
}

impl fmt::Display for MessageCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a message of this category is kept for digests.
pub fn should_store(category: MessageCategory) -> bool {
    match category {
        MessageCategory::Information | MessageCategory::Question | MessageCategory::Answer => true,
        MessageCategory::Joke | MessageCategory::Useless => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_label() {
        assert_eq!(MessageCategory::parse_label("QUESTION"), MessageCategory::Question);
        assert_eq!(MessageCategory::parse_label(" answer.\n"), MessageCategory::Answer);
        assert_eq!(
            MessageCategory::parse_label("\"Information\""),
            MessageCategory::Information
        );
        assert_eq!(MessageCategory::parse_label("SPAM"), MessageCategory::Useless);
        assert_eq!(MessageCategory::parse_label(""), MessageCategory::Useless);
    }

    #[test]
    fn test_should_store() {
        let kept: Vec<_> = MessageCategory::ALL
            .into_iter()
            .filter(|c| should_store(*c))
            .collect();
        assert_eq!(
            kept,
            vec![
                MessageCategory::Information,
                MessageCategory::Question,
                MessageCategory::Answer
            ]
        );
    }

    #[test]
    fn test_display_roundtrips_through_parse() {
        for c in MessageCategory::ALL {
            assert_eq!(MessageCategory::parse_label(&c.to_string()), c);
        }
    }
}
