//! Text normalization for questions and incoming messages.

use crate::config::TeachConfig;

/// An incoming message prepared for matching.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Normalized {
    /// Case-folded, stripped and collapsed text literal questions compare to.
    pub question: String,
    /// Text after the nickname with punctuation kept; regex questions match this.
    pub original: String,
    /// The trimmed message exactly as sent.
    pub raw: String,
    /// The message started with one of the bot's nicknames.
    pub appellative: bool,
    /// The message was nothing but a nickname.
    pub activated: bool,
}

/// Normalize an incoming message, stripping a nickname prefix.
#[must_use]
pub fn normalize(content: &str, config: &TeachConfig) -> Normalized {
    let trimmed = content.trim();
    let lead = trimmed.trim_start_matches(|c: char| config.strip_chars.contains(c));
    let (rest, appellative) = match strip_nickname(lead, &config.nicknames) {
        Some(rest) => (rest, true),
        None => (trimmed, false),
    };
    let question = collapse(strip(rest, &config.strip_chars)).to_lowercase();
    Normalized {
        activated: appellative && question.is_empty(),
        question,
        original: collapse(rest),
        raw: trimmed.to_string(),
        appellative,
    }
}

/// Normalize an authored question for storage and lookup.
#[must_use]
pub fn normalize_question(text: &str, config: &TeachConfig) -> String {
    collapse(strip(text, &config.strip_chars)).to_lowercase()
}

fn strip<'a>(text: &'a str, chars: &str) -> &'a str {
    text.trim_matches(|c: char| c.is_whitespace() || chars.contains(c))
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn strip_nickname<'a>(text: &'a str, nicknames: &[String]) -> Option<&'a str> {
    nicknames
        .iter()
        .filter(|name| !name.is_empty())
        .find_map(|name| {
            let rest = strip_prefix_ignore_case(text, name)?;
            // "bot" must not address the bot inside "bottle".
            let glued = name.ends_with(|c: char| c.is_ascii_alphanumeric())
                && rest.starts_with(|c: char| c.is_ascii_alphanumeric());
            (!glued).then_some(rest)
        })
        .map(|rest| rest.trim_start_matches(|c: char| c.is_whitespace() || c == ',' || c == '，'))
}

fn strip_prefix_ignore_case<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    let mut rest = text;
    for expected in prefix.chars() {
        let mut chars = rest.chars();
        let actual = chars.next()?;
        if !actual.to_lowercase().eq(expected.to_lowercase()) {
            return None;
        }
        rest = chars.as_str();
    }
    Some(rest)
}
