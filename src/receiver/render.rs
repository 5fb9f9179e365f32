//! Answer templates.
//!
//! An answer is plain text with `$` escapes:
//!
//! | escape | expands to |
//! |---|---|
//! | `$$` | a literal `$` |
//! | `$a` | mention of everybody |
//! | `$@` | mention of the sender |
//! | `$m` | mention of the bot |
//! | `$s` | sender name, or the writer with `SUBSTITUTE` |
//! | `$0` | the incoming text |
//! | `$1`..`$9` | regex capture groups |
//! | `$n` | send what is buffered so far as its own message |
//! | `$(cmd)` | run `cmd`; escapes inside are expanded first |
//!
//! Unknown escapes are kept verbatim.

/// Values escapes expand to.
#[derive(Debug, Clone, Default)]
pub struct MacroScope<'a> {
    pub mention_all: String,
    pub mention_sender: String,
    pub mention_self: String,
    pub sender_name: String,
    pub raw: &'a str,
    /// Capture groups 1..=9; `None` for literal dialogues.
    pub captures: Option<&'a [Option<String>]>,
}

impl MacroScope<'_> {
    fn lookup(&self, escape: char) -> Option<String> {
        let value = match escape {
            '$' => "$".to_string(),
            'a' => self.mention_all.clone(),
            '@' => self.mention_sender.clone(),
            'm' => self.mention_self.clone(),
            's' => self.sender_name.clone(),
            '0' => self.raw.to_string(),
            '1'..='9' => {
                let captures = self.captures?;
                let index = escape.to_digit(10)? as usize - 1;
                captures.get(index).cloned().flatten().unwrap_or_default()
            }
            _ => return None,
        };
        Some(value)
    }
}

/// One step of answer execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Text appended to the output buffer.
    Text(String),
    /// Send the buffer now.
    Flush,
    /// Send the buffer, then run a command.
    Invoke(String),
}

/// Expand escapes and split an answer into execution steps.
#[must_use]
pub fn tokenize(answer: &str, scope: &MacroScope<'_>) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut buffer = String::new();
    let mut chars = answer.char_indices().peekable();

    while let Some((index, c)) = chars.next() {
        if c != '$' {
            buffer.push(c);
            continue;
        }
        match chars.peek().map(|&(_, next)| next) {
            Some('n') => {
                chars.next();
                push_text(&mut segments, &mut buffer);
                segments.push(Segment::Flush);
            }
            Some('(') => {
                let body_start = index + 2;
                match find_closing(answer, body_start) {
                    Some(end) => {
                        push_text(&mut segments, &mut buffer);
                        let command = expand(&answer[body_start..end], scope);
                        segments.push(Segment::Invoke(command.trim().to_string()));
                        while chars.next_if(|&(j, _)| j <= end).is_some() {}
                    }
                    None => buffer.push('$'),
                }
            }
            Some(escape) => match scope.lookup(escape) {
                Some(value) => {
                    chars.next();
                    buffer.push_str(&value);
                }
                None => buffer.push('$'),
            },
            None => buffer.push('$'),
        }
    }
    push_text(&mut segments, &mut buffer);
    segments
}

/// Expand value escapes only; `$n` and `$(` stay literal.
#[must_use]
pub fn expand(text: &str, scope: &MacroScope<'_>) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        match chars.peek().and_then(|next| scope.lookup(*next)) {
            Some(value) => {
                chars.next();
                out.push_str(&value);
            }
            None => out.push('$'),
        }
    }
    out
}

fn push_text(segments: &mut Vec<Segment>, buffer: &mut String) {
    if !buffer.is_empty() {
        segments.push(Segment::Text(std::mem::take(buffer)));
    }
}

/// Byte index of the `)` closing a body starting at `start`.
fn find_closing(text: &str, start: usize) -> Option<usize> {
    let mut depth = 1usize;
    for (offset, c) in text.get(start..)?.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(start + offset);
                }
            }
            _ => {}
        }
    }
    None
}
