//! Lexical splitting of flat calibration text.
//!
//! The scanner walks the source one character at a time, switching between
//! three modes: plain, inside a quoted span, and inside a comment. It never
//! backtracks; the only lookahead is one character after a backslash.
//!
//! Rules:
//! * blanks (space, `\t`, `\x0B`, `\r`, `\n`, `\x0C`) separate tokens;
//! * `#` outside a quoted span starts a comment that runs to the end of the line;
//! * `"` opens a quoted span which ends at the next `"`, or implicitly at the
//!   end of the line when the closing quote is missing;
//! * `\"` inside a quoted span is a literal quote;
//! * quoted spans glued to unquoted characters merge into one token, so
//!   `John" Smith"` is the single token `John Smith`.

use std::iter::Peekable;
use std::str::Chars;

pub const BLANK_CHARACTERS: [char; 6] = [' ', '\n', '\t', '\u{0B}', '\r', '\u{0C}'];

pub fn is_blank(c: char) -> bool {
    BLANK_CHARACTERS.contains(&c)
}

/// Stateless splitter; one instance can be reused for any number of sources.
#[derive(Debug, Default, Clone, Copy)]
pub struct Tokenizer;

impl Tokenizer {
    pub fn new() -> Self {
        Self
    }
    /// Lazily yields the tokens of `source` in order.
    pub fn tokens<'s>(&self, source: &'s str) -> Tokens<'s> {
        Tokens {
            chars: source.chars().peekable(),
        }
    }
    /// Appends the tokens of `source` to `tokens`.
    pub fn split_into(&self, tokens: &mut Vec<String>, source: &str) {
        tokens.extend(self.tokens(source));
    }
    pub fn split(&self, source: &str) -> Vec<String> {
        let mut tokens = Vec::new();
        self.split_into(&mut tokens, source);
        tokens
    }
}

/// Iterator over the tokens of one source string.
#[derive(Debug, Clone)]
pub struct Tokens<'s> {
    chars: Peekable<Chars<'s>>,
}

impl Tokens<'_> {
    fn skip_comment(&mut self) {
        for c in self.chars.by_ref() {
            if c == '\n' {
                break;
            }
        }
    }
}

impl Iterator for Tokens<'_> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        let mut token = String::new();
        // an empty quoted span still makes a token, so track that separately
        let mut started = false;
        let mut in_string = false;
        while let Some(c) = self.chars.next() {
            if in_string {
                match c {
                    '\\' if self.chars.peek() == Some(&'"') => {
                        self.chars.next();
                        token.push('"');
                    }
                    '"' => in_string = false,
                    '\n' => {
                        // unterminated quote, the line end closes it
                        if token.ends_with('\r') {
                            token.pop();
                        }
                        return Some(token);
                    }
                    _ => token.push(c),
                }
                continue;
            }
            match c {
                '"' => {
                    in_string = true;
                    started = true;
                }
                '#' => {
                    self.skip_comment();
                    if started {
                        return Some(token);
                    }
                }
                c if is_blank(c) => {
                    if started {
                        return Some(token);
                    }
                }
                _ => {
                    token.push(c);
                    started = true;
                }
            }
        }
        started.then_some(token)
    }
}

/// Convenience for one-off splitting.
pub fn lexical_split(source: &str) -> Vec<String> {
    Tokenizer::new().split(source)
}

/// Quotes a cell when it would not survive [`Tokenizer`] as written.
/// Returns `None` for the one value that cannot be written back: a cell that
/// needs quoting and ends with a backslash, since `\"` would escape the
/// closing quote.
pub fn quote_cell(cell: &str) -> Option<String> {
    let needs_quotes =
        cell.is_empty() || cell.chars().any(|c| is_blank(c) || c == '#' || c == '"');
    if !needs_quotes {
        return Some(cell.to_string());
    }
    if cell.ends_with('\\') || cell.contains('\n') {
        return None;
    }
    let mut quoted = String::with_capacity(cell.len() + 2);
    quoted.push('"');
    for c in cell.chars() {
        if c == '"' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    Some(quoted)
}
