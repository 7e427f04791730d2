//! Tokenizer for cilcheck listings.

use crate::error::AsmError;

/// A single token from a listing line.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    /// A mnemonic, directive, keyword, type or member name. Case preserved.
    Word(String),
    /// An integer literal (decimal, optionally signed, or `0x` hex).
    Int(i64),
    /// A literal with a decimal point or exponent.
    Float(f64),
    /// A double-quoted string literal, escapes resolved.
    Str(String),
    /// A label mark: `name:` at the start of a line.
    Mark(String),
    /// One of `(`, `)` or `,`.
    Punct(char),
}

impl Token {
    /// The token as it would appear in source, for error messages.
    pub(crate) fn text(&self) -> String {
        match self {
            Token::Word(w) => w.clone(),
            Token::Int(n) => n.to_string(),
            Token::Float(x) => x.to_string(),
            Token::Str(s) => format!("{s:?}"),
            Token::Mark(m) => format!("{m}:"),
            Token::Punct(c) => c.to_string(),
        }
    }
}

/// Tokenize a single line of listing text.
///
/// Returns an empty Vec for blank lines and comment-only lines.
/// Comments start with `;` outside a string and extend to end of line.
pub(crate) fn tokenize_line(line: &str, line_num: usize) -> Result<Vec<Token>, AsmError> {
    let mut tokens = Vec::new();
    let mut chars = line.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        match c {
            ';' => break,
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' | ')' | ',' => {
                chars.next();
                tokens.push(Token::Punct(c));
            }
            '"' => {
                chars.next();
                tokens.push(Token::Str(string_literal(&mut chars, line_num)?));
            }
            _ => {
                let mut end = line.len();
                while let Some(&(i, c)) = chars.peek() {
                    if c.is_whitespace() || matches!(c, '(' | ')' | ',' | ';' | '"') {
                        end = i;
                        break;
                    }
                    chars.next();
                }
                tokens.push(word(&line[start..end], line_num)?);
            }
        }
    }

    Ok(tokens)
}

fn string_literal(
    chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>,
    line_num: usize,
) -> Result<String, AsmError> {
    let mut out = String::new();
    while let Some((_, c)) = chars.next() {
        match c {
            '"' => return Ok(out),
            '\\' => match chars.next() {
                Some((_, 'n')) => out.push('\n'),
                Some((_, 't')) => out.push('\t'),
                Some((_, '0')) => out.push('\0'),
                Some((_, other)) => out.push(other),
                None => break,
            },
            c => out.push(c),
        }
    }
    Err(AsmError::UnterminatedString { line: line_num })
}

fn word(text: &str, line_num: usize) -> Result<Token, AsmError> {
    if let Some(name) = text.strip_suffix(':') {
        if !name.is_empty() && !name.ends_with(':') {
            return Ok(Token::Mark(name.to_string()));
        }
    }

    let invalid = || AsmError::InvalidNumber {
        line: line_num,
        token: text.to_string(),
    };
    let unsigned = text.strip_prefix('-').unwrap_or(text);
    if !unsigned.starts_with(|c: char| c.is_ascii_digit()) {
        return Ok(Token::Word(text.to_string()));
    }

    if let Some(hex) = unsigned
        .strip_prefix("0x")
        .or_else(|| unsigned.strip_prefix("0X"))
    {
        let value = u64::from_str_radix(hex, 16).map_err(|_| invalid())?;
        // Hex literals are bit patterns: 0xFFFFFFFF is -1 as int32.
        let value = value as i64;
        return Ok(Token::Int(if text.starts_with('-') { -value } else { value }));
    }
    if unsigned.contains(['.', 'e', 'E']) {
        return text.parse().map(Token::Float).map_err(|_| invalid());
    }
    text.parse().map(Token::Int).map_err(|_| invalid())
}
