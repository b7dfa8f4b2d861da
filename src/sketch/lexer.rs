use crate::errors::{Result, SafetyError};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Ident(String),
    Number(f64),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Colon,
    Plus,
    Minus,
    Star,
    Slash,
    Lt,
    Le,
    Gt,
    Ge,
    EqEq,
    NotEq,
}

/// Splits sketch or literal text into tokens. Whitespace, newlines, line continuations and
/// `#` comments are dropped.
pub(crate) fn tokenize(text: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() || c == '\\' => i += 1,
            '#' => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            ':' => {
                tokens.push(Token::Colon);
                i += 1;
            }
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '<' | '>' | '=' | '!' => {
                let next = chars.get(i + 1).copied();
                let (token, width) = match (c, next) {
                    ('<', Some('=')) => (Token::Le, 2),
                    ('<', _) => (Token::Lt, 1),
                    ('>', Some('=')) => (Token::Ge, 2),
                    ('>', _) => (Token::Gt, 1),
                    ('=', Some('=')) => (Token::EqEq, 2),
                    ('!', Some('=')) => (Token::NotEq, 2),
                    _ => {
                        return Err(SafetyError::sketch(format!(
                            "unexpected character {c:?} at offset {i}"
                        )))
                    }
                };
                tokens.push(token);
                i += width;
            }
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                // exponent, e.g. 1e-3
                if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                    i += 1;
                    if i < chars.len() && (chars[i] == '+' || chars[i] == '-') {
                        i += 1;
                    }
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                }
                let literal: String = chars[start..i].iter().collect();
                let value = literal.parse::<f64>().map_err(|_| {
                    SafetyError::sketch(format!("invalid number {literal:?} at offset {start}"))
                })?;
                tokens.push(Token::Number(value));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            _ => {
                return Err(SafetyError::sketch(format!(
                    "unexpected character {c:?} at offset {i}"
                )))
            }
        }
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_definition() -> Result<()> {
        let tokens = tokenize("def is_safe(p):\n    return slope(p) <= 0.25  # flat enough\n")?;
        assert_eq!(
            tokens,
            vec![
                Token::Ident("def".into()),
                Token::Ident("is_safe".into()),
                Token::LParen,
                Token::Ident("p".into()),
                Token::RParen,
                Token::Colon,
                Token::Ident("return".into()),
                Token::Ident("slope".into()),
                Token::LParen,
                Token::Ident("p".into()),
                Token::RParen,
                Token::Le,
                Token::Number(0.25),
            ]
        );
        Ok(())
    }

    #[test]
    fn test_tokenize_numbers() -> Result<()> {
        assert_eq!(tokenize("3")?, vec![Token::Number(3.0)]);
        assert_eq!(tokenize("1.5e-1")?, vec![Token::Number(0.15)]);
        assert_eq!(tokenize(".5")?, vec![Token::Number(0.5)]);
        Ok(())
    }

    #[test]
    fn test_tokenize_brackets_and_commas() -> Result<()> {
        assert_eq!(
            tokenize("[(1, 0),]")?,
            vec![
                Token::LBracket,
                Token::LParen,
                Token::Number(1.0),
                Token::Comma,
                Token::Number(0.0),
                Token::RParen,
                Token::Comma,
                Token::RBracket,
            ]
        );
        Ok(())
    }

    #[test]
    fn test_tokenize_rejects_unknown_characters() {
        assert!(tokenize("a = b").is_err());
        assert!(tokenize("a; b").is_err());
        assert!(tokenize("'grass'").is_err());
    }
}
