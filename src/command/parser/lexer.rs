use crate::engine::errors::PlanError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Ident(String),
    Integer(i64),
    Float(f64),
    Text(String),
    Symbol(char),
    /// Two-character comparison operators.
    Op(String),
}

/// Splits a query string into tokens. Strings use single quotes; `<=`,
/// `>=` and `<>` lex as one operator token.
pub fn tokenize(input: &str) -> Result<Vec<Token>, PlanError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c.is_ascii_alphabetic() || c == '_' || c == '$' {
            let start = i;
            while i < chars.len()
                && (chars[i].is_ascii_alphanumeric() || chars[i] == '_' || chars[i] == '$')
            {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
            continue;
        }
        if c.is_ascii_digit() {
            let start = i;
            let mut is_float = false;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                if chars[i] == '.' {
                    is_float = true;
                }
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            if is_float {
                let v = text
                    .parse::<f64>()
                    .map_err(|_| PlanError::Syntax(format!("bad number: {text}")))?;
                tokens.push(Token::Float(v));
            } else {
                let v = text
                    .parse::<i64>()
                    .map_err(|_| PlanError::Syntax(format!("bad number: {text}")))?;
                tokens.push(Token::Integer(v));
            }
            continue;
        }
        if c == '\'' {
            let start = i + 1;
            let mut j = start;
            while j < chars.len() && chars[j] != '\'' {
                j += 1;
            }
            if j >= chars.len() {
                return Err(PlanError::Syntax("unterminated string".to_string()));
            }
            tokens.push(Token::Text(chars[start..j].iter().collect()));
            i = j + 1;
            continue;
        }
        if (c == '<' || c == '>') && i + 1 < chars.len() {
            let next = chars[i + 1];
            if (c == '<' && (next == '=' || next == '>')) || (c == '>' && next == '=') {
                tokens.push(Token::Op(format!("{c}{next}")));
                i += 2;
                continue;
            }
        }
        match c {
            '(' | ')' | '[' | ']' | ',' | ':' | '=' | '<' | '>' | '+' | '-' | '*' | '/' => {
                tokens.push(Token::Symbol(c));
                i += 1;
            }
            other => {
                return Err(PlanError::Syntax(format!("unexpected character: {other}")));
            }
        }
    }
    Ok(tokens)
}
