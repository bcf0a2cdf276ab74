//! Tokenizer for the composite rule expression grammar:
//! `Expr := Or ; Or := And ("OR" And)* ; And := Not ("AND" Not)* ;`
//! `Not := "NOT" Not | Cmp ; Cmp := Operand CmpOp Operand ;`
//! `CmpOp := ">" | "<" | ">=" | "<=" | "==" | "!=" ; Operand := Ident "." Ident | Number`

use serversentry_core::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Ident(String),
    Number(f64),
    Dot,
    Gt,
    Lt,
    Ge,
    Le,
    EqEq,
    Ne,
    And,
    Or,
    Not,
}

pub fn lex(expression: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = expression.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        match c {
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Ge);
                    i += 2;
                } else {
                    tokens.push(Token::Gt);
                    i += 1;
                }
            }
            '<' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Le);
                    i += 2;
                } else {
                    tokens.push(Token::Lt);
                    i += 1;
                }
            }
            '=' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::EqEq);
                    i += 2;
                } else {
                    return Err(Error::Evaluation(format!("unexpected '=' at position {i}")));
                }
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Ne);
                    i += 2;
                } else {
                    return Err(Error::Evaluation(format!("unexpected '!' at position {i}")));
                }
            }
            c if c.is_ascii_digit() || c == '-' => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let n = text.parse::<f64>().map_err(|_| Error::Evaluation(format!("invalid number literal: {text}")))?;
                tokens.push(Token::Number(n));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                match word.to_ascii_uppercase().as_str() {
                    "AND" => tokens.push(Token::And),
                    "OR" => tokens.push(Token::Or),
                    "NOT" => tokens.push(Token::Not),
                    _ => tokens.push(Token::Ident(word)),
                }
            }
            other => return Err(Error::Evaluation(format!("unexpected character '{other}' at position {i}"))),
        }
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lexes_comparison_with_dotted_operand() {
        let tokens = lex("cpu.usage >= 90").unwrap();
        assert_eq!(
            tokens,
            vec![Token::Ident("cpu".into()), Token::Dot, Token::Ident("usage".into()), Token::Ge, Token::Number(90.0)]
        );
    }

    #[test]
    fn lexes_boolean_keywords_case_insensitively() {
        let tokens = lex("a.b > 1 and not c.d < 2").unwrap();
        assert!(tokens.contains(&Token::And));
        assert!(tokens.contains(&Token::Not));
    }

    #[test]
    fn rejects_unknown_character() {
        assert!(lex("a.b > 1 & c.d < 2").is_err());
    }
}
