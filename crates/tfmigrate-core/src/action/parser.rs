//! Tokenizer for action strings.
//!
//! Action strings use shell-like quoting so that addresses containing
//! brackets and double quotes can be written naturally:
//!
//! ```text
//! mv 'module.foo["bar"]' 'module.foo["baz"]'
//! mv "aws_instance.a[\"x\"]" aws_instance.b
//! ```

use super::ActionError;

/// Split an action string into words.
///
/// Supports single quotes (literal), double quotes (with `\"` and `\\`
/// escapes) and backslash escapes outside quotes.
pub fn split_words(input: &str) -> Result<Vec<String>, ActionError> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(c) => current.push(c),
                        None => return Err(unterminated(input, '\'')),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(c @ ('"' | '\\')) => current.push(c),
                            Some(c) => {
                                current.push('\\');
                                current.push(c);
                            }
                            None => return Err(unterminated(input, '"')),
                        },
                        Some(c) => current.push(c),
                        None => return Err(unterminated(input, '"')),
                    }
                }
            }
            '\\' => {
                in_word = true;
                match chars.next() {
                    Some(c) => current.push(c),
                    None => {
                        return Err(ActionError::Syntax {
                            input: input.to_string(),
                            message: "trailing backslash".to_string(),
                        })
                    }
                }
            }
            c => {
                in_word = true;
                current.push(c);
            }
        }
    }

    if in_word {
        words.push(current);
    }
    Ok(words)
}

fn unterminated(input: &str, quote: char) -> ActionError {
    ActionError::Syntax {
        input: input.to_string(),
        message: format!("unterminated {} quote", quote),
    }
}

/// Render a word so that [`split_words`] reads it back unchanged.
pub fn quote_word(word: &str) -> String {
    let plain = !word.is_empty()
        && word
            .chars()
            .all(|c| !c.is_whitespace() && !matches!(c, '\'' | '"' | '\\'));

    if plain {
        word.to_string()
    } else if !word.contains('\'') {
        format!("'{}'", word)
    } else {
        format!("\"{}\"", word.replace('\\', "\\\\").replace('"', "\\\""))
    }
}
