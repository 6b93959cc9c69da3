/// Shell-like tokenizer for command text.
///
/// Handles:
/// - Whitespace-separated tokens
/// - Single and double quoted strings
/// - Backslash escapes inside double quotes
///
/// An unterminated quote extends to the end of the input.
pub fn tokenize(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_single_quote = false;
    let mut in_double_quote = false;
    let mut quoted = false;
    let mut escape_next = false;

    for ch in input.chars() {
        if escape_next {
            current.push(ch);
            escape_next = false;
            continue;
        }

        match ch {
            '\\' if in_double_quote => {
                escape_next = true;
            }
            '\'' if !in_double_quote => {
                in_single_quote = !in_single_quote;
                quoted = true;
            }
            '"' if !in_single_quote => {
                in_double_quote = !in_double_quote;
                quoted = true;
            }
            c if c.is_whitespace() && !in_single_quote && !in_double_quote => {
                if !current.is_empty() || quoted {
                    tokens.push(std::mem::take(&mut current));
                }
                quoted = false;
            }
            _ => {
                current.push(ch);
            }
        }
    }

    if !current.is_empty() || quoted {
        tokens.push(current);
    }

    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_simple() {
        assert_eq!(tokenize("share hello world"), vec!["share", "hello", "world"]);
    }

    #[test]
    fn test_tokenize_quoted() {
        assert_eq!(
            tokenize(r#"todo add "buy milk" 'and eggs'"#),
            vec!["todo", "add", "buy milk", "and eggs"]
        );
    }

    #[test]
    fn test_tokenize_escape_in_double_quotes() {
        assert_eq!(tokenize(r#"say "a \"b\"""#), vec!["say", r#"a "b""#]);
    }

    #[test]
    fn test_tokenize_empty_quotes_are_a_token() {
        assert_eq!(tokenize(r#"set name """#), vec!["set", "name", ""]);
    }

    #[test]
    fn test_tokenize_whitespace_only() {
        assert!(tokenize(" \t\n ").is_empty());
    }

    #[test]
    fn test_tokenize_unterminated_quote() {
        assert_eq!(tokenize("echo 'open end"), vec!["echo", "open end"]);
    }
}
