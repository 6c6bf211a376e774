use thiserror::Error;

use crate::ast::Statement;
use crate::token::parse_operator;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("unbalanced quotes in '{0}'")]
    UnbalancedQuotes(String),
}

/// A word after quote removal. Only its first `plain` bytes were written
/// without quotes or escapes, so only they can form a redirection operator.
struct Word {
    text: String,
    plain: usize,
}

impl Word {
    fn unquoted(text: String) -> Self {
        let plain = text.len();
        Word { text, plain }
    }
}

/// Split a single statement into words and classify them. Quoted or escaped
/// operator characters are literal: `echo '>' x` has no redirection.
pub fn parse(input: &str) -> Result<Statement, ParseError> {
    let unbalanced = || ParseError::UnbalancedQuotes(input.to_string());
    let mut words = Vec::new();
    for raw in raw_words(input) {
        let mut split = shlex::split(raw).ok_or_else(unbalanced)?;
        if split.is_empty() {
            // comment: the rest of the line is ignored
            break;
        }
        let plain = raw.find(|c: char| matches!(c, '\'' | '"' | '\\')).unwrap_or(raw.len());
        if split.len() == 1 {
            let text = split.remove(0);
            words.push(Word {
                plain: plain.min(text.len()),
                text,
            });
        } else {
            words.extend(split.into_iter().map(Word::unquoted));
        }
    }
    Ok(classify_words(words))
}

/// Separate redirection operators (and the file words they consume) from
/// command words. Order is preserved inside each group. Words are taken as
/// written, so an operator word is always an operator; callers holding
/// quoting information go through [`parse`].
pub fn classify<I>(words: I) -> Statement
where
    I: IntoIterator<Item = String>,
{
    classify_words(words.into_iter().map(Word::unquoted))
}

fn classify_words<I>(words: I) -> Statement
where
    I: IntoIterator<Item = Word>,
{
    let mut statement = Statement::default();
    let mut iter = words.into_iter();
    while let Some(word) = iter.next() {
        let whole = word.plain == word.text.len();
        match parse_operator(&word.text) {
            Ok(op) if whole => {
                let takes_target = op.takes_target();
                statement.redirections.push(word.text);
                if takes_target {
                    // A missing target is reported when the directive is applied.
                    if let Some(target) = iter.next() {
                        statement.redirections.push(target.text);
                    }
                }
            }
            _ => match split_attached(&word.text, word.plain) {
                Some((op, target)) => {
                    statement.redirections.push(op);
                    statement.redirections.push(target);
                }
                None => statement.tokens.push(word.text),
            },
        }
    }
    statement
}

/// Word boundaries of `input`: whitespace outside quotes ends a word and a
/// backslash outside single quotes escapes the next character. Quotes are
/// left in place for shlex to remove.
fn raw_words(input: &str) -> Vec<&str> {
    let mut words = Vec::new();
    let mut start = None;
    let mut quote = None;
    let mut escaped = false;
    for (i, c) in input.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match (quote, c) {
            (Some('\''), '\'') => quote = None,
            (Some('\''), _) => {}
            (Some(_), '\\') => escaped = true,
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, ' ' | '\t' | '\n') => {
                if let Some(s) = start.take() {
                    words.push(&input[s..i]);
                }
                continue;
            }
            (None, '\\') => escaped = true,
            (None, '\'' | '"') => quote = Some(c),
            (None, _) => {}
        }
        start.get_or_insert(i);
    }
    if let Some(s) = start {
        words.push(&input[s..]);
    }
    words
}

/// Split a word such as `>out.txt` or `2>>log` into operator and target.
/// The longest operator prefix within the first `plain` bytes wins.
fn split_attached(word: &str, plain: usize) -> Option<(String, String)> {
    (1..word.len().min(plain + 1))
        .rev()
        .filter(|&end| word.is_char_boundary(end))
        .find(|&end| parse_operator(&word[..end]).is_ok_and(|op| op.takes_target()))
        .map(|end| (word[..end].to_string(), word[end..].to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_command() {
        let stmt = parse("echo hello world").unwrap();
        assert_eq!(stmt.tokens, vec!["echo", "hello", "world"]);
        assert!(stmt.redirections.is_empty());
    }

    #[test]
    fn redirections_are_split_out() {
        let stmt = parse("echo hi > out.txt 2>&1").unwrap();
        assert_eq!(stmt.tokens, vec!["echo", "hi"]);
        assert_eq!(stmt.redirections, vec![">", "out.txt", "2>&1"]);
    }

    #[test]
    fn redirection_before_command() {
        let stmt = parse("< in.txt cat -n").unwrap();
        assert_eq!(stmt.tokens, vec!["cat", "-n"]);
        assert_eq!(stmt.redirections, vec!["<", "in.txt"]);
    }

    #[test]
    fn quoted_words_are_not_split() {
        let stmt = parse("echo 'a > b'").unwrap();
        assert_eq!(stmt.tokens, vec!["echo", "a > b"]);
    }

    #[test]
    fn quoted_operators_are_literal() {
        let stmt = parse(r#"echo '>' x "2>&1" \< y"#).unwrap();
        assert_eq!(stmt.tokens, vec!["echo", ">", "x", "2>&1", "<", "y"]);
        assert!(stmt.redirections.is_empty());

        let stmt = parse("echo '>out.txt' \\>b").unwrap();
        assert_eq!(stmt.tokens, vec!["echo", ">out.txt", ">b"]);
        assert!(stmt.redirections.is_empty());
    }

    #[test]
    fn quoted_targets_keep_their_spaces() {
        let stmt = parse(r#"cat > "my file.txt" 2>'err log'"#).unwrap();
        assert_eq!(stmt.tokens, vec!["cat"]);
        assert_eq!(stmt.redirections, vec![">", "my file.txt", "2>", "err log"]);
    }

    #[test]
    fn comment_ends_the_statement() {
        let stmt = parse("echo hi # > ignored").unwrap();
        assert_eq!(stmt.tokens, vec!["echo", "hi"]);
        assert!(stmt.redirections.is_empty());
    }

    #[test]
    fn classify_takes_words_as_written() {
        let stmt = classify(vec!["echo".to_string(), ">".to_string(), "f".to_string()]);
        assert_eq!(stmt.tokens, vec!["echo"]);
        assert_eq!(stmt.redirections, vec![">", "f"]);
    }

    #[test]
    fn empty_statement_with_redirections() {
        let stmt = parse("<in.txt >>out.txt").unwrap();
        assert!(stmt.is_empty());
        assert_eq!(stmt.redirections, vec!["<", "in.txt", ">>", "out.txt"]);

        let stmt = parse("< in.txt > out.txt").unwrap();
        assert!(stmt.is_empty());
        assert_eq!(stmt.redirections, vec!["<", "in.txt", ">", "out.txt"]);
    }

    #[test]
    fn attached_target_splits_on_longest_operator() {
        let stmt = parse("cmd 2>>err.log &>all.log a>b").unwrap();
        assert_eq!(stmt.tokens, vec!["cmd", "a>b"]);
        assert_eq!(stmt.redirections, vec!["2>>", "err.log", "&>", "all.log"]);
    }

    #[test]
    fn trailing_operator_keeps_no_target() {
        let stmt = parse("echo >").unwrap();
        assert_eq!(stmt.redirections, vec![">"]);
        assert!(stmt.directives().is_err());
    }

    #[test]
    fn unbalanced_quotes() {
        assert!(matches!(
            parse("echo 'oops"),
            Err(ParseError::UnbalancedQuotes(_))
        ));
    }

    #[test]
    fn display_joins_words() {
        let stmt = parse("cat < in.txt").unwrap();
        assert_eq!(stmt.to_string(), "cat < in.txt");
    }
}
