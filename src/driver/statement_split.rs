//! Multi-statement splitting for Script Drivers. Mirrors the token-boundary
//! splitting the reference crate's own SQL tooling uses (tokenize, then cut
//! on `Token::SemiColon`) rather than a naive `str::split(';')`, so that a
//! semicolon inside a string literal or comment is never mistaken for a
//! statement terminator.

use sqlparser::dialect::GenericDialect;
use sqlparser::tokenizer::{Token, Tokenizer};

/// Splits `body` into individual statements on token-aware boundaries.
/// `max_statement_len` is the safety valve named in the Script Driver
/// contract: `0` disables it, any other value is advisory only (an
/// oversized statement is kept whole and surfaced to the caller, not
/// truncated mid-token, which would corrupt the SQL).
pub fn split_statements(body: &str, max_statement_len: usize) -> Vec<String> {
    let dialect = GenericDialect {};
    let mut tokenizer = Tokenizer::new(&dialect, body);
    let tokens = match tokenizer.tokenize() {
        Ok(tokens) => tokens,
        // Falls back to treating the whole body as one statement if the
        // generic tokenizer chokes on dialect-specific syntax; execution
        // still surfaces any real syntax error from the server itself.
        Err(_) => return vec![body.to_string()],
    };

    let mut statements = Vec::new();
    let mut current = String::new();

    for token in tokens {
        use std::fmt::Write;
        let _ = write!(current, "{token}");

        if token == Token::SemiColon {
            let trimmed = current.trim();
            if !trimmed.is_empty() {
                statements.push(trimmed.to_string());
            }
            current.clear();
        }
    }

    let trailing = current.trim();
    if !trailing.is_empty() {
        statements.push(trailing.to_string());
    }

    statements
        .into_iter()
        .map(|stmt| cap_length(stmt, max_statement_len))
        .collect()
}

fn cap_length(statement: String, max_len: usize) -> String {
    if max_len == 0 || statement.len() <= max_len {
        statement
    } else {
        tracing::warn!(
            len = statement.len(),
            max_len,
            "statement exceeds the configured maximum length; executing it whole rather than risk corrupting it by cutting mid-token"
        );
        statement
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_semicolons() {
        let body = "CREATE TABLE t (id INT); INSERT INTO t VALUES (1);";
        let statements = split_statements(body, 0);
        assert_eq!(statements.len(), 2);
        assert!(statements[0].contains("CREATE TABLE"));
        assert!(statements[1].contains("INSERT INTO"));
    }

    #[test]
    fn ignores_semicolons_inside_string_literals() {
        let body = "INSERT INTO t (name) VALUES ('a;b'); SELECT 1;";
        let statements = split_statements(body, 0);
        assert_eq!(statements.len(), 2);
        assert!(statements[0].contains("'a;b'") || statements[0].contains("a;b"));
    }

    #[test]
    fn tolerates_missing_trailing_semicolon() {
        let body = "SELECT 1";
        let statements = split_statements(body, 0);
        assert_eq!(statements, vec!["SELECT 1".to_string()]);
    }

    #[test]
    fn empty_body_yields_no_statements() {
        assert!(split_statements("   \n\t  ", 0).is_empty());
    }
}
