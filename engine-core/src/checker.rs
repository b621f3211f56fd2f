//! Command parser & checkers.
//!
//! A command is a static description of one callable action: a name, a help
//! string and an ordered chain of *checkers*. Each checker consumes zero or
//! more whitespace-delimited tokens from the request and yields either a typed
//! value or a positional rejection. Dispatch tries commands in registration
//! order; the first whose checker chain consumes every token executes.
//!
//! This module only supplies the checker primitives the rest of the engine
//! needs (keyword / bounded integer / enumerated / boolean / free string /
//! optional / repeated) — it is not a general-purpose parser-combinator
//! library, and game modules that need anything fancier compose these.

/// Tokenizes one incoming request and tracks how far checkers have consumed it.
#[derive(Clone, Debug)]
pub struct TokenReader {
    tokens: Vec<String>,
    pos: usize,
}

impl TokenReader {
    /// Splits `text` on ascii whitespace into tokens.
    pub fn new(text: &str) -> Self {
        TokenReader {
            tokens: text.split_whitespace().map(str::to_owned).collect(),
            pos: 0,
        }
    }

    /// Tokens remaining to be consumed, in order.
    pub fn remaining(&self) -> &[String] {
        &self.tokens[self.pos..]
    }

    /// True once every token has been consumed by some checker.
    pub fn is_exhausted(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    /// Restores a previously saved position, used when a checker chain fails
    /// partway through and the next command needs a clean reader.
    pub fn rewind_to(&mut self, pos: usize) {
        self.pos = pos;
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    fn next_token(&mut self) -> Option<&str> {
        let tok = self.tokens.get(self.pos)?;
        self.pos += 1;
        Some(tok.as_str())
    }
}

/// A positional diagnostic: which token index failed, and what was expected.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckError {
    pub position: usize,
    pub expected: String,
}

impl std::fmt::Display for CheckError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "at token {}: expected {}", self.position, self.expected)
    }
}

/// One checker consuming some prefix of the remaining tokens and producing `T`.
pub trait Checker<T> {
    fn check(&self, reader: &mut TokenReader) -> Result<T, CheckError>;
    /// Human-readable form of what this checker expects, used in diagnostics
    /// and in `command_info`.
    fn hint(&self) -> String;
}

/// Matches one literal token, case-sensitive, producing nothing useful beyond
/// "this command applies".
pub struct Keyword(pub &'static str);

impl Checker<()> for Keyword {
    fn check(&self, reader: &mut TokenReader) -> Result<(), CheckError> {
        let pos = reader.position();
        match reader.next_token() {
            Some(tok) if tok == self.0 => Ok(()),
            _ => Err(CheckError {
                position: pos,
                expected: format!("keyword \"{}\"", self.0),
            }),
        }
    }

    fn hint(&self) -> String {
        self.0.to_string()
    }
}

/// Matches an integer token within an inclusive range.
pub struct BoundedInt {
    pub min: i64,
    pub max: i64,
}

impl Checker<i64> for BoundedInt {
    fn check(&self, reader: &mut TokenReader) -> Result<i64, CheckError> {
        let pos = reader.position();
        let expected = format!("integer in [{}, {}]", self.min, self.max);
        let tok = reader.next_token().ok_or_else(|| CheckError {
            position: pos,
            expected: expected.clone(),
        })?;
        let value: i64 = tok.parse().map_err(|_| CheckError {
            position: pos,
            expected: expected.clone(),
        })?;
        if value < self.min || value > self.max {
            return Err(CheckError {
                position: pos,
                expected,
            });
        }
        Ok(value)
    }

    fn hint(&self) -> String {
        format!("{}..={}", self.min, self.max)
    }
}

/// Matches one of a fixed set of `(keyword, value)` alternatives.
pub struct Enumerated<T: Clone> {
    pub alternatives: Vec<(&'static str, T)>,
}

impl<T: Clone> Checker<T> for Enumerated<T> {
    fn check(&self, reader: &mut TokenReader) -> Result<T, CheckError> {
        let pos = reader.position();
        let expected = format!(
            "one of [{}]",
            self.alternatives
                .iter()
                .map(|(k, _)| *k)
                .collect::<Vec<_>>()
                .join(", ")
        );
        let tok = reader.next_token().ok_or_else(|| CheckError {
            position: pos,
            expected: expected.clone(),
        })?;
        self.alternatives
            .iter()
            .find(|(k, _)| *k == tok)
            .map(|(_, v)| v.clone())
            .ok_or(CheckError {
                position: pos,
                expected,
            })
    }

    fn hint(&self) -> String {
        self.alternatives
            .iter()
            .map(|(k, _)| *k)
            .collect::<Vec<_>>()
            .join("|")
    }
}

/// Matches one of two words, mapping them to `true`/`false`.
pub struct BoolChecker {
    pub true_word: &'static str,
    pub false_word: &'static str,
}

impl Checker<bool> for BoolChecker {
    fn check(&self, reader: &mut TokenReader) -> Result<bool, CheckError> {
        let pos = reader.position();
        let expected = format!("\"{}\" or \"{}\"", self.true_word, self.false_word);
        let tok = reader.next_token().ok_or_else(|| CheckError {
            position: pos,
            expected: expected.clone(),
        })?;
        if tok == self.true_word {
            Ok(true)
        } else if tok == self.false_word {
            Ok(false)
        } else {
            Err(CheckError {
                position: pos,
                expected,
            })
        }
    }

    fn hint(&self) -> String {
        format!("{}|{}", self.true_word, self.false_word)
    }
}

/// Consumes one free-form token verbatim.
pub struct FreeString;

impl Checker<String> for FreeString {
    fn check(&self, reader: &mut TokenReader) -> Result<String, CheckError> {
        let pos = reader.position();
        reader
            .next_token()
            .map(str::to_owned)
            .ok_or_else(|| CheckError {
                position: pos,
                expected: "a string".to_string(),
            })
    }

    fn hint(&self) -> String {
        "<string>".to_string()
    }
}

/// Wraps another checker so that a failed or absent match falls back to a
/// default value instead of rejecting the command. Only the "ran out of
/// tokens" case is treated as absence; a present-but-malformed token is still
/// an error, so the caller gets a real diagnostic rather than silent fallback.
pub struct Optional<C> {
    pub inner: C,
    pub default: &'static str,
}

impl<C, T> Checker<T> for Optional<C>
where
    C: Checker<T>,
    T: Default + Clone,
{
    fn check(&self, reader: &mut TokenReader) -> Result<T, CheckError> {
        if reader.is_exhausted() {
            return Ok(T::default());
        }
        self.inner.check(reader)
    }

    fn hint(&self) -> String {
        format!("[{}] (default {})", self.inner.hint(), self.default)
    }
}

/// Repeats the inner checker until the reader is exhausted or the inner
/// checker rejects the next token, collecting every successful value.
pub struct Repeater<C> {
    pub inner: C,
}

impl<C, T> Checker<Vec<T>> for Repeater<C>
where
    C: Checker<T>,
{
    fn check(&self, reader: &mut TokenReader) -> Result<Vec<T>, CheckError> {
        let mut out = Vec::new();
        loop {
            if reader.is_exhausted() {
                break;
            }
            let save = reader.position();
            match self.inner.check(reader) {
                Ok(v) => out.push(v),
                Err(_) => {
                    reader.rewind_to(save);
                    break;
                }
            }
        }
        Ok(out)
    }

    fn hint(&self) -> String {
        format!("{}...", self.inner.hint())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_matches_and_rejects() {
        let mut reader = TokenReader::new("start now");
        assert!(Keyword("start").check(&mut reader).is_ok());
        assert!(Keyword("now").check(&mut reader).is_ok());
        assert!(reader.is_exhausted());

        let mut reader = TokenReader::new("stop");
        let err = Keyword("start").check(&mut reader).unwrap_err();
        assert_eq!(err.position, 0);
    }

    #[test]
    fn bounded_int_rejects_out_of_range() {
        let checker = BoundedInt { min: 1, max: 8 };
        let mut reader = TokenReader::new("9");
        assert!(checker.check(&mut reader).is_err());
        let mut reader = TokenReader::new("4");
        assert_eq!(checker.check(&mut reader).unwrap(), 4);
    }

    #[test]
    fn optional_defaults_when_tokens_exhausted() {
        let checker = Optional {
            inner: BoundedInt { min: 0, max: 10 },
            default: "0",
        };
        let mut reader = TokenReader::new("");
        assert_eq!(checker.check(&mut reader).unwrap(), 0);
    }

    #[test]
    fn repeater_stops_at_first_rejection() {
        let checker = Repeater {
            inner: BoundedInt { min: 0, max: 10 },
        };
        let mut reader = TokenReader::new("1 2 notanumber 3");
        let values = checker.check(&mut reader).unwrap();
        assert_eq!(values, vec![1, 2]);
        assert_eq!(reader.remaining(), &["notanumber", "3"]);
    }
}
