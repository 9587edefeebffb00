//! Request filters compiled from rule lines.
//!
//! A rule line has the shape `[METHODS] PATTERN`:
//!
//! - `METHODS` is absent, `*`, or method tokens joined by `|`, `,` or `;`
//! - `PATTERN` is a regular expression matched case-insensitively against the full URL
//!
//! CONNECT exchanges never match: tunnels are opaque and cannot be cached.

mod set;

pub use set::{DEFAULT_RULES, FilterSet};

use regex::{Regex, RegexBuilder};

const METHOD_SEPARATORS: [char; 3] = ['|', ',', ';'];

/// A single compiled rule.
#[derive(Debug, Clone)]
pub struct Filter {
    /// Uppercase method tokens, `None` meaning any method.
    methods: Option<Vec<String>>,
    pattern: Regex,
}

impl Filter {
    /// Compile one rule line.
    ///
    /// The text before the first whitespace run is treated as a method list when every
    /// token in it looks like an HTTP method. Otherwise the whole line is the pattern.
    pub fn parse(line: &str) -> Result<Self, regex::Error> {
        let line = line.trim();

        let (methods, pattern) = match line.split_once(char::is_whitespace) {
            Some((prefix, rest)) => match parse_method_list(prefix) {
                Some(methods) => (methods, rest.trim_start()),
                None => (None, line),
            },
            None => (None, line),
        };

        let pattern = RegexBuilder::new(pattern).case_insensitive(true).build()?;

        Ok(Self { methods, pattern })
    }

    /// Whether an exchange with this method and URL should be cached.
    pub fn matches(&self, method: &str, url: &str) -> bool {
        if method.eq_ignore_ascii_case("CONNECT") {
            return false;
        }

        if let Some(methods) = &self.methods
            && !methods.iter().any(|m| m.eq_ignore_ascii_case(method))
        {
            return false;
        }

        self.pattern.is_match(url)
    }

    /// Method restriction, `None` when any method matches.
    pub fn methods(&self) -> Option<&[String]> {
        self.methods.as_deref()
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }
}

/// Parse the method prefix of a rule.
///
/// Returns `Some(None)` for the wildcard, `Some(Some(..))` for a method list and `None`
/// when the prefix is not a method list at all. A prefix made only of separators is an
/// empty method list, which never matches.
fn parse_method_list(prefix: &str) -> Option<Option<Vec<String>>> {
    if prefix.is_empty() || prefix == "*" {
        return Some(None);
    }

    let tokens: Vec<&str> = prefix
        .split(METHOD_SEPARATORS)
        .filter(|t| !t.is_empty())
        .collect();

    if !tokens.iter().all(|t| is_method_token(t)) {
        return None;
    }

    Some(Some(tokens.iter().map(|t| t.to_ascii_uppercase()).collect()))
}

fn is_method_token(token: &str) -> bool {
    token.bytes().all(|b| b.is_ascii_alphabetic() || b == b'-')
}
