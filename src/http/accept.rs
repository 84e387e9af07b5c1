//! `Accept` header handling as an ordered set of media-type tokens.

use std::fmt;

/// Media type of a single JSON document.
pub const JSON_DOCUMENT: &str = "application/json";

/// Media type of a server-sent event stream.
pub const EVENT_STREAM: &str = "text/event-stream";

/// Insertion-ordered set of media-type tokens.
///
/// Tokens are compared verbatim after trimming; parameters such as `;q=0.9`
/// are part of the token.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AcceptSet {
    tokens: Vec<String>,
}

impl AcceptSet {
    /// An empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// A set holding exactly one token.
    pub fn only(token: &str) -> Self {
        let mut set = Self::new();
        set.insert(token);
        set
    }

    /// Parse a header value: split on commas, trim, drop empties, dedupe.
    pub fn parse(header: &str) -> Self {
        let mut set = Self::new();
        for token in header.split(',') {
            set.insert(token);
        }
        set
    }

    /// Parse and merge several header values, as sent when a client repeats
    /// the header.
    pub fn parse_all<'a>(headers: impl IntoIterator<Item = &'a str>) -> Self {
        headers
            .into_iter()
            .fold(Self::new(), |set, header| set.union(&Self::parse(header)))
    }

    /// The tokens a bidirectional exchange needs: a JSON document and an
    /// event stream.
    pub fn bidirectional() -> Self {
        let mut set = Self::only(JSON_DOCUMENT);
        set.insert(EVENT_STREAM);
        set
    }

    /// Insert a token. Returns `false` if it was empty or already present.
    pub fn insert(&mut self, token: &str) -> bool {
        let token = token.trim();
        if token.is_empty() || self.contains(token) {
            return false;
        }
        self.tokens.push(token.to_string());
        true
    }

    /// Union of two sets, keeping `self`'s order followed by new tokens from
    /// `other`.
    pub fn union(&self, other: &AcceptSet) -> AcceptSet {
        let mut merged = self.clone();
        for token in &other.tokens {
            merged.insert(token);
        }
        merged
    }

    /// Whether the exact token is present.
    pub fn contains(&self, token: &str) -> bool {
        self.tokens.iter().any(|t| t == token.trim())
    }

    /// Iterate tokens in order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.tokens.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Render as a header value.
    pub fn to_header_value(&self) -> String {
        self.tokens.join(", ")
    }
}

impl fmt::Display for AcceptSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_header_value())
    }
}
