use regex::Regex;

use crate::header::Header;

/// A single filter entry: either a literal string or a regular expression,
/// matched against a header field's string value.
#[derive(Debug, Clone)]
pub enum Matcher {
    Literal(String),
    Regex(Regex),
}

impl Matcher {
    pub fn literal(value: impl Into<String>) -> Self {
        Matcher::Literal(value.into())
    }

    pub fn regex(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Matcher::Regex(Regex::new(pattern)?))
    }

    fn matches(&self, value: &str) -> bool {
        match self {
            Matcher::Literal(l) => l == value,
            Matcher::Regex(r) => r.is_match(value),
        }
    }
}

// Regex has no PartialEq; subscriptions dedup by the original pattern text.
impl PartialEq for Matcher {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Matcher::Literal(a), Matcher::Literal(b)) => a == b,
            (Matcher::Regex(a), Matcher::Regex(b)) => a.as_str() == b.as_str(),
            _ => false,
        }
    }
}

/// Routing filter attached to a subscription: `{ broadcast?, to, from }` per
/// spec §3.4/§4.9.4. `to`/`from` entries are literal strings or regexes.
#[derive(Debug, Clone, Default)]
pub struct Filters {
    pub broadcast: Option<bool>,
    pub to: Option<Vec<Matcher>>,
    pub from: Option<Vec<Matcher>>,
}

impl Filters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_broadcast(mut self, broadcast: bool) -> Self {
        self.broadcast = Some(broadcast);
        self
    }

    pub fn with_to(mut self, to: Vec<Matcher>) -> Self {
        self.to = Some(to);
        self
    }

    pub fn with_from(mut self, from: Vec<Matcher>) -> Self {
        self.from = Some(from);
        self
    }

    /// Property P4's filter predicate:
    /// `match_from(h, f.from) ∧ (f.to == f.broadcast == ∅
    ///   ∨ (f.broadcast ∧ h.to == ∅)
    ///   ∨ (f.to ≠ ∅ ∧ h.to ∈ f.to))`
    pub fn matches(&self, header: &Header) -> bool {
        if let Some(from) = &self.from {
            if !from.iter().any(|m| m.matches(&header.from)) {
                return false;
            }
        }

        if self.to.is_none() && self.broadcast.is_none() {
            return true;
        }

        let broadcast_matches = self.broadcast == Some(true) && header.is_broadcast();
        let to_matches = match (&self.to, &header.to) {
            (Some(to), Some(h_to)) => to.iter().any(|m| m.matches(h_to)),
            _ => false,
        };
        broadcast_matches || to_matches
    }
}

impl PartialEq for Filters {
    fn eq(&self, other: &Self) -> bool {
        self.broadcast == other.broadcast && self.to == other.to && self.from == other.from
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_with_to(to: Option<&str>) -> Header {
        let mut h = Header::new("OrderCreated", 1, "orders-service");
        h.to = to.map(|s| s.to_string());
        h
    }

    #[test]
    fn both_empty_accepts_everything() {
        let f = Filters::new();
        assert!(f.matches(&header_with_to(None)));
        assert!(f.matches(&header_with_to(Some("svc-a"))));
    }

    #[test]
    fn only_broadcast_true_matches_broadcast_only() {
        let f = Filters::new().with_broadcast(true);
        assert!(f.matches(&header_with_to(None)));
        assert!(!f.matches(&header_with_to(Some("svc-a"))));
    }

    #[test]
    fn only_to_matches_listed_targets() {
        let f = Filters::new().with_to(vec![Matcher::literal("svc-a")]);
        assert!(f.matches(&header_with_to(Some("svc-a"))));
        assert!(!f.matches(&header_with_to(Some("svc-b"))));
        assert!(!f.matches(&header_with_to(None)));
    }

    #[test]
    fn broadcast_and_to_both_set() {
        let f = Filters::new()
            .with_broadcast(true)
            .with_to(vec![Matcher::literal("svc-a")]);
        assert!(f.matches(&header_with_to(None)));
        assert!(f.matches(&header_with_to(Some("svc-a"))));
        assert!(!f.matches(&header_with_to(Some("svc-b"))));
    }

    #[test]
    fn from_regex_matches_pattern() {
        let f = Filters::new().with_from(vec![Matcher::regex("^payment-.*").unwrap()]);
        let mut h = header_with_to(None);
        h.from = "payment-us".to_string();
        assert!(f.matches(&h));
        h.from = "orders".to_string();
        assert!(!f.matches(&h));
    }

    #[test]
    fn from_mismatch_short_circuits_even_with_matching_to() {
        let f = Filters::new()
            .with_from(vec![Matcher::literal("payment-service")])
            .with_to(vec![Matcher::literal("svc-a")]);
        let mut h = header_with_to(Some("svc-a"));
        h.from = "orders-service".to_string();
        assert!(!f.matches(&h));
    }
}
