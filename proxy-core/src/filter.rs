use proxy_common::normalize_domain;
use wildmatch::WildMatch;

/// A set of domain patterns.
///
/// Patterns containing `*` or `?` are wildcard patterns matched against the
/// whole host. Plain entries match the domain itself and any of its subdomains.
#[derive(Debug, Clone, Default)]
pub struct DomainList {
    exact: Vec<String>,
    wildcards: Vec<(String, WildMatch)>,
}

impl DomainList {
    /// Create a new DomainList
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut list = Self::default();
        for pattern in patterns {
            list.insert(pattern.as_ref());
        }
        list
    }

    pub fn insert(&mut self, pattern: &str) {
        let pattern = normalize_domain(pattern);
        if pattern.is_empty() {
            return;
        }
        if pattern.contains('*') || pattern.contains('?') {
            let matcher = WildMatch::new(&pattern);
            self.wildcards.push((pattern, matcher));
        } else if !self.exact.contains(&pattern) {
            self.exact.push(pattern);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.wildcards.is_empty()
    }

    pub fn len(&self) -> usize {
        self.exact.len() + self.wildcards.len()
    }

    /// Check if a host is covered by this list
    pub fn matches(&self, host: &str) -> bool {
        let host = normalize_domain(host);

        for entry in &self.exact {
            if host == *entry
                || (host.len() > entry.len()
                    && host.ends_with(entry.as_str())
                    && host.as_bytes()[host.len() - entry.len() - 1] == b'.')
            {
                return true;
            }
        }

        self.wildcards.iter().any(|(_, matcher)| matcher.matches(&host))
    }

    pub fn patterns(&self) -> Vec<String> {
        self.exact
            .iter()
            .cloned()
            .chain(self.wildcards.iter().map(|(p, _)| p.clone()))
            .collect()
    }
}
