//! Label based node exclusion

use regex::Regex;

/// Ordered list of label patterns; a node whose label matches any of them is
/// never correlated
#[derive(Debug, Clone, Default)]
pub struct SkipPatterns {
    patterns: Vec<Regex>,
}

impl SkipPatterns {
    /// Compile all patterns, failing on the first invalid one
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, regex::Error> {
        let patterns = patterns
            .iter()
            .map(|pattern| Regex::new(pattern.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    /// First pattern matching `label`
    pub fn matching(&self, label: &str) -> Option<&str> {
        self.patterns
            .iter()
            .find(|pattern| pattern.is_match(label))
            .map(Regex::as_str)
    }

    pub fn is_skipped(&self, label: &str) -> bool {
        self.matching(label).is_some()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_match_wins() {
        let skip = SkipPatterns::new(&["^kube-", "proxy", "^kube-proxy$"]).unwrap();

        assert_eq!(skip.matching("kube-proxy"), Some("^kube-"));
        assert_eq!(skip.matching("envoy-proxy"), Some("proxy"));
        assert_eq!(skip.matching("checkout"), None);
    }

    #[test]
    fn test_empty_skips_nothing() {
        let skip = SkipPatterns::new::<&str>(&[]).unwrap();

        assert!(skip.is_empty());
        assert!(!skip.is_skipped("anything"));
    }

    #[test]
    fn test_invalid_pattern_is_rejected() {
        assert!(SkipPatterns::new(&["valid", "(unclosed"]).is_err());
    }
}
