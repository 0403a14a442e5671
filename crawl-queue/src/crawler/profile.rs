//! Declarative selection of pre-authenticated browser profiles.
//!
//! A rule maps a URL pattern to a profile name. Rules are evaluated in
//! order once per job; the first rule matching any of the job's URLs wins.

use regex::Regex;

use crate::{Error, Result};

/// Profile used for X/Twitter when no rules are configured.
pub const DEFAULT_PROFILE_NAME: &str = "profile";

const DEFAULT_RULE_PATTERN: &str = r"//(x\.com|twitter\.com)";

#[derive(Debug, Clone)]
pub struct ProfileRule {
    pattern: Regex,
    profile: String,
}

impl ProfileRule {
    pub fn new(pattern: &str, profile: impl Into<String>) -> Result<Self> {
        let pattern = Regex::new(pattern)
            .map_err(|e| Error::config(format!("Invalid profile pattern '{}': {}", pattern, e)))?;
        let profile = profile.into();
        if profile.is_empty() || profile.contains(['/', '\\']) || profile.contains("..") {
            return Err(Error::config(format!("Invalid profile name '{}'", profile)));
        }
        Ok(Self { pattern, profile })
    }

    pub fn matches(&self, url: &str) -> bool {
        self.pattern.is_match(url)
    }

    pub fn profile(&self) -> &str {
        &self.profile
    }
}

/// Ordered list of [`ProfileRule`]s.
#[derive(Debug, Clone)]
pub struct ProfileRules {
    rules: Vec<ProfileRule>,
}

impl ProfileRules {
    pub fn new(rules: Vec<ProfileRule>) -> Self {
        Self { rules }
    }

    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Parse `pattern=>profile` pairs separated by `;`.
    ///
    /// Example: `//(x\.com|twitter\.com)=>profile;instagram\.com=>insta`
    pub fn parse(spec: &str) -> Result<Self> {
        let mut rules = Vec::new();
        for entry in spec.split(';').map(str::trim).filter(|e| !e.is_empty()) {
            let (pattern, profile) = entry.rsplit_once("=>").ok_or_else(|| {
                Error::config(format!(
                    "Invalid profile rule '{}', expected 'pattern=>profile'",
                    entry
                ))
            })?;
            rules.push(ProfileRule::new(pattern.trim(), profile.trim())?);
        }
        Ok(Self { rules })
    }

    /// Name of the first profile whose rule matches any of `urls`.
    pub fn select<S: AsRef<str>>(&self, urls: &[S]) -> Option<&str> {
        self.rules
            .iter()
            .find(|rule| urls.iter().any(|url| rule.matches(url.as_ref())))
            .map(ProfileRule::profile)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl Default for ProfileRules {
    fn default() -> Self {
        match ProfileRule::new(DEFAULT_RULE_PATTERN, DEFAULT_PROFILE_NAME) {
            Ok(rule) => Self::new(vec![rule]),
            Err(_) => Self::empty(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_rules_match_twitter() {
        let rules = ProfileRules::default();
        assert_eq!(rules.len(), 1);
        assert_eq!(
            rules.select(&["https://example.com", "https://x.com/user/status/1"]),
            Some("profile")
        );
        assert_eq!(rules.select(&["https://twitter.com/user"]), Some("profile"));
        assert_eq!(rules.select(&["https://example.com/x.com"]), None);
    }

    #[test]
    fn test_first_matching_rule_wins() {
        let rules = ProfileRules::parse(r"insta\.com=>insta; //x\.com=>twitter").unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(
            rules.select(&["https://x.com/a", "https://insta.com/b"]),
            Some("insta")
        );
        assert_eq!(rules.select(&["https://x.com/a"]), Some("twitter"));
    }

    #[test]
    fn test_parse_errors() {
        assert!(ProfileRules::parse("no-arrow").is_err());
        assert!(ProfileRules::parse("(=>p").is_err());
        assert!(ProfileRules::parse("a=>../etc").is_err());
        assert!(ProfileRules::parse("").unwrap().is_empty());
    }
}
