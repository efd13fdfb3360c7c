use std::io::ErrorKind;
use std::path::Path;

use anyhow::Context as _;

pub const DEFAULT_RULES_PATH: &str = "/etc/exts.conf";

/// A `suffix:policy-group` line of the rules file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub suffix: String,
    pub policy_group: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification<'a> {
    /// The domain matched a rule. Its queries go to the rule's upstream group and its
    /// addresses are published to the address sets
    Routed { policy_group: &'a str },
    Default,
}

impl<'a> Classification<'a> {
    pub fn is_routed(&self) -> bool {
        matches!(self, Classification::Routed { .. })
    }

    pub fn policy_group(&self) -> Option<&'a str> {
        match *self {
            Classification::Routed { policy_group } => Some(policy_group),
            Classification::Default => None,
        }
    }
}

/// Immutable set of routing rules, shared by all query handlers
#[derive(Debug, Default, Clone)]
pub struct Classifier {
    rules: Vec<Rule>,
}

impl Classifier {
    /// Loads the rules file. A missing file means there are no rules.
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        match tokio::fs::read_to_string(path).await {
            Ok(data) => Ok(Classifier::parse(&data)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!(path = ?path, "Rules file doesn't exist, no domain will be routed");
                Ok(Classifier::default())
            }
            Err(e) => Err(e).with_context(|| format!("error while reading the rules file {:?}", path)),
        }
    }

    pub fn parse(data: &str) -> Self {
        let mut classifier = Classifier::default();

        for line in data.lines() {
            let line = line.trim();
            // Skip comments and empty lines
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((suffix, policy_group)) = parse_rule(line) else {
                tracing::debug!("Skipping malformed rule '{}'", line);
                continue;
            };
            classifier.add_rule(suffix, policy_group);
        }

        classifier
    }

    fn add_rule(&mut self, suffix: &str, policy_group: &str) {
        let suffix = suffix.to_ascii_lowercase();
        match self.rules.iter_mut().find(|rule| rule.suffix == suffix) {
            Some(rule) => rule.policy_group = policy_group.to_owned(),
            None => self.rules.push(Rule {
                suffix,
                policy_group: policy_group.to_owned(),
            }),
        }
    }

    /// A domain is routed when it contains a rule's suffix anywhere in its name,
    /// e.g. `cloudflare.com` matches `sub.cloudflare.com` but also `cloudflare.com.cn`.
    pub fn classify(&self, domain: &str) -> Classification<'_> {
        self.rules
            .iter()
            .find(|rule| contains_ignore_ascii_case(domain, &rule.suffix))
            .map_or(Classification::Default, |rule| Classification::Routed {
                policy_group: &rule.policy_group,
            })
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Exactly two non-empty colon-separated fields
fn parse_rule(line: &str) -> Option<(&str, &str)> {
    let mut fields = line.split(':');
    let (Some(suffix), Some(policy_group), None) = (fields.next(), fields.next(), fields.next()) else {
        return None;
    };
    let (suffix, policy_group) = (suffix.trim(), policy_group.trim());

    (!suffix.is_empty() && !policy_group.is_empty()).then_some((suffix, policy_group))
}

/// `needle` must already be lowercase
fn contains_ignore_ascii_case(haystack: &str, needle: &str) -> bool {
    let (haystack, needle) = (haystack.as_bytes(), needle.as_bytes());
    needle.len() <= haystack.len()
        && haystack
            .windows(needle.len())
            .any(|window| window.eq_ignore_ascii_case(needle))
}
