//! Pattern matchers deciding whether a record is the awaited event
//!
//! A matcher combines exact `(app_id, context_id)` filters with a payload
//! predicate. Predicates are either a compiled regex (named groups become
//! captures), a regex template with `${field}` placeholders that is completed
//! by [`PatternMatcher::bind`] from values captured by an earlier match, or a
//! custom callable.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use dltkpi_core::{CorrelationError, CorrelationResult, FilterPair, LogRecord};
use regex::Regex;

/// Named values extracted from a payload
pub type Captures = BTreeMap<String, String>;

/// Result of a successful match
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchResult {
    pub captures: Captures,
}

type CustomPredicate = dyn Fn(&str) -> Option<Captures> + Send + Sync;

fn placeholder_regex() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder regex is valid")
    })
}

/// Regex source with `${field}` placeholders
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadTemplate {
    source: String,
    fields: Vec<String>,
}

impl PayloadTemplate {
    /// Parse a template and check it compiles once filled in
    pub fn parse(source: &str) -> CorrelationResult<Self> {
        let mut fields: Vec<String> = Vec::new();
        for caps in placeholder_regex().captures_iter(source) {
            let name = caps[1].to_string();
            if !fields.contains(&name) {
                fields.push(name);
            }
        }

        let template = Self {
            source: source.to_string(),
            fields,
        };

        let probe: Captures = template
            .fields
            .iter()
            .map(|f| (f.clone(), "0".to_string()))
            .collect();
        Regex::new(&template.render(&probe)?).map_err(|e| {
            CorrelationError::configuration(format!("Invalid payload template '{}': {}", source, e))
        })?;

        Ok(template)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Placeholder names in order of first appearance
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Substitute escaped captured values for every placeholder
    pub fn render(&self, captures: &Captures) -> CorrelationResult<String> {
        if let Some(missing) = self.fields.iter().find(|f| !captures.contains_key(*f)) {
            return Err(CorrelationError::configuration(format!(
                "Field '{}' required by template '{}' was not captured",
                missing, self.source
            )));
        }

        let rendered = placeholder_regex().replace_all(&self.source, |caps: &regex::Captures| {
            captures
                .get(&caps[1])
                .map(|value| regex::escape(value))
                .unwrap_or_default()
        });
        Ok(rendered.into_owned())
    }
}

/// Payload predicate of a matcher
#[derive(Clone)]
pub enum PayloadPredicate {
    Regex(Regex),
    /// Not matchable until bound
    Template(PayloadTemplate),
    Custom(Arc<CustomPredicate>),
}

impl fmt::Debug for PayloadPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadPredicate::Regex(re) => f.debug_tuple("Regex").field(&re.as_str()).finish(),
            PayloadPredicate::Template(t) => f.debug_tuple("Template").field(&t.source).finish(),
            PayloadPredicate::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Stateless description of an awaited DLT event
#[derive(Debug, Clone)]
pub struct PatternMatcher {
    app_id: String,
    context_id: String,
    predicate: PayloadPredicate,
}

impl PatternMatcher {
    /// Matcher with a regex payload pattern
    pub fn regex(
        app_id: impl Into<String>,
        context_id: impl Into<String>,
        pattern: &str,
    ) -> CorrelationResult<Self> {
        let regex = Regex::new(pattern).map_err(|e| {
            CorrelationError::configuration(format!("Invalid payload pattern '{}': {}", pattern, e))
        })?;
        Ok(Self::from_regex(app_id, context_id, regex))
    }

    pub fn from_regex(
        app_id: impl Into<String>,
        context_id: impl Into<String>,
        regex: Regex,
    ) -> Self {
        Self {
            app_id: app_id.into(),
            context_id: context_id.into(),
            predicate: PayloadPredicate::Regex(regex),
        }
    }

    /// Matcher whose pattern depends on fields captured by a prior match
    pub fn template(
        app_id: impl Into<String>,
        context_id: impl Into<String>,
        template: &str,
    ) -> CorrelationResult<Self> {
        Ok(Self {
            app_id: app_id.into(),
            context_id: context_id.into(),
            predicate: PayloadPredicate::Template(PayloadTemplate::parse(template)?),
        })
    }

    /// Matcher with a custom payload predicate
    pub fn custom<F>(app_id: impl Into<String>, context_id: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&str) -> Option<Captures> + Send + Sync + 'static,
    {
        Self {
            app_id: app_id.into(),
            context_id: context_id.into(),
            predicate: PayloadPredicate::Custom(Arc::new(predicate)),
        }
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn context_id(&self) -> &str {
        &self.context_id
    }

    pub fn predicate(&self) -> &PayloadPredicate {
        &self.predicate
    }

    pub fn filter_pair(&self) -> FilterPair {
        FilterPair::new(&self.app_id, &self.context_id)
    }

    /// Fields that must be bound before this matcher can match
    pub fn required_fields(&self) -> &[String] {
        match &self.predicate {
            PayloadPredicate::Template(t) => t.fields(),
            _ => &[],
        }
    }

    /// Named capture groups this matcher produces
    pub fn capture_names(&self) -> Vec<String> {
        match &self.predicate {
            PayloadPredicate::Regex(re) => re.capture_names().flatten().map(String::from).collect(),
            _ => Vec::new(),
        }
    }

    pub fn is_bound(&self) -> bool {
        !matches!(self.predicate, PayloadPredicate::Template(_))
    }

    /// Check `record` against the filters and the payload predicate
    ///
    /// Unbound templates never match.
    pub fn matches(&self, record: &LogRecord) -> Option<MatchResult> {
        if record.app_id != self.app_id || record.context_id != self.context_id {
            return None;
        }

        match &self.predicate {
            PayloadPredicate::Regex(re) => {
                let caps = re.captures(&record.payload)?;
                let captures = re
                    .capture_names()
                    .flatten()
                    .filter_map(|name| {
                        caps.name(name)
                            .map(|m| (name.to_string(), m.as_str().to_string()))
                    })
                    .collect();
                Some(MatchResult { captures })
            }
            PayloadPredicate::Template(_) => None,
            PayloadPredicate::Custom(predicate) => {
                predicate(&record.payload).map(|captures| MatchResult { captures })
            }
        }
    }

    /// Return a new matcher specialized with `captures`
    ///
    /// Templates are rendered into a regex; other predicates carry no
    /// placeholders and are returned unchanged. Fails with a configuration
    /// error when a required field is missing.
    pub fn bind(&self, captures: &Captures) -> CorrelationResult<PatternMatcher> {
        let predicate = match &self.predicate {
            PayloadPredicate::Template(template) => {
                let source = template.render(captures)?;
                let regex = Regex::new(&source).map_err(|e| {
                    CorrelationError::configuration(format!(
                        "Bound template '{}' is not a valid pattern: {}",
                        source, e
                    ))
                })?;
                PayloadPredicate::Regex(regex)
            }
            other => other.clone(),
        };

        Ok(Self {
            app_id: self.app_id.clone(),
            context_id: self.context_id.clone(),
            predicate,
        })
    }

    /// Short human-readable form used in logs and error messages
    pub fn describe(&self) -> String {
        let payload = match &self.predicate {
            PayloadPredicate::Regex(re) => format!("/{}/", re.as_str()),
            PayloadPredicate::Template(t) => format!("template /{}/", t.source()),
            PayloadPredicate::Custom(_) => "<custom predicate>".to_string(),
        };
        format!("{}:{} {}", self.app_id, self.context_id, payload)
    }
}

impl fmt::Display for PatternMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn nav(payload: &str) -> LogRecord {
        LogRecord::new(1.0, "NAV", "RGC", payload)
    }

    #[test]
    fn test_regex_match_extracts_named_groups() {
        let matcher =
            PatternMatcher::regex("NAV", "RGC", r"route requested handle=(?P<handle>\d+)").unwrap();

        let result = matcher.matches(&nav("[NAVI] route requested handle=42 dest=home")).unwrap();
        assert_eq!(result.captures.get("handle").map(String::as_str), Some("42"));
        assert_eq!(matcher.capture_names(), vec!["handle".to_string()]);
    }

    #[test]
    fn test_filters_are_exact() {
        let matcher = PatternMatcher::regex("NAV", "RGC", "route").unwrap();
        assert!(matcher.matches(&LogRecord::new(1.0, "NAV", "RGCX", "route")).is_none());
        assert!(matcher.matches(&LogRecord::new(1.0, "NA", "RGC", "route")).is_none());
        assert!(matcher.matches(&nav("route")).is_some());
    }

    #[test]
    fn test_template_binds_escaped_values() {
        let end = PatternMatcher::template("NAV", "RGC", r"route done handle=${handle}\b").unwrap();
        assert!(!end.is_bound());
        assert_eq!(end.required_fields(), ["handle".to_string()]);
        assert!(end.matches(&nav("route done handle=42")).is_none());

        let mut captures = Captures::new();
        captures.insert("handle".into(), "4.2".into());
        let bound = end.bind(&captures).unwrap();

        assert!(bound.is_bound());
        assert!(bound.matches(&nav("route done handle=4.2")).is_some());
        // '.' must be literal after escaping
        assert!(bound.matches(&nav("route done handle=4x2")).is_none());
        // the unbound matcher stays untouched
        assert!(!end.is_bound());
    }

    #[test]
    fn test_bind_missing_field_is_configuration_error() {
        let end = PatternMatcher::template("NAV", "RGC", "done ${handle} ${session}").unwrap();
        let mut captures = Captures::new();
        captures.insert("handle".into(), "1".into());

        let err = end.bind(&captures).unwrap_err();
        assert!(matches!(err, CorrelationError::Configuration(ref msg) if msg.contains("session")));
    }

    #[test]
    fn test_invalid_patterns_fail_fast() {
        assert!(matches!(
            PatternMatcher::regex("A", "B", "(unclosed"),
            Err(CorrelationError::Configuration(_))
        ));
        assert!(matches!(
            PatternMatcher::template("A", "B", "(${x}"),
            Err(CorrelationError::Configuration(_))
        ));
    }

    #[test]
    fn test_custom_predicate() {
        let matcher = PatternMatcher::custom("ALD", "LCAT", |payload| {
            payload
                .strip_prefix("user=")
                .map(|user| Captures::from([("user".to_string(), user.to_string())]))
        });

        let record = LogRecord::new(2.0, "ALD", "LCAT", "user=guest");
        let result = matcher.matches(&record).unwrap();
        assert_eq!(result.captures["user"], "guest");
        assert_eq!(matcher.describe(), "ALD:LCAT <custom predicate>");
    }
}
