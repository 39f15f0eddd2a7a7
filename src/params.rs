//! Stylesheet parameters and the allow-lists that guard them.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use tracing::warn;

use crate::error::{PipelineError, PipelineResult};

static DATE_TIME_REGEX: OnceLock<Regex> = OnceLock::new();
static FLAG_REGEX: OnceLock<Regex> = OnceLock::new();

fn date_time_regex() -> &'static Regex {
    DATE_TIME_REGEX
        .get_or_init(|| Regex::new(r"^[0-9T-]{1,32}$").expect("Failed to compile date-time regex"))
}

fn flag_regex() -> &'static Regex {
    FLAG_REGEX.get_or_init(|| Regex::new(r"^(true|false)$").expect("Failed to compile flag regex"))
}

/// The set of values a parameter accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamRule {
    /// Digits, `T` and `-`, such as `2024-05-01T12`
    DateTime,
    /// `true` or `false`
    Flag,
}

impl ParamRule {
    fn check(&self, value: &str) -> Result<(), &'static str> {
        let (regex, reason) = match self {
            ParamRule::DateTime => (date_time_regex(), "expected digits, 'T' and '-' only"),
            ParamRule::Flag => (flag_regex(), "expected 'true' or 'false'"),
        };
        if regex.is_match(value) { Ok(()) } else { Err(reason) }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub rule: ParamRule,
}

impl ParamSpec {
    pub const fn new(name: &'static str, rule: ParamRule) -> Self {
        Self { name, rule }
    }
}

/// Named string parameters, kept in name order so command lines are stable
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Parameters(BTreeMap<String, String>);

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Check every parameter against `allowed`. Names missing from `allowed`
    /// are rejected along with values outside their rule.
    pub fn validate(&self, allowed: &[ParamSpec]) -> PipelineResult<()> {
        for (name, value) in self.iter() {
            let Some(spec) = allowed.iter().find(|spec| spec.name == name) else {
                warn!(parameter = name, "unknown parameter rejected");
                return Err(PipelineError::InvalidParameter {
                    name: name.to_string(),
                    reason: "not accepted by this stylesheet".to_string(),
                });
            };
            if let Err(reason) = spec.rule.check(value) {
                warn!(parameter = name, "parameter value rejected");
                return Err(PipelineError::InvalidParameter {
                    name: name.to_string(),
                    reason: reason.to_string(),
                });
            }
        }
        Ok(())
    }

    /// `name=value` command-line arguments, one per parameter
    pub fn to_args(&self) -> Vec<String> {
        self.iter().map(|(name, value)| format!("{name}={value}")).collect()
    }
}

/// Keep only digits, `T` and `-` from a caller-supplied token
pub fn sanitize_token(token: &str) -> String {
    token
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == 'T' || *c == '-')
        .collect()
}

/// Download name for a rendered report
pub fn download_filename(token: Option<&str>) -> String {
    match token.map(sanitize_token) {
        Some(clean) if !clean.is_empty() => format!("report-{clean}.pdf"),
        _ => "report.pdf".to_string(),
    }
}
