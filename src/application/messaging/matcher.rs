//! Command pattern grammar and argument extraction
//!
//! A pattern is a whitespace-separated list of tokens. The first token is the
//! command name; the rest declare arguments:
//!
//! - `<x>` required single value
//! - `[x]` optional single value
//! - `<...x>` required variadic, captures every remaining word
//! - `[...x]` optional variadic

use once_cell::sync::Lazy;
use regex_lite::Regex;

use crate::application::errors::{CommandError, HostError};

static ARG_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:<(\.\.\.)?([^<>\[\]\s]+)>|\[(\.\.\.)?([^<>\[\]\s]+)\])$")
        .expect("argument token regex is valid")
});

/// One declared argument slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgSpec {
    pub label: String,
    pub required: bool,
    pub variadic: bool,
}

/// A parsed command pattern such as `update <key> <value>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandPattern {
    raw: String,
    name: String,
    args: Vec<ArgSpec>,
}

impl CommandPattern {
    pub fn parse(raw: &str) -> Result<Self, HostError> {
        let invalid = |reason: String| HostError::InvalidPattern {
            pattern: raw.to_string(),
            reason,
        };

        let mut tokens = raw.split_whitespace();
        let name = tokens
            .next()
            .ok_or_else(|| invalid("pattern is empty".to_string()))?;
        if name.starts_with(['<', '[']) {
            return Err(invalid(format!("'{name}' is not a command name")));
        }

        let mut args: Vec<ArgSpec> = Vec::new();
        for token in tokens {
            if args.last().is_some_and(|a| a.variadic) {
                return Err(invalid("a variadic argument must come last".to_string()));
            }
            let caps = ARG_TOKEN
                .captures(token)
                .ok_or_else(|| invalid(format!("'{token}' is not an argument token")))?;

            let spec = if let Some(label) = caps.get(2) {
                ArgSpec {
                    label: label.as_str().to_string(),
                    required: true,
                    variadic: caps.get(1).is_some(),
                }
            } else {
                ArgSpec {
                    label: caps.get(4).map(|m| m.as_str()).unwrap_or_default().to_string(),
                    required: false,
                    variadic: caps.get(3).is_some(),
                }
            };
            args.push(spec);
        }

        Ok(Self {
            raw: raw.trim().to_string(),
            name: name.to_string(),
            args,
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn args(&self) -> &[ArgSpec] {
        &self.args
    }

    /// The text after the name token, or `None` if the first word isn't the name.
    pub fn strip_name<'a>(&self, text: &'a str) -> Option<&'a str> {
        let text = text.trim_start();
        let rest = text.strip_prefix(self.name.as_str())?;
        if rest.is_empty() || rest.starts_with(char::is_whitespace) {
            Some(rest.trim_start())
        } else {
            None
        }
    }

    /// Word-boundary match on the name token.
    pub fn is_matched(&self, text: &str) -> bool {
        self.strip_name(text).is_some()
    }

    /// Aligns the words after the name to the declared slots.
    pub fn parse_args(&self, text: &str) -> Args {
        let rest = self.strip_name(text).unwrap_or_default();
        let mut words = rest.split_whitespace().map(str::to_string);

        let values = self
            .args
            .iter()
            .map(|spec| {
                if spec.variadic {
                    ArgValue::Many(words.by_ref().collect())
                } else {
                    words.next().map(ArgValue::One).unwrap_or(ArgValue::Empty)
                }
            })
            .collect();
        Args { values }
    }

    /// First required slot that came back empty.
    pub fn validate(&self, args: &Args) -> Result<(), CommandError> {
        for (spec, value) in self.args.iter().zip(args.values.iter()) {
            if spec.required && value.is_empty() {
                return Err(CommandError::ArgumentMissing(spec.label.clone()));
            }
        }
        Ok(())
    }

    /// Human readable usage, e.g. `update <key> <value>`.
    pub fn usage(&self) -> String {
        let mut usage = self.name.clone();
        for spec in &self.args {
            let dots = if spec.variadic { "..." } else { "" };
            let (open, close) = if spec.required { ('<', '>') } else { ('[', ']') };
            usage.push_str(&format!(" {open}{dots}{}{close}", spec.label));
        }
        usage
    }
}

/// Value captured for one slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgValue {
    One(String),
    Many(Vec<String>),
    Empty,
}

impl ArgValue {
    pub fn is_empty(&self) -> bool {
        match self {
            ArgValue::One(s) => s.is_empty(),
            ArgValue::Many(v) => v.is_empty(),
            ArgValue::Empty => true,
        }
    }

    /// Variadic slots are joined with single spaces.
    pub fn to_text(&self) -> String {
        match self {
            ArgValue::One(s) => s.clone(),
            ArgValue::Many(v) => v.join(" "),
            ArgValue::Empty => String::new(),
        }
    }
}

/// Parsed arguments, one entry per declared slot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Args {
    values: Vec<ArgValue>,
}

impl Args {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn value(&self, index: usize) -> Option<&ArgValue> {
        self.values.get(index)
    }

    /// Single-value slot as text; `None` when absent.
    pub fn get(&self, index: usize) -> Option<&str> {
        match self.values.get(index)? {
            ArgValue::One(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Variadic slot words; empty when absent.
    pub fn rest(&self, index: usize) -> &[String] {
        match self.values.get(index) {
            Some(ArgValue::Many(v)) => v,
            _ => &[],
        }
    }

    /// One string per slot; empty slots give `""`.
    pub fn to_vec(&self) -> Vec<String> {
        self.values.iter().map(ArgValue::to_text).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pattern_specs() {
        let p = CommandPattern::parse("update <key> <value>").unwrap();
        assert_eq!(p.name(), "update");
        assert_eq!(p.args().len(), 2);
        assert!(p.args().iter().all(|a| a.required && !a.variadic));

        let p = CommandPattern::parse("say [target] <...words>").unwrap();
        assert!(!p.args()[0].required);
        assert_eq!(p.args()[1].label, "words");
        assert!(p.args()[1].required && p.args()[1].variadic);
        assert_eq!(p.usage(), "say [target] <...words>");
    }

    #[test]
    fn test_invalid_patterns() {
        assert!(CommandPattern::parse("").is_err());
        assert!(CommandPattern::parse("<key> update").is_err());
        assert!(CommandPattern::parse("update <key").is_err());
        assert!(CommandPattern::parse("update literal").is_err());
        assert!(CommandPattern::parse("say <...all> <more>").is_err());
    }

    #[test]
    fn test_update_matches_with_args() {
        let p = CommandPattern::parse("update <key> <value>").unwrap();
        assert!(p.is_matched("update apply true"));

        let args = p.parse_args("update apply true");
        assert_eq!(args.to_vec(), vec!["apply", "true"]);
        assert!(p.validate(&args).is_ok());
    }

    #[test]
    fn test_missing_required_names_label() {
        let p = CommandPattern::parse("update <key> <value>").unwrap();
        let args = p.parse_args("update apply");
        assert_eq!(
            p.validate(&args),
            Err(CommandError::ArgumentMissing("value".to_string()))
        );
    }

    #[test]
    fn test_bare_name_is_word_bounded() {
        let p = CommandPattern::parse("help").unwrap();
        assert!(p.is_matched("help"));
        assert!(p.is_matched("  help  "));
        assert!(p.is_matched("help me"));
        assert!(!p.is_matched("helpme"));
        assert!(!p.is_matched("please help"));
    }

    #[test]
    fn test_variadic_collects_remaining_words() {
        let p = CommandPattern::parse("say <target> <...words>").unwrap();
        let args = p.parse_args("say bob hello   there world");
        assert_eq!(args.get(0), Some("bob"));
        assert_eq!(args.rest(1), ["hello", "there", "world"]);
        assert_eq!(args.to_vec(), vec!["bob", "hello there world"]);

        let args = p.parse_args("say bob");
        assert_eq!(
            p.validate(&args),
            Err(CommandError::ArgumentMissing("words".to_string()))
        );
    }

    #[test]
    fn test_optional_trailing_is_empty() {
        let p = CommandPattern::parse("weather [city]").unwrap();
        let args = p.parse_args("weather");
        assert_eq!(args.value(0), Some(&ArgValue::Empty));
        assert_eq!(args.get(0), None);
        assert_eq!(args.to_vec(), vec![""]);
        assert!(p.validate(&args).is_ok());
    }
}
