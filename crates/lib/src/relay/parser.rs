//! Reply parser: merges message bodies and extracts "label: value" lines into a record.
//!
//! Parsing never fails. Lines that do not tokenize are left out of `fields`;
//! `raw` always carries the merged text whole.

use serde_json::{Map, Value};

/// Labels the remote agent emits as bookkeeping, never as data (compared lowercased).
pub const NOISE_LABELS: &[&str] = &[
    "demande",
    "temps de recherche",
    "sujets faits",
    "nombre de résultats",
    "le nombre de fuites",
];

/// First-line prefix of the agent echoing the query back.
const QUERY_ECHO_PREFIX: &str = "Demande:";

/// Label injected from the first line of the reply.
pub const SOURCE_LABEL: &str = "Source";

/// Structured form of a settled reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedRecord {
    pub raw: String,
    /// Label → value in first-seen order; a repeated label keeps its position and takes the later value.
    pub fields: Vec<(String, String)>,
}

impl ParsedRecord {
    pub fn get(&self, label: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, v)| v.as_str())
    }

    fn insert(&mut self, label: String, value: String) {
        match self.fields.iter_mut().find(|(l, _)| *l == label) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((label, value)),
        }
    }

    /// JSON mapping: `raw` first, then every field. A field named `raw` does not replace the raw text.
    pub fn to_mapping(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("raw".to_string(), Value::String(self.raw.clone()));
        for (label, value) in &self.fields {
            if label == "raw" {
                continue;
            }
            map.insert(label.clone(), Value::String(value.clone()));
        }
        map
    }
}

/// Parser with a configurable noise denylist.
#[derive(Debug, Clone)]
pub struct ReplyParser {
    noise: Vec<String>,
}

impl Default for ReplyParser {
    fn default() -> Self {
        Self {
            noise: NOISE_LABELS.iter().map(|l| l.to_string()).collect(),
        }
    }
}

impl ReplyParser {
    /// Built-in denylist plus `extra` labels (case-insensitive).
    pub fn with_extra_noise<I, S>(extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut parser = Self::default();
        for label in extra {
            let label = label.as_ref().trim().to_lowercase();
            if !label.is_empty() && !parser.noise.contains(&label) {
                parser.noise.push(label);
            }
        }
        parser
    }

    fn is_noise(&self, label: &str) -> bool {
        let label = label.to_lowercase();
        self.noise.iter().any(|n| *n == label)
    }

    /// Parse message bodies given in ascending message-id order.
    pub fn parse<S: AsRef<str>>(&self, texts: &[S]) -> ParsedRecord {
        let bodies: Vec<&str> = texts
            .iter()
            .map(|t| t.as_ref())
            .filter(|t| !t.trim().is_empty())
            .collect();
        let raw = bodies.join("\n");
        let mut record = ParsedRecord::default();

        if let Some(source) = bodies.first().and_then(|first| source_line(first)) {
            record.insert(SOURCE_LABEL.to_string(), source);
        }

        for line in raw.lines() {
            let Some((label, value)) = split_label_value(line) else {
                continue;
            };
            if self.is_noise(&label) {
                continue;
            }
            record.insert(label, value);
        }
        record.raw = raw;
        record
    }
}

/// The reply's heading, used as `Source`: first non-empty line of the first message,
/// skipping a query echo, when that line is not itself a label/value pair.
fn source_line(first_message: &str) -> Option<String> {
    let line = first_message
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .find(|l| !l.starts_with(QUERY_ECHO_PREFIX))?;
    if split_label_value(line).is_some() {
        return None;
    }
    let source = strip_markup(trim_marker(line));
    (!source.is_empty()).then_some(source)
}

/// Tokenize one line as `[marker] label ':' value`.
///
/// Leading non-alphanumeric characters (bullets, emoji, emphasis) are trimmed, the
/// label runs up to the first colon, and emphasis/inline-code markers are stripped
/// from both sides. Empty labels or values yield `None`.
pub fn split_label_value(line: &str) -> Option<(String, String)> {
    let body = trim_marker(line.trim());
    let (label, value) = body.split_once(':')?;
    let label = strip_markup(label);
    let value = strip_markup(value);
    if label.is_empty() || value.is_empty() {
        return None;
    }
    Some((label, value))
}

fn trim_marker(line: &str) -> &str {
    line.trim_start_matches(|c: char| !c.is_alphanumeric() && c != ':')
}

/// Remove `*`, `` ` `` and `__` emphasis markers, then trim.
fn strip_markup(s: &str) -> String {
    s.replace("__", "")
        .chars()
        .filter(|c| *c != '*' && *c != '`')
        .collect::<String>()
        .trim()
        .to_string()
}
