// Definition File Errors
// Located errors for pipeline and params files, with a source excerpt and hints

use std::fmt;
use std::path::Path;

/// Position in a definition file (1-indexed)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub line: usize,
    pub column: usize,
}

/// Error raised while reading a pipeline or params file
#[derive(Debug, Clone)]
pub struct ParseError {
    pub message: String,
    pub kind: ParseErrorKind,
    /// Absent for errors found after deserialization with no matching text
    pub location: Option<Location>,
    /// Numbered source lines around `location`
    pub excerpt: String,
    pub suggestion: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// Not valid YAML
    YamlSyntax,
    /// Valid YAML with wrong types or missing fields
    InvalidSchema,
    UnknownField,
    /// Port reference, policy name, ...
    InvalidValue,
    IoError,
    /// Well-formed file describing an invalid pipeline
    Definition,
}

/// Result type for parser operations
pub type ParseResult<T> = Result<T, ParseError>;

impl ParseError {
    pub fn new(kind: ParseErrorKind, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind,
            location: None,
            excerpt: String::new(),
            suggestion: None,
        }
    }

    pub fn definition(message: impl Into<String>) -> Self {
        Self::new(ParseErrorKind::Definition, message)
    }

    pub fn invalid_value(message: impl Into<String>) -> Self {
        Self::new(ParseErrorKind::InvalidValue, message)
    }

    pub fn io(path: &Path, err: &std::io::Error) -> Self {
        Self::new(
            ParseErrorKind::IoError,
            format!("failed to read {}: {}", path.display(), err),
        )
    }

    pub fn with_kind(mut self, kind: ParseErrorKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Attach a position and cut the matching excerpt from `source`
    pub fn at(mut self, source: &str, line: usize, column: usize) -> Self {
        self.location = Some(Location { line, column });
        self.excerpt = excerpt(source, line, column);
        self
    }

    /// Point the error at the first line of `source` containing `needle`.
    ///
    /// Left unlocated when nothing matches.
    pub fn located(self, source: &str, needle: &str) -> Self {
        let found = source.lines().enumerate().find_map(|(idx, line)| {
            line.find(needle).map(|col| (idx + 1, col + 1))
        });
        match found {
            Some((line, column)) => self.at(source, line, column),
            None => self,
        }
    }

    pub fn from_yaml_error(err: &serde_yaml::Error, source: &str) -> Self {
        let raw = err.to_string();
        let (message, kind) = describe_yaml_error(&raw, err.location().is_some());

        let (line, column) = err
            .location()
            .map(|loc| (loc.line(), loc.column()))
            .unwrap_or((1, 1));
        let offending = source.lines().nth(line.saturating_sub(1)).unwrap_or("");

        let mut parsed = Self::new(kind, message).at(source, line, column);
        parsed.suggestion = hint_for(&raw, offending);
        parsed
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "error: {}", self.message)?;
        if let Some(loc) = self.location {
            writeln!(f, "  --> line {}:{}", loc.line, loc.column)?;
        }
        if !self.excerpt.is_empty() {
            writeln!(f)?;
            write!(f, "{}", self.excerpt)?;
        }
        if let Some(suggestion) = &self.suggestion {
            writeln!(f)?;
            writeln!(f, "help: {}", suggestion)?;
        }
        Ok(())
    }
}

impl std::error::Error for ParseError {}

/// Two lines either side of `line`, with a caret under `column`
fn excerpt(source: &str, line: usize, column: usize) -> String {
    let first = line.saturating_sub(2).max(1);
    let mut out = String::new();

    for (number, text) in source.lines().enumerate().map(|(i, t)| (i + 1, t)) {
        if number < first || number > line + 2 {
            continue;
        }
        let marker = if number == line { '>' } else { ' ' };
        out.push_str(&format!("{} {:4} | {}\n", marker, number, text));
        if number == line {
            out.push_str(&format!("       | {}^\n", " ".repeat(column.saturating_sub(1))));
        }
    }
    out
}

/// Text between `open` and the next `close`
fn between<'a>(msg: &'a str, open: &str, close: &str) -> Option<&'a str> {
    let start = msg.find(open)? + open.len();
    let len = msg[start..].find(close)?;
    Some(&msg[start..start + len])
}

/// "expected one of `a`, `b` at ..." -> "a, b"
fn expected_list(msg: &str) -> Option<String> {
    let rest = &msg[msg.find("expected one of ")? + "expected one of ".len()..];
    let list = rest.split(" at ").next().unwrap_or(rest);
    Some(list.replace('`', ""))
}

/// Shorter message plus the error kind for a serde_yaml message
fn describe_yaml_error(msg: &str, located: bool) -> (String, ParseErrorKind) {
    if let Some(field) = between(msg, "missing field `", "`") {
        return (
            format!("missing required field '{}'", field),
            ParseErrorKind::InvalidSchema,
        );
    }
    if let Some(field) = between(msg, "unknown field `", "`") {
        let message = match expected_list(msg) {
            Some(expected) => format!("unknown field '{}', expected one of: {}", field, expected),
            None => format!("unknown field '{}'", field),
        };
        return (message, ParseErrorKind::UnknownField);
    }
    if let Some(variant) = between(msg, "unknown variant `", "`") {
        let message = match expected_list(msg) {
            Some(expected) => format!("unknown value '{}', expected one of: {}", variant, expected),
            None => format!("unknown value '{}'", variant),
        };
        return (message, ParseErrorKind::InvalidValue);
    }
    if let (Some(found), Some(expected)) = (
        between(msg, "invalid type: ", ","),
        between(msg, "expected ", " at"),
    ) {
        return (
            format!("expected {}, but found {}", expected, found),
            ParseErrorKind::InvalidSchema,
        );
    }

    let kind = if located {
        ParseErrorKind::YamlSyntax
    } else {
        ParseErrorKind::InvalidSchema
    };
    (msg.to_string(), kind)
}

/// Keys people reach for, and what dagsweep calls them
const KEY_ALIASES: &[(&str, &str)] = &[
    ("inputs", "in_paths"),
    ("outputs", "out_paths"),
    ("params", "algo_params"),
    ("primary_out_key", "primary"),
    ("edges", "connections"),
    ("depends_on", "connections"),
    ("command", "executable"),
    ("cache", "cache_policy"),
    ("parallel", "max_parallel"),
];

fn hint_for(msg: &str, offending: &str) -> Option<String> {
    if msg.contains("missing field `executable`") {
        return Some("every node needs an 'executable' command template".to_string());
    }
    if msg.contains("missing field `nodes`") {
        return Some("a pipeline file lists its nodes under 'nodes:'".to_string());
    }
    if offending.starts_with('\t') {
        return Some("indent with spaces; YAML does not allow tabs".to_string());
    }

    let key = offending
        .trim_start()
        .trim_start_matches("- ")
        .split(':')
        .next()?
        .trim()
        .to_lowercase();
    KEY_ALIASES
        .iter()
        .find(|(alias, _)| *alias == key)
        .map(|(_, real)| format!("did you mean '{}'?", real))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_with_location() {
        let source = "nodes:\n  - name: train\n    fields: []\n";
        let err = ParseError::new(ParseErrorKind::InvalidSchema, "missing required field 'executable'")
            .at(source, 2, 5)
            .with_suggestion("every node needs an 'executable' command template");

        let output = err.to_string();
        assert!(output.contains("missing required field"));
        assert!(output.contains("line 2:5"));
        assert!(output.contains(">    2 |   - name: train"));
        assert!(output.contains("help:"));
    }

    #[test]
    fn test_unlocated_error_has_no_position() {
        let err = ParseError::definition("no pipeline definition given");
        let output = err.to_string();
        assert!(!output.contains("-->"));
        assert_eq!(err.kind, ParseErrorKind::Definition);
    }

    #[test]
    fn test_located_points_at_line() {
        let source = "nodes:\n  - name: train\n    executable: python train.py\n";
        let err = ParseError::definition("bad node").located(source, "train.py");

        assert_eq!(err.location, Some(Location { line: 3, column: 24 }));
        assert!(err.excerpt.contains("python train.py"));

        let missing = ParseError::definition("bad node").located(source, "evaluate");
        assert!(missing.location.is_none());
    }

    #[test]
    fn test_unknown_field_suggestion() {
        #[derive(Debug, serde::Deserialize)]
        #[serde(deny_unknown_fields)]
        #[allow(dead_code)]
        struct Node {
            name: String,
            executable: String,
        }

        let source = "name: train\ncommand: python train.py\n";
        let err = serde_yaml::from_str::<Node>(source).unwrap_err();
        let parsed = ParseError::from_yaml_error(&err, source);

        assert_eq!(parsed.kind, ParseErrorKind::UnknownField);
        assert!(parsed.message.contains("command"));
        assert_eq!(parsed.suggestion.as_deref(), Some("did you mean 'executable'?"));
    }

    #[test]
    fn test_between() {
        let msg = "missing field `nodes` at line 1";
        assert_eq!(between(msg, "missing field `", "`"), Some("nodes"));
        assert_eq!(between(msg, "unknown field `", "`"), None);
    }
}
