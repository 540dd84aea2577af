// Command Rendering
// Turns a node's executable template and resolved parameters into a shell command

use crate::params::Value;
use crate::schedule::job::ResolvedParams;

use std::collections::{BTreeMap, BTreeSet};

/// Quote `s` for POSIX shells; plain words are left alone
pub fn shell_quote(s: &str) -> String {
    if s.is_empty() {
        "''".to_string()
    } else if s
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "-_./:=,+@%".contains(c))
    {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', "'\"'\"'"))
    }
}

/// Render the command line for one job.
///
/// `{name}` placeholders in the template take the quoted value and that
/// parameter is not repeated as a flag. Every other parameter is appended
/// as `--name=value`. Null values are left out.
pub fn render_command(executable: &str, params: &ResolvedParams) -> String {
    let values: BTreeMap<&str, Value> = params.flags().collect();
    let mut used: BTreeSet<String> = BTreeSet::new();

    let mut command = substitute(executable, &values, &mut used);

    for (name, value) in params.flags() {
        if value.is_null() || used.contains(name) {
            continue;
        }
        command.push_str(" --");
        command.push_str(name);
        command.push('=');
        command.push_str(&shell_quote(&value.as_arg()));
    }

    command.trim().to_string()
}

fn substitute(template: &str, values: &BTreeMap<&str, Value>, used: &mut BTreeSet<String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];

        let placeholder = after
            .find('}')
            .map(|end| &after[..end])
            .filter(|name| is_identifier(name))
            .and_then(|name| values.get(name).map(|value| (name, value)));

        match placeholder {
            Some((name, value)) => {
                out.push_str(&shell_quote(&value.as_arg()));
                used.insert(name.to_string());
                rest = &after[name.len() + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }

    out.push_str(rest);
    out
}

fn is_identifier(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}
