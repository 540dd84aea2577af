// Ports
// Addressable input and output slots on a node

use serde::{Deserialize, Serialize};

use std::fmt;
use std::str::FromStr;

/// Direction of a port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortDirection {
    /// Tied to an `in_paths` key
    Input,
    /// Tied to an `out_paths` key
    Output,
}

/// Reference to a named port on a named node
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PortRef {
    pub node: String,
    pub key: String,
    pub direction: PortDirection,
}

impl PortRef {
    pub fn input(node: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            key: key.into(),
            direction: PortDirection::Input,
        }
    }

    pub fn output(node: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            key: key.into(),
            direction: PortDirection::Output,
        }
    }

    pub fn is_input(&self) -> bool {
        self.direction == PortDirection::Input
    }

    pub fn is_output(&self) -> bool {
        self.direction == PortDirection::Output
    }
}

impl fmt::Display for PortRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let side = match self.direction {
            PortDirection::Input => "inputs",
            PortDirection::Output => "outputs",
        };
        write!(f, "{}.{}.{}", self.node, side, self.key)
    }
}

impl FromStr for PortRef {
    type Err = String;

    /// Parse `node.outputs.key` or `node.inputs.key`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.splitn(3, '.').collect();
        if parts.len() != 3 || parts.iter().any(|p| p.is_empty()) {
            return Err(format!(
                "invalid port reference '{}', expected <node>.outputs.<key> or <node>.inputs.<key>",
                s
            ));
        }

        match parts[1] {
            "outputs" | "output" | "out" => Ok(PortRef::output(parts[0], parts[2])),
            "inputs" | "input" | "in" => Ok(PortRef::input(parts[0], parts[2])),
            other => Err(format!(
                "invalid port side '{}' in '{}', expected 'outputs' or 'inputs'",
                other, s
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_port_ref() {
        let port: PortRef = "predict.outputs.dst_fpath".parse().unwrap();
        assert_eq!(port, PortRef::output("predict", "dst_fpath"));

        let port: PortRef = "evaluate.inputs.pred_fpath".parse().unwrap();
        assert!(port.is_input());
        assert_eq!(port.to_string(), "evaluate.inputs.pred_fpath");
    }

    #[test]
    fn test_parse_port_ref_errors() {
        assert!("predict.dst".parse::<PortRef>().is_err());
        assert!("predict.sideways.dst".parse::<PortRef>().is_err());
        assert!(".outputs.dst".parse::<PortRef>().is_err());
    }
}
