// Parser module for pipeline definitions and schedule params
// Provides YAML parsing and conversion into validated pipelines

pub mod error;
pub mod models;

pub use error::{Location, ParseError, ParseErrorKind, ParseResult};
pub use models::*;

use crate::node::{Node, NodeBuilder, NodeKind, PortRef};
use crate::pipeline::Pipeline;

use std::fs;
use std::path::Path;

/// Parser for pipeline definition files
pub struct PipelineParser;

impl PipelineParser {
    /// Parse a definition from YAML
    pub fn parse(content: &str) -> ParseResult<PipelineDefinition> {
        serde_yaml::from_str(content).map_err(|e| ParseError::from_yaml_error(&e, content))
    }

    pub fn parse_file<P: AsRef<Path>>(path: P) -> ParseResult<PipelineDefinition> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| ParseError::io(path, &e))?;
        Self::parse(&content)
    }

    /// Parse YAML and build the pipeline it describes
    pub fn load_str(content: &str) -> ParseResult<Pipeline> {
        let definition = Self::parse(content)?;
        Self::build_located(&definition, Some(content))
    }

    /// Read, parse and build a pipeline definition file
    pub fn load<P: AsRef<Path>>(path: P) -> ParseResult<Pipeline> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| ParseError::io(path, &e))?;
        let pipeline = Self::load_str(&content)?;
        tracing::debug!(path = %path.display(), nodes = pipeline.len(), "loaded pipeline definition");
        Ok(pipeline)
    }

    /// Build a pipeline from an already parsed definition
    pub fn build(definition: &PipelineDefinition) -> ParseResult<Pipeline> {
        Self::build_located(definition, None)
    }

    fn build_located(definition: &PipelineDefinition, source: Option<&str>) -> ParseResult<Pipeline> {
        let locate = |err: ParseError, needle: &str| match source {
            Some(source) => err.located(source, needle),
            None => err,
        };

        let mut nodes = Vec::with_capacity(definition.nodes.len());
        for node in &definition.nodes {
            let built = build_node(node).map_err(|e| locate(e, &format!("name: {}", node.name)))?;
            nodes.push(built);
        }

        let mut pipeline = Pipeline::new(nodes).map_err(|e| ParseError::definition(e.to_string()))?;

        for connection in &definition.connections {
            connect(&mut pipeline, connection).map_err(|e| locate(e, &connection.to))?;
        }

        pipeline
            .build_graph()
            .map_err(|e| ParseError::definition(e.to_string()))?;

        Ok(pipeline)
    }
}

fn build_node(definition: &NodeDefinition) -> ParseResult<Node> {
    let name = &definition.name;
    let node_error = |e: crate::params::ParamError| {
        ParseError::definition(format!("node '{}': {}", name, e))
    };

    let node = if definition.uses_schema() {
        if !definition.in_paths.is_empty()
            || !definition.algo_params.is_empty()
            || !definition.perf_params.is_empty()
            || definition.primary.is_some()
        {
            return Err(ParseError::definition(format!(
                "node '{}' declares both 'fields' and explicit parameter groups",
                name
            ))
            .with_suggestion(
                "with 'fields', only 'out_paths' may be given, to override output defaults",
            ));
        }

        let mut node = Node::from_schema(name, &definition.executable, &definition.fields)
            .map_err(node_error)?;
        for (key, path) in &definition.out_paths {
            node = node.with_out_path(key, path.clone()).map_err(node_error)?;
        }
        node
    } else {
        let mut builder = NodeBuilder::new(name, &definition.executable);
        for (key, default) in &definition.in_paths {
            builder = match default {
                Some(value) => builder.in_path_default(key, value.clone()),
                None => builder.in_path(key),
            };
        }
        for (key, path) in &definition.out_paths {
            builder = builder.out_path(key, path.clone());
        }
        for (key, value) in &definition.algo_params {
            builder = builder.algo_param(key, value.clone());
        }
        for (key, value) in &definition.perf_params {
            builder = builder.perf_param(key, value.clone());
        }
        if let Some(primary) = &definition.primary {
            builder = builder.primary_out_key(primary);
        }
        builder.build().map_err(node_error)?
    };

    let kind = match definition.kind {
        NodeKindName::Process => NodeKind::Process,
        NodeKindName::JsonMetrics => NodeKind::JsonMetrics,
    };

    Ok(node
        .with_resources(definition.resources.clone())
        .with_kind(kind))
}

fn connect(pipeline: &mut Pipeline, connection: &ConnectionDefinition) -> ParseResult<()> {
    let invalid = |e: String| ParseError::invalid_value(e);
    let dst: PortRef = connection.to.parse().map_err(invalid)?;

    let result = if connection.from.contains('.') {
        let src: PortRef = connection.from.parse().map_err(invalid)?;
        pipeline.connect(src, dst)
    } else {
        pipeline.connect_primary(&connection.from, dst)
    };

    result.map_err(|e| {
        ParseError::definition(format!(
            "connection {} -> {}: {}",
            connection.from, connection.to, e
        ))
    })
}

/// Parser for schedule params files
pub struct ScheduleParser;

impl ScheduleParser {
    pub fn parse(content: &str) -> ParseResult<ScheduleConfig> {
        if content.trim().is_empty() {
            return Ok(ScheduleConfig::default());
        }
        serde_yaml::from_str(content).map_err(|e| ParseError::from_yaml_error(&e, content))
    }

    /// Parse a params file; a relative `pipeline` path is resolved against
    /// the file's directory
    pub fn parse_file<P: AsRef<Path>>(path: P) -> ParseResult<ScheduleConfig> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| ParseError::io(path, &e))?;
        let mut config = Self::parse(&content)?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        if let Some(pipeline) = config.pipeline.as_mut() {
            if pipeline.is_relative() {
                *pipeline = base.join(&*pipeline);
            }
        }
        if let Some(root) = config.root.as_mut() {
            if root.is_relative() {
                *root = base.join(&*root);
            }
        }
        Ok(config)
    }
}
