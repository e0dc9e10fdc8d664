use serde::Deserialize;
use std::{collections::HashMap, fs, io, path::Path};
use tracing::debug;

use crate::resources::check_subgraphs;
use crate::{Error, Result, SubgraphSet, SubgraphSpec};

#[derive(Debug, Deserialize)]
struct SupergraphConfig {
    subgraphs: HashMap<String, SubgraphConfig>,
}

#[derive(Debug, Deserialize)]
struct SubgraphConfig {
    routing_url: String,
    schema: SchemaConfig,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SchemaConfig {
    File { file: String },
    Sdl { sdl: String },
}

/// Read a supergraph YAML file into the subgraphs of one variant.
///
/// Schema files are resolved relative to the YAML file's directory.
pub fn load_subgraphs(config_path: &Path) -> Result<SubgraphSet> {
    let config_dir = config_path.parent().unwrap_or_else(|| Path::new(""));
    let config_contents = fs::read_to_string(config_path).map_err(|e| {
        Error::config(format!(
            "Failed to read config file {}: {}",
            config_path.display(),
            e
        ))
    })?;
    parse_subgraphs(&config_contents, config_dir)
}

pub fn parse_subgraphs(config_contents: &str, config_dir: &Path) -> Result<SubgraphSet> {
    let config: SupergraphConfig = serde_yaml::from_str(config_contents)
        .map_err(|e| Error::config(format!("Failed to parse config file: {}", e)))?;

    let mut subgraphs = SubgraphSet::new();
    for (name, subgraph_config) in config.subgraphs {
        let sdl = match subgraph_config.schema {
            SchemaConfig::Sdl { sdl } => sdl,
            SchemaConfig::File { file } => read_schema_file(config_dir, &file).map_err(|e| {
                Error::config(format!("Failed to read schema file for {}: {}", name, e))
            })?,
        };
        subgraphs.insert(
            name,
            SubgraphSpec {
                sdl,
                url: subgraph_config.routing_url,
            },
        );
    }
    check_subgraphs(&subgraphs)?;
    Ok(subgraphs)
}

fn read_schema_file(base_dir: &Path, file_path: &str) -> io::Result<String> {
    let full_path = base_dir.join(file_path);
    debug!(path = %full_path.display(), "reading schema file");
    fs::read_to_string(full_path)
}
