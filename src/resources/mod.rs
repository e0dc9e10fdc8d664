//! Resource types served by the provider, one handler per type.

pub mod graph;
pub mod graph_variant;
pub mod subgraph;

pub use graph::GraphHandler;
pub use graph_variant::GraphVariantHandler;
pub use subgraph::SubgraphHandler;

use graphql_parser::parse_schema;
use tracing::{info, warn};

use crate::{Error, Result, SubgraphSet};

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::validation(format!("{} must not be empty", field)));
    }
    Ok(())
}

/// Check one subgraph entry. Names, SDL and url are required; SDL that the
/// parser rejects is only logged, the registry is the authority on SDL.
fn check_subgraph(name: &str, sdl: &str, url: &str) -> Result<()> {
    require("subgraph name", name)?;
    require(&format!("sdl of subgraph {}", name), sdl)?;
    require(&format!("url of subgraph {}", name), url)?;
    if let Err(e) = parse_schema::<String>(sdl) {
        warn!(subgraph = %name, error = %e, "subgraph SDL did not parse locally");
    }
    Ok(())
}

pub fn check_subgraphs(subgraphs: &SubgraphSet) -> Result<()> {
    for (name, spec) in subgraphs {
        check_subgraph(name, &spec.sdl, &spec.url)?;
    }
    Ok(())
}

/// Deletes treat an already-missing entity as done, so a retried delete converges.
fn already_gone(result: Result<()>, what: &str) -> Result<()> {
    match result {
        Err(Error::NotFound(msg)) => {
            info!(entity = %what, reason = %msg, "already deleted");
            Ok(())
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_fields_are_rejected() {
        assert!(check_subgraph("products", "type Query{a:Int}", "http://a").is_ok());
        assert_eq!(
            check_subgraph("", "type Query{a:Int}", "http://a").unwrap_err().kind(),
            "ValidationError"
        );
        let err = check_subgraph("products", "  ", "http://a").unwrap_err();
        assert!(err.to_string().contains("sdl of subgraph products"));
        let err = check_subgraph("products", "type Query{a:Int}", "").unwrap_err();
        assert!(err.to_string().contains("url of subgraph products"));
    }

    #[test]
    fn federation_sdl_the_parser_cannot_read_is_still_accepted() {
        let sdl = "extend schema @link(url: \"https://specs.apollo.dev/federation/v2.3\")\ntype Query { a: Int }";
        assert!(check_subgraph("products", sdl, "http://a").is_ok());
    }

    #[test]
    fn only_not_found_counts_as_already_deleted() {
        assert!(already_gone(Err(Error::not_found("gone")), "variant").is_ok());
        assert!(already_gone(Ok(()), "variant").is_ok());
        assert_eq!(
            already_gone(Err(Error::registry("forbidden")), "variant")
                .unwrap_err()
                .kind(),
            "RegistryError"
        );
    }
}
