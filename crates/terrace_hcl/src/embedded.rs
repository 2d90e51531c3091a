//! In-process parser built on `hcl-rs`.

use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::engine::{BatchOutcome, EngineKind, HclParser};
use crate::error::{HclError, HclResult};
use crate::tree::body_to_tree;

/// Parses one file at a time inside the process.
#[derive(Debug, Clone, Default)]
pub struct EmbeddedParser;

impl EmbeddedParser {
    pub fn new() -> Self {
        Self
    }

    /// Parse one source text into its tree.
    pub fn parse_source(source: &str) -> HclResult<Value> {
        let body = hcl::parse(source)?;
        body_to_tree(body)
    }
}

#[async_trait]
impl HclParser for EmbeddedParser {
    fn engine(&self) -> EngineKind {
        EngineKind::Embedded
    }

    async fn parse_batch(&self, paths: &[PathBuf]) -> HclResult<BatchOutcome> {
        let mut outcome = BatchOutcome::default();

        for path in paths {
            let parsed = match tokio::fs::read_to_string(path).await {
                Ok(source) => Self::parse_source(&source),
                Err(e) => Err(HclError::Io(e)),
            };

            match parsed {
                Ok(tree) => {
                    outcome.ok.insert(path.clone(), tree);
                }
                Err(e) => {
                    debug!("Failed to parse {}: {}", path.display(), e);
                    outcome.errors.insert(path.clone(), e.to_string());
                }
            }
        }

        Ok(outcome)
    }

    async fn parse_str(&self, source: &str) -> HclResult<Value> {
        Self::parse_source(source).map_err(|e| HclError::Parse {
            path: PathBuf::from("<stdin>"),
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_partial_failure_keeps_good_files() {
        let temp = tempdir().unwrap();
        let good = temp.path().join("good.tf");
        let bad = temp.path().join("bad.tf");
        let missing = temp.path().join("missing.tf");
        fs::write(&good, "variable \"region\" {}\n").unwrap();
        fs::write(&bad, "variable \"region\" {\n").unwrap();

        let outcome = EmbeddedParser::new()
            .parse_batch(&[good.clone(), bad.clone(), missing.clone()])
            .await
            .unwrap();

        assert_eq!(outcome.ok[&good], json!({"variable": {"region": [{}]}}));
        assert!(outcome.errors.contains_key(&bad));
        assert!(outcome.errors.contains_key(&missing));
        assert!(!outcome.is_clean());
    }

    #[tokio::test]
    async fn test_parse_str() {
        let tree = EmbeddedParser::new()
            .parse_str("locals {\n  name = \"net\"\n}\n")
            .await
            .unwrap();
        assert_eq!(tree, json!({"locals": [{"name": "net"}]}));
    }

    #[tokio::test]
    async fn test_parse_str_error_names_stdin() {
        let err = EmbeddedParser::new().parse_str("locals {").await.unwrap_err();
        assert!(matches!(err, HclError::Parse { ref path, .. } if path.to_str() == Some("<stdin>")));
    }
}
