//! State backend coordinates of a definition.

use std::path::PathBuf;

use hcl::{Block, Expression};
use serde::Serialize;

use terrace_config::{BackendConfig, BackendKind};

use crate::error::IacResult;
use crate::hcl_writer::traversal;

/// Where one definition keeps its state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateLocation {
    pub definition: String,
    pub kind: BackendKind,
    pub bucket: Option<String>,
    /// s3 key, gcs prefix, or the state file path relative to `path` for local
    pub key: String,
    pub region: String,
    pub lock_table: String,
    pub path: PathBuf,
}

impl StateLocation {
    pub fn for_definition(backend: &BackendConfig, definition: &str) -> Self {
        Self {
            definition: definition.to_string(),
            kind: backend.kind,
            bucket: backend.bucket.clone(),
            key: backend.state_key(definition),
            region: backend.region.clone(),
            lock_table: backend.lock_table.clone(),
            path: backend.path.clone(),
        }
    }

    /// Local state file.
    pub fn state_file(&self) -> PathBuf {
        self.path.join(&self.key)
    }

    /// Backend settings as attributes, in a fixed order.
    fn settings(&self) -> Vec<(&'static str, Expression)> {
        let bucket = Expression::from(self.bucket.clone().unwrap_or_default());
        match self.kind {
            BackendKind::S3 => vec![
                ("region", self.region.clone().into()),
                ("bucket", bucket),
                ("key", self.key.clone().into()),
            ],
            BackendKind::Gcs => vec![("bucket", bucket), ("prefix", self.key.clone().into())],
            BackendKind::Local => vec![("path", self.state_file().display().to_string().into())],
        }
    }

    /// `terraform { backend "<kind>" { ... } }` for the definition's own state.
    pub fn backend_block(&self) -> Block {
        let mut backend = Block::builder("backend")
            .add_label(self.kind.as_str())
            .add_attributes(self.settings());
        if self.kind == BackendKind::S3 {
            backend = backend
                .add_attribute(("dynamodb_table", self.lock_table.clone()))
                .add_attribute(("encrypt", true));
        }
        Block::builder("terraform").add_block(backend.build()).build()
    }

    /// `data "terraform_remote_state"` block reading this definition's state
    /// from another definition.
    pub fn remote_state_block(&self) -> Block {
        let mut settings = self.settings();
        settings.sort_by_key(|(key, _)| *key);
        let config: Expression = settings.into_iter().collect();

        Block::builder("data")
            .add_label("terraform_remote_state")
            .add_label(self.definition.as_str())
            .add_attribute(("backend", self.kind.as_str()))
            .add_attribute(("config", config))
            .build()
    }

    /// Expression reading `output` of this definition through remote state.
    pub fn output_reference(&self, output: &str) -> IacResult<Expression> {
        traversal(
            "data",
            &["terraform_remote_state", self.definition.as_str(), "outputs", output],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hcl::Body;
    use terrace_config::WorkerOptions;
    use std::path::Path;

    use crate::hcl_writer::to_hcl;

    fn text(block: Block) -> String {
        to_hcl(&Body::builder().add_block(block).build()).unwrap()
    }

    fn options(kind: BackendKind) -> WorkerOptions {
        WorkerOptions {
            backend: kind,
            backend_bucket: Some("example-terraform-states".to_string()),
            backend_region: "us-west-2".to_string(),
            deployment: "staging".to_string(),
            ..WorkerOptions::default()
        }
    }

    #[test]
    fn test_s3_backend_block() {
        let backend = options(BackendKind::S3).backend_config(Path::new("/repo"));
        let location = StateLocation::for_definition(&backend, "network");

        assert_eq!(
            text(location.backend_block()),
            concat!(
                "terraform {\n",
                "  backend \"s3\" {\n",
                "    region = \"us-west-2\"\n",
                "    bucket = \"example-terraform-states\"\n",
                "    key = \"terraform/state/network/terraform.tfstate\"\n",
                "    dynamodb_table = \"terraform-staging\"\n",
                "    encrypt = true\n",
                "  }\n",
                "}\n",
            )
        );
    }

    #[test]
    fn test_s3_remote_state_block() {
        let backend = options(BackendKind::S3).backend_config(Path::new("/repo"));
        let location = StateLocation::for_definition(&backend, "network");

        assert_eq!(
            text(location.remote_state_block()),
            concat!(
                "data \"terraform_remote_state\" \"network\" {\n",
                "  backend = \"s3\"\n",
                "  config = {\n",
                "    bucket = \"example-terraform-states\"\n",
                "    key = \"terraform/state/network/terraform.tfstate\"\n",
                "    region = \"us-west-2\"\n",
                "  }\n",
                "}\n",
            )
        );
        assert_eq!(
            hcl::format::to_string(&location.output_reference("vpc_id").unwrap()).unwrap(),
            "data.terraform_remote_state.network.outputs.vpc_id"
        );
    }

    #[test]
    fn test_gcs_and_local_settings() {
        let backend = options(BackendKind::Gcs).backend_config(Path::new("/repo"));
        let gcs = StateLocation::for_definition(&backend, "dns");
        let gcs_backend = text(gcs.backend_block());
        assert!(gcs_backend.contains("prefix = \"terraform/state/dns\""));
        assert!(!gcs_backend.contains("dynamodb_table"));

        let backend = options(BackendKind::Local).backend_config(Path::new("/repo"));
        let local = StateLocation::for_definition(&backend, "dns");
        assert_eq!(
            local.state_file(),
            PathBuf::from("/repo/terraform-state/terraform/state/dns/terraform.tfstate")
        );
        assert!(text(local.remote_state_block())
            .contains("path = \"/repo/terraform-state/terraform/state/dns/terraform.tfstate\""));
    }
}
