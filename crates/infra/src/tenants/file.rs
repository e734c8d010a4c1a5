use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use tenantflow_core::{PipelineError, PipelineResult, Tenant};

use super::{TenantSource, parse_tenants};

/// Reads the tenant JSON document from a file on every load.
#[derive(Debug, Clone)]
pub struct JsonFileTenantSource {
    path: PathBuf,
}

impl JsonFileTenantSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl TenantSource for JsonFileTenantSource {
    async fn load(&self) -> PipelineResult<Vec<Tenant>> {
        let raw = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            PipelineError::configuration(format!(
                "tenant store unreachable ({}): {e}",
                self.path.display()
            ))
        })?;

        let tenants = parse_tenants(&raw)?;
        debug!(path = %self.path.display(), tenants = tenants.len(), "loaded tenants from file");
        Ok(tenants)
    }
}
