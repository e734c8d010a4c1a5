//! Tenant sources.
//!
//! A tenant source is read once at the start of a run. Both an unreachable
//! store and malformed data are configuration faults, and so is an empty
//! tenant list: a run must never start without tenants.
//!
//! The JSON format is an array of tenant objects:
//!
//! ```json
//! [
//!   { "tenant_id": "acme", "shopify_conn_id": "c-1", "qb_conn_id": "c-2" },
//!   { "tenant_id": "globex", "connections": { "shopify": "c-3" } }
//! ]
//! ```
//!
//! Blank or `null` connection ids count as "not registered"; the dispatcher
//! reports those pairs as missing connections without failing the run.

mod env;
mod file;
mod parse;

use std::sync::Arc;

use async_trait::async_trait;

use tenantflow_core::{PipelineError, PipelineResult, Tenant};

pub use env::EnvTenantSource;
pub use file::JsonFileTenantSource;
pub use parse::parse_tenants;

/// Loads the tenants participating in a run.
#[async_trait]
pub trait TenantSource: Send + Sync {
    /// Ordered, non-empty tenant list.
    async fn load(&self) -> PipelineResult<Vec<Tenant>>;
}

#[async_trait]
impl<T> TenantSource for Arc<T>
where
    T: TenantSource + ?Sized,
{
    async fn load(&self) -> PipelineResult<Vec<Tenant>> {
        (**self).load().await
    }
}

/// Fixed tenant list (tests/dev, or tenants resolved by the caller).
#[derive(Debug, Clone, Default)]
pub struct StaticTenantSource {
    tenants: Vec<Tenant>,
}

impl StaticTenantSource {
    pub fn new(tenants: Vec<Tenant>) -> Self {
        Self { tenants }
    }
}

#[async_trait]
impl TenantSource for StaticTenantSource {
    async fn load(&self) -> PipelineResult<Vec<Tenant>> {
        if self.tenants.is_empty() {
            return Err(PipelineError::NoTenants);
        }
        Ok(self.tenants.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tenantflow_core::TenantId;

    #[tokio::test]
    async fn static_source_rejects_empty_list() {
        let source = StaticTenantSource::default();
        assert_eq!(source.load().await.unwrap_err(), PipelineError::NoTenants);
    }

    #[tokio::test]
    async fn static_source_preserves_order() {
        let tenants = vec![
            Tenant::new(TenantId::new("b").unwrap()),
            Tenant::new(TenantId::new("a").unwrap()),
        ];
        let source = Arc::new(StaticTenantSource::new(tenants));

        let loaded = source.load().await.unwrap();
        assert_eq!(loaded[0].tenant_id().as_str(), "b");
        assert_eq!(loaded[1].tenant_id().as_str(), "a");
    }
}
