use async_trait::async_trait;

use tenantflow_core::{PipelineError, PipelineResult, Tenant};

use super::{TenantSource, parse_tenants};

/// Environment variable the tenant list is read from by default.
pub const DEFAULT_TENANTS_VAR: &str = "TENANTS_JSON";

/// Reads the tenant JSON document from an environment variable.
///
/// An unset variable reads as `[]` and therefore fails with `NoTenants`.
#[derive(Debug, Clone)]
pub struct EnvTenantSource {
    var: String,
}

impl EnvTenantSource {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl Default for EnvTenantSource {
    fn default() -> Self {
        Self::new(DEFAULT_TENANTS_VAR)
    }
}

#[async_trait]
impl TenantSource for EnvTenantSource {
    async fn load(&self) -> PipelineResult<Vec<Tenant>> {
        let raw = match std::env::var(&self.var) {
            Ok(raw) => raw,
            Err(std::env::VarError::NotPresent) => "[]".to_string(),
            Err(e) => {
                return Err(PipelineError::configuration(format!(
                    "{} is not readable: {e}",
                    self.var
                )));
            }
        };
        parse_tenants(&raw)
    }
}
