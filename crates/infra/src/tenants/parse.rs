use std::collections::{BTreeMap, HashSet};

use serde::Deserialize;
use serde_json::Value as JsonValue;

use tenantflow_core::{ConnectionId, PipelineError, PipelineResult, Source, Tenant, TenantId};

#[derive(Debug, Deserialize)]
struct TenantRecord {
    tenant_id: String,
    #[serde(default)]
    connections: BTreeMap<String, Option<String>>,
    #[serde(flatten)]
    fields: BTreeMap<String, JsonValue>,
}

/// Parse the tenant JSON document.
///
/// Fails with `Configuration` on malformed data or duplicate ids, and with
/// `NoTenants` when the array is empty.
pub fn parse_tenants(json: &str) -> PipelineResult<Vec<Tenant>> {
    let records: Vec<TenantRecord> = serde_json::from_str(json)
        .map_err(|e| PipelineError::configuration(format!("malformed tenant data: {e}")))?;

    if records.is_empty() {
        return Err(PipelineError::NoTenants);
    }

    let mut seen = HashSet::new();
    let mut tenants = Vec::with_capacity(records.len());

    for (index, record) in records.into_iter().enumerate() {
        let tenant_id = TenantId::new(record.tenant_id).map_err(|e| {
            PipelineError::configuration(format!("tenant at index {index}: {e}"))
        })?;

        if !seen.insert(tenant_id.clone()) {
            return Err(PipelineError::configuration(format!(
                "duplicate tenant_id: {tenant_id}"
            )));
        }

        let mut tenant = Tenant::new(tenant_id.clone());

        for (name, value) in &record.connections {
            let source: Source = name.parse().map_err(|e| {
                PipelineError::configuration(format!("tenant {tenant_id}: {e}"))
            })?;
            if let Some(connection_id) = value.as_deref().and_then(non_blank) {
                tenant = tenant.with_connection(source, connection_id);
            }
        }

        // Flat fields win over the nested map.
        for source in Source::ALL {
            match record.fields.get(source.connection_field()) {
                None | Some(JsonValue::Null) => {}
                Some(JsonValue::String(raw)) => {
                    if let Some(connection_id) = non_blank(raw) {
                        tenant = tenant.with_connection(source, connection_id);
                    }
                }
                Some(other) => {
                    return Err(PipelineError::configuration(format!(
                        "tenant {tenant_id}: {} must be a string, got {other}",
                        source.connection_field()
                    )));
                }
            }
        }

        tenants.push(tenant);
    }

    Ok(tenants)
}

fn non_blank(raw: &str) -> Option<ConnectionId> {
    ConnectionId::new(raw).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flat_connection_fields() {
        let json = r#"[
            {"tenant_id": "acme", "shopify_conn_id": "s-1", "qb_conn_id": "q-1"},
            {"tenant_id": "globex", "shopify_conn_id": "s-2"}
        ]"#;

        let tenants = parse_tenants(json).unwrap();

        assert_eq!(tenants.len(), 2);
        assert_eq!(tenants[0].tenant_id().as_str(), "acme");
        assert_eq!(
            tenants[0].connection_for(Source::Quickbooks).map(|c| c.as_str()),
            Some("q-1")
        );
        assert!(tenants[1].connection_for(Source::Quickbooks).is_none());
    }

    #[test]
    fn parses_nested_connections() {
        let json = r#"[{"tenant_id": "acme", "connections": {"shopify": "s-1", "quickbooks": null}}]"#;

        let tenants = parse_tenants(json).unwrap();

        assert_eq!(
            tenants[0].connection_for(Source::Shopify).map(|c| c.as_str()),
            Some("s-1")
        );
        assert!(tenants[0].connection_for(Source::Quickbooks).is_none());
    }

    #[test]
    fn blank_connection_counts_as_missing() {
        let tenants = parse_tenants(r#"[{"tenant_id": "acme", "qb_conn_id": "  "}]"#).unwrap();
        assert!(tenants[0].connection_for(Source::Quickbooks).is_none());
    }

    #[test]
    fn empty_array_is_no_tenants() {
        assert_eq!(parse_tenants("[]").unwrap_err(), PipelineError::NoTenants);
    }

    #[test]
    fn malformed_data_is_configuration_error() {
        for json in [
            "{}",
            "not json",
            r#"[{"shopify_conn_id": "s-1"}]"#,
            r#"[{"tenant_id": ""}]"#,
            r#"[{"tenant_id": "acme", "shopify_conn_id": 7}]"#,
            r#"[{"tenant_id": "acme", "connections": {"netsuite": "n-1"}}]"#,
        ] {
            let err = parse_tenants(json).unwrap_err();
            assert!(
                matches!(err, PipelineError::Configuration(_)),
                "expected configuration error for {json}, got {err:?}"
            );
        }
    }

    #[test]
    fn duplicate_tenant_ids_are_rejected() {
        let err = parse_tenants(r#"[{"tenant_id": "acme"}, {"tenant_id": "acme"}]"#).unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(msg) if msg.contains("duplicate")));
    }
}
