//! Source systems a tenant can be synced from.

use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// An upstream source system.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Shopify,
    Quickbooks,
}

impl Source {
    /// Every supported source, in canonical order.
    pub const ALL: [Source; 2] = [Source::Shopify, Source::Quickbooks];

    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Shopify => "shopify",
            Source::Quickbooks => "quickbooks",
        }
    }

    /// Flat field name carrying this source's connection id in tenant records.
    pub fn connection_field(&self) -> &'static str {
        match self {
            Source::Shopify => "shopify_conn_id",
            Source::Quickbooks => "qb_conn_id",
        }
    }
}

impl core::fmt::Display for Source {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "shopify" => Ok(Source::Shopify),
            "quickbooks" | "qb" => Ok(Source::Quickbooks),
            other => Err(PipelineError::configuration(format!("unknown source: {other}"))),
        }
    }
}
