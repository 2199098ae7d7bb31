//! Provider catalog command
//!
//! Lists every supported provider with its key variable, whether a key is
//! currently available, the API root in effect and the suggested models.
//! Key values are never printed.

use crate::config::Config;
use crate::error::{ParleyError, Result};
use crate::providers::{ModelGateway, ProviderKind};
use colored::Colorize;
use prettytable::{row, Table};
use serde::Serialize;

/// One provider as shown by `parley providers`
#[derive(Debug, Clone, Serialize)]
pub struct ProviderSummary {
    /// Display name, also accepted as the provider tag
    pub name: String,
    /// Environment variable holding the API key
    pub env_key: String,
    /// Whether the environment variable is set
    pub key_available: bool,
    /// API root in effect
    pub base_url: String,
    /// Model used when none is chosen
    pub default_model: String,
    /// Suggested models
    pub models: Vec<String>,
    /// Whether this is the configured default provider
    pub is_default: bool,
}

/// Build the catalog view for the current configuration
///
/// # Errors
///
/// Returns error if the configured base URL overrides are invalid
pub fn provider_summaries(config: &Config) -> Result<Vec<ProviderSummary>> {
    let gateway = ModelGateway::from_config(&config.provider)?;
    let default = config.provider.default_kind().ok();

    Ok(ProviderKind::ALL
        .iter()
        .map(|kind| ProviderSummary {
            name: kind.display_name().to_string(),
            env_key: kind.env_key().to_string(),
            key_available: kind.api_key_from_env().is_some(),
            base_url: gateway.base_url(*kind).to_string(),
            default_model: config.provider.model_for(*kind),
            models: kind.models().iter().map(|m| m.to_string()).collect(),
            is_default: default == Some(*kind),
        })
        .collect())
}

/// Print the provider catalog
///
/// # Errors
///
/// Returns error if the catalog cannot be built or serialized
pub fn list_providers(config: &Config, json: bool) -> Result<()> {
    let summaries = provider_summaries(config)?;

    if json {
        let rendered =
            serde_json::to_string_pretty(&summaries).map_err(ParleyError::Serialization)?;
        println!("{}", rendered);
        return Ok(());
    }

    let mut table = Table::new();
    table.add_row(row!["Provider", "Key Variable", "Key", "Default Model", "API Root"]);

    for summary in &summaries {
        let name = if summary.is_default {
            format!("{} *", summary.name).green().to_string()
        } else {
            summary.name.clone()
        };
        let key = if summary.key_available {
            "set".green()
        } else {
            "missing".yellow()
        };
        table.add_row(row![
            name,
            summary.env_key,
            key,
            summary.default_model,
            summary.base_url
        ]);
    }

    println!("\nSupported providers (* = default):\n");
    table.printstd();
    println!();

    for summary in &summaries {
        println!("{} {}", format!("{}:", summary.name).bold(), summary.models.join(", "));
    }
    println!();

    Ok(())
}
