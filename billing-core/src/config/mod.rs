use crate::error::AppError;
use config::{Config as Cfg, File};
use serde::Deserialize;

/// Runtime settings shared by the invoicing and subscription services.
///
/// Passed explicitly into service constructors instead of being read from
/// ambient globals.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default = "default_taxes_enabled")]
    pub taxes_enabled: bool,
    #[serde(default = "default_number_prefix")]
    pub invoice_number_prefix: String,
    #[serde(default = "default_number_padding")]
    pub invoice_number_padding: usize,
    #[serde(default)]
    pub database_url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub database_max_connections: u32,
    #[serde(default = "default_min_connections")]
    pub database_min_connections: u32,
}

fn default_currency() -> String {
    "USD".to_string()
}

fn default_mode() -> String {
    "live".to_string()
}

fn default_taxes_enabled() -> bool {
    true
}

fn default_number_prefix() -> String {
    "INV-".to_string()
}

fn default_number_padding() -> usize {
    5
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

impl Default for Config {
    fn default() -> Self {
        Self {
            currency: default_currency(),
            mode: default_mode(),
            taxes_enabled: default_taxes_enabled(),
            invoice_number_prefix: default_number_prefix(),
            invoice_number_padding: default_number_padding(),
            database_url: None,
            database_max_connections: default_max_connections(),
            database_min_connections: default_min_connections(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let config = Cfg::builder()
            .add_source(File::with_name("configuration").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Whether invoices are being recorded against a test gateway.
    pub fn is_test_mode(&self) -> bool {
        self.mode == "test"
    }

    /// Format a sequential invoice number, e.g. `INV-00042`.
    pub fn format_invoice_number(&self, number: i64) -> String {
        format!(
            "{}{:0width$}",
            self.invoice_number_prefix,
            number,
            width = self.invoice_number_padding
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_invoice_numbers_with_padding() {
        let config = Config::default();
        assert_eq!(config.format_invoice_number(42), "INV-00042");
        assert_eq!(config.format_invoice_number(123456), "INV-123456");
    }

    #[test]
    fn defaults_to_live_mode() {
        let config = Config::default();
        assert!(!config.is_test_mode());
        assert!(config.taxes_enabled);
    }
}
