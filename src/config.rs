//! Runtime settings, layered as defaults, then a TOML file, then
//! `SEPA_MANDATE_*` environment variables.
use anyhow::Context;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_PREFIX: &str = "SEPA_MANDATE_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MandateConfig {
    /// Quiet period before the status synchronizer queries.
    pub debounce_ms: u64,
    /// Fresh references tried after a duplicate mandate id.
    pub reference_retries: u32,
    pub validity_months: u32,
    /// Days before expiry from which a mandate counts as expiring soon.
    pub expiry_warning_days: u32,
    pub record_name_prefix: String,
    pub db_path: PathBuf,
}

impl Default for MandateConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 300,
            reference_retries: 1,
            validity_months: crate::lifecycle::DEFAULT_VALIDITY_MONTHS,
            expiry_warning_days: 30,
            record_name_prefix: "Assoc-Member-".to_string(),
            db_path: PathBuf::from("mandates.db"),
        }
    }
}

impl MandateConfig {
    pub fn figment(file: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(MandateConfig::default()));
        if let Some(file) = file {
            figment = figment.merge(Toml::file(file));
        }
        figment.merge(Env::prefixed(ENV_PREFIX))
    }

    pub fn load(file: Option<&Path>) -> anyhow::Result<Self> {
        Self::figment(file)
            .extract()
            .context("failed to load mandate configuration")
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn defaults_without_sources() {
        let config: MandateConfig = MandateConfig::figment(None).extract().unwrap();

        assert_eq!(config.debounce(), Duration::from_millis(300));
        assert_eq!(config.reference_retries, 1);
        assert_eq!(config.validity_months, 36);
        assert_eq!(config.expiry_warning_days, 30);
    }

    #[test]
    fn file_then_env() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "Mandates.toml",
                r#"
                debounce_ms = 150
                record_name_prefix = "Club-Member-"
                "#,
            )?;
            jail.set_env("SEPA_MANDATE_DEBOUNCE_MS", "50");
            jail.set_env("SEPA_MANDATE_EXPIRY_WARNING_DAYS", "14");

            let config = MandateConfig::load(Some(Path::new("Mandates.toml")))
                .map_err(|e| e.to_string())?;

            assert_eq!(config.debounce_ms, 50);
            assert_eq!(config.record_name_prefix, "Club-Member-");
            assert_eq!(config.expiry_warning_days, 14);
            assert_eq!(config.db_path, PathBuf::from("mandates.db"));
            Ok(())
        });
    }
}
