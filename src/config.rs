use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::Path;
use tracing::info;
use validator::Validate;

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const CONFIG_DIR: &str = "config";
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_DB_MIN_CONNECTIONS: u32 = 1;

/// Loyalty-program tuning. The milestone/point ratios are business
/// configuration, not hard-coded law; deployments override them through the
/// config files or `APP__LOYALTY__*` environment variables.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct LoyaltyConfig {
    /// Cumulative spend (in currency units) that unlocks one discount milestone.
    #[serde(default = "default_milestone_spend_unit")]
    pub milestone_spend_unit: Decimal,

    /// Points consumed when a milestone discount is granted.
    #[serde(default = "default_points_per_milestone")]
    pub points_per_milestone: i64,

    /// Currency discount granted per milestone.
    #[serde(default = "default_discount_per_milestone")]
    pub discount_per_milestone: Decimal,

    /// Points earned per currency unit actually paid.
    #[serde(default = "default_points_earn_rate")]
    pub points_earn_rate: i64,

    /// Earned points older than this many days are eligible for expiry.
    #[serde(default = "default_points_validity_days")]
    pub points_validity_days: i64,
}

fn default_milestone_spend_unit() -> Decimal {
    Decimal::new(5_000, 0)
}

fn default_points_per_milestone() -> i64 {
    50_000
}

fn default_discount_per_milestone() -> Decimal {
    Decimal::new(250, 0)
}

fn default_points_earn_rate() -> i64 {
    10
}

fn default_points_validity_days() -> i64 {
    90
}

impl Default for LoyaltyConfig {
    fn default() -> Self {
        Self {
            milestone_spend_unit: default_milestone_spend_unit(),
            points_per_milestone: default_points_per_milestone(),
            discount_per_milestone: default_discount_per_milestone(),
            points_earn_rate: default_points_earn_rate(),
            points_validity_days: default_points_validity_days(),
        }
    }
}

/// Hanger-return promotion: customers bringing back at least `batch_size`
/// hangers earn `discount_per_batch` off the order, applied at most once.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct HangerConfig {
    #[serde(default = "default_hanger_batch_size")]
    pub batch_size: u32,

    #[serde(default = "default_hanger_discount_per_batch")]
    pub discount_per_batch: Decimal,
}

fn default_hanger_batch_size() -> u32 {
    20
}

fn default_hanger_discount_per_batch() -> Decimal {
    Decimal::new(140, 0)
}

impl Default for HangerConfig {
    fn default() -> Self {
        Self {
            batch_size: default_hanger_batch_size(),
            discount_per_batch: default_hanger_discount_per_batch(),
        }
    }
}

/// Application configuration with validation.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Environment (development, production, test)
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Maximum number of database connections
    #[serde(default = "default_db_max_connections")]
    #[validate(range(min = 1, max = 200))]
    pub db_max_connections: u32,

    /// Minimum number of database connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// Run migrations automatically on startup
    #[serde(default)]
    pub auto_migrate: bool,

    #[serde(default)]
    pub loyalty: LoyaltyConfig,

    #[serde(default)]
    pub hangers: HangerConfig,
}

fn default_environment() -> String {
    DEFAULT_ENV.to_string()
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_db_max_connections() -> u32 {
    DEFAULT_DB_MAX_CONNECTIONS
}

fn default_db_min_connections() -> u32 {
    DEFAULT_DB_MIN_CONNECTIONS
}

impl AppConfig {
    /// Minimal constructor used by tests and embedding applications.
    pub fn new(database_url: String, environment: String) -> Self {
        Self {
            database_url,
            environment,
            log_level: default_log_level(),
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            auto_migrate: false,
            loyalty: LoyaltyConfig::default(),
            hangers: HangerConfig::default(),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

/// Loads configuration from layered sources: `config/default.toml`, an
/// environment-specific file, and `APP__`-prefixed environment variables
/// (double underscore as separator, e.g. `APP__DATABASE_URL`).
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let run_env = std::env::var("RUN_ENV").unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!(environment = %run_env, "loading configuration");

    let mut builder = Config::builder();

    let default_path = Path::new(CONFIG_DIR).join("default.toml");
    if default_path.exists() {
        builder = builder.add_source(File::from(default_path));
    }

    let env_path = Path::new(CONFIG_DIR).join(format!("{run_env}.toml"));
    if env_path.exists() {
        builder = builder.add_source(File::from(env_path));
    }

    let settings = builder
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config: AppConfig = settings.try_deserialize()?;

    app_config
        .validate()
        .map_err(|e| ConfigError::Message(format!("invalid configuration: {e}")))?;

    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn loyalty_defaults_match_program_rules() {
        let loyalty = LoyaltyConfig::default();
        assert_eq!(loyalty.milestone_spend_unit, dec!(5000));
        assert_eq!(loyalty.points_per_milestone, 50_000);
        assert_eq!(loyalty.discount_per_milestone, dec!(250));
        assert_eq!(loyalty.points_earn_rate, 10);
        assert_eq!(loyalty.points_validity_days, 90);
    }

    #[test]
    fn hanger_defaults_match_promotion_rules() {
        let hangers = HangerConfig::default();
        assert_eq!(hangers.batch_size, 20);
        assert_eq!(hangers.discount_per_batch, dec!(140));
    }
}
