use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

/// Card-payment gateway credentials and defaults. The secret key doubles as
/// the HMAC key for webhook signatures.
#[derive(Debug, Deserialize, Clone)]
pub struct GatewayConfig {
    pub api_base: String,
    pub public_key: String,
    pub secret_key: String,
    pub default_currency: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.gateway.example".to_string(),
            public_key: String::new(),
            secret_key: String::new(),
            default_currency: "jpy".to_string(),
        }
    }
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let config = Config::builder()
            // Start with default values
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("database.max_connections", 10)?
            .set_default("gateway.default_currency", "jpy")?
            // Add config file if it exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Add environment variables (with COURSEBILL__ prefix, double underscore separates levels)
            .add_source(Environment::with_prefix("COURSEBILL").separator("__"))
            .build()?;

        config.try_deserialize()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            database: DatabaseConfig {
                url: "sqlite://coursebill.db".to_string(),
                max_connections: 10,
            },
            gateway: GatewayConfig::default(),
        }
    }
}
