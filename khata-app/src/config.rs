//! Process configuration, built once at startup and passed into the
//! application service. Unknown environment keys are simply never read.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub database_url: String,
    pub llm_api_key: String,
    /// Required only when the store holds more than one company; with a
    /// single company the service auto-selects it.
    pub company_code: Option<String>,
    pub upload_dir: Option<String>,
    pub jwt_secret: Option<String>,
    pub admin_initial_password: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url =
            std::env::var("DATABASE_URL").map_err(|_| ConfigError::Missing("DATABASE_URL"))?;
        let llm_api_key =
            std::env::var("LLM_API_KEY").map_err(|_| ConfigError::Missing("LLM_API_KEY"))?;

        Ok(Self {
            database_url,
            llm_api_key,
            company_code: std::env::var("COMPANY_CODE").ok(),
            upload_dir: std::env::var("UPLOAD_DIR").ok(),
            jwt_secret: std::env::var("JWT_SECRET").ok(),
            admin_initial_password: std::env::var("ADMIN_INITIAL_PASSWORD").ok(),
        })
    }
}
