use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Runtime
    pub environment: String,
    pub log_level: String,
    pub log_format: String,

    // Content API
    pub api_base_url: String,
    pub api_token: Option<String>,
    pub request_timeout_secs: u64,
    pub delivery_page_size: u32,
    pub user_page_size: u32,

    // Push gateway
    pub push_gateway_url: Option<String>,
    pub push_access_token: Option<String>,

    // Local store
    pub local_store_path: Option<String>,
    pub local_store_max: usize,
    pub local_store_retention_months: u32,
    pub prune_check_interval_secs: u64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        Ok(Config {
            environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
            log_level: env::var("LOG_LEVEL")
                .unwrap_or_else(|_| "rainbow_notify=debug".to_string()),
            log_format: env::var("LOG_FORMAT").unwrap_or_else(|_| "plain".to_string()),

            api_base_url: env::var("NOTIFY_API_URL")
                .unwrap_or_else(|_| "http://localhost:1337/api".to_string()),
            api_token: env::var("NOTIFY_API_TOKEN").ok().filter(|t| !t.is_empty()),
            request_timeout_secs: env::var("REQUEST_TIMEOUT_SECS")
                .unwrap_or_else(|_| "15".to_string())
                .parse()?,
            delivery_page_size: env::var("DELIVERY_PAGE_SIZE")
                .unwrap_or_else(|_| "25".to_string())
                .parse()?,
            user_page_size: env::var("USER_PAGE_SIZE")
                .unwrap_or_else(|_| "100".to_string())
                .parse()?,

            push_gateway_url: env::var("PUSH_GATEWAY_URL").ok().filter(|u| !u.is_empty()),
            push_access_token: env::var("PUSH_ACCESS_TOKEN").ok().filter(|t| !t.is_empty()),

            local_store_path: env::var("LOCAL_STORE_PATH").ok().filter(|p| !p.is_empty()),
            local_store_max: env::var("LOCAL_STORE_MAX")
                .unwrap_or_else(|_| "100".to_string())
                .parse()?,
            local_store_retention_months: env::var("LOCAL_STORE_RETENTION_MONTHS")
                .unwrap_or_else(|_| "1".to_string())
                .parse()?,
            prune_check_interval_secs: env::var("PRUNE_CHECK_INTERVAL_SECS")
                .unwrap_or_else(|_| "21600".to_string())
                .parse()?,
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            log_level: "rainbow_notify=debug".to_string(),
            log_format: "plain".to_string(),
            api_base_url: "http://localhost:1337/api".to_string(),
            api_token: None,
            request_timeout_secs: 15,
            delivery_page_size: 25,
            user_page_size: 100,
            push_gateway_url: None,
            push_access_token: None,
            local_store_path: None,
            local_store_max: 100,
            local_store_retention_months: 1,
            prune_check_interval_secs: 21600,
        }
    }
}
