use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub port: u16,
    pub supabase_url: String,
    pub supabase_api_key: String,
    pub inventory_table: String,
    pub results_table: String,
    pub portal_email: String,
    pub portal_password: String,
    pub portal_url: String,
    pub webdriver_url: String,
    pub headless: bool,
    pub response_timeout_secs: u64,
    pub vin_pause_ms: u64,
    pub vin_prefixes: Vec<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "5000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            supabase_url: std::env::var("SUPABASE_URL")
                .map_err(|_| anyhow::anyhow!("SUPABASE_URL environment variable required"))
                .and_then(|url| {
                    if url.trim().is_empty() {
                        anyhow::bail!("SUPABASE_URL cannot be empty");
                    }
                    if !url.starts_with("http://") && !url.starts_with("https://") {
                        anyhow::bail!("SUPABASE_URL must start with http:// or https://");
                    }
                    Ok(url.trim_end_matches('/').to_string())
                })?,
            supabase_api_key: std::env::var("SUPABASE_API_KEY")
                .map_err(|_| anyhow::anyhow!("SUPABASE_API_KEY environment variable required"))
                .and_then(|key| {
                    if key.trim().is_empty() {
                        anyhow::bail!("SUPABASE_API_KEY cannot be empty");
                    }
                    Ok(key)
                })?,
            inventory_table: non_empty_or("SUPABASE_TABLE", "inventory"),
            results_table: non_empty_or("RESULTS_TABLE", "appraisal_results"),
            portal_email: std::env::var("SIGNAL_EMAIL")
                .map_err(|_| anyhow::anyhow!("SIGNAL_EMAIL environment variable required"))
                .and_then(|email| {
                    if email.trim().is_empty() {
                        anyhow::bail!("SIGNAL_EMAIL cannot be empty");
                    }
                    Ok(email)
                })?,
            portal_password: std::env::var("SIGNAL_PASSWORD")
                .map_err(|_| anyhow::anyhow!("SIGNAL_PASSWORD environment variable required"))
                .and_then(|pass| {
                    if pass.is_empty() {
                        anyhow::bail!("SIGNAL_PASSWORD cannot be empty");
                    }
                    Ok(pass)
                })?,
            portal_url: http_url_or("PORTAL_URL", "https://app.signal.vin")?,
            webdriver_url: http_url_or("WEBDRIVER_URL", "http://localhost:9515")?,
            headless: std::env::var("HEADLESS")
                .map(|v| !matches!(v.trim().to_lowercase().as_str(), "0" | "false" | "no"))
                .unwrap_or(true),
            response_timeout_secs: std::env::var("RESPONSE_TIMEOUT_SECS")
                .unwrap_or_else(|_| "45".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("RESPONSE_TIMEOUT_SECS must be a whole number"))
                .and_then(|secs: u64| {
                    if secs == 0 {
                        anyhow::bail!("RESPONSE_TIMEOUT_SECS must be greater than zero");
                    }
                    Ok(secs)
                })?,
            vin_pause_ms: std::env::var("VIN_PAUSE_MS")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("VIN_PAUSE_MS must be a whole number"))?,
            vin_prefixes: parse_prefixes(
                &std::env::var("VIN_PREFIXES").unwrap_or_else(|_| "1,4,5".to_string()),
            ),
        };

        // Log successful configuration load (without sensitive values)
        tracing::info!("Configuration loaded successfully");
        tracing::debug!("Supabase URL: {}", config.supabase_url);
        tracing::debug!(
            "Tables: inventory={}, results={}",
            config.inventory_table,
            config.results_table
        );
        tracing::debug!("Portal URL: {}", config.portal_url);
        tracing::debug!(
            "WebDriver URL: {} (headless: {})",
            config.webdriver_url,
            config.headless
        );
        tracing::debug!("Accepted VIN prefixes: {:?}", config.vin_prefixes);
        tracing::debug!("Server Port: {}", config.port);

        Ok(config)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.response_timeout_secs)
    }

    pub fn vin_pause(&self) -> Duration {
        Duration::from_millis(self.vin_pause_ms)
    }
}

fn non_empty_or(var: &str, default: &str) -> String {
    std::env::var(var)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn http_url_or(var: &str, default: &str) -> anyhow::Result<String> {
    let url = non_empty_or(var, default);
    if !url.starts_with("http://") && !url.starts_with("https://") {
        anyhow::bail!("{} must start with http:// or https://", var);
    }
    Ok(url.trim_end_matches('/').to_string())
}

/// Splits a comma separated prefix list, dropping blanks. An empty list accepts every VIN.
pub fn parse_prefixes(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|p| p.trim().to_uppercase())
        .filter(|p| !p.is_empty())
        .collect()
}
