//! Health checking for the self-update executor, ported from the
//! reference sidecar's `health_checker.py`: retry a GET against each
//! service's health endpoint with fixed spacing before giving up.

use std::collections::HashMap;
use std::time::Duration;

use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct HealthCheckConfig {
    pub retries: u32,
    pub delay: Duration,
    pub timeout: Duration,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            retries: 6,
            delay: Duration::from_secs(10),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Poll a single service's health URL up to `config.retries` times,
/// sleeping `config.delay` between attempts (never after the last one).
/// Returns `true` on the first 2xx response.
pub async fn check_service_health(client: &reqwest::Client, name: &str, url: &str, config: &HealthCheckConfig) -> bool {
    for attempt in 1..=config.retries {
        let result = client.get(url).timeout(config.timeout).send().await;
        match result {
            Ok(resp) if resp.status().is_success() => {
                debug!(service = %name, attempt, "health check succeeded");
                return true;
            }
            Ok(resp) => {
                debug!(service = %name, attempt, status = %resp.status(), "health check returned non-2xx");
            }
            Err(err) => {
                debug!(service = %name, attempt, error = %err, "health check request failed");
            }
        }
        if attempt < config.retries {
            tokio::time::sleep(config.delay).await;
        }
    }
    warn!(service = %name, "health check exhausted retries");
    false
}

/// Check every service in `urls` (name -> health URL). Returns the
/// subset that failed; an empty vec means every service is healthy.
pub async fn check_all_services(client: &reqwest::Client, urls: &HashMap<String, String>, config: &HealthCheckConfig) -> Vec<String> {
    let mut failed = Vec::new();
    for (name, url) in urls {
        if !check_service_health(client, name, url, config).await {
            failed.push(name.clone());
        }
    }
    failed
}

/// Parse the `HEALTH_URLS` config value: a comma-separated list of
/// `name=http://host:port/health` pairs, or bare URLs whose hostname is
/// used as the service name (mirrors the reference sidecar's
/// `_parse_health_urls`, which extracts the hostname via `urlparse`).
pub fn parse_health_urls(raw: &str, default_services: &[String]) -> HashMap<String, String> {
    let mut urls = HashMap::new();
    for entry in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        if let Some((name, url)) = entry.split_once('=') {
            urls.insert(name.trim().to_string(), url.trim().to_string());
        } else {
            let name = extract_hostname(entry).unwrap_or_else(|| entry.to_string());
            urls.insert(name, entry.to_string());
        }
    }
    if urls.is_empty() {
        for service in default_services {
            urls.insert(service.clone(), format!("http://{service}/health"));
        }
    }
    urls
}

fn extract_hostname(url: &str) -> Option<String> {
    let without_scheme = url.split_once("://").map(|(_, rest)| rest).unwrap_or(url);
    let host_port = without_scheme.split('/').next()?;
    let host = host_port.split(':').next()?;
    if host.is_empty() {
        None
    } else {
        Some(host.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_name_equals_url_pairs() {
        let urls = parse_health_urls("api=http://api:8080/health,worker=http://worker:9000/health", &[]);
        assert_eq!(urls.get("api").unwrap(), "http://api:8080/health");
        assert_eq!(urls.get("worker").unwrap(), "http://worker:9000/health");
    }

    #[test]
    fn bare_urls_use_hostname_as_name() {
        let urls = parse_health_urls("http://skill-runtime:8080/health", &[]);
        assert_eq!(urls.get("skill-runtime").unwrap(), "http://skill-runtime:8080/health");
    }

    #[test]
    fn empty_falls_back_to_default_services() {
        let urls = parse_health_urls("", &["skill-runtime".to_string()]);
        assert_eq!(urls.get("skill-runtime").unwrap(), "http://skill-runtime/health");
    }
}
