use crate::config::types::{
    BrowserConfig, Config, CrawlerConfig, OutputConfig, RetryConfig, ScheduleConfig, SourceConfig,
};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_browser_config(&config.browser)?;
    validate_retry_config(&config.retry)?;
    validate_source_config(&config.source)?;
    validate_schedule_config(&config.schedule)?;
    validate_output_config(&config.output)?;
    Ok(())
}

/// Validates coordinator scheduling limits
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.max_concurrent_crawls < 1 || config.max_concurrent_crawls > 64 {
        return Err(ConfigError::Validation(format!(
            "max_concurrent_crawls must be between 1 and 64, got {}",
            config.max_concurrent_crawls
        )));
    }
    Ok(())
}

/// Validates browser pool and anti-detection settings
fn validate_browser_config(config: &BrowserConfig) -> Result<(), ConfigError> {
    if config.max_contexts < 1 || config.max_contexts > 32 {
        return Err(ConfigError::Validation(format!(
            "max_contexts must be between 1 and 32, got {}",
            config.max_contexts
        )));
    }

    if config.page_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "page_timeout_secs must be >= 1".to_string(),
        ));
    }

    if config.delay_min_ms > config.delay_max_ms {
        return Err(ConfigError::Validation(format!(
            "delay_min_ms ({}) must not exceed delay_max_ms ({})",
            config.delay_min_ms, config.delay_max_ms
        )));
    }

    if config.user_agents.is_empty() {
        return Err(ConfigError::Validation(
            "user_agents must contain at least one entry".to_string(),
        ));
    }

    if let Some(agent) = config.user_agents.iter().find(|ua| ua.trim().is_empty()) {
        return Err(ConfigError::Validation(format!(
            "user_agents contains a blank entry: '{}'",
            agent
        )));
    }

    if config.viewports.iter().any(|[w, h]| *w == 0 || *h == 0) {
        return Err(ConfigError::Validation(
            "viewports must have non-zero width and height".to_string(),
        ));
    }

    Ok(())
}

/// Validates retry and cooldown bounds
fn validate_retry_config(config: &RetryConfig) -> Result<(), ConfigError> {
    if config.max_attempts < 1 {
        return Err(ConfigError::Validation(format!(
            "max_attempts must be >= 1, got {}",
            config.max_attempts
        )));
    }

    if config.base_backoff_ms > config.max_backoff_ms {
        return Err(ConfigError::Validation(format!(
            "base_backoff_ms ({}) must not exceed max_backoff_ms ({})",
            config.base_backoff_ms, config.max_backoff_ms
        )));
    }

    if !(0.0..=1.0).contains(&config.jitter) {
        return Err(ConfigError::Validation(format!(
            "jitter must be between 0.0 and 1.0, got {}",
            config.jitter
        )));
    }

    Ok(())
}

/// Validates category listing URLs
fn validate_source_config(config: &SourceConfig) -> Result<(), ConfigError> {
    for (name, listing) in &config.categories {
        if name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "category names cannot be empty".to_string(),
            ));
        }

        let url = Url::parse(listing).map_err(|e| {
            ConfigError::InvalidUrl(format!("Invalid listing URL for '{}': {}", name, e))
        })?;

        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::InvalidUrl(format!(
                "Listing URL for '{}' must use http or https",
                name
            )));
        }
    }
    Ok(())
}

/// Validates the auto-crawl timing
fn validate_schedule_config(config: &ScheduleConfig) -> Result<(), ConfigError> {
    if config.interval_minutes == 0 {
        return Err(ConfigError::Validation(
            "interval_minutes must be >= 1".to_string(),
        ));
    }

    if config.max_pages == 0 {
        return Err(ConfigError::Validation("max_pages must be >= 1".to_string()));
    }

    Ok(())
}

/// Checks that every scheduled category is defined in `[source.categories]`
///
/// Only the auto-crawl reads `[schedule]`, so this runs when the schedule
/// starts rather than on every config load.
pub fn validate_schedule_categories(config: &Config) -> Result<(), ConfigError> {
    if config.schedule.categories.is_empty() {
        return Err(ConfigError::Validation(
            "[schedule] needs at least one category".to_string(),
        ));
    }

    for category in &config.schedule.categories {
        if !config.source.categories.contains_key(category) {
            return Err(ConfigError::Validation(format!(
                "schedule category '{}' is not defined in [source.categories]",
                category
            )));
        }
    }

    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }
    Ok(())
}
