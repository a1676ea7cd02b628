//! Config command handlers

use anyhow::{bail, Context, Result};

use noticeboard_core::Config;

use crate::output::{Output, OutputFormat};

/// Show current configuration. Secrets are never printed.
pub fn show(output: &Output) -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "data_dir": config.data_dir,
                    "remote_base_url": config.remote_base_url,
                    "document_id": config.document_id,
                    "api_token": config.api_token.as_ref().map(|_| "(set)"),
                    "sync_enabled": config.sync_enabled,
                    "admin_passphrase": config.admin_passphrase.as_ref().map(|_| "(set)"),
                    "request_timeout_secs": config.request_timeout_secs,
                    "retry_base_delay_secs": config.retry_base_delay_secs,
                    "retry_max_delay_secs": config.retry_max_delay_secs,
                    "retry_max_attempts": config.retry_max_attempts,
                    "cas_max_attempts": config.cas_max_attempts
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", config.data_dir.display());
        }
        OutputFormat::Human => {
            println!("Configuration:");
            println!("  data_dir:              {}", config.data_dir.display());
            println!("  remote_base_url:       {}", or_unset(&config.remote_base_url));
            println!("  document_id:           {}", or_unset(&config.document_id));
            println!("  api_token:             {}", secret(&config.api_token));
            println!("  sync_enabled:          {}", config.sync_enabled);
            println!("  admin_passphrase:      {}", secret(&config.admin_passphrase));
            println!("  request_timeout_secs:  {}", config.request_timeout_secs);
            println!("  retry_base_delay_secs: {}", config.retry_base_delay_secs);
            println!("  retry_max_delay_secs:  {}", config.retry_max_delay_secs);
            println!("  retry_max_attempts:    {}", config.retry_max_attempts);
            println!("  cas_max_attempts:      {}", config.cas_max_attempts);
            println!();
            println!("Config file: {}", Config::config_file_path().display());
        }
    }

    Ok(())
}

/// Set a configuration value
pub fn set(key: String, value: String, output: &Output) -> Result<()> {
    let mut config = Config::load().context("Failed to load configuration")?;
    apply(&mut config, &key, &value)?;
    config.save()?;

    output.success(&format!("Set {} = {}", key, display_value(&key, &value)));
    Ok(())
}

fn apply(config: &mut Config, key: &str, value: &str) -> Result<()> {
    match key {
        "data_dir" => config.data_dir = value.into(),
        "remote_base_url" => config.remote_base_url = optional(value),
        "document_id" => config.document_id = optional(value),
        "api_token" => config.api_token = optional(value),
        "admin_passphrase" => config.admin_passphrase = optional(value),
        "sync_enabled" => {
            config.sync_enabled = value
                .parse()
                .context("Invalid value for sync_enabled. Use 'true' or 'false'.")?;
        }
        "request_timeout_secs" => config.request_timeout_secs = number(key, value)?,
        "retry_base_delay_secs" => config.retry_base_delay_secs = number(key, value)?,
        "retry_max_delay_secs" => config.retry_max_delay_secs = number(key, value)?,
        "retry_max_attempts" => config.retry_max_attempts = number(key, value)?,
        "cas_max_attempts" => config.cas_max_attempts = number(key, value)?,
        _ => {
            bail!(
                "Unknown config key: {}. Valid keys: data_dir, remote_base_url, document_id, \
                 api_token, sync_enabled, admin_passphrase, request_timeout_secs, \
                 retry_base_delay_secs, retry_max_delay_secs, retry_max_attempts, cas_max_attempts",
                key
            );
        }
    }
    Ok(())
}

/// Empty or "none" clears an optional value
fn optional(value: &str) -> Option<String> {
    if value.is_empty() || value == "none" {
        None
    } else {
        Some(value.to_string())
    }
}

fn number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    match value.parse() {
        Ok(n) => Ok(n),
        Err(_) => bail!("Invalid value for {}: expected a number", key),
    }
}

fn or_unset(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("(not set)")
}

fn secret(value: &Option<String>) -> &'static str {
    if value.is_some() {
        "(set)"
    } else {
        "(not set)"
    }
}

fn display_value<'a>(key: &str, value: &'a str) -> &'a str {
    match key {
        "api_token" | "admin_passphrase" if !value.is_empty() => "(hidden)",
        _ => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_known_keys() {
        let mut config = Config::default();
        apply(&mut config, "sync_enabled", "true").unwrap();
        apply(&mut config, "document_id", "abc123").unwrap();
        apply(&mut config, "retry_max_attempts", "5").unwrap();

        assert!(config.sync_enabled);
        assert_eq!(config.document_id.as_deref(), Some("abc123"));
        assert_eq!(config.retry_max_attempts, 5);

        apply(&mut config, "document_id", "none").unwrap();
        assert!(config.document_id.is_none());
    }

    #[test]
    fn test_apply_rejects_bad_values() {
        let mut config = Config::default();
        assert!(apply(&mut config, "sync_enabled", "maybe").is_err());
        assert!(apply(&mut config, "request_timeout_secs", "soon").is_err());
        assert!(apply(&mut config, "favourite_colour", "blue").is_err());
    }

    #[test]
    fn test_secrets_are_hidden() {
        assert_eq!(display_value("api_token", "s3cret"), "(hidden)");
        assert_eq!(display_value("document_id", "abc"), "abc");
        assert_eq!(secret(&Some("x".to_string())), "(set)");
    }
}
