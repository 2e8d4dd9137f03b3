use super::*;
use anyhow::{anyhow, Result};

/// Validate the complete configuration
pub fn validate_config(config: &LauncherConfig) -> Result<()> {
    validate_log_level(&config.log_level)?;
    validate_worker_config(&config.worker)?;
    validate_supervisor_settings(&config.supervisor)?;
    validate_shutdown_config(&config.shutdown)?;
    Ok(())
}

fn validate_log_level(level: &str) -> Result<()> {
    match level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(anyhow!(
            "Invalid log level: {}, must be one of: trace, debug, info, warn, error",
            level
        )),
    }
}

/// Validate what is launched and where
pub fn validate_worker_config(worker: &WorkerConfig) -> Result<()> {
    if worker.root_directory.as_os_str().is_empty() {
        return Err(anyhow!("Worker root directory cannot be empty"));
    }

    if worker.network.port == 0 {
        return Err(anyhow!("Port must be between 1 and 65535, got: 0"));
    }

    if worker.network.listen.trim().is_empty() {
        return Err(anyhow!("Listen address cannot be empty"));
    }

    if worker.launch.interpreter.trim().is_empty() {
        return Err(anyhow!("Interpreter name cannot be empty"));
    }

    if worker.launch.entry_point.trim().is_empty() {
        return Err(anyhow!("Entry point cannot be empty"));
    }

    for key in worker.environment.keys() {
        if key.is_empty() {
            return Err(anyhow!("Environment variable name cannot be empty"));
        }
        if !key.chars().all(|c| c.is_alphanumeric() || c == '_') {
            return Err(anyhow!(
                "Environment variable name can only contain alphanumeric characters and underscores: {}",
                key
            ));
        }
    }

    Ok(())
}

/// Validate supervisor tuning
pub fn validate_supervisor_settings(settings: &SupervisorSettings) -> Result<()> {
    if !settings.health_path.starts_with('/') {
        return Err(anyhow!(
            "Health path must start with '/', got: {}",
            settings.health_path
        ));
    }

    if settings.health_interval.is_zero() {
        return Err(anyhow!("Health interval must be greater than 0"));
    }

    if settings.health_timeout.is_zero() {
        return Err(anyhow!("Health timeout must be greater than 0"));
    }

    if settings.health_timeout > settings.health_interval {
        return Err(anyhow!(
            "Health timeout ({:?}) cannot exceed the health interval ({:?})",
            settings.health_timeout,
            settings.health_interval
        ));
    }

    if settings.heartbeat_debounce == 0 {
        return Err(anyhow!("Heartbeat debounce must be at least 1"));
    }

    if settings.output_log_capacity == 0 {
        return Err(anyhow!("Output log capacity must be greater than 0"));
    }

    Ok(())
}

/// Validate the shutdown ladder windows
pub fn validate_shutdown_config(shutdown: &ShutdownConfig) -> Result<()> {
    if shutdown.tick.is_zero() {
        return Err(anyhow!("Shutdown tick must be greater than 0"));
    }

    for (name, window) in [
        ("graceful_window", shutdown.graceful_window),
        ("forceful_window", shutdown.forceful_window),
        ("manual_window", shutdown.manual_window),
    ] {
        if window < shutdown.tick {
            return Err(anyhow!(
                "Shutdown {} ({:?}) must be at least one tick ({:?})",
                name,
                window,
                shutdown.tick
            ));
        }
    }

    Ok(())
}
