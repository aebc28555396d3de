//! Runtime configuration, read from the environment.

use crate::core::{ReplayError, Result};
use crate::driver::DataApiSettings;
use crate::pipeline::default_drop_tables;
use crate::runner::{BulkFailurePolicy, ReplayMode, RunnerOptions, StatementBoundary};
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct ReplayConfig {
    pub database: String,
    pub resource_arn: String,
    pub secret_arn: String,
    pub data_api_endpoint: Option<String>,
    pub store_dir: PathBuf,
    pub mode: ReplayMode,
    pub boundary: StatementBoundary,
    pub bulk_failure: BulkFailurePolicy,
    pub dispatch_url: Option<String>,
    pub drop_tables: Vec<String>,
    pub host: String,
    pub port: u16,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            database: String::new(),
            resource_arn: String::new(),
            secret_arn: String::new(),
            data_api_endpoint: None,
            store_dir: PathBuf::from("segments"),
            mode: ReplayMode::default(),
            boundary: StatementBoundary::default(),
            bulk_failure: BulkFailurePolicy::default(),
            dispatch_url: None,
            drop_tables: default_drop_tables(),
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl ReplayConfig {
    /// Loads `.env` if present, then reads the process environment.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from any key lookup. Unset and empty values
    /// fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let mut config = Self::default();

        if let Some(database) = get("DB_NAME") {
            config.database = database;
        }
        if let Some(arn) = get("DB_RESOURCE_ARN") {
            config.resource_arn = arn;
        }
        if let Some(arn) = get("DB_SECRET_ARN") {
            config.secret_arn = arn;
        }
        config.data_api_endpoint = get("DATA_API_ENDPOINT");
        if let Some(dir) = get("SEGMENT_STORE_DIR") {
            config.store_dir = PathBuf::from(dir);
        }
        if let Some(raw) = get("REPLAY_MODE") {
            config.mode = raw
                .parse()
                .map_err(|e| ReplayError::config(format!("REPLAY_MODE: {}", e)))?;
        }
        if let Some(raw) = get("STATEMENT_BOUNDARY") {
            config.boundary = raw
                .parse()
                .map_err(|e| ReplayError::config(format!("STATEMENT_BOUNDARY: {}", e)))?;
        }
        if let Some(raw) = get("BULK_FAILURE_POLICY") {
            config.bulk_failure = raw
                .parse()
                .map_err(|e| ReplayError::config(format!("BULK_FAILURE_POLICY: {}", e)))?;
        }
        config.dispatch_url = get("DISPATCH_URL");
        if let Some(raw) = get("DROP_TABLES") {
            config.drop_tables = raw
                .split(',')
                .map(str::trim)
                .filter(|table| !table.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(host) = get("APP_HOST") {
            config.host = host;
        }
        if let Some(raw) = get("APP_PORT") {
            config.port = raw
                .parse()
                .map_err(|_| ReplayError::config("APP_PORT must be a valid u16"))?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn store_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.store_dir = dir.into();
        self
    }

    pub fn mode(mut self, mode: ReplayMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn dispatch_url(mut self, url: impl Into<String>) -> Self {
        self.dispatch_url = Some(url.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.store_dir.as_os_str().is_empty() {
            return Err(ReplayError::config("SEGMENT_STORE_DIR cannot be empty"));
        }
        if self.port == 0 {
            return Err(ReplayError::config("APP_PORT must be greater than 0"));
        }
        if let Some(table) = self.drop_tables.iter().find(|t| t.contains('`')) {
            return Err(ReplayError::config(format!(
                "table name {} cannot contain a backtick",
                table
            )));
        }
        if let Some(url) = &self.dispatch_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ReplayError::config("DISPATCH_URL must be an http(s) URL"));
            }
        }
        Ok(())
    }

    pub fn runner_options(&self) -> RunnerOptions {
        RunnerOptions::new(self.mode)
            .boundary(self.boundary)
            .bulk_failure(self.bulk_failure)
    }

    /// Settings for the Data API driver. Fails when any part of the target
    /// identity is missing.
    pub fn data_api_settings(&self) -> Result<DataApiSettings> {
        let endpoint = self
            .data_api_endpoint
            .as_deref()
            .ok_or_else(|| ReplayError::config("DATA_API_ENDPOINT is not set"))?;
        let settings = DataApiSettings::new(
            endpoint,
            &self.resource_arn,
            &self.secret_arn,
            &self.database,
        );
        settings.validate().map_err(ReplayError::config)?;
        Ok(settings)
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
