//! Driver for databases reached through an RDS-Data-API-shaped HTTP endpoint.
//!
//! Each call is a JSON `POST` to `<endpoint>/<Operation>` carrying the cluster
//! resource ARN, the credentials secret ARN and the database name. Request
//! signing is left to whatever sits in front of the endpoint (a local Data API
//! emulator or a signing proxy).

use super::{DatabaseDriver, TransactionId};
use crate::core::{ReplayError, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataApiSettings {
    pub endpoint: String,
    pub resource_arn: String,
    pub secret_arn: String,
    pub database: String,
    pub request_timeout: Duration,
}

impl DataApiSettings {
    pub fn new(endpoint: &str, resource_arn: &str, secret_arn: &str, database: &str) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            resource_arn: resource_arn.to_string(),
            secret_arn: secret_arn.to_string(),
            database: database.to_string(),
            request_timeout: Duration::from_secs(45),
        }
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.endpoint.is_empty() {
            return Err("Data API endpoint cannot be empty".to_string());
        }
        if !self.endpoint.starts_with("http://") && !self.endpoint.starts_with("https://") {
            return Err("Data API endpoint must be an http(s) URL".to_string());
        }
        if self.resource_arn.is_empty() {
            return Err("DB_RESOURCE_ARN cannot be empty".to_string());
        }
        if self.secret_arn.is_empty() {
            return Err("DB_SECRET_ARN cannot be empty".to_string());
        }
        if self.database.is_empty() {
            return Err("DB_NAME cannot be empty".to_string());
        }
        Ok(())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BeginRequest<'a> {
    resource_arn: &'a str,
    secret_arn: &'a str,
    database: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BeginResponse {
    transaction_id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExecuteRequest<'a> {
    resource_arn: &'a str,
    secret_arn: &'a str,
    database: &'a str,
    sql: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    transaction_id: Option<&'a str>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EndRequest<'a> {
    resource_arn: &'a str,
    secret_arn: &'a str,
    transaction_id: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EndResponse {
    #[serde(default)]
    transaction_status: Option<String>,
}

/// Outcome of a failed call.
enum CallError {
    /// The database refused the request (HTTP 400).
    Rejected(String),
    Failed(ReplayError),
}

#[derive(Deserialize)]
struct ErrorResponse {
    #[serde(alias = "Message")]
    message: String,
}

pub struct DataApiDriver {
    client: reqwest::Client,
    settings: DataApiSettings,
}

impl DataApiDriver {
    pub fn new(settings: DataApiSettings) -> Result<Self> {
        settings.validate().map_err(ReplayError::Config)?;
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .map_err(|e| ReplayError::driver(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client, settings })
    }

    pub fn settings(&self) -> &DataApiSettings {
        &self.settings
    }

    fn url(&self, operation: &str) -> String {
        format!("{}/{}", self.settings.endpoint, operation)
    }

    async fn call<B, T>(&self, operation: &str, body: &B) -> std::result::Result<T, CallError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self
            .client
            .post(self.url(operation))
            .json(body)
            .send()
            .await
            .map_err(|e| {
                CallError::Failed(ReplayError::driver(format!(
                    "{} request failed: {}",
                    operation, e
                )))
            })?;

        let status = response.status();
        if status.is_success() {
            return response.json::<T>().await.map_err(|e| {
                CallError::Failed(ReplayError::driver(format!(
                    "{} returned an unreadable body: {}",
                    operation, e
                )))
            });
        }

        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorResponse>(&text)
            .map(|e| e.message)
            .unwrap_or(text);

        if status == StatusCode::BAD_REQUEST {
            Err(CallError::Rejected(message))
        } else {
            Err(CallError::Failed(ReplayError::driver(format!(
                "{} failed with HTTP {}: {}",
                operation, status, message
            ))))
        }
    }

    async fn end(&self, operation: &str, transaction: &TransactionId) -> Result<String> {
        let request = EndRequest {
            resource_arn: &self.settings.resource_arn,
            secret_arn: &self.settings.secret_arn,
            transaction_id: transaction.as_str(),
        };
        match self.call::<_, EndResponse>(operation, &request).await {
            Ok(response) => Ok(response.transaction_status.unwrap_or_default()),
            Err(CallError::Rejected(message)) => Err(ReplayError::driver(format!(
                "{} of {} rejected: {}",
                operation, transaction, message
            ))),
            Err(CallError::Failed(err)) => Err(err),
        }
    }
}

#[async_trait]
impl DatabaseDriver for DataApiDriver {
    async fn begin(&self) -> Result<TransactionId> {
        let request = BeginRequest {
            resource_arn: &self.settings.resource_arn,
            secret_arn: &self.settings.secret_arn,
            database: &self.settings.database,
        };
        match self.call::<_, BeginResponse>("BeginTransaction", &request).await {
            Ok(response) => {
                debug!(transaction = %response.transaction_id, "transaction started");
                Ok(TransactionId::new(response.transaction_id))
            }
            Err(CallError::Rejected(message)) => Err(ReplayError::driver(format!(
                "BeginTransaction rejected: {}",
                message
            ))),
            Err(CallError::Failed(err)) => Err(err),
        }
    }

    async fn execute(&self, sql: &str, transaction: Option<&TransactionId>) -> Result<()> {
        let request = ExecuteRequest {
            resource_arn: &self.settings.resource_arn,
            secret_arn: &self.settings.secret_arn,
            database: &self.settings.database,
            sql,
            transaction_id: transaction.map(TransactionId::as_str),
        };
        match self.call::<_, serde_json::Value>("Execute", &request).await {
            Ok(_) => Ok(()),
            Err(CallError::Rejected(message)) => Err(ReplayError::statement(sql, message)),
            Err(CallError::Failed(err)) => Err(err),
        }
    }

    async fn commit(&self, transaction: &TransactionId) -> Result<String> {
        self.end("CommitTransaction", transaction).await
    }

    async fn rollback(&self, transaction: &TransactionId) -> Result<String> {
        self.end("RollbackTransaction", transaction).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> DataApiSettings {
        DataApiSettings::new(
            "http://localhost:8080/",
            "arn:aws:rds:us-east-1:123456789012:cluster:dump",
            "arn:aws:secretsmanager:us-east-1:123456789012:secret:dump",
            "onet",
        )
    }

    #[test]
    fn test_endpoint_is_normalized() {
        let driver = DataApiDriver::new(settings()).unwrap();
        assert_eq!(driver.url("Execute"), "http://localhost:8080/Execute");
    }

    #[test]
    fn test_validate() {
        assert!(settings().validate().is_ok());

        let mut missing_secret = settings();
        missing_secret.secret_arn.clear();
        assert!(missing_secret.validate().is_err());

        let bad_scheme = DataApiSettings::new("ftp://host", "a", "b", "c");
        assert!(bad_scheme.validate().is_err());
    }

    #[test]
    fn test_execute_request_shape() {
        let request = ExecuteRequest {
            resource_arn: "r",
            secret_arn: "s",
            database: "d",
            sql: "SELECT 1;",
            transaction_id: None,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "resourceArn": "r",
                "secretArn": "s",
                "database": "d",
                "sql": "SELECT 1;"
            })
        );
    }
}
