//! Usage audit records stored in DynamoDB.

use async_trait::async_trait;
use aws_sdk_dynamodb::error::DisplayErrorContext;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client as DynamoClient;
use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::HashMap;
use tracing::{debug, info};

use crate::{Error, Result, UsageLogEntry};

/// Append-only store of usage records.
#[async_trait]
pub trait UsageStore: Send + Sync {
    /// Write one record.
    async fn record(&self, entry: &UsageLogEntry) -> Result<()>;

    /// Full unfiltered scan of every record. Unbounded; intended for low volumes.
    async fn list_all(&self) -> Result<Vec<UsageLogEntry>>;
}

/// DynamoDB table with `id` as partition key.
pub struct DynamoUsageStore {
    client: DynamoClient,
    table_name: String,
}

impl DynamoUsageStore {
    pub fn new(client: DynamoClient, table_name: impl Into<String>) -> Self {
        Self {
            client,
            table_name: table_name.into(),
        }
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }
}

#[async_trait]
impl UsageStore for DynamoUsageStore {
    async fn record(&self, entry: &UsageLogEntry) -> Result<()> {
        self.client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(to_item(entry)))
            .send()
            .await
            .map_err(|e| Error::Persistence {
                record_id: entry.id.clone(),
                message: DisplayErrorContext(&e).to_string(),
            })?;

        debug!(record_id = %entry.id, table = %self.table_name, "Usage record saved");
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<UsageLogEntry>> {
        let mut items = self
            .client
            .scan()
            .table_name(&self.table_name)
            .into_paginator()
            .items()
            .send();

        let mut entries = Vec::new();
        while let Some(item) = items.next().await {
            let item = item.map_err(|e| {
                Error::Internal(format!(
                    "Failed to scan {}: {}",
                    self.table_name,
                    DisplayErrorContext(&e)
                ))
            })?;
            entries.push(from_item(&item)?);
        }

        info!(count = entries.len(), table = %self.table_name, "Scanned usage records");
        Ok(entries)
    }
}

/// Convert a record into its DynamoDB attribute map.
pub fn to_item(entry: &UsageLogEntry) -> HashMap<String, AttributeValue> {
    let mut item = HashMap::new();
    item.insert("id".to_string(), AttributeValue::S(entry.id.clone()));
    item.insert("prompt".to_string(), AttributeValue::S(entry.prompt.clone()));
    item.insert(
        "response".to_string(),
        match &entry.response {
            Some(response) => AttributeValue::S(response.clone()),
            None => AttributeValue::Null(true),
        },
    );
    item.insert(
        "input_tokens".to_string(),
        AttributeValue::N(entry.input_tokens.to_string()),
    );
    item.insert(
        "output_tokens".to_string(),
        AttributeValue::N(entry.output_tokens.to_string()),
    );
    item.insert(
        "date_utc".to_string(),
        AttributeValue::S(entry.date_utc.to_rfc3339_opts(SecondsFormat::Millis, true)),
    );
    item
}

/// Rebuild a record from a scanned DynamoDB item.
pub fn from_item(item: &HashMap<String, AttributeValue>) -> Result<UsageLogEntry> {
    let id = string_attr(item, "id")?;

    let response = match item.get("response") {
        Some(AttributeValue::S(value)) => Some(value.clone()),
        _ => None,
    };

    let date_utc = DateTime::parse_from_rfc3339(&string_attr(item, "date_utc")?)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Record {} has an invalid date_utc: {}", id, e)))?;

    Ok(UsageLogEntry {
        prompt: string_attr(item, "prompt")?,
        response,
        input_tokens: number_attr(item, "input_tokens"),
        output_tokens: number_attr(item, "output_tokens"),
        date_utc,
        id,
    })
}

fn string_attr(item: &HashMap<String, AttributeValue>, name: &str) -> Result<String> {
    item.get(name)
        .and_then(|v| v.as_s().ok())
        .cloned()
        .ok_or_else(|| Error::Internal(format!("Usage record is missing attribute {}", name)))
}

fn number_attr(item: &HashMap<String, AttributeValue>, name: &str) -> i32 {
    item.get(name)
        .and_then(|v| v.as_n().ok())
        .and_then(|n| n.parse().ok())
        .unwrap_or(0)
}
