//! ClickHouse sink over the HTTP interface.
//!
//! Rows are sent as `JSONEachRow`; timestamps are RFC 3339 with nanoseconds
//! and parsed with `date_time_input_format=best_effort`, so the column
//! timezone does not shift them.

use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use tracing::{info, warn};

use crate::config::ClickHouseConfig;
use crate::event::DnsQueryEvent;
use crate::sink::{Sink, encode_json_rows};

pub struct ClickHouseSink {
    client: Client,
    url: String,
    user: String,
    password: String,
    insert_query: String,
}

impl ClickHouseSink {
    /// Builds the client, checks connectivity and provisions the table.
    pub async fn connect(cfg: &ClickHouseConfig) -> Result<Self> {
        let password = match env::var(&cfg.password_env) {
            Ok(password) => password,
            Err(_) => {
                warn!(env = %cfg.password_env, "clickhouse password not set, using empty password");
                String::new()
            }
        };

        let client = Client::builder()
            .connect_timeout(Duration::from_millis(cfg.connect_timeout_ms))
            .timeout(Duration::from_millis(cfg.read_timeout_ms))
            .build()
            .context("build clickhouse http client")?;

        let sink = Self {
            client,
            url: cfg.url.trim_end_matches('/').to_string(),
            user: cfg.user.clone(),
            password,
            insert_query: format!(
                "INSERT INTO {}.{} FORMAT JSONEachRow",
                cfg.database, cfg.table
            ),
        };

        sink.execute("SELECT 1", String::new())
            .await
            .with_context(|| format!("reach clickhouse at {}", sink.url))?;

        if cfg.provision_schema {
            sink.execute("", create_database_ddl(cfg))
                .await
                .context("create clickhouse database")?;
            sink.execute("", create_table_ddl(cfg))
                .await
                .context("create clickhouse table")?;
        }

        info!(url = %sink.url, database = %cfg.database, table = %cfg.table, "clickhouse sink ready");
        Ok(sink)
    }

    /// Runs one statement. `query` travels as a URL parameter and `body` as
    /// the request body; ClickHouse concatenates the two.
    async fn execute(&self, query: &str, body: String) -> Result<()> {
        let mut request = self
            .client
            .post(&self.url)
            .header("X-ClickHouse-User", &self.user)
            .header("X-ClickHouse-Key", &self.password)
            .query(&[("date_time_input_format", "best_effort")]);
        if !query.is_empty() {
            request = request.query(&[("query", query)]);
        }

        let response = request.body(body).send().await.context("send request")?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            anyhow::bail!("clickhouse returned {}: {}", status, detail.trim());
        }
        Ok(())
    }
}

#[async_trait]
impl Sink for ClickHouseSink {
    fn name(&self) -> &'static str {
        "clickhouse"
    }

    async fn insert(&self, batch: &[DnsQueryEvent]) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let body = encode_json_rows(batch)?;
        self.execute(&self.insert_query, body)
            .await
            .with_context(|| format!("insert {} rows", batch.len()))
    }
}

fn create_database_ddl(cfg: &ClickHouseConfig) -> String {
    format!("CREATE DATABASE IF NOT EXISTS {}", cfg.database)
}

/// Day partitions, ordered by (timestamp, domain), rows expire after the retention window.
fn create_table_ddl(cfg: &ClickHouseConfig) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {db}.{table} (\
         timestamp DateTime64(9, '{tz}'), \
         raw_domain String, \
         domain String, \
         query_type String, \
         src_ip IPv4\
         ) ENGINE = {engine} \
         PARTITION BY toYYYYMMDD(timestamp) \
         ORDER BY (timestamp, domain) \
         TTL toDateTime(timestamp) + toIntervalHour({ttl}) \
         SETTINGS index_granularity = 8192",
        db = cfg.database,
        table = cfg.table,
        tz = cfg.timezone,
        engine = cfg.engine,
        ttl = cfg.retention_hours,
    )
}
