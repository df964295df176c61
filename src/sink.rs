use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::clickhouse::ClickHouseSink;
use crate::config::SinkConfig;
use crate::event::{DnsQueryEvent, EventRow};

/// Destination for flushed batches.
///
/// One call is one bulk write of the whole batch, in order. Implementations
/// own their connection handling; the caller never retries.
#[async_trait]
pub trait Sink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn insert(&self, batch: &[DnsQueryEvent]) -> Result<()>;
}

/// Opens the configured sink. Failing to reach it is a startup error.
pub async fn open_sink(cfg: &SinkConfig) -> Result<Arc<dyn Sink>> {
    let sink: Arc<dyn Sink> = match cfg {
        SinkConfig::ClickHouse(ch) => Arc::new(ClickHouseSink::connect(ch).await?),
        SinkConfig::Stdout => Arc::new(StdoutSink),
    };
    Ok(sink)
}

/// Serializes a batch as newline-delimited JSON rows.
pub fn encode_json_rows(batch: &[DnsQueryEvent]) -> Result<String> {
    let mut body = String::with_capacity(batch.len() * 128);
    for event in batch {
        let line = serde_json::to_string(&EventRow::from(event)).context("encode event row")?;
        body.push_str(&line);
        body.push('\n');
    }
    Ok(body)
}

/// Writes each row as a JSON line on stdout.
pub struct StdoutSink;

#[async_trait]
impl Sink for StdoutSink {
    fn name(&self) -> &'static str {
        "stdout"
    }

    async fn insert(&self, batch: &[DnsQueryEvent]) -> Result<()> {
        let body = encode_json_rows(batch)?;
        let mut out = std::io::stdout().lock();
        out.write_all(body.as_bytes()).context("write rows to stdout")?;
        out.flush().context("flush stdout")?;
        Ok(())
    }
}
