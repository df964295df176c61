use std::future::Future;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::runtime::Runtime;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::batch::{BatchAccumulator, BatchReport, FlushPolicy};
use crate::capture::{CaptureReport, CaptureSource, FrameSource, PcapSource};
use crate::config::LoggerConfig;
use crate::event::DnsQueryEvent;
use crate::normalizer::DomainNormalizer;
use crate::sink::{Sink, open_sink};
use crate::suffix::{PublicSuffixList, SuffixList};

/// How long runtime shutdown waits for capture threads after an interrupt.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Everything the pipeline components share, built once at startup.
pub struct PipelineContext {
    pub config: LoggerConfig,
    pub normalizer: Arc<DomainNormalizer>,
    /// Raised on interrupt; capture loops end at their next check.
    pub stop: Arc<AtomicBool>,
}

impl PipelineContext {
    pub fn new(config: LoggerConfig, suffixes: Arc<dyn SuffixList>) -> Result<Self> {
        let normalizer = Arc::new(DomainNormalizer::new(suffixes, config.cache_capacity()?));
        Ok(Self {
            config,
            normalizer,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Loads the configured suffix list (or the bundled one) and builds the context.
    pub fn from_config(config: LoggerConfig) -> Result<Self> {
        let suffixes = match config.public_suffix_list.as_deref() {
            Some(path) => PublicSuffixList::from_file(path)?,
            None => PublicSuffixList::bundled()?,
        };
        Self::new(config, Arc::new(suffixes))
    }

    pub fn flush_policy(&self) -> FlushPolicy {
        FlushPolicy {
            count_threshold: self.config.batch.count_threshold,
            time_threshold: self.config.batch.time_threshold(),
        }
    }
}

/// Running pipeline: the accumulator task plus one blocking task per source.
pub struct Pipeline {
    accumulator: JoinHandle<BatchReport>,
    sources: Vec<(String, JoinHandle<CaptureReport>)>,
}

impl Pipeline {
    /// Spawns the accumulator and the capture loops. Must be called inside a
    /// tokio runtime.
    pub fn spawn(
        ctx: &PipelineContext,
        sink: Arc<dyn Sink>,
        sources: Vec<(String, Box<dyn FrameSource>)>,
    ) -> Self {
        let (tx, rx) = mpsc::channel::<DnsQueryEvent>(ctx.config.batch.channel_capacity);

        let accumulator =
            tokio::spawn(BatchAccumulator::new(ctx.flush_policy(), sink).run(rx));

        let sources = sources
            .into_iter()
            .map(|(name, frames)| {
                let source = CaptureSource::new(
                    name.clone(),
                    frames,
                    Arc::clone(&ctx.normalizer),
                    Arc::clone(&ctx.stop),
                );
                let tx = tx.clone();
                let handle = tokio::task::spawn_blocking(move || source.run(tx));
                (name, handle)
            })
            .collect();
        // only the sources hold senders now; the channel closes when they all stop

        Self {
            accumulator,
            sources,
        }
    }

    /// Waits for every capture task, then for the accumulator to see the
    /// channel close. Live devices never finish, so this normally only
    /// returns for offline sources.
    pub async fn wait(self) -> Result<BatchReport> {
        for (name, handle) in self.sources {
            match handle.await {
                Ok(report) => info!(
                    source = %name,
                    frames = report.frames,
                    events = report.events,
                    skipped = report.skipped,
                    "capture source finished"
                ),
                Err(err) => error!(source = %name, error = %err, "capture task panicked"),
            }
        }
        self.accumulator.await.context("batch accumulator task")
    }
}

/// Process entry point after config loading: open everything, run until the
/// sources finish or an interrupt arrives.
pub async fn run(config: LoggerConfig) -> Result<()> {
    let ctx = PipelineContext::from_config(config)?;

    let sink = open_sink(&ctx.config.sink).await.context("open sink")?;

    let mut sources: Vec<(String, Box<dyn FrameSource>)> = Vec::with_capacity(ctx.config.sources.len());
    for name in &ctx.config.sources {
        let source = PcapSource::open(name, &ctx.config.capture, Arc::clone(&ctx.stop))
            .with_context(|| format!("start capture source {name}"))?;
        sources.push((name.clone(), Box::new(source)));
    }

    info!(
        sources = ?ctx.config.sources,
        sink = sink.name(),
        count_threshold = ctx.config.batch.count_threshold,
        time_threshold_ms = ctx.config.batch.time_threshold_ms,
        cache_capacity = ctx.config.cache.capacity,
        "dns traffic logger started"
    );

    let pipeline = Pipeline::spawn(&ctx, sink, sources);
    run_until(&ctx, pipeline, tokio::signal::ctrl_c()).await?;

    let stats = ctx.normalizer.cache_stats();
    info!(
        entries = stats.entries,
        hits = stats.hits,
        misses = stats.misses,
        insertions = stats.insertions,
        evictions = stats.evictions,
        "normalization cache"
    );
    Ok(())
}

/// Waits out the startup grace period, then for the sources to finish or for
/// `interrupt` to resolve. An interrupt raises the stop flag and returns
/// without draining the pending batch.
pub async fn run_until<F>(ctx: &PipelineContext, pipeline: Pipeline, interrupt: F) -> Result<()>
where
    F: Future<Output = io::Result<()>>,
{
    tokio::time::sleep(ctx.config.shutdown_grace()).await;

    tokio::select! {
        report = pipeline.wait() => {
            let report = report?;
            info!(
                flushes = report.flushes,
                persisted = report.persisted,
                dropped = report.dropped,
                abandoned = report.abandoned,
                "all capture sources finished"
            );
        }
        signal = interrupt => {
            signal.context("listen for interrupt")?;
            ctx.stop.store(true, Ordering::Relaxed);
            warn!("interrupt received, exiting without draining the pending batch");
        }
    }
    Ok(())
}

/// Drops the runtime without waiting indefinitely on capture threads still
/// blocked in a read.
pub fn shutdown_runtime(runtime: Runtime) {
    runtime.shutdown_timeout(SHUTDOWN_TIMEOUT);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::tests::{MockFrames, QuietFrames};
    use crate::decode::tests::udp_query_frame;
    use crate::sink::tests::RecordingSink;
    use hickory_proto::rr::RecordType;
    use serde_json::json;
    use std::time::Instant;

    fn context(batch: serde_json::Value) -> PipelineContext {
        let config: LoggerConfig =
            serde_json::from_value(json!({ "batch": batch, "cache": { "capacity": 5 } }))
                .expect("parse config");
        PipelineContext::from_config(config).expect("context")
    }

    fn frames(names: &[&str]) -> Box<dyn FrameSource> {
        Box::new(MockFrames::new(
            names
                .iter()
                .map(|n| udp_query_frame(n, RecordType::A))
                .collect(),
        ))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn sources_feed_one_accumulator() {
        let ctx = context(json!({ "count_threshold": 2, "time_threshold_ms": 3_600_000 }));
        let sink = Arc::new(RecordingSink::default());

        let pipeline = Pipeline::spawn(
            &ctx,
            sink.clone(),
            vec![
                (
                    "eth1".to_string(),
                    frames(&["google.com.", "apple.com.", "subdomain.testingcom.au."]),
                ),
                (
                    "eth2".to_string(),
                    frames(&["youtube.com.", "fAcebOok.com.", "subdomain.testingcom.au."]),
                ),
            ],
        );
        let report = pipeline.wait().await.expect("pipeline");

        assert_eq!(report.flushes, 3);
        assert_eq!(report.persisted, 6);
        assert_eq!(report.abandoned, 0);

        let mut normalized: Vec<String> = sink
            .batches()
            .into_iter()
            .flatten()
            .map(|e| e.normalized_domain)
            .collect();
        normalized.sort();
        assert_eq!(
            normalized,
            vec![
                "apple.com",
                "facebook.com",
                "google.com",
                "testingcom.au",
                "testingcom.au",
                "youtube.com"
            ]
        );
        // both sources share one cache
        assert_eq!(ctx.normalizer.cache_stats().entries, 5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn per_source_order_is_preserved() {
        let ctx = context(json!({ "count_threshold": 1 }));
        let sink = Arc::new(RecordingSink::default());
        let names: Vec<String> = (0..50).map(|i| format!("h{i}.example.com.")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();

        let pipeline = Pipeline::spawn(&ctx, sink.clone(), vec![("eth1".to_string(), frames(&refs))]);
        pipeline.wait().await.expect("pipeline");

        let seen: Vec<Vec<String>> = sink.batch_domains();
        assert_eq!(seen.len(), 50);
        for (i, batch) in seen.iter().enumerate() {
            assert_eq!(batch, &vec![format!("h{i}.example.com")]);
        }
    }

    #[test]
    fn interrupt_returns_even_when_a_source_never_yields() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .expect("runtime");
        let ctx = context(json!({ "count_threshold": 1 }));
        let (_keep_blocked, quiet) = QuietFrames::new();

        let started = Instant::now();
        runtime
            .block_on(async {
                let sink = Arc::new(RecordingSink::default());
                let pipeline =
                    Pipeline::spawn(&ctx, sink, vec![("eth1".to_string(), Box::new(quiet) as _)]);
                let interrupt = async {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(())
                };
                run_until(&ctx, pipeline, interrupt).await
            })
            .expect("run");
        assert!(ctx.stop.load(Ordering::Relaxed));

        shutdown_runtime(runtime);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn zero_cache_capacity_is_rejected() {
        let config: LoggerConfig =
            serde_json::from_value(json!({ "cache": { "capacity": 0 } })).expect("parse config");
        assert!(PipelineContext::from_config(config).is_err());
    }

    #[test]
    fn missing_suffix_list_file_is_fatal() {
        let config: LoggerConfig =
            serde_json::from_value(json!({ "public_suffix_list": "/nonexistent/psl.dat" }))
                .expect("parse config");
        assert!(PipelineContext::from_config(config).is_err());
    }
}
