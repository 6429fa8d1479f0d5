//! Capture worker binary.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use chrono::Utc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use glimpse_worker::{
    metrics, CaptionCooldown, CaptureCycleExecutor, Captioner, CycleDeps, DisabledCaptioner,
    FfmpegCapture, FfmpegVideoTool, FileSourceStore, HttpCaptioner, NullClassifier,
    RetentionSweeper, Scheduler, SegmentAssembler, SourceStore, Summarizer, TeaserCompiler,
    VideoTool, WorkerConfig,
};

const HOUR: Duration = Duration::from_secs(3600);
const DAY: Duration = Duration::from_secs(86_400);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider (required for TLS/HTTPS)
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("failed to install rustls crypto provider"))?;

    dotenvy::dotenv().ok();

    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env().add_directive("glimpse=info".parse()?);

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    info!("Starting glimpse-worker");

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    if let Some(addr) = config.metrics_addr {
        metrics::init_metrics(addr)?;
        info!("Prometheus metrics on {}", addr);
    }

    if let Err(e) = glimpse_media::check_ffmpeg() {
        warn!("FFmpeg unavailable, captures and encodes will fail: {}", e);
    }

    for dir in [&config.frame_dir, &config.video_dir, &config.summary_dir] {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("creating {}", dir.display()))?;
    }

    let store = Arc::new(
        FileSourceStore::open(&config.sources_file)
            .await
            .with_context(|| format!("opening {}", config.sources_file.display()))?,
    );
    let shared_store: Arc<dyn SourceStore> = store.clone();

    let captioner: Arc<dyn Captioner> = match HttpCaptioner::from_config(&config) {
        Ok(c) => Arc::new(c),
        Err(e) => {
            warn!("Captioning disabled: {}", e);
            Arc::new(DisabledCaptioner)
        }
    };
    let cooldown = Arc::new(CaptionCooldown::new(config.caption_cooldown));
    let video_tool: Arc<dyn VideoTool> = Arc::new(FfmpegVideoTool::new(config.encode_timeout));

    let executor = Arc::new(CaptureCycleExecutor::new(
        &config,
        CycleDeps {
            store: shared_store.clone(),
            capture: Arc::new(FfmpegCapture::new()),
            captioner: captioner.clone(),
            classifier: Arc::new(NullClassifier),
            cooldown: cooldown.clone(),
        },
    ));
    let scheduler = Arc::new(Scheduler::new(executor, &config));

    let sources = shared_store.list().await?;
    scheduler.configure(sources.into_values());
    scheduler.spawn_full_crawl();

    let summarizer = Arc::new(Summarizer::new(
        shared_store.clone(),
        captioner,
        cooldown,
        &config.summary_dir,
        config.summary_prompt.clone(),
        config.caption_timeout,
    ));
    scheduler.spawn_aligned("summary", HOUR, true, move || {
        let summarizer = summarizer.clone();
        async move {
            if let Err(e) = summarizer.run(Utc::now()).await {
                error!("Summary failed: {}", e);
            }
        }
    });

    let assembler = Arc::new(SegmentAssembler::new(
        &config.frame_dir,
        &config.video_dir,
        config.segment.clone(),
        video_tool.clone(),
    ));
    let archive_store = shared_store.clone();
    scheduler.spawn_periodic(
        "archive",
        config.archive_interval,
        config.archive_interval,
        move || {
            let assembler = assembler.clone();
            let store = archive_store.clone();
            async move {
                match store.list().await {
                    Ok(sources) => {
                        assembler.assemble_all(sources.keys()).await;
                    }
                    Err(e) => error!("Archive cannot list sources: {}", e),
                }
            }
        },
    );

    let teaser = Arc::new(TeaserCompiler::new(&config.video_dir, video_tool));
    let teaser_store = shared_store.clone();
    scheduler.spawn_periodic(
        "teaser",
        config.teaser_interval,
        config.teaser_interval,
        move || {
            let teaser = teaser.clone();
            let store = teaser_store.clone();
            async move {
                match store.list().await {
                    Ok(sources) => {
                        teaser.compile(sources.values()).await;
                    }
                    Err(e) => error!("Teaser cannot list sources: {}", e),
                }
            }
        },
    );

    let sweeper = Arc::new(RetentionSweeper::new(
        &config.frame_dir,
        &config.video_dir,
        config.retention.clone(),
    ));
    let retention_store = shared_store.clone();
    scheduler.spawn_aligned("retention", DAY, true, move || {
        let sweeper = sweeper.clone();
        let store = retention_store.clone();
        async move {
            match store.list().await {
                Ok(sources) => {
                    sweeper.sweep(sources.keys()).await;
                }
                Err(e) => error!("Retention cannot list sources: {}", e),
            }
        }
    });

    let reload_scheduler = scheduler.clone();
    scheduler.spawn_periodic(
        "reload",
        config.reload_interval,
        config.reload_interval,
        move || {
            let store = store.clone();
            let scheduler = reload_scheduler.clone();
            async move {
                match store.reload().await {
                    Ok(changes) if changes.is_empty() => {}
                    Ok(changes) => {
                        info!(
                            "Sources changed: {} updated, {} removed",
                            changes.changed.len(),
                            changes.removed.len()
                        );
                        if let Err(e) = scheduler.apply_changes(&changes).await {
                            error!("Rescheduling failed: {}", e);
                        }
                    }
                    Err(e) => warn!("Reloading sources failed: {}", e),
                }
            }
        },
    );

    info!("Worker running with {} source jobs", scheduler.job_count());

    tokio::signal::ctrl_c().await.ok();
    info!("Received shutdown signal");

    scheduler.shutdown();
    info!("Worker shutdown complete");
    Ok(())
}
