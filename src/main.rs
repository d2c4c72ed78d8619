use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use mail_triage::config::PipelineConfig;
use mail_triage::llm::{RetryPolicy, create_client};
use mail_triage::ops::ops_routes;
use mail_triage::pipeline::{
    ActionExecutor, ProcessingPolicy, ProcessingStage, ScreeningStage,
};
use mail_triage::safety::Sanitizer;
use mail_triage::services::{
    AccessTokenSource, GoogleCalendarClient, GraphMailClient, StaticTokenSource,
};
use mail_triage::store::{Database, LibSqlBackend};
use mail_triage::tools::{CalendarEventTool, ToolRegistry};
use mail_triage::worker::{
    JobDispatcher, JobQueue, PoolConfig, WorkerPool, recover_pending, spawn_stuck_sweep,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = PipelineConfig::from_env();

    // Logging: stderr always, plus a daily file when a log dir is configured
    let (file_layer, _log_guard) = match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating log dir {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "mail-triage.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .with(file_layer)
        .init();

    config.validate()?;

    eprintln!("📬 Mail Triage v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {} @ {}", config.llm.model, config.llm.url);
    eprintln!("   Database: {}", config.db_path.display());
    eprintln!("   Ops API: http://0.0.0.0:{}/health\n", config.http_port);

    // ── Database ─────────────────────────────────────────────────────────
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .with_context(|| format!("opening database at {}", config.db_path.display()))?,
    );

    // ── LLM + providers ──────────────────────────────────────────────────
    let llm = create_client(&config.llm)?;

    let graph_tokens: Arc<dyn AccessTokenSource> = Arc::new(StaticTokenSource::new(
        config.providers.graph_access_token.clone(),
    ));
    let calendar_tokens: Arc<dyn AccessTokenSource> = Arc::new(StaticTokenSource::new(
        config.providers.calendar_access_token.clone(),
    ));
    let mail = Arc::new(GraphMailClient::new(
        config.providers.graph_api_url.clone(),
        graph_tokens,
    ));
    let calendar = Arc::new(GoogleCalendarClient::new(
        config.providers.calendar_api_url.clone(),
        calendar_tokens,
    ));

    // ── Tools ────────────────────────────────────────────────────────────
    let tools = Arc::new(ToolRegistry::new());
    tools
        .register(Arc::new(CalendarEventTool::new(calendar)))
        .await;
    tracing::info!(tools = ?tools.list().await, "Tool registry ready");

    // ── Stages + workers ─────────────────────────────────────────────────
    let (queue, jobs) = JobQueue::new();
    let dispatcher: Arc<dyn JobDispatcher> = Arc::new(queue);

    let screening = Arc::new(ScreeningStage::new(
        Arc::clone(&db),
        Arc::clone(&llm),
        Arc::clone(&dispatcher),
        config.screening.clone(),
    ));
    let processing = Arc::new(
        ProcessingStage::new(
            Arc::clone(&db),
            llm,
            tools,
            ActionExecutor::new(mail, Arc::clone(&db)),
            Sanitizer::new(&config.sanitizer),
            config.processing.clone(),
        )
        .with_policy(ProcessingPolicy {
            fail_when_all_actions_fail: config.fail_when_all_actions_fail,
        }),
    );

    let pool = Arc::new(WorkerPool::new(
        screening,
        processing,
        Arc::clone(&db),
        PoolConfig {
            concurrency: config.worker_concurrency,
            screening_timeout: config.screening.job_timeout,
            processing_timeout: config.processing.job_timeout,
            retry: RetryPolicy::with_max_attempts(config.job_max_attempts),
        },
    ));
    let _pool_handle = tokio::spawn(Arc::clone(&pool).run(jobs));

    // ── Startup recovery + stuck sweep ───────────────────────────────────
    match recover_pending(db.as_ref(), dispatcher.as_ref()).await {
        Ok(n) if n > 0 => eprintln!("   Recovered {} pending message(s)", n),
        Ok(_) => {}
        Err(e) => tracing::error!(error = %e, "Startup recovery failed"),
    }
    let sweep_interval = (config.stuck_threshold / 3).max(Duration::from_secs(30));
    let _sweep_handle = spawn_stuck_sweep(Arc::clone(&db), config.stuck_threshold, sweep_interval);

    // ── Ops server ───────────────────────────────────────────────────────
    let app = ops_routes(Arc::clone(&db), dispatcher);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.http_port))
        .await
        .with_context(|| format!("binding ops port {}", config.http_port))?;
    tracing::info!(port = config.http_port, "Ops server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown requested");
        })
        .await?;

    Ok(())
}
