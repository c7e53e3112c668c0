use anyhow::{Context, Result};
use chrono::{NaiveDateTime, Utc};
use clap::{Parser, Subcommand};
use socrata_loader::{
    config::PipelineConfig,
    dag::{self, TaskRetry},
    export::GcsStore,
    fetch::socrata::SocrataClient,
    history::LoadHistory,
    load::{BigQueryLoader, TableTarget},
    pipeline::Pipeline,
};
use std::{path::PathBuf, time::Duration};
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(author, version, about = "Socrata → GCS → BigQuery monthly loader")]
struct Args {
    /// YAML pipeline config; built-in defaults when omitted.
    #[arg(short, long, env = "PIPELINE_CONFIG")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the graph once.
    Run {
        /// Logical date, e.g. 2024-03-02T06:00:00; defaults to now.
        #[arg(long)]
        logical_date: Option<NaiveDateTime>,
    },
    /// Run every interval due since the start date (only the latest without catchup).
    Backfill,
    /// Print the schedule and what is due.
    Schedule {
        #[arg(long, default_value_t = 3)]
        next: usize,
    },
    /// Stay up and run at every fire time.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_span_events(fmt::format::FmtSpan::CLOSE)
        .init();

    let args = Args::parse();
    let cfg = PipelineConfig::load(args.config.as_deref())?;
    info!(dag = %cfg.dag_id, bucket = %cfg.destination.bucket, "startup");

    if let Command::Schedule { next } = args.command {
        print_schedule(&cfg, next);
        return Ok(());
    }

    let source = SocrataClient::new(
        &cfg.source.connection,
        &cfg.source.method,
        &cfg.source.extra_headers,
    )?;
    let endpoint = source.resolve_endpoint(&cfg.source.endpoint)?;
    let store = GcsStore::from_env().await?;
    let loader = BigQueryLoader::from_env(cfg.warehouse.project_id.clone()).await?;
    let history = LoadHistory::open_loads(&cfg.state_dir)?;
    let target = TableTarget {
        project_id: cfg
            .warehouse
            .project_id
            .clone()
            .unwrap_or_else(|| loader.project_id().to_string()),
        dataset: cfg.warehouse.dataset.clone(),
        table: cfg.warehouse.table.clone(),
    };
    info!("{} previous loads in history", history.len());

    let pipeline = Pipeline {
        config: &cfg,
        endpoint,
        target,
        source: &source,
        store: &store,
        loader: &loader,
        history: &history,
    };
    let retry = TaskRetry {
        retries: cfg.schedule.retries,
        delay: Duration::from_secs(cfg.schedule.retry_delay_secs),
        alert_email: cfg.alert_email.clone(),
    };

    match args.command {
        Command::Run { logical_date } => {
            let logical_date = logical_date.unwrap_or_else(|| Utc::now().naive_utc());
            let report = dag::run_dag(&pipeline, logical_date, &retry).await?;
            info!(
                rows = report.export.rows,
                uri = %report.export.gcs_uri(),
                load = ?report.load,
                "run complete"
            );
        }
        Command::Backfill => {
            let due = due_logical_dates(&cfg, Utc::now().naive_utc());
            if due.is_empty() {
                info!("nothing due; exit");
                return Ok(());
            }
            let reports = dag::backfill(&pipeline, &due, &retry).await?;
            info!("{} runs complete", reports.len());
        }
        Command::Serve => serve(&pipeline, &retry).await?,
        Command::Schedule { .. } => {}
    }
    Ok(())
}

fn due_logical_dates(cfg: &PipelineConfig, now: NaiveDateTime) -> Vec<NaiveDateTime> {
    let start = cfg.schedule.start_date.and_time(chrono::NaiveTime::MIN);
    let mut due = cfg.schedule.monthly.due_runs(start, now);
    if !cfg.schedule.catchup && due.len() > 1 {
        due = due.split_off(due.len() - 1);
    }
    due
}

fn print_schedule(cfg: &PipelineConfig, next: usize) {
    let now = Utc::now().naive_utc();
    let schedule = &cfg.schedule.monthly;
    println!("dag:      {}", cfg.dag_id);
    println!("cron:     {}", schedule.cron());
    println!("start:    {}", cfg.schedule.start_date);
    println!("catchup:  {}", cfg.schedule.catchup);

    let mut t = now;
    for _ in 0..next {
        match schedule.next_after(t) {
            Some(fire) => {
                println!("next:     {fire}");
                t = fire;
            }
            None => break,
        }
    }
    let due = due_logical_dates(cfg, now);
    println!("due runs: {}", due.len());
    for d in due {
        println!("  {d}");
    }
}

async fn serve(pipeline: &Pipeline<'_>, retry: &TaskRetry) -> Result<()> {
    let schedule = pipeline.config.schedule.monthly;
    loop {
        let now = Utc::now().naive_utc();
        let fire = schedule
            .next_after(now)
            .context("schedule never fires")?;
        let wait = (fire - now).to_std().unwrap_or(Duration::ZERO);
        info!(%fire, "sleeping until next fire time");
        tokio::time::sleep(wait).await;

        // the interval that just closed is the one being loaded
        let logical_date = due_logical_dates(pipeline.config, fire)
            .pop()
            .unwrap_or(fire);
        if let Err(e) = dag::run_dag(pipeline, logical_date, retry).await {
            error!(%logical_date, "run failed: {e:#}");
        }
    }
}
