use anyhow::Context;
use clap::{Parser, Subcommand};
use jdisclose_core::config::Settings;
use jdisclose_core::disclosure::navigator::NavigatorOptions;
use jdisclose_core::disclosure::store::ContentStore;
use jdisclose_core::disclosure::{BatchOptions, BatchResult, BatchRunner, BatchTarget, WebDriverPortal};
use jdisclose_core::index::{load_index_master, EventType, IndexFeatureTable};
use jdisclose_core::tabular::{self, Location};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "jdisclose_worker")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Scrape the latest annual report of each company from EDINET.
    Filings {
        /// Comma-separated EDINET codes.
        #[arg(long, value_delimiter = ',', conflicts_with = "universe")]
        codes: Vec<String>,

        /// Universe CSV produced by the `universe` command.
        #[arg(long)]
        universe: Option<PathBuf>,

        /// Overrides OUTPUT_DIR.
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Only scrape the first N targets.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Derive float-weight features from a JPX index-master set.
    IndexMaster {
        /// Directory of CSV files or a ZIP archive.
        #[arg(long)]
        input: PathBuf,

        #[arg(long)]
        out: PathBuf,

        /// Optional ranked TOPIX FFW change events.
        #[arg(long)]
        events_out: Option<PathBuf>,
    },

    /// Join the TOPIX weight sheet with the EDINET code list.
    Universe {
        /// URL or path of the EDINET code list CSV.
        #[arg(long)]
        edinet_list: String,

        /// URL or path of the TOPIX weight workbook.
        #[arg(long)]
        topix_weights: String,

        #[arg(long)]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();

    let result = match args.command {
        Command::Filings {
            codes,
            universe,
            output_dir,
            limit,
        } => run_filings(&settings, codes, universe, output_dir, limit).await,
        Command::IndexMaster {
            input,
            out,
            events_out,
        } => run_index_master(input, out, events_out).await,
        Command::Universe {
            edinet_list,
            topix_weights,
            out,
        } => run_universe(&settings, &edinet_list, &topix_weights, &out).await,
    };

    if let Err(err) = &result {
        sentry_anyhow::capture_anyhow(err);
        tracing::error!(error = %format!("{err:#}"), "worker run failed");
    }
    result
}

async fn run_filings(
    settings: &Settings,
    codes: Vec<String>,
    universe: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    limit: Option<usize>,
) -> anyhow::Result<()> {
    let mut targets = match universe {
        Some(path) => jdisclose_core::universe::read_universe_targets(&path)?,
        None => codes
            .iter()
            .map(|c| c.trim())
            .filter(|c| !c.is_empty())
            .map(BatchTarget::new)
            .collect(),
    };
    anyhow::ensure!(!targets.is_empty(), "no targets: pass --codes or --universe");
    if let Some(n) = limit {
        targets.truncate(n);
    }

    let output_dir = output_dir.unwrap_or_else(|| settings.output_dir.clone());
    let runner = BatchRunner::new(
        NavigatorOptions::from_settings(settings),
        BatchOptions {
            progress_every: settings.progress_every,
            ..BatchOptions::default()
        },
        ContentStore::new(&output_dir),
    );

    tracing::info!(
        targets = targets.len(),
        output_dir = %output_dir.display(),
        webdriver = %settings.webdriver_url,
        "filings run starting"
    );

    let driver = WebDriverPortal::connect(settings).await?;
    let mut rows: Vec<BatchResult> = Vec::with_capacity(targets.len());
    let outcome = runner.run(driver, &targets, &mut rows).await;

    // Whatever was collected is written, also when the session died midway.
    let stamp = chrono::Local::now().format("%Y%m%d");
    let metadata_path = output_dir.join(format!("metadata_{stamp}.csv"));
    tabular::write_csv(&metadata_path, &rows)?;
    tracing::info!(path = %metadata_path.display(), rows = rows.len(), "metadata written");

    let summary = outcome.context("filings run aborted")?;
    let summary_path = output_dir.join(format!("summary_{}.json", summary.run_id));
    summary.write_json(&summary_path)?;
    tracing::info!(path = %summary_path.display(), "summary written");
    Ok(())
}

async fn run_index_master(
    input: PathBuf,
    out: PathBuf,
    events_out: Option<PathBuf>,
) -> anyhow::Result<()> {
    let table = tokio::task::spawn_blocking(move || -> anyhow::Result<IndexFeatureTable> {
        let records = load_index_master(&input)?;
        Ok(IndexFeatureTable::derive(records))
    })
    .await
    .context("index master task failed")??;

    tabular::write_csv(&out, table.rows())?;
    tracing::info!(path = %out.display(), rows = table.len(), "index features written");

    if let Some(path) = events_out {
        let events = table.events_of_type(EventType::TopixFfwChange);
        tabular::write_csv(&path, &events)?;
        tracing::info!(
            path = %path.display(),
            events = events.len(),
            event_type = %EventType::TopixFfwChange,
            "events written"
        );
    }
    Ok(())
}

async fn run_universe(
    settings: &Settings,
    edinet_list: &str,
    topix_weights: &str,
    out: &Path,
) -> anyhow::Result<()> {
    let http = settings.http_client()?;
    let rows = jdisclose_core::universe::build_universe(
        &http,
        &Location::parse(edinet_list),
        &Location::parse(topix_weights),
    )
    .await?;
    tabular::write_csv(out, &rows)?;
    tracing::info!(path = %out.display(), rows = rows.len(), "universe written");
    Ok(())
}

fn init_sentry(settings: &Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
