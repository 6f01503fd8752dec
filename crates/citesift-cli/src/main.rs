use std::path::{Path, PathBuf};
use std::time::Duration;

use citesift_core::config_file;
use citesift_core::export;
use citesift_core::service::mock::{MockResultSet, MockService};
use citesift_core::service::SoapService;
use citesift_core::{Collection, Config, HarvestEvent, Harvester, SearchService, ServiceMode};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

mod output;

use output::ColorMode;

/// Batch bibliographic search - run queries or citation lists against a
/// citation index and sift the candidates
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run literal search expressions, one per line
    Search {
        /// File of queries, e.g. `TS=(perennial NEAR/1 rice)`
        queries_file: PathBuf,

        #[command(flatten)]
        lookups: Lookups,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Look up each row of a citation TSV and reconcile the candidates
    Citations {
        /// Tab-separated citation file (columns per the config's [columns])
        citations_file: PathBuf,

        #[command(flatten)]
        lookups: Lookups,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Fetch cited references for the records of a saved JSON collection
    References {
        /// JSON collection written by an earlier `search` or `citations` run
        collection: PathBuf,

        /// Resolve hot references to full records by title search
        #[arg(long)]
        full_records: bool,

        #[command(flatten)]
        run: RunArgs,
    },
}

/// Follow-up lookups over the search results.
#[derive(Args, Debug)]
struct Lookups {
    /// Also fetch the articles citing each result
    #[arg(long)]
    citing: bool,

    /// Also fetch the references cited by each result
    #[arg(long)]
    references: bool,

    /// With --references, resolve hot references to full records
    #[arg(long)]
    full_records: bool,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Search mode: full or lite
    #[arg(long)]
    mode: Option<String>,

    /// Directory for the result files
    #[arg(short, long, default_value = ".")]
    output_dir: PathBuf,

    /// Config file, layered over the platform and working-directory configs
    #[arg(long)]
    config: Option<PathBuf>,

    /// Service username
    #[arg(long)]
    username: Option<String>,

    /// Service password
    #[arg(long)]
    password: Option<String>,

    /// Write the run statistics to this JSON file
    #[arg(long)]
    stats: Option<PathBuf>,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    /// Dry run: answer every request from a local mock, no network
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Search {
            queries_file,
            lookups,
            run,
        } => {
            if !queries_file.exists() {
                anyhow::bail!("Queries file not found: {}", queries_file.display());
            }
            let queries = citesift_core::input::load_queries(&queries_file)?;
            if queries.is_empty() {
                anyhow::bail!("No queries in {}", queries_file.display());
            }
            let mut harvester = harvester(&run)?;
            harvester.search_queries(&queries).await?;
            follow_up(&mut harvester, &lookups).await?;
            finish(harvester, &run).await
        }
        Command::Citations {
            citations_file,
            lookups,
            run,
        } => {
            if !citations_file.exists() {
                anyhow::bail!("Citation file not found: {}", citations_file.display());
            }
            let mut harvester = harvester(&run)?;
            let records =
                citesift_core::input::load_citations(&citations_file, &harvester.config().columns)?;
            if records.is_empty() {
                anyhow::bail!("No citations in {}", citations_file.display());
            }
            harvester.search_citations(&records).await?;
            follow_up(&mut harvester, &lookups).await?;
            finish(harvester, &run).await
        }
        Command::References {
            collection,
            full_records,
            run,
        } => {
            if !collection.exists() {
                anyhow::bail!("Collection not found: {}", collection.display());
            }
            let mut harvester = harvester(&run)?;
            harvester
                .cited_references(full_records, Some(&collection))
                .await?;
            finish(harvester, &run).await
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Resolve configuration: CLI flags > env vars > config files > defaults.
fn resolve_config(run: &RunArgs) -> anyhow::Result<Config> {
    if let Some(path) = &run.config
        && !path.exists()
    {
        anyhow::bail!("Config file not found: {}", path.display());
    }
    let file = config_file::load_config(run.config.as_deref());
    let mut config = config_file::apply(&file, Config::default()).map_err(anyhow::Error::msg)?;

    if let Some(mode) = run.mode.clone().or_else(|| env_var("CITESIFT_MODE")) {
        config.mode = mode.parse::<ServiceMode>().map_err(anyhow::Error::msg)?;
    }
    if let Some(user) = run.username.clone().or_else(|| env_var("CITESIFT_USERNAME")) {
        config.username = Some(user);
    }
    if let Some(pass) = run.password.clone().or_else(|| env_var("CITESIFT_PASSWORD")) {
        config.password = Some(pass);
    }
    if let Some(ms) = env_var("CITESIFT_CALL_DELAY_MS").and_then(|v| v.parse().ok()) {
        config.call_delay = Duration::from_millis(ms);
    }
    if let Some(limit) = env_var("CITESIFT_SESSION_CALL_LIMIT").and_then(|v| v.parse().ok()) {
        config.session_call_limit = limit;
    }
    Ok(config)
}

fn harvester(run: &RunArgs) -> anyhow::Result<Harvester> {
    let mut config = resolve_config(run)?;
    tracing::debug!(?config, "resolved configuration");

    let service: Box<dyn SearchService> = if run.dry_run {
        config.call_delay = Duration::ZERO;
        Box::new(MockService::new().with_default_search(MockResultSet::synthetic(3)))
    } else {
        if config.username.is_none() || config.password.is_none() {
            anyhow::bail!(
                "No credentials. Set CITESIFT_USERNAME and CITESIFT_PASSWORD, pass --username/--password, or add them to [service] in the config file"
            );
        }
        Box::new(SoapService::new(&config))
    };

    std::fs::create_dir_all(&run.output_dir)?;

    let color = ColorMode(!run.no_color);
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg} [{bar:40.cyan/dim}] {pos}/{len} (eta {eta})")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );

    let progress = move |event: HarvestEvent| {
        if let Some(line) = output::progress_line(&event, color) {
            bar.println(line);
        }
        match event {
            HarvestEvent::PhaseStarted { collection, total } => {
                bar.reset();
                bar.set_length(total as u64);
                bar.set_message(collection.name());
                bar.enable_steady_tick(Duration::from_millis(120));
            }
            HarvestEvent::Searching { query, .. } => {
                let short: String = query.chars().take(40).collect();
                bar.set_message(short);
            }
            HarvestEvent::Completed { .. } | HarvestEvent::Failed { .. } => bar.inc(1),
            HarvestEvent::PhaseFinished { collection, stored } => {
                bar.finish_with_message(format!("{}: {} stored", collection, stored));
            }
            HarvestEvent::Reconciled { .. } | HarvestEvent::HotRecord { .. } => {}
        }
    };

    Ok(Harvester::new(config, service).with_progress(progress))
}

async fn follow_up(harvester: &mut Harvester, lookups: &Lookups) -> anyhow::Result<()> {
    if lookups.citing {
        harvester.citing_articles().await?;
    }
    if lookups.references {
        harvester.cited_references(lookups.full_records, None).await?;
    } else if lookups.full_records {
        tracing::warn!("--full-records has no effect without --references");
    }
    Ok(())
}

/// Close the session, write every non-empty collection and print the summary.
async fn finish(mut harvester: Harvester, run: &RunArgs) -> anyhow::Result<()> {
    harvester.finish().await;
    let stats = harvester.stats();
    let collections = harvester.into_collections();

    let mut written = Vec::new();
    let mut counts = Vec::new();
    for collection in Collection::ALL {
        let records = collections.get(collection);
        counts.push((collection, records.len()));
        let path = export::default_output_path(&run.output_dir, collection);
        if export::write_tsv(records, &path)? {
            written.push(path);
        }
    }

    // Saved so a later `references` run can resume from it.
    let results = collections.get(Collection::SearchResults);
    if !results.is_empty() {
        let path = export::default_output_path(&run.output_dir, Collection::SearchResults)
            .with_extension("json");
        export::write_json(results, &path)?;
        written.push(path);
    }

    if let Some(path) = &run.stats {
        write_stats(&stats, path)?;
        written.push(path.clone());
    }

    let color = ColorMode(!run.no_color);
    output::print_summary(&mut std::io::stdout(), &stats, &counts, &written, color)?;
    Ok(())
}

fn write_stats(stats: &citesift_core::RunStats, path: &Path) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(stats)?;
    std::fs::write(path, json)?;
    Ok(())
}
