use std::env;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};

use mailsift_extract::Extractor;
use mailsift_identity::{fit_logistic, FeatureExtractor, MatchModel, TrainingOptions};
use mailsift_index::{
    apply_mutations, job_status, load_parts, load_postings, load_store, run_index_job,
    ClusterStore, IndexJobOptions, JobPaths, JobRecord, JobStatus, MutationBatch, PostingsIndex,
};
use mailsift_search::{parse_role, render_all, Finder, RenderedEmail, SearchRule};

#[derive(Parser)]
#[command(name = "mailsift")]
#[command(about = "Identity resolution and search over mbox archives", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode: log only warnings/errors (stdout stays clean)
    #[arg(long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Index the .mbox archives in a job directory
    Index(IndexArgs),

    /// Show the job record for a job directory
    Status(StatusArgs),

    /// List cluster summaries, largest first
    Clusters(ClustersArgs),

    /// Show one cluster with its messages rendered as emails
    Cluster(ClusterArgs),

    /// List identifiers with cluster membership and gold flag
    Identifiers(IdentifiersArgs),

    /// Apply a mutation batch (creates, moves, relabels) to the cluster store
    Update(UpdateArgs),

    /// Boolean role search across clusters
    Search(SearchArgs),

    /// Fit the match classifier from labelled identity clusters
    Train(TrainArgs),

    /// Check the content extractor and job artifacts
    Health(HealthArgs),
}

#[derive(Args)]
struct IndexArgs {
    /// Job directory holding the .mbox uploads
    #[arg(default_value = ".")]
    job_dir: PathBuf,

    /// Classifier probability gate for accepting an edge
    #[arg(long)]
    threshold: Option<f64>,

    /// Trained classifier artifact (defaults to <job_dir>/model.json)
    #[arg(long)]
    model: Option<PathBuf>,

    /// Apache Tika base URL; builtin extraction when unset
    #[arg(long)]
    tika_url: Option<String>,

    /// Blocking bucket cap
    #[arg(long)]
    max_bucket: Option<usize>,

    /// Output JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct StatusArgs {
    /// Job directory
    #[arg(default_value = ".")]
    job_dir: PathBuf,

    /// Output JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct ClustersArgs {
    /// Job directory
    #[arg(default_value = ".")]
    job_dir: PathBuf,

    /// Show at most this many clusters
    #[arg(long, short = 'n')]
    limit: Option<usize>,

    /// Output JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct ClusterArgs {
    /// Cluster id as shown by `clusters`
    cluster_id: String,

    /// Job directory
    #[arg(long, default_value = ".")]
    job: PathBuf,

    /// Only messages where a member holds this role (from, to, body)
    #[arg(long)]
    role: Option<String>,

    /// Show at most this many messages
    #[arg(long, short = 'n')]
    limit: Option<usize>,

    /// Show posting counts per member instead of the member list
    #[arg(long)]
    counts: bool,

    /// Output JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct IdentifiersArgs {
    /// Job directory
    #[arg(default_value = ".")]
    job_dir: PathBuf,

    /// Output JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct UpdateArgs {
    /// Job directory
    #[arg(long, default_value = ".")]
    job: PathBuf,

    /// Inline JSON batch (mutually exclusive with --file)
    #[arg(long, conflicts_with = "file")]
    json: Option<String>,

    /// Path to a file containing the JSON batch; `-` or neither reads stdin
    #[arg(long)]
    file: Option<PathBuf>,

    /// Pretty-print the JSON outcome
    #[arg(long)]
    pretty: bool,
}

#[derive(Args)]
struct SearchArgs {
    /// Rules in compact form: CLUSTER_ID[:from=yes,to=no,body=any]
    #[arg(required_unless_present = "file")]
    rules: Vec<String>,

    /// JSON file holding an array of rule objects, combined with inline rules
    #[arg(long)]
    file: Option<PathBuf>,

    /// Job directory
    #[arg(long, default_value = ".")]
    job: PathBuf,

    /// Output JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct TrainArgs {
    /// JSON file with labelled clusters: an array of identifier arrays
    clusters: PathBuf,

    /// Where to write the classifier artifact
    #[arg(long, short = 'o', default_value = "model.json")]
    out: PathBuf,

    /// Deterministic shuffle seed
    #[arg(long)]
    seed: Option<u64>,

    /// Negative-sampling window size
    #[arg(long)]
    window: Option<usize>,

    /// Gradient-descent epochs
    #[arg(long)]
    epochs: Option<usize>,

    /// Gradient-descent learning rate
    #[arg(long)]
    learning_rate: Option<f64>,

    /// Output JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct HealthArgs {
    /// Job directory
    #[arg(default_value = ".")]
    job_dir: PathBuf,

    /// Apache Tika base URL; builtin extraction when unset
    #[arg(long)]
    tika_url: Option<String>,

    /// Output JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let json_output = match &cli.command {
        Commands::Index(args) => args.json,
        Commands::Status(args) => args.json,
        Commands::Clusters(args) => args.json,
        Commands::Cluster(args) => args.json,
        Commands::Identifiers(args) => args.json,
        Commands::Update(_) => true,
        Commands::Search(args) => args.json,
        Commands::Train(args) => args.json,
        Commands::Health(args) => args.json,
    };

    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if cli.quiet || json_output {
        builder.filter_level(log::LevelFilter::Warn);
    } else if cli.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.target(env_logger::Target::Stderr).init();

    match cli.command {
        Commands::Index(args) => run_index(args).await,
        Commands::Status(args) => run_status(args).await,
        Commands::Clusters(args) => run_clusters(args).await,
        Commands::Cluster(args) => run_cluster(args).await,
        Commands::Identifiers(args) => run_identifiers(args).await,
        Commands::Update(args) => run_update(args).await,
        Commands::Search(args) => run_search(args).await,
        Commands::Train(args) => run_train(args).await,
        Commands::Health(args) => run_health(args).await,
    }
}

async fn run_index(args: IndexArgs) -> Result<()> {
    let options = IndexJobOptions {
        threshold: args.threshold.or_else(env_threshold),
        model_path: args
            .model
            .or_else(|| env::var("MAILSIFT_MODEL").ok().map(PathBuf::from)),
        tika_url: args
            .tika_url
            .or_else(|| env::var("MAILSIFT_TIKA_URL").ok()),
        max_bucket: args.max_bucket,
    };
    let paths = JobPaths::new(&args.job_dir);
    let record = run_index_job(&paths, &options).await?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&record)?);
    } else {
        print_record(&record);
    }
    if record.status == JobStatus::Error {
        std::process::exit(1);
    }
    Ok(())
}

async fn run_status(args: StatusArgs) -> Result<()> {
    let paths = JobPaths::new(&args.job_dir);
    let Some(record) = job_status(&paths).await? else {
        bail!("no job has run under {}", args.job_dir.display());
    };
    if args.json {
        println!("{}", serde_json::to_string_pretty(&record)?);
    } else {
        print_record(&record);
    }
    Ok(())
}

async fn run_clusters(args: ClustersArgs) -> Result<()> {
    let paths = JobPaths::new(&args.job_dir);
    let store = load_job_store(&paths, &args.job_dir).await?;
    let mut summaries = store.summaries();
    if let Some(limit) = args.limit {
        summaries.truncate(limit);
    }
    if args.json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
    } else {
        for summary in &summaries {
            println!("{}  {:>5}  {}", summary.id, summary.size, summary.label);
        }
        println!("{} clusters", summaries.len());
    }
    Ok(())
}

#[derive(serde::Serialize)]
struct ClusterView<'a> {
    id: &'a str,
    label: &'a str,
    members: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    member_postings: Option<Vec<(String, usize)>>,
    emails: Vec<RenderedEmail>,
}

async fn run_cluster(args: ClusterArgs) -> Result<()> {
    let role = args.role.as_deref().map(parse_role).transpose()?;
    let paths = JobPaths::new(&args.job);
    let store = load_job_store(&paths, &args.job).await?;
    let Some(cluster) = store.get(&args.cluster_id) else {
        bail!("unknown cluster {}", args.cluster_id);
    };
    let parts = load_parts(&paths)
        .await?
        .with_context(|| format!("no parts artifact under {}", args.job.display()))?;

    let finder = Finder::new(&store, &parts);
    let emails = finder
        .cluster_emails(&args.cluster_id, role, args.limit)
        .unwrap_or_default();

    let member_postings = if args.counts {
        let postings = load_postings(&paths)
            .await?
            .unwrap_or_else(PostingsIndex::new);
        Some(store.member_posting_counts(&args.cluster_id, &postings))
    } else {
        None
    };

    if args.json {
        let view = ClusterView {
            id: &args.cluster_id,
            label: &cluster.label,
            members: &cluster.members,
            member_postings,
            emails,
        };
        println!("{}", serde_json::to_string_pretty(&view)?);
    } else {
        println!("{}  {}", args.cluster_id, cluster.label);
        match &member_postings {
            Some(counts) => {
                for (member, count) in counts {
                    println!("  member: {member} ({count} postings)");
                }
            }
            None => {
                for member in &cluster.members {
                    println!("  member: {member}");
                }
            }
        }
        for email in &emails {
            println!();
            print_email(email);
        }
    }
    Ok(())
}

async fn run_identifiers(args: IdentifiersArgs) -> Result<()> {
    let paths = JobPaths::new(&args.job_dir);
    let store = load_job_store(&paths, &args.job_dir).await?;
    let postings = load_postings(&paths)
        .await?
        .unwrap_or_else(PostingsIndex::new);
    let entries = store.identifier_entries(&postings);
    if args.json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else {
        for entry in &entries {
            let gold = if entry.gold { "*" } else { " " };
            println!(
                "{gold} {:<40} {}  {}",
                entry.identifier, entry.cluster_id, entry.cluster_label
            );
        }
        println!("{} identifiers", entries.len());
    }
    Ok(())
}

async fn run_update(args: UpdateArgs) -> Result<()> {
    let raw = read_batch_input(&args)?;
    let batch: MutationBatch =
        serde_json::from_str(&raw).context("mutation batch is not valid JSON")?;
    if batch.is_empty() {
        bail!("mutation batch is empty: nothing to create, move or relabel");
    }
    let paths = JobPaths::new(&args.job);
    let outcome = apply_mutations(&paths, &batch).await?;
    let rendered = if args.pretty {
        serde_json::to_string_pretty(&outcome)?
    } else {
        serde_json::to_string(&outcome)?
    };
    println!("{rendered}");
    Ok(())
}

async fn run_search(args: SearchArgs) -> Result<()> {
    let mut rules = args
        .rules
        .iter()
        .map(|raw| raw.parse::<SearchRule>())
        .collect::<std::result::Result<Vec<_>, _>>()?;
    if let Some(path) = &args.file {
        let raw = tokio::fs::read(path)
            .await
            .with_context(|| format!("cannot read {}", path.display()))?;
        let from_file: Vec<SearchRule> =
            serde_json::from_slice(&raw).context("rules file is not a JSON array of rules")?;
        rules.extend(from_file);
    }

    let paths = JobPaths::new(&args.job);
    let store = load_job_store(&paths, &args.job).await?;
    let parts = load_parts(&paths)
        .await?
        .with_context(|| format!("no parts artifact under {}", args.job.display()))?;

    let finder = Finder::new(&store, &parts);
    let found = finder.find(&rules);
    let emails = render_all(&found);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&emails)?);
    } else {
        for email in &emails {
            print_email(email);
            println!();
        }
        println!("{} matching parts", emails.len());
    }
    Ok(())
}

async fn run_train(args: TrainArgs) -> Result<()> {
    let raw = tokio::fs::read(&args.clusters)
        .await
        .with_context(|| format!("cannot read {}", args.clusters.display()))?;
    let clusters: Vec<Vec<String>> =
        serde_json::from_slice(&raw).context("labelled clusters are not a JSON array of arrays")?;

    let mut options = TrainingOptions::default();
    if let Some(seed) = args.seed {
        options.seed = seed;
    }
    if let Some(window) = args.window {
        options.window = window;
    }
    if let Some(epochs) = args.epochs {
        options.epochs = epochs;
    }
    if let Some(learning_rate) = args.learning_rate {
        options.learning_rate = learning_rate;
    }

    let mut extractor = FeatureExtractor::with_heuristics();
    let logistic = fit_logistic(&mut extractor, &clusters, &options)?;
    let model = MatchModel::Logistic(logistic);
    model.save(&args.out)?;

    if args.json {
        println!(
            "{}",
            serde_json::json!({
                "family": "logistic",
                "clusters": clusters.len(),
                "path": args.out,
            })
        );
    } else {
        println!(
            "trained logistic classifier on {} clusters -> {}",
            clusters.len(),
            args.out.display()
        );
    }
    Ok(())
}

#[derive(serde::Serialize)]
struct HealthReport {
    extractor: &'static str,
    extractor_ok: bool,
    model_present: bool,
    job_status: Option<JobStatus>,
}

async fn run_health(args: HealthArgs) -> Result<()> {
    let tika_url = args
        .tika_url
        .or_else(|| env::var("MAILSIFT_TIKA_URL").ok());
    let extractor = Extractor::from_tika_url(tika_url);
    let extractor_ok = extractor.probe().await;

    let paths = JobPaths::new(&args.job_dir);
    let model_present = tokio::fs::try_exists(paths.model()).await.unwrap_or(false);
    let last_job = job_status(&paths).await?.map(|record| record.status);

    let report = HealthReport {
        extractor: extractor.backend_name(),
        extractor_ok,
        model_present,
        job_status: last_job,
    };
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        let state = if extractor_ok { "ok" } else { "unreachable" };
        println!("extractor: {} ({state})", report.extractor);
        let model = if model_present { "present" } else { "missing" };
        println!("model: {model}");
        match report.job_status {
            Some(status) => println!("last job: {status}"),
            None => println!("last job: none"),
        }
    }
    if !extractor_ok {
        std::process::exit(1);
    }
    Ok(())
}

/// Load the cluster store for a job or explain which step is missing.
async fn load_job_store(paths: &JobPaths, dir: &Path) -> Result<ClusterStore> {
    load_store(paths).await?.with_context(|| {
        format!(
            "no cluster artifacts under {}; run `mailsift index` first",
            dir.display()
        )
    })
}

fn read_batch_input(args: &UpdateArgs) -> Result<String> {
    if let Some(raw) = &args.json {
        return Ok(raw.clone());
    }
    if let Some(path) = &args.file {
        if path.as_os_str() != "-" {
            return std::fs::read_to_string(path)
                .with_context(|| format!("cannot read {}", path.display()));
        }
    }
    let mut raw = String::new();
    std::io::stdin()
        .read_to_string(&mut raw)
        .context("cannot read mutation batch from stdin")?;
    Ok(raw)
}

fn env_threshold() -> Option<f64> {
    let raw = env::var("MAILSIFT_THRESHOLD").ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            log::warn!("ignoring non-numeric MAILSIFT_THRESHOLD {raw:?}");
            None
        }
    }
}

fn print_record(record: &JobRecord) {
    println!("status: {}", record.status);
    println!("started: {}", record.started.to_rfc3339());
    if let Some(progress) = &record.progress {
        println!("progress: {}/{} messages", progress.processed, progress.total);
    }
    if let Some(summary) = &record.summary {
        println!("messages: {}", summary.messages);
        println!(
            "parts: {} ({} duplicates skipped)",
            summary.parts, summary.duplicates_skipped
        );
        println!("identifiers: {}", summary.identifiers);
        println!("clusters: {}", summary.clusters);
        println!("elapsed: {}ms", summary.elapsed_ms);
    }
    if let Some(error) = &record.error {
        println!("error: {error}");
    }
    if let Some(completed) = &record.completed {
        println!("completed: {}", completed.to_rfc3339());
    }
}

fn print_email(email: &RenderedEmail) {
    println!("---- {} ----", email.part_id);
    println!("From: {}", email.from);
    println!("To: {}", email.to);
    println!("Subject: {}", email.subject);
    println!("Date: {}", email.date);
    if !email.body.trim().is_empty() {
        println!();
        println!("{}", email.body.trim_end());
    }
}
