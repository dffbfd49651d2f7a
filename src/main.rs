#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use pg_archiver::commands;
use pg_archiver::config::{ArchiveJob, Compression, DbConfig, DumpMode, ObjectStoreConfig, OutputFormat};
use pg_archiver::log_format::TargetFirstFormat;
use pg_archiver::progress::ProgressBus;
use pg_archiver::slice::OutputDuration;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pg-archiver", about = "Archives partitioned Postgres tables to object storage")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    db: DbArgs,

    #[command(flatten)]
    store: ObjectStoreArgs,

    /// Table (or partition-parent table) to operate on.
    #[arg(long, global = true)]
    table: String,

    #[arg(long, global = true, value_enum, default_value = "daily")]
    output_duration: OutputDuration,

    #[arg(long, global = true, value_enum, default_value = "jsonl")]
    output_format: OutputFormat,

    #[arg(long, global = true, value_enum, default_value = "zstd")]
    compression: Compression,

    #[arg(long, global = true, default_value_t = 3)]
    compression_level: i32,

    #[arg(long, global = true, default_value_t = 4)]
    workers: usize,

    #[arg(long, global = true, default_value = "{table}/{YYYY}/{MM}/{DD}")]
    path_template: String,

    #[arg(long, global = true)]
    date_column: Option<String>,

    #[arg(long, global = true)]
    start_date: Option<NaiveDate>,

    #[arg(long, global = true)]
    end_date: Option<NaiveDate>,

    #[arg(long, global = true, value_enum, default_value = "streaming")]
    dump_mode: DumpMode,

    #[arg(long, global = true)]
    skip_count: bool,

    #[arg(long, global = true)]
    skip_empty: bool,

    #[arg(long, global = true)]
    dry_run: bool,

    #[arg(long, global = true)]
    include_non_partition_tables: bool,

    #[arg(long, global = true)]
    task_info_path: Option<PathBuf>,
}

#[derive(clap::Args)]
struct DbArgs {
    #[arg(long, env = "PGHOST", default_value = "localhost")]
    db_host: String,
    #[arg(long, env = "PGPORT", default_value_t = 5432)]
    db_port: u16,
    #[arg(long, env = "PGUSER")]
    db_user: String,
    #[arg(long, env = "PGPASSWORD")]
    db_password: String,
    #[arg(long, env = "PGDATABASE")]
    db_database: String,
}

#[derive(clap::Args)]
struct ObjectStoreArgs {
    #[arg(long, env = "ARCHIVER_BUCKET")]
    bucket: String,
    #[arg(long, env = "ARCHIVER_REGION", default_value = "auto")]
    region: String,
    #[arg(long, env = "ARCHIVER_ENDPOINT")]
    endpoint: Option<String>,
    #[arg(long, env = "ARCHIVER_ACCESS_KEY_ID")]
    access_key_id: Option<String>,
    #[arg(long, env = "ARCHIVER_SECRET_ACCESS_KEY")]
    secret_access_key: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream partitions through the format/compress pipeline and upload them.
    Archive,
    /// Dump partitions (and schema) with `pg_dump` instead of streaming rows.
    Dump,
    /// Serve the row-count cache and task-info JSON over HTTP.
    CacheViewer {
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
    /// Reconcile archived artifacts against live data (external collaborator; not implemented here).
    Compare,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let use_json = std::env::var("ARCHIVER_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if use_json {
        subscriber.json().init();
    } else {
        subscriber.event_format(TargetFirstFormat).init();
    }
}

fn install_metrics_recorder() {
    if let Err(e) = metrics_exporter_prometheus::PrometheusBuilder::new().install() {
        tracing::warn!("failed to install prometheus recorder: {}", e);
    }
}

fn build_job(cli: &Cli) -> ArchiveJob {
    ArchiveJob {
        db: DbConfig {
            host: cli.db.db_host.clone(),
            port: cli.db.db_port,
            user: cli.db.db_user.clone(),
            password: cli.db.db_password.clone(),
            database: cli.db.db_database.clone(),
        },
        object_store: ObjectStoreConfig {
            bucket: cli.store.bucket.clone(),
            region: cli.store.region.clone(),
            endpoint: cli.store.endpoint.clone(),
            access_key_id: cli.store.access_key_id.clone(),
            secret_access_key: cli.store.secret_access_key.clone(),
        },
        table: cli.table.clone(),
        start_date: cli.start_date,
        end_date: cli.end_date,
        output_duration: cli.output_duration,
        output_format: cli.output_format,
        compression: cli.compression,
        compression_level: cli.compression_level,
        workers: cli.workers,
        path_template: cli.path_template.clone(),
        date_column: cli.date_column.clone(),
        dump_mode: cli.dump_mode,
        skip_count: cli.skip_count,
        skip_empty: cli.skip_empty,
        dry_run: cli.dry_run,
        include_non_partition_tables: cli.include_non_partition_tables,
    }
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_logging();
    install_metrics_recorder();

    let cli = Cli::parse();
    let job = build_job(&cli);

    let exit_code = match &cli.command {
        Commands::Archive => match commands::handle_archive(job, cli.task_info_path.clone()).await {
            Ok(summary) => summary.exit_code(),
            Err(e) => {
                eprintln!("archive run failed: {e:#}");
                1
            }
        },
        Commands::Dump => match commands::handle_dump(job).await {
            Ok(keys) => {
                for key in keys {
                    println!("{key}");
                }
                0
            }
            Err(e) => {
                eprintln!("dump failed: {e:#}");
                1
            }
        },
        Commands::CacheViewer { port } => {
            let bus = Arc::new(ProgressBus::new(cli.task_info_path.clone()));
            match commands::handle_cache_viewer(&job.table, *port, bus).await {
                Ok(()) => 0,
                Err(e) => {
                    eprintln!("cache viewer failed: {e:#}");
                    1
                }
            }
        }
        Commands::Compare => match commands::handle_compare(&job.table).await {
            Ok(()) => 0,
            Err(e) => {
                eprintln!("{e:#}");
                1
            }
        },
    };

    std::process::exit(exit_code);
}
