use std::path::PathBuf;

use clap::error::ErrorKind;
use clap::{CommandFactory, Parser, Subcommand};

use landmark_core::config::{Config, DatabaseType};
use landmark_core::store::{MySqlConfig, MySqlStore, PostgresConfig, PostgresStore, Store};
use std::sync::Arc;

#[derive(Debug, Subcommand)]
enum Commands {
    #[clap(after_help = "Displays info about landmark and its dependencies.")]
    Info,

    #[clap(
        arg_required_else_help = true,
        after_help = "Fingerprint every matching file under a directory and add it to the index."
    )]
    IngestDirectory {
        #[clap(required = true, value_parser = clap::value_parser!(PathBuf), help = "Directory to scan.")]
        path: PathBuf,

        #[clap(
            long,
            value_delimiter = ',',
            default_value = "wav,mp3,flac,ogg",
            help = "Comma-separated list of file extensions to consider."
        )]
        extensions: Vec<String>,
    },

    #[clap(
        arg_required_else_help = true,
        after_help = "Fingerprint a single file and add it to the index."
    )]
    IngestFile {
        #[clap(required = true, value_parser = clap::value_parser!(PathBuf), help = "File to fingerprint.")]
        path: PathBuf,

        #[clap(long, help = "Owning principal id to attach to the clip.")]
        owner_id: Option<i64>,

        #[clap(long, value_delimiter = ',', help = "Tag ids to attach to the clip.")]
        tags: Vec<i64>,
    },

    #[clap(
        arg_required_else_help = true,
        after_help = "Recognize a query audio file against the index."
    )]
    Recognize {
        #[clap(required = true, value_parser = clap::value_parser!(PathBuf), help = "Query audio file.")]
        path: PathBuf,

        #[clap(long, help = "Require the matched clip to carry this tag id.")]
        expect_tag: Option<i64>,
    },
}

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,

    #[clap(
        long,
        global = true,
        default_value = "landmark.toml",
        help = "Path to the TOML configuration file."
    )]
    config: PathBuf,
}

impl Cli {
    fn validate(&self) {
        let mut cmd = Cli::command();
        if let Commands::IngestDirectory { path, .. } | Commands::IngestFile { path, .. } =
            &self.command
        {
            if !path.exists() {
                cmd.error(
                    ErrorKind::InvalidValue,
                    format!("path does not exist: {}", path.display()),
                )
                .exit();
            }
        }
    }
}

/// Formats the linked FFmpeg version as `MAJOR.MINOR.MICRO`.
///
/// Reference: https://github.com/FFmpeg/FFmpeg/blob/130d19bf2044ac76372d1b97ab87ab283c8b37f8/libavutil/version.h#L64
fn ffmpeg_version_string() -> String {
    let version = ffmpeg_next::util::version();
    format!(
        "{}.{}.{}",
        version >> 16,
        (version & 0x00FF00) >> 8,
        version & 0xFF
    )
}

async fn build_store(config: &Config) -> landmark_core::Result<Arc<dyn Store>> {
    match config.database_type {
        DatabaseType::Mysql => {
            let mysql_config = MySqlConfig {
                host: config.database.host.clone(),
                port: config.database.resolved_port(config.database_type),
                user: config.database.user.clone(),
                password: config.database.password.clone(),
                database: config.database.database.clone(),
                connect_timeout_secs: config.database.connect_timeout_secs,
            };
            Ok(Arc::new(MySqlStore::connect(&mysql_config).await?))
        }
        DatabaseType::Postgresql => {
            let pg_config = PostgresConfig {
                host: config.database.host.clone(),
                port: config.database.resolved_port(config.database_type),
                user: config.database.user.clone(),
                password: config.database.password.clone(),
                database: config.database.database.clone(),
                connect_timeout_secs: config.database.connect_timeout_secs,
            };
            Ok(Arc::new(PostgresStore::connect(&pg_config).await?))
        }
    }
}

#[tokio::main]
async fn main() -> landmark_core::Result<()> {
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    ffmpeg_next::init().unwrap();
    ffmpeg_next::util::log::set_level(ffmpeg_next::util::log::Level::Fatal);

    let args = Cli::parse();
    args.validate();

    if matches!(args.command, Commands::Info) {
        println!("FFmpeg version: {}", ffmpeg_version_string());
        return Ok(());
    }

    let config = Config::load(&args.config)?;
    let store = build_store(&config).await?;

    let ingestor = landmark_core::ingest::Ingestor::new(
        store.clone(),
        config.fingerprint_limit_seconds(),
    );
    ingestor.delete_unfingerprinted().await?;

    match args.command {
        Commands::IngestDirectory { path, extensions } => {
            let extensions: Vec<&str> = extensions.iter().map(String::as_str).collect();
            let count = ingestor.ingest_directory(&path, &extensions).await?;
            println!("ingested {count} clips");
        }
        Commands::IngestFile {
            path,
            owner_id,
            tags,
        } => {
            let clip_id = ingestor.ingest_file(&path, owner_id, &tags).await?;
            println!("ingested clip {clip_id}");
        }
        Commands::Recognize { path, expect_tag } => {
            let engine = landmark_core::recognize::Engine::new(store);
            match engine.recognize_with_tag(&path, expect_tag).await? {
                Some(result) => {
                    println!(
                        "matched clip {} ({}) confidence={} relative_confidence={:.2} offset={:.5}s match_time={:.2}s",
                        result.clip_id,
                        result.clip_name,
                        result.confidence,
                        result.relative_confidence,
                        result.offset_seconds,
                        result.match_time,
                    );
                }
                None => println!("no match"),
            }
        }
        Commands::Info => unreachable!("handled above"),
    }

    Ok(())
}
