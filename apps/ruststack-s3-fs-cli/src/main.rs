//! `s3fs` - inspect and modify a filesystem-backed versioned S3 bucket.
//!
//! # Usage
//!
//! ```text
//! s3fs --mode enabled /srv/buckets/photos put cat.jpg --file ./cat.jpg
//! s3fs /srv/buckets/photos versions --prefix 2024/ --delimiter /
//! s3fs /srv/buckets/photos get cat.jpg --version-id mtime-cwyvpeni7w9h-ino-16 > old.jpg
//! ```
//!
//! Results are printed as JSON on stdout, logs go to stderr.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `S3FS_LIST_MAX_KEYS` | `1000` | Listing page size cap |
//! | `S3FS_DIR_CACHE` | `true` | Keep directory snapshots between listings |
//! | `S3FS_FSYNC` | `false` | Fsync payloads before publishing |
//! | `LOG_LEVEL` | `info` | Log level filter |
//! | `RUST_LOG` | *(unset)* | Fine-grained tracing filter (overrides `LOG_LEVEL`) |

use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ruststack_s3_fs::{
    BucketRef, ListObjectVersionsInput, ListObjectsInput, PutObjectInput, S3FsConfig, VersionedFs,
    VersioningStatus,
};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "s3fs")]
#[command(about = "Filesystem-backed versioned S3 bucket tool")]
#[command(version)]
struct Args {
    /// Versioning mode of the bucket: enabled, suspended or disabled
    #[arg(short, long, default_value = "enabled")]
    mode: VersioningStatus,

    /// Bucket root directory
    bucket_root: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Store a new version of a key
    Put {
        /// Object key
        key: String,
        /// Read the payload from this file instead of stdin
        #[arg(short, long)]
        file: Option<PathBuf>,
        /// User metadata entry, repeatable
        #[arg(long = "meta", value_parser = parse_meta)]
        metadata: Vec<(String, String)>,
    },
    /// Write a version of a key to stdout
    Get {
        /// Object key
        key: String,
        /// Version to read instead of the latest
        #[arg(long)]
        version_id: Option<String>,
    },
    /// Show the metadata of a version
    Head {
        /// Object key
        key: String,
        /// Version to describe instead of the latest
        #[arg(long)]
        version_id: Option<String>,
    },
    /// Delete the latest version, or one version permanently
    Rm {
        /// Object key
        key: String,
        /// Version to remove
        #[arg(long)]
        version_id: Option<String>,
    },
    /// List current objects
    Ls {
        #[arg(long, default_value = "")]
        prefix: String,
        #[arg(long)]
        delimiter: Option<String>,
        #[arg(long)]
        start_after: Option<String>,
        #[arg(long)]
        max_keys: Option<usize>,
    },
    /// List versions and delete markers
    Versions {
        #[arg(long, default_value = "")]
        prefix: String,
        #[arg(long)]
        delimiter: Option<String>,
        #[arg(long)]
        key_marker: Option<String>,
        #[arg(long)]
        version_id_marker: Option<String>,
        #[arg(long)]
        max_keys: Option<usize>,
    },
    /// Check that the bucket root supports extended attributes
    Check,
}

/// Parse a `key=value` metadata argument.
fn parse_meta(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_owned(), v.to_owned()))
        .ok_or_else(|| format!("expected key=value, got {s:?}"))
}

/// Initialize the tracing subscriber on stderr.
///
/// Uses `RUST_LOG` if set, otherwise falls back to the `LOG_LEVEL` config value.
fn init_tracing(log_level: &str) -> Result<()> {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::try_new(log_level)
            .with_context(|| format!("invalid log level filter: {log_level}"))?
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}

fn print_json(value: &impl Serialize) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value).context("failed to write JSON")?;
    writeln!(stdout)?;
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = S3FsConfig::from_env();
    init_tracing(&config.log_level)?;

    let fs = VersionedFs::new(config);
    let bucket = BucketRef::new(args.bucket_root, args.mode);
    info!(root = %bucket.root().display(), mode = %bucket.versioning, "opened bucket");

    match args.command {
        Command::Put {
            key,
            file,
            metadata,
        } => {
            let body = if let Some(path) = file {
                std::fs::read(&path)
                    .with_context(|| format!("failed to read {}", path.display()))?
            } else {
                let mut buf = Vec::new();
                std::io::stdin()
                    .read_to_end(&mut buf)
                    .context("failed to read stdin")?;
                buf
            };
            let input = PutObjectInput::builder()
                .body(body)
                .metadata(metadata.into_iter().collect::<HashMap<_, _>>())
                .build();
            print_json(&fs.put_object(&bucket, &key, input)?)?;
        }
        Command::Get { key, version_id } => {
            let out = fs.get_object(&bucket, &key, version_id.as_deref())?;
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&out.body).context("failed to write body")?;
            stdout.flush()?;
        }
        Command::Head { key, version_id } => {
            print_json(&fs.head_object(&bucket, &key, version_id.as_deref())?)?;
        }
        Command::Rm { key, version_id } => {
            print_json(&fs.delete_object(&bucket, &key, version_id.as_deref())?)?;
        }
        Command::Ls {
            prefix,
            delimiter,
            start_after,
            max_keys,
        } => {
            let input = ListObjectsInput {
                prefix,
                delimiter,
                start_after,
                max_keys,
            };
            print_json(&fs.list_objects(&bucket, &input)?)?;
        }
        Command::Versions {
            prefix,
            delimiter,
            key_marker,
            version_id_marker,
            max_keys,
        } => {
            let input = ListObjectVersionsInput {
                prefix,
                delimiter,
                key_marker,
                version_id_marker,
                max_keys,
            };
            print_json(&fs.list_object_versions(&bucket, &input)?)?;
        }
        Command::Check => {
            VersionedFs::verify_bucket_root(bucket.root())?;
            print_json(&serde_json::json!({ "root": bucket.root(), "xattrs": true }))?;
        }
    }

    Ok(())
}
