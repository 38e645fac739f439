use anyhow::{bail, Context, Result};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use http::{HeaderMap, StatusCode};
use std::path::PathBuf;
use std::time::{Duration, SystemTime};
use tokio::io::AsyncWriteExt;

use kura::cache::disk::DecodedHeader;
use kura::cache::{CacheKey, DiskCache, ResponseMeta, StoreOutcome};
use kura::config::Config;

/// Kura - disk-backed HTTP response cache
#[derive(Parser, Debug)]
#[command(name = "kura")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate the configuration, open the cache root and print the
    /// effective settings
    Check,
    /// Print the header, data and vary paths of a name
    Path {
        name: String,
        /// Variant selector, for negotiated resources
        #[arg(long)]
        variant: Option<String>,
    },
    /// Store a file as the response body for a name
    Put {
        name: String,
        /// Body file; `-` reads stdin
        file: PathBuf,
        #[arg(long, default_value_t = 200)]
        status: u16,
        #[arg(long)]
        content_type: Option<String>,
        /// Extra response header, `Name: value`
        #[arg(long = "header")]
        headers: Vec<String>,
        /// Freshness lifetime in seconds
        #[arg(long)]
        ttl: Option<u64>,
    },
    /// Write the cached body of a name to stdout
    Get {
        name: String,
        /// Request header used for variant selection, `Name: value`
        #[arg(long = "header")]
        headers: Vec<String>,
    },
    /// Show the stored header record of a name
    Inspect {
        name: String,
        #[arg(long)]
        variant: Option<String>,
    },
    /// Remove a name and its variants
    Rm { name: String },
    /// Delete temp files left behind by crashed writers
    Sweep {
        /// Minimum age in seconds
        #[arg(long, default_value_t = 3600)]
        older_than: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::from_file(&args.config)
        .map_err(anyhow::Error::msg)
        .with_context(|| format!("Failed to load configuration from {}", args.config.display()))?;
    kura::logging::init_subscriber(config.logging.format, config.logging.level.as_deref())
        .map_err(|e| anyhow::anyhow!(e.to_string()))
        .context("Failed to initialize logging subsystem")?;
    config.validate().map_err(anyhow::Error::msg)?;

    tracing::info!(
        config_file = %args.config.display(),
        cache_root = %config.cache.cache_root.display(),
        dirlevels = config.cache.dirlevels,
        dirlength = config.cache.dirlength,
        "Configuration loaded successfully"
    );

    let cache = DiskCache::open(config.cache.clone())
        .await
        .context("Failed to open cache")?;

    match args.command {
        Command::Check => {
            println!("{}", serde_json::to_string_pretty(cache.config())?);
            eprintln!("cache root {} is ready", cache.root().display());
        }
        Command::Path { name, variant } => {
            let key = key_for(name, variant);
            let paths = cache.entry_paths(&key);
            let data = cache.data_path(&key).await;
            println!("header {}", paths.header.display());
            match data {
                Some(data) => println!("data   {}", data.display()),
                None => println!("data   -"),
            }
            println!("vary   {}", paths.vary.display());
        }
        Command::Put {
            name,
            file,
            status,
            content_type,
            headers,
            ttl,
        } => {
            let body = if file.as_os_str() == "-" {
                let mut data = Vec::new();
                tokio::io::AsyncReadExt::read_to_end(&mut tokio::io::stdin(), &mut data).await?;
                data
            } else {
                tokio::fs::read(&file)
                    .await
                    .with_context(|| format!("Failed to read {}", file.display()))?
            };

            let mut meta = ResponseMeta::new(StatusCode::from_u16(status)?);
            if let Some(content_type) = content_type {
                meta = meta.with_response_header(CONTENT_TYPE, HeaderValue::try_from(content_type)?);
            }
            for (header, value) in parse_headers(&headers)? {
                meta = meta.with_response_header(header, value);
            }
            if let Some(ttl) = ttl {
                let expire = meta.date + Duration::from_secs(ttl);
                meta = meta.with_expire(expire);
            }

            let chunks = vec![Ok(Bytes::from(body))];
            match cache.store(&name, meta, futures::stream::iter(chunks)).await {
                StoreOutcome::Stored { entity_version } => {
                    println!("stored {} (entity version {})", name, entity_version)
                }
                StoreOutcome::Rejected(reason) => bail!("store rejected: {}", reason),
                StoreOutcome::Aborted(reason) => bail!("store aborted: {}", reason),
            }
        }
        Command::Get { name, headers } => {
            let mut request = HeaderMap::new();
            for (header, value) in parse_headers(&headers)? {
                request.append(header, value);
            }
            let entry = cache
                .try_open_for_read(&name, &request)
                .await
                .with_context(|| format!("No usable entry for {}", name))?;
            let body = entry.read_body().await?;
            let mut stdout = tokio::io::stdout();
            stdout.write_all(&body).await?;
            stdout.flush().await?;
        }
        Command::Inspect { name, variant } => {
            if variant.is_none() {
                if let Some(index) = cache.variant_index(&name).await? {
                    println!("vary on  {}", index.headers.join(", "));
                    for key in index.keys() {
                        println!("variant  {}", key);
                    }
                    return Ok(());
                }
            }
            let key = key_for(name, variant);
            let decoded = cache.inspect(&key).await?;
            print_record(&key, &decoded);
        }
        Command::Rm { name } => {
            let removed = cache.remove(&CacheKey::new(name.clone())).await?;
            println!("{} {}", if removed { "removed" } else { "not cached" }, name);
        }
        Command::Sweep { older_than } => {
            let removed = cache
                .sweep_temp_files(Duration::from_secs(older_than))
                .await?;
            println!("removed {} temp files", removed);
        }
    }

    Ok(())
}

fn key_for(name: String, variant: Option<String>) -> CacheKey {
    match variant {
        Some(selector) => CacheKey::with_variant(name, selector.replace("; ", "\n")),
        None => CacheKey::new(name),
    }
}

fn parse_headers(raw: &[String]) -> Result<Vec<(HeaderName, HeaderValue)>> {
    raw.iter()
        .map(|line| {
            let Some((name, value)) = line.split_once(':') else {
                bail!("header '{}' is not in 'Name: value' form", line);
            };
            Ok((
                HeaderName::try_from(name.trim())?,
                HeaderValue::try_from(value.trim())?,
            ))
        })
        .collect()
}

fn print_record(key: &CacheKey, decoded: &DecodedHeader) {
    let record = &decoded.record;
    println!("key            {}", key);
    if decoded.key != key.key() {
        println!("slot holds     {} (hash collision)", decoded.name);
    }
    println!("status         {}", record.status);
    println!("entity version {}", record.entity_version);
    println!("date           {}", format_time(record.date));
    match record.expire {
        Some(expire) => println!("expires        {}", format_time(expire)),
        None => println!("expires        -"),
    }
    println!("body           {} bytes", record.body_len);
    println!("header only    {}", record.header_only);
    for (name, value) in decoded.headers_out.iter() {
        println!("> {}: {}", name, String::from_utf8_lossy(value.as_bytes()));
    }
}

fn format_time(time: SystemTime) -> String {
    DateTime::<Utc>::from(time).to_rfc3339()
}
