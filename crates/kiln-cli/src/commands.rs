use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context};
use colored::Colorize;
use kiln_bundle::{BundleFile, BundleReader};
use kiln_index::{
    DbIndex, Document, Emitter, IndexConfig, InMemoryFeed, KeyValue, MapError, MapFn, Query,
};
use kiln_storage::{open_backend, StorageBackend, StorageConfig};
use kiln_types::Header;
use kiln_valet::{Blockstore, Valet, ValetConfig};
use serde_json::{json, Value};

use crate::cli::*;

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Bundle(args) => cmd_bundle(args, &cli.format),
        Command::Header(args) => cmd_header(args, &cli.format).await,
        Command::Index(args) => cmd_index(args, &cli.format).await,
    }
}

fn storage_config(args: &StorageArgs) -> anyhow::Result<StorageConfig> {
    let config = if let Some(path) = &args.config {
        StorageConfig::from_file(path)
            .with_context(|| format!("reading storage config {}", path.display()))?
    } else if let Some(dir) = &args.data_dir {
        StorageConfig::filesystem(dir)
    } else if let Some(url) = &args.url {
        StorageConfig::remote(url)
    } else if args.memory {
        StorageConfig::memory()
    } else {
        StorageConfig::default()
    };
    Ok(if args.readonly {
        config.with_readonly(true)
    } else {
        config
    })
}

fn open(args: &StorageArgs) -> anyhow::Result<Arc<dyn StorageBackend>> {
    let config = storage_config(args)?;
    Ok(open_backend(&args.name, &config)?)
}

fn cmd_bundle(args: BundleArgs, format: &OutputFormat) -> anyhow::Result<()> {
    let data = std::fs::read(&args.path)
        .with_context(|| format!("reading {}", args.path.display()))?;
    let file = BundleFile::from_bytes(data);
    let reader = BundleReader::from_bytes(file.bytes.clone())
        .with_context(|| format!("{} is not a valid bundle", args.path.display()))?;
    let blocks = reader.blocks()?;

    if *format == OutputFormat::Json {
        let out = json!({
            "cid": file.cid,
            "size": file.bytes.len(),
            "roots": reader.roots(),
            "blocks": blocks
                .iter()
                .map(|b| json!({"cid": b.cid(), "size": b.len()}))
                .collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("{} bundle {}", "✓".green().bold(), file.cid.to_string().yellow());
    println!("  size: {} bytes", file.bytes.len());
    if reader.roots().is_empty() {
        println!("  roots: {}", "none".dimmed());
    }
    for (name, cid) in reader.roots() {
        println!("  root {} → {}", name.bold(), cid.short_hex().cyan());
    }
    println!("  blocks: {}", blocks.len().to_string().bold());
    for block in &blocks {
        println!("    {}  {} bytes", block.cid().short_hex().cyan(), block.len());
    }
    Ok(())
}

fn print_header(branch: &str, header: &Header) {
    println!("Branch {}", branch.yellow().bold());
    match &header.bundle {
        Some(bundle) => println!("  bundle: {}", bundle.to_string().cyan()),
        None => println!("  bundle: {}", "none".dimmed()),
    }
    match &header.clock {
        Some(clock) => println!("  clock: {clock}"),
        None => println!("  clock: {}", "none".dimmed()),
    }
    for (name, cid) in &header.roots {
        println!("  root {} → {}", name.bold(), cid.to_string().cyan());
    }
}

async fn cmd_header(args: HeaderArgs, format: &OutputFormat) -> anyhow::Result<()> {
    let backend = open(&args.storage)?;
    let Some(header) = backend.load_header(&args.branch).await? else {
        bail!("branch {} has no header in database {}", args.branch, backend.name());
    };
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&header)?),
        OutputFormat::Text => print_header(&args.branch, &header),
    }
    Ok(())
}

/// Read a JSON-lines document file into the feed.
fn load_documents(path: &Path, feed: &InMemoryFeed) -> anyhow::Result<usize> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let mut count = 0;
    for (n, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let body: Value = serde_json::from_str(line)
            .with_context(|| format!("{}:{}: invalid JSON", path.display(), n + 1))?;
        let Some(id) = body.get("_id").and_then(Value::as_str).map(str::to_string) else {
            bail!("{}:{}: document has no string _id", path.display(), n + 1);
        };
        feed.put(id, body)?;
        count += 1;
    }
    Ok(count)
}

fn field_map(field: String) -> MapFn {
    Arc::new(move |doc: &Document, emit: &mut Emitter| -> Result<(), MapError> {
        if let Some(value) = doc.get(&field) {
            let key = KeyValue::try_from(value)
                .map_err(|e| MapError::new(format!("document {}: {e}", doc.id())))?;
            emit.emit(key, Value::Null);
        }
        Ok(())
    })
}

fn parse_key(raw: &str) -> anyhow::Result<KeyValue> {
    let value: Value =
        serde_json::from_str(raw).with_context(|| format!("key {raw:?} is not JSON"))?;
    Ok(KeyValue::try_from(&value)?)
}

async fn cmd_index(args: IndexArgs, format: &OutputFormat) -> anyhow::Result<()> {
    let feed = Arc::new(InMemoryFeed::new());
    let count = load_documents(&args.docs, &feed)?;

    let backend = open(&args.storage)?;
    let blocks = Arc::new(Blockstore::new(Arc::new(Valet::new(
        backend,
        ValetConfig::default(),
    ))));
    let mut config = IndexConfig::new(format!("by-{}", args.field));
    if let Some(branch) = &args.branch {
        config = config.with_header_branch(branch.clone());
    }
    let index = DbIndex::open(config, feed, blocks, field_map(args.field.clone())).await?;

    let query = match (&args.key, &args.low, &args.high) {
        (Some(key), _, _) => Query::Key(parse_key(key)?),
        (None, Some(low), Some(high)) => Query::Range(parse_key(low)?, parse_key(high)?),
        _ => bail!("pass --key, or both --low and --high"),
    };
    let response = index.query(query).await?;

    if *format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }
    println!(
        "Indexed {} documents by {}",
        count.to_string().bold(),
        args.field.yellow()
    );
    for row in &response.rows {
        println!("  {}  {}", row.key.to_string().cyan(), row.id);
    }
    println!(
        "{} rows, {} nodes read",
        response.rows.len().to_string().bold(),
        response.proof.index.len()
    );
    Ok(())
}
