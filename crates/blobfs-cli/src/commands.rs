use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;

use anyhow::{bail, Context};
use blobfs_device::{Device, DeviceStats};
use blobfs_types::BlockId;
use colored::Colorize;
use serde::Serialize;

use crate::cli::*;

/// Bytes copied to stdout per read call.
const READ_CHUNK: u64 = 1 << 20;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let Cli {
        command,
        dir,
        format,
        ..
    } = cli;
    match command {
        Command::Init(args) => cmd_init(&dir, args, &format),
        Command::Info(_) => cmd_info(&dir, &format),
        Command::Create(_) => cmd_create(&dir, &format),
        Command::Write(args) => cmd_write(&dir, args, &format),
        Command::Read(args) => cmd_read(&dir, args),
        Command::Resize(args) => cmd_resize(&dir, args, &format),
        Command::Stat(args) => cmd_stat(&dir, args, &format),
        Command::Rm(args) => cmd_rm(&dir, args, &format),
    }
}

#[derive(Serialize)]
struct InitReport {
    path: String,
    block_size: u32,
    root_key: String,
}

#[derive(Serialize)]
struct InfoReport {
    root_key: String,
    #[serde(flatten)]
    stats: DeviceStats,
}

#[derive(Serialize)]
struct BlobReport {
    key: String,
    size: u64,
}

#[derive(Serialize)]
struct WriteReport {
    key: String,
    offset: u64,
    bytes: u64,
    size: u64,
}

#[derive(Serialize)]
struct StatReport {
    key: String,
    size: u64,
    depth: u8,
    num_leaves: u64,
    max_bytes_per_leaf: u64,
}

#[derive(Serialize)]
struct RemoveReport {
    key: String,
    blocks_freed: u64,
}

fn emit<T: Serialize>(format: &OutputFormat, report: &T, text: impl FnOnce(&T)) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(report)?),
        OutputFormat::Text => text(report),
    }
    Ok(())
}

fn parse_key(key: &str) -> anyhow::Result<BlockId> {
    BlockId::from_hex(key).with_context(|| format!("invalid blob key {key:?}"))
}

fn open_device(dir: &Path) -> anyhow::Result<Device> {
    Device::open_dir(dir).with_context(|| format!("failed to open device at {}", dir.display()))
}

fn cmd_init(dir: &Path, args: InitArgs, format: &OutputFormat) -> anyhow::Result<()> {
    let device = Device::init_dir(dir, args.block_size)
        .with_context(|| format!("failed to initialize device at {}", dir.display()))?;
    let report = InitReport {
        path: dir.display().to_string(),
        block_size: args.block_size,
        root_key: device.root_key().to_hex(),
    };
    emit(format, &report, |r| {
        println!("{} Initialized blobfs device in {}", "✓".green().bold(), r.path.bold());
        println!("  Block size: {}", r.block_size);
        println!("  Root blob:  {}", r.root_key.cyan());
    })
}

fn cmd_info(dir: &Path, format: &OutputFormat) -> anyhow::Result<()> {
    let device = open_device(dir)?;
    let report = InfoReport {
        root_key: device.root_key().to_hex(),
        stats: device.statfs()?,
    };
    emit(format, &report, |r| {
        println!("Root blob:  {}", r.root_key.cyan());
        println!("Block size: {}", r.stats.block_size);
        println!("Blocks:     {}", r.stats.num_blocks.to_string().bold());
        println!("Total:      {} bytes", r.stats.total_bytes);
    })
}

fn cmd_create(dir: &Path, format: &OutputFormat) -> anyhow::Result<()> {
    let device = open_device(dir)?;
    let mut blob = device.create_blob()?;
    blob.flush()?;
    let report = BlobReport {
        key: blob.key().to_hex(),
        size: 0,
    };
    emit(format, &report, |r| {
        println!("{} Created blob {}", "✓".green().bold(), r.key.cyan());
    })
}

fn cmd_write(dir: &Path, args: WriteArgs, format: &OutputFormat) -> anyhow::Result<()> {
    let key = parse_key(&args.key)?;
    let data = match &args.file {
        Some(path) => fs::read(path).with_context(|| format!("failed to read {}", path.display()))?,
        None => {
            let mut buf = Vec::new();
            io::stdin().read_to_end(&mut buf).context("failed to read stdin")?;
            buf
        }
    };

    let device = open_device(dir)?;
    let mut blob = device.load_blob(&key)?;
    let bytes = data.len() as u64;
    let end = args
        .offset
        .checked_add(bytes)
        .context("write range overflows")?;
    if end > blob.size()? {
        blob.resize(end)?;
    }
    blob.write(args.offset, &data)?;
    blob.flush()?;

    let report = WriteReport {
        key: key.to_hex(),
        offset: args.offset,
        bytes,
        size: blob.size()?,
    };
    emit(format, &report, |r| {
        println!(
            "{} Wrote {} bytes at offset {} ({} bytes total)",
            "✓".green().bold(),
            r.bytes.to_string().bold(),
            r.offset,
            r.size
        );
    })
}

fn cmd_read(dir: &Path, args: ReadArgs) -> anyhow::Result<()> {
    let key = parse_key(&args.key)?;
    let device = open_device(dir)?;
    let mut blob = device.load_blob(&key)?;
    let size = blob.size()?;
    if args.offset > size {
        bail!("offset {} is past the end of the blob ({size} bytes)", args.offset);
    }
    let length = args.length.unwrap_or(size - args.offset);
    let end = args.offset.checked_add(length).context("read range overflows")?;
    if end > size {
        bail!("range {}..{end} is past the end of the blob ({size} bytes)", args.offset);
    }

    let mut stdout = io::stdout().lock();
    let mut pos = args.offset;
    while pos < end {
        let chunk = (end - pos).min(READ_CHUNK);
        let buf = blob.read_vec(pos, chunk as usize)?;
        stdout.write_all(&buf)?;
        pos += chunk;
    }
    stdout.flush()?;
    Ok(())
}

fn cmd_resize(dir: &Path, args: ResizeArgs, format: &OutputFormat) -> anyhow::Result<()> {
    let key = parse_key(&args.key)?;
    let device = open_device(dir)?;
    let mut blob = device.load_blob(&key)?;
    blob.resize(args.size)?;
    blob.flush()?;

    let report = BlobReport {
        key: key.to_hex(),
        size: args.size,
    };
    emit(format, &report, |r| {
        println!("{} Resized {} to {} bytes", "✓".green().bold(), r.key.cyan(), r.size);
    })
}

fn cmd_stat(dir: &Path, args: StatArgs, format: &OutputFormat) -> anyhow::Result<()> {
    let key = parse_key(&args.key)?;
    let device = open_device(dir)?;
    let mut blob = device.load_blob(&key)?;
    let shape = blob.shape()?;

    let report = StatReport {
        key: key.to_hex(),
        size: shape.num_bytes,
        depth: shape.depth,
        num_leaves: shape.num_leaves,
        max_bytes_per_leaf: blob.max_bytes_per_leaf(),
    };
    emit(format, &report, |r| {
        println!("Blob:   {}", r.key.cyan());
        println!("Size:   {} bytes", r.size.to_string().bold());
        println!("Depth:  {}", r.depth);
        println!("Leaves: {} (up to {} bytes each)", r.num_leaves, r.max_bytes_per_leaf);
    })
}

fn cmd_rm(dir: &Path, args: RmArgs, format: &OutputFormat) -> anyhow::Result<()> {
    let key = parse_key(&args.key)?;
    let device = open_device(dir)?;
    let blob = device.load_blob(&key)?;
    let blocks_freed = device.remove_blob(blob)?;

    let report = RemoveReport {
        key: key.to_hex(),
        blocks_freed,
    };
    emit(format, &report, |r| {
        println!(
            "{} Removed blob {} ({} blocks freed)",
            "✓".green().bold(),
            r.key.cyan(),
            r.blocks_freed
        );
    })
}
