use std::path::PathBuf;

use blobfs_device::DeviceConfig;
use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "blobfs",
    about = "blobfs: resizable blobs on fixed-size block storage",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Device directory
    #[arg(long, global = true, default_value = ".")]
    pub dir: PathBuf,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Initialize a new device directory
    Init(InitArgs),
    /// Show block size, space usage and the root blob
    Info(InfoArgs),
    /// Create an empty blob
    Create(CreateArgs),
    /// Write bytes from a file or stdin into a blob, growing it as needed
    Write(WriteArgs),
    /// Write a blob's bytes to stdout
    Read(ReadArgs),
    /// Grow or shrink a blob
    Resize(ResizeArgs),
    /// Show a blob's size and tree shape
    Stat(StatArgs),
    /// Remove a blob and free its blocks
    Rm(RmArgs),
}

#[derive(Args)]
pub struct InitArgs {
    #[arg(long, default_value_t = DeviceConfig::default().block_size)]
    pub block_size: u32,
}

#[derive(Args)]
pub struct InfoArgs {}

#[derive(Args)]
pub struct CreateArgs {}

#[derive(Args)]
pub struct WriteArgs {
    pub key: String,
    #[arg(long, default_value = "0")]
    pub offset: u64,
    /// Read input from this file instead of stdin
    #[arg(long)]
    pub file: Option<PathBuf>,
}

#[derive(Args)]
pub struct ReadArgs {
    pub key: String,
    #[arg(long, default_value = "0")]
    pub offset: u64,
    /// Number of bytes; defaults to the rest of the blob
    #[arg(long)]
    pub length: Option<u64>,
}

#[derive(Args)]
pub struct ResizeArgs {
    pub key: String,
    pub size: u64,
}

#[derive(Args)]
pub struct StatArgs {
    pub key: String,
}

#[derive(Args)]
pub struct RmArgs {
    pub key: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_init_default_block_size() {
        let cli = Cli::try_parse_from(["blobfs", "init"]).unwrap();
        if let Command::Init(args) = cli.command {
            assert_eq!(args.block_size, 32768);
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_init_block_size() {
        let cli = Cli::try_parse_from(["blobfs", "init", "--block-size", "4096"]).unwrap();
        if let Command::Init(args) = cli.command {
            assert_eq!(args.block_size, 4096);
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_write_with_file() {
        let cli = Cli::try_parse_from(["blobfs", "write", "abcd", "--offset", "10", "--file", "in.bin"]).unwrap();
        if let Command::Write(args) = cli.command {
            assert_eq!(args.key, "abcd");
            assert_eq!(args.offset, 10);
            assert_eq!(args.file, Some(PathBuf::from("in.bin")));
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_read_defaults() {
        let cli = Cli::try_parse_from(["blobfs", "read", "abcd"]).unwrap();
        if let Command::Read(args) = cli.command {
            assert_eq!(args.offset, 0);
            assert!(args.length.is_none());
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_resize() {
        let cli = Cli::try_parse_from(["blobfs", "resize", "abcd", "1000"]).unwrap();
        if let Command::Resize(args) = cli.command {
            assert_eq!(args.size, 1000);
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_global_dir() {
        let cli = Cli::try_parse_from(["blobfs", "info", "--dir", "/tmp/dev"]).unwrap();
        assert_eq!(cli.dir, PathBuf::from("/tmp/dev"));
        assert!(matches!(cli.command, Command::Info(_)));
    }

    #[test]
    fn parse_verbose() {
        let cli = Cli::try_parse_from(["blobfs", "--verbose", "create"]).unwrap();
        assert!(cli.verbose);
    }

    #[test]
    fn parse_json_format() {
        let cli = Cli::try_parse_from(["blobfs", "--format", "json", "stat", "abcd"]).unwrap();
        assert!(matches!(cli.format, OutputFormat::Json));
    }

    #[test]
    fn rejects_negative_size() {
        assert!(Cli::try_parse_from(["blobfs", "resize", "abcd", "-5"]).is_err());
    }
}
