use clap::*;
use std::path::PathBuf;

#[derive(Debug, Subcommand)]
pub enum Command {
  /// Create an empty container.
  Create { container: PathBuf },
  /// Import a host file or directory into the container.
  Import {
    container: PathBuf,
    source: PathBuf,
    /// Destination folder inside the container.
    #[clap(long, default_value = "/")]
    dest: String,
  },
  /// List the entries of a folder.
  Ls {
    container: PathBuf,
    #[clap(default_value = "/")]
    path: String,
  },
  /// Print a file's bytes to stdout.
  Cat { container: PathBuf, path: String },
  /// Delete a file, or a folder (trailing slash) with everything under it.
  Rm { container: PathBuf, path: String },
  /// Check every stored digest against the file contents.
  Validate { container: PathBuf },
  /// List files whose absolute path matches a glob pattern.
  Find { container: PathBuf, pattern: String },
}

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Cli {
  #[clap(subcommand)]
  pub command: Command,
}

pub fn parse() -> Cli {
  Cli::parse()
}
