use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::cache::DEFAULT_CAPACITY;

#[derive(Debug, Clone, Parser)]
#[command(name = "class-match")]
#[command(about = "Parse Java class files and decide which ones match the instrumentation rules")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Rules file (`.json` or line format)
    #[arg(long, value_name = "FILE", global = true)]
    pub rules: Option<PathBuf>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    /// Print the header of a class file
    Header {
        file: PathBuf,
    },
    /// Print fields, methods and the requested annotations of a class file
    Outline {
        file: PathBuf,

        #[arg(short = 'a', long = "annotation", value_name = "TYPE")]
        annotations: Vec<String>,
    },
    /// Print the name-rule decision for each class name
    Decide {
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// Decide every class under a `.class` file, a jar or a directory
    Scan {
        path: PathBuf,

        #[arg(short = 'f', long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,

        #[arg(long)]
        include_only: bool,

        #[arg(short = 'o', long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Most classes the cache holds before dropping the least recently used
        #[arg(long, value_name = "N", default_value_t = DEFAULT_CAPACITY)]
        cache_capacity: usize,
    },
}

#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum OutputFormat {
    Json,
    Text,
}
