//! CLI module for infrastack
//!
//! Subcommands:
//! - `infrastack synth` - Write templates and manifest bundles to an output directory
//! - `infrastack list` - List a stack's resources in apply order
//! - `infrastack validate` - Lint settings and declared stacks
//! - `infrastack resolve-registry` - Look up the registry URI
//! - `infrastack config` - Show or initialize settings

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod display;

pub use commands::*;
pub use display::*;

use crate::stacks::StackSelection;
use crate::template::TemplateFormat;

#[derive(Parser, Debug)]
#[command(name = "infrastack")]
#[command(about = "Synthesize the registry and GPU cluster stacks")]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging output (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to settings file (default: ./infrastack.yaml, then the per-user config)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<String>,

    /// Path to a .env file loaded before anything else (e.g. AWS_PROFILE)
    #[arg(long, global = true, value_name = "FILE")]
    pub env_file: Option<PathBuf>,

    /// Target account, overriding the settings file
    #[arg(long, global = true, env = "INFRASTACK_ACCOUNT")]
    pub account: Option<String>,

    /// Target region, overriding the settings file
    #[arg(long, global = true, env = "AWS_REGION")]
    pub region: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Synthesize stacks into a cloud assembly directory
    Synth(SynthArgs),

    /// List a stack's resources in apply order
    List(StackArgs),

    /// Lint settings and declared stacks
    Validate(StackArgs),

    /// Look up the registry URI the main stack pins its images to
    #[command(name = "resolve-registry")]
    ResolveRegistry(ResolveArgs),

    /// Show or initialize settings
    Config(ConfigArgs),
}

/// Where the registry URI comes from
#[derive(clap::Args, Debug, Clone, Default)]
pub struct RegistryArgs {
    /// Use this URI instead of looking the registry up
    #[arg(long, value_name = "URI", conflicts_with = "repositories_file")]
    pub repository_uri: Option<String>,

    /// Look the registry up in a saved `describe-repositories` response
    #[arg(long, value_name = "FILE")]
    pub repositories_file: Option<PathBuf>,
}

/// Arguments for the synth command
#[derive(Parser, Debug)]
pub struct SynthArgs {
    /// Stacks to synthesize
    #[arg(value_enum, default_value = "all")]
    pub stack: StackSelection,

    /// Output directory
    #[arg(short, long, default_value = "cdk.out")]
    pub out: PathBuf,

    /// Template format
    #[arg(short, long, value_enum, default_value = "json")]
    pub format: TemplateFormat,

    #[command(flatten)]
    pub registry: RegistryArgs,
}

/// Arguments for commands operating on declared stacks
#[derive(Parser, Debug)]
pub struct StackArgs {
    /// Stacks to operate on
    #[arg(value_enum, default_value = "all")]
    pub stack: StackSelection,

    #[command(flatten)]
    pub registry: RegistryArgs,
}

/// Arguments for the resolve-registry command
#[derive(Parser, Debug)]
pub struct ResolveArgs {
    /// Registry name (default: from settings)
    #[arg(long)]
    pub name: Option<String>,

    #[command(flatten)]
    pub registry: RegistryArgs,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective settings
    Show,

    /// Write the built-in defaults to a file
    Init {
        /// Destination (default: ./infrastack.yaml)
        #[arg(long)]
        path: Option<String>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}
