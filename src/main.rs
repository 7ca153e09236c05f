use std::process;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use infrastack::assembly::write_assembly;
use infrastack::cli::{
    config_init, enforce_report, format_assembly_summary, format_registry, format_resource_list,
    format_validation_summary, resource_rows, synthesize_stacks, validation_report, Cli, Commands,
    ConfigAction, RegistrySource,
};
use infrastack::config::validation::{format_validation_results, report_has_errors};
use infrastack::config::{load_config, serialize_config, InfraConfig};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    // Load .env file if specified
    if let Some(ref env_file) = cli.env_file {
        if let Err(e) = dotenvy::from_path(env_file) {
            error!("Failed to load env file {}: {}", env_file.display(), e);
            process::exit(1);
        }
    }

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config.with_overrides(cli.account.clone(), cli.region.clone()),
        Err(e) => {
            error!("Failed to load settings: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = run(cli.command, config).await {
        error!("{:#}", e);
        process::exit(1);
    }
}

async fn run(command: Commands, config: InfraConfig) -> anyhow::Result<()> {
    match command {
        Commands::Synth(args) => {
            let source = RegistrySource::from_args(&args.registry, &config);
            let synthesis = synthesize_stacks(&config, args.stack, &source).await?;
            enforce_report(&validation_report(&config, &synthesis))?;

            let assembly = write_assembly(&synthesis.stacks, &args.out, args.format)?;
            print!("{}", format_assembly_summary(&assembly));
        }

        Commands::List(args) => {
            let source = RegistrySource::from_args(&args.registry, &config);
            let synthesis = synthesize_stacks(&config, args.stack, &source).await?;
            for stack in &synthesis.stacks {
                println!("{}", format_resource_list(&stack.name, &resource_rows(stack)));
            }
        }

        Commands::Validate(args) => {
            let source = RegistrySource::from_args(&args.registry, &config);
            let synthesis = synthesize_stacks(&config, args.stack, &source).await?;
            let report = validation_report(&config, &synthesis);

            print!("{}", format_validation_results(&report));
            print!("{}", format_validation_summary(&report));
            if report_has_errors(report.values()) {
                anyhow::bail!("validation failed");
            }
        }

        Commands::ResolveRegistry(args) => {
            let name = args.name.unwrap_or_else(|| config.registry.name.clone());
            let source = RegistrySource::from_args(&args.registry, &config);
            let uri = source.resolve(&name, &config.account).await?;
            print!("{}", format_registry(&name, &uri));
        }

        Commands::Config(args) => match args.action {
            ConfigAction::Show => print!("{}", serialize_config(&config)?),
            ConfigAction::Init { path, force } => {
                let written = config_init(path.as_deref(), force)?;
                info!("Wrote default settings to {}", written.display());
                println!("{}", written.display());
            }
        },
    }

    Ok(())
}
