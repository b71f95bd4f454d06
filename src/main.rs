//! keycloak-synth - synthesize a Keycloak cluster into a CloudFormation template

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use keycloak_cluster::config;

/// Keycloak on ECS Fargate, synthesized into a CloudFormation template
#[derive(Parser, Debug)]
#[command(name = "keycloak-synth", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Synthesize the template and print it to stdout
    Synth(SynthArgs),

    /// Synthesize the template and only report whether it succeeded
    ///
    /// Runs every provider, publisher and validation step without printing
    /// the template. Exits non-zero on the first configuration error.
    Validate(ConfigArgs),

    /// Print the JSON schema of the deployment configuration
    Schema,
}

/// Deployment file arguments
#[derive(Parser, Debug)]
struct ConfigArgs {
    /// Path to the deployment YAML (or JSON) file
    #[arg(short = 'f', long = "config", env = "KEYCLOAK_SYNTH_CONFIG")]
    config_file: PathBuf,
}

/// Synth mode arguments
#[derive(Parser, Debug)]
struct SynthArgs {
    #[command(flatten)]
    config: ConfigArgs,

    /// Template output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Json)]
    output: OutputFormat,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    Json,
    Yaml,
}

fn main() -> anyhow::Result<()> {
    // Logs go to stderr so stdout only ever carries the template
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Synth(args) => run_synth(args),
        Commands::Validate(args) => run_validate(args),
        Commands::Schema => {
            let schema = config::schema()
                .map_err(|e| anyhow::anyhow!("Failed to generate schema: {}", e))?;
            println!("{schema}");
            Ok(())
        }
    }
}

/// Synthesize and print the template
fn run_synth(args: SynthArgs) -> anyhow::Result<()> {
    let deployment = config::load_file(&args.config.config_file)?;
    let template = keycloak_cluster::synthesize(&deployment)?;

    let rendered = match args.output {
        OutputFormat::Json => template.to_json()?,
        OutputFormat::Yaml => template.to_yaml()?,
    };
    println!("{rendered}");
    Ok(())
}

/// Synthesize and report the outcome
fn run_validate(args: ConfigArgs) -> anyhow::Result<()> {
    let deployment = config::load_file(&args.config_file)?;
    match keycloak_cluster::synthesize(&deployment) {
        Ok(template) => {
            tracing::info!(
                resources = template.resources.len(),
                outputs = template.outputs.len(),
                "deployment is valid"
            );
            eprintln!(
                "{}: valid ({} resources, {} outputs)",
                args.config_file.display(),
                template.resources.len(),
                template.outputs.len()
            );
            Ok(())
        }
        Err(e) => Err(anyhow::anyhow!(
            "{} is invalid: {}",
            args.config_file.display(),
            e
        )),
    }
}
