//! CLI command definitions for schema-forge.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use crate::metrics::{export_metrics, init_metrics};
use crate::runner::sandbox::container_name;
use crate::runner::{BuildConfig, BuildInput, BuildService, LaunchFlags, SandboxLauncher};
use crate::workspace::workspace_dir_name;

/// Job id used when none is given and none can be derived.
const DEFAULT_JOB_ID: &str = "cli";

/// Sandboxed validation of schema/descriptor artifact pairs.
#[derive(Parser)]
#[command(name = "schema-forge")]
#[command(about = "Validate schema and code-generation descriptor pairs in a hardened sandbox")]
#[command(version)]
#[command(
    long_about = "schema-forge stages a schema and its code-generation descriptor in a throwaway workspace, runs an external validator on them inside a locked-down container, and prints the result as JSON.\n\nExample usage:\n  schema-forge validate --schema model.ecore --descriptor model.genmodel"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run one build and print the result as JSON.
    Validate(ValidateArgs),

    /// Print the effective configuration as YAML.
    ShowConfig(ConfigArgs),

    /// Print the container command line a sandboxed build would use.
    SandboxArgs(ConfigArgs),
}

/// Arguments shared by commands that only need configuration.
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// YAML configuration file.
    #[arg(short, long, env = "SCHEMA_FORGE_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Arguments for `schema-forge validate`.
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Schema artifact to validate.
    #[arg(short, long)]
    pub schema: PathBuf,

    /// Code-generation descriptor for the schema.
    #[arg(short, long)]
    pub descriptor: PathBuf,

    /// Job identifier (defaults to the schema file stem).
    #[arg(long)]
    pub job_id: Option<String>,

    /// Ask the validator to run its extra pass.
    #[arg(long)]
    pub extra_pass: bool,

    /// YAML configuration file.
    #[arg(short, long, env = "SCHEMA_FORGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Timeout in seconds.
    #[arg(short, long)]
    pub timeout: Option<u64>,

    /// Run the validator on the host instead of in a container.
    #[arg(long)]
    pub direct: bool,

    /// Sandbox image.
    #[arg(long)]
    pub image: Option<String>,

    /// Validator executable on the host.
    #[arg(long)]
    pub validator: Option<PathBuf>,

    /// Parent directory for job workspaces.
    #[arg(long)]
    pub work_root: Option<PathBuf>,

    /// Print Prometheus metrics to stderr after the build.
    #[arg(long)]
    pub metrics: bool,
}

impl ValidateArgs {
    /// Applies command-line overrides on top of `config`.
    fn apply_to(&self, mut config: BuildConfig) -> BuildConfig {
        if let Some(timeout) = self.timeout {
            config = config.with_timeout_secs(timeout);
        }
        if self.direct {
            config = config.without_sandbox();
        }
        if let Some(image) = &self.image {
            config = config.with_sandbox_image(image.clone());
        }
        if let Some(validator) = &self.validator {
            config = config.with_validator(validator.clone());
        }
        if let Some(work_root) = &self.work_root {
            config = config.with_work_root(work_root.clone());
        }
        config
    }

    fn job_id(&self) -> String {
        self.job_id
            .clone()
            .or_else(|| {
                self.schema
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().to_string())
            })
            .unwrap_or_else(|| DEFAULT_JOB_ID.to_string())
    }
}

/// Parse CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<ExitCode> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
///
/// Returns a failure exit code when a build completes unsuccessfully.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<ExitCode> {
    match cli.command {
        Commands::Validate(args) => run_validate_command(args).await,
        Commands::ShowConfig(args) => {
            run_show_config_command(args)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::SandboxArgs(args) => {
            run_sandbox_args_command(args)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Defaults, then the optional YAML file, then `BUILD_*` environment variables.
fn load_config(path: Option<&Path>) -> anyhow::Result<BuildConfig> {
    let mut config = match path {
        Some(path) => BuildConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => BuildConfig::default(),
    };
    config.apply_env()?;
    Ok(config)
}

async fn run_validate_command(args: ValidateArgs) -> anyhow::Result<ExitCode> {
    let config = args.apply_to(load_config(args.config.as_deref())?);
    config.validate()?;

    if args.metrics {
        init_metrics()?;
    }

    let schema = tokio::fs::read(&args.schema)
        .await
        .with_context(|| format!("Failed to read schema {}", args.schema.display()))?;
    let descriptor = tokio::fs::read(&args.descriptor)
        .await
        .with_context(|| format!("Failed to read descriptor {}", args.descriptor.display()))?;

    let input = BuildInput::new(args.job_id(), schema, descriptor).with_extra_pass(args.extra_pass);
    let service = BuildService::from_config(config);

    info!(
        job_id = %input.job_id,
        launcher = service.launcher_name(),
        "Validating {}",
        args.schema.display()
    );

    let result = service.build(&input).await;

    let json = serde_json::to_string_pretty(&result)
        .map_err(|e| anyhow::anyhow!("Failed to serialize JSON output: {}", e))?;
    println!("{}", json);

    if args.metrics {
        eprint!("{}", export_metrics());
    }

    Ok(if result.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn run_show_config_command(args: ConfigArgs) -> anyhow::Result<()> {
    let config = load_config(args.config.as_deref())?;
    config.validate()?;
    print!("{}", serde_yaml::to_string(&config)?);
    Ok(())
}

fn run_sandbox_args_command(args: ConfigArgs) -> anyhow::Result<()> {
    let config = load_config(args.config.as_deref())?;
    config.validate()?;
    println!("{}", sandbox_command_line(&config).join(" "));
    Ok(())
}

/// Runtime command line for a placeholder workspace. Nothing is launched.
fn sandbox_command_line(config: &BuildConfig) -> Vec<String> {
    let launcher = SandboxLauncher::from_config(config);
    let workspace = config.work_root.join(workspace_dir_name("example"));

    let mut line = vec![launcher.config().runtime.clone()];
    line.extend(launcher.run_args(
        &container_name(),
        &workspace,
        &config.validator_path,
        &LaunchFlags::default(),
    ));
    line
}
