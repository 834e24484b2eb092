//! BMI command-line interface: send orchestration commands to the daemon and
//! inspect local configuration, ledger and catalog state.

use anyhow::{bail, Context, Result};
use bmi_core::{
    command_names,
    config::DEFAULT_CONFIG_PATH,
    export::ledger::parse_ledger,
    logging, BmiConfig, CommandRequest, CommandResponse, Credentials, FileCatalog,
};
use bmi_provider::ImageRepository;
use clap::{Parser, Subcommand};
use log::info;
use rpassword::prompt_password;
use schemars::schema_for;
use serde_json::to_string_pretty;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

mod client;

/// Top-level command-line options shared by every subcommand.
#[derive(Parser, Debug)]
#[command(
    name = "bmi",
    version,
    about = "Bare-metal imaging: provision nodes from copy-on-write boot volumes."
)]
struct Cli {
    /// Path to the BMI configuration file.
    #[arg(short, long, env = "BMI_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one orchestration command on the daemon (see `bmi commands`).
    Exec {
        /// Command name, e.g. `provision` or `list_images`.
        command: String,

        /// Positional arguments; pass `null` to skip an optional one.
        args: Vec<String>,

        /// Acting project.
        #[arg(short, long, env = "BMI_PROJECT")]
        project: String,

        /// User name presented to the daemon and the fabric.
        #[arg(short, long, env = "BMI_USER")]
        user: String,

        /// Password; prompted for when omitted.
        #[arg(long, env = "BMI_PASSWORD", hide_env_values = true)]
        password: Option<String>,

        /// Daemon address; defaults to `daemon.listen` from the configuration.
        #[arg(long, env = "BMI_ADDR")]
        addr: Option<String>,

        /// Seconds to wait for the reply.
        #[arg(long, default_value_t = 600)]
        timeout: u64,
    },

    /// List the commands the daemon accepts.
    Commands,

    /// Print the volume to device mappings recorded in an export ledger.
    Ledger {
        /// Ledger file; defaults to `export.ledger_path` from the configuration.
        file: Option<PathBuf>,
    },

    /// Validate a configuration file.
    Validate {
        /// Emit the configuration JSON schema instead.
        #[arg(long)]
        schema: bool,
    },

    /// Offline catalog maintenance.
    Project {
        #[command(subcommand)]
        action: ProjectAction,
    },
}

#[derive(Subcommand, Debug)]
enum ProjectAction {
    /// Register a project directly in the catalog file.
    Add {
        name: String,
        network: String,
        #[arg(long)]
        id: Option<u64>,
    },
    /// List projects in the catalog file.
    List,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn load_config(path: &PathBuf) -> Result<BmiConfig> {
    BmiConfig::load(path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))
}

fn run() -> Result<()> {
    logging::init("warn");
    let cli = Cli::parse();

    match cli.command {
        Commands::Exec {
            command,
            args,
            project,
            user,
            password,
            addr,
            timeout,
        } => {
            let addr = match addr {
                Some(addr) => addr,
                None => load_config(&cli.config)?.daemon.listen,
            };
            let password = match password {
                Some(password) => password,
                None => prompt_password(format!("Password for {user}: "))?,
            };
            let request = CommandRequest {
                credentials: Credentials::new(&user, &password, &project),
                command,
                args: client::positional_args(&args),
            };
            info!("sending {} to {addr}", request.command);

            let response = client::send(&addr, &request, Duration::from_secs(timeout))?;
            println!("{}", to_string_pretty(&response)?);
            if let CommandResponse::Failure {
                status_code, kind, ..
            } = &response
            {
                bail!("{} failed with {status_code} ({kind:?})", request.command);
            }
        }
        Commands::Commands => {
            for name in command_names() {
                println!("{name}");
            }
        }
        Commands::Ledger { file } => {
            let file = match file {
                Some(file) => file,
                None => load_config(&cli.config)?.ledger_path(),
            };
            let contents = fs::read_to_string(&file)
                .with_context(|| format!("read ledger {}", file.display()))?;
            let entries = parse_ledger(&contents)?;
            if entries.is_empty() {
                println!("No exported volumes in {}.", file.display());
            }
            for (volume, device) in entries {
                println!("{volume}\t{device}");
            }
        }
        Commands::Validate { schema } => {
            if schema {
                let schema = schema_for!(BmiConfig);
                println!("{}", to_string_pretty(&schema)?);
                return Ok(());
            }
            let config = load_config(&cli.config)?;
            println!(
                "Configuration valid (uid={}, pool={}, ledger={}).",
                config.storage.uid, config.storage.pool, config.export.ledger_path
            );
        }
        Commands::Project { action } => {
            let config = load_config(&cli.config)?;
            let catalog = FileCatalog::open(&config.catalog.path)
                .with_context(|| format!("open catalog {}", config.catalog.path))?;
            match action {
                ProjectAction::Add { name, network, id } => {
                    let id = catalog.insert_project(&name, &network, id)?;
                    println!("Added project {name} ({id}) on network {network}.");
                }
                ProjectAction::List => {
                    for project in catalog.list_projects()? {
                        println!("{}\t{}\t{}", project.id, project.name, project.network);
                    }
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn exec_collects_trailing_args() {
        let cli = Cli::try_parse_from([
            "bmi", "exec", "provision", "n1", "base", "net", "eth0", "--project", "bmi", "--user",
            "alice", "--password", "pw",
        ])
        .unwrap();
        match cli.command {
            Commands::Exec { command, args, project, .. } => {
                assert_eq!(command, "provision");
                assert_eq!(args, ["n1", "base", "net", "eth0"]);
                assert_eq!(project, "bmi");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn project_add_accepts_explicit_id() {
        let cli = Cli::try_parse_from(["bmi", "project", "add", "lab", "net9", "--id", "4"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Project {
                action: ProjectAction::Add { id: Some(4), .. }
            }
        ));
    }
}
