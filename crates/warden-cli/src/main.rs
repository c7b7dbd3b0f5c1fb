use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser, Debug)]
#[command(name = "warden", version, about = "Warden audit device tools")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Audit device operations
    Device {
        #[command(subcommand)]
        cmd: DeviceCommand,
    },

    /// Filter expression operations
    Filter {
        #[command(subcommand)]
        cmd: FilterCommand,
    },
}

#[derive(Subcommand, Debug)]
enum DeviceCommand {
    /// Build every configured device and write a test entry through it.
    Test {
        /// Device configuration file
        #[arg(long, env = "WARDEN_CONFIG", default_value = "warden.yaml")]
        config: PathBuf,

        /// Only test the device mounted at this path
        #[arg(long)]
        name: Option<String>,
    },

    /// List configured devices.
    List {
        #[arg(long, env = "WARDEN_CONFIG", default_value = "warden.yaml")]
        config: PathBuf,
    },
}

#[derive(Subcommand, Debug)]
enum FilterCommand {
    /// Evaluate an expression against a JSON audit record.
    Check {
        /// Filter expression, e.g. "mount_type == kv and operation == create"
        expression: String,

        /// JSON file holding the record (auth/request/response)
        #[arg(long)]
        record: PathBuf,

        /// Namespace path the request was made in. Defaults to root.
        #[arg(long)]
        namespace: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Audit entries may go to stdout, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.cmd {
        Command::Device { cmd } => match cmd {
            DeviceCommand::Test { config, name } => {
                let tested = commands::device::test(&config, name.as_deref()).await?;
                for device in tested {
                    println!("ok: {device}");
                }
            }
            DeviceCommand::List { config } => {
                for line in commands::device::list(&config)? {
                    println!("{line}");
                }
            }
        },
        Command::Filter { cmd } => match cmd {
            FilterCommand::Check {
                expression,
                record,
                namespace,
            } => {
                let matched =
                    commands::filter::check_file(&expression, &record, namespace.as_deref())
                        .await?;
                println!("{}", if matched { "match" } else { "no match" });
                if !matched {
                    std::process::exit(1);
                }
            }
        },
    }

    Ok(())
}
