use anyhow::Result;
use clap::{Parser, Subcommand};
use std::process::Command;

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Tasks for the CryptoMemory workspace", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build every workspace member
    Build,
    /// Run the protocol core tests against the chip simulator
    Test,
    /// Run the cmtool demo against the simulator
    Demo {
        /// Optional device profile
        #[arg(long)]
        profile: Option<String>,
    },
}

fn cargo(args: &[&str], what: &str) -> Result<()> {
    let status = Command::new("cargo").args(args).status()?;
    if !status.success() {
        anyhow::bail!("{what} failed");
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Build => {
            println!("Building workspace...");
            cargo(&["build", "--workspace"], "Build")?;
        }
        Commands::Test => {
            println!("Testing cm-core...");
            cargo(&["test", "-p", "cm-core"], "Test")?;
        }
        Commands::Demo { profile } => {
            println!("Running demo...");
            let mut args = vec!["run", "-p", "cm-cli", "--"];
            if let Some(path) = profile {
                args.extend(["--profile", path.as_str()]);
            }
            args.push("demo");
            cargo(&args, "Demo")?;
        }
    }

    Ok(())
}
