// Licensed under the Apache-2.0 license

use anyhow::Result;
use clap::{Parser, Subcommand};

mod check;
mod wire;

#[derive(Parser)]
#[command(name = "xtask", about = "Development tasks for serbus-i2c")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encode an ASCII message into transmit queue bytes
    Encode {
        /// Message text, for example "s 50 D0 r 02 p"
        text: String,
        /// Wrap the message in START and STOP
        #[arg(long)]
        framed: bool,
    },
    /// List the elements of encoded queue bytes given as hex
    Decode {
        /// Hex bytes, whitespace is ignored
        hex: String,
    },
    /// Run formatting, lint and test checks
    Check {
        /// Apply formatting instead of only checking it
        #[arg(long)]
        fix: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Encode { text, framed } => {
            let bytes = wire::encode(&text, framed)?;
            println!("{}", wire::to_hex(&bytes));
        }
        Commands::Decode { hex } => {
            let bytes = wire::parse_hex(&hex)?;
            for element in wire::describe(&bytes) {
                println!("{element}");
            }
        }
        Commands::Check { fix } => check::run(fix)?,
    }

    Ok(())
}
