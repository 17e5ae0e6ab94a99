use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "market-chain")]
pub struct Opt {
    #[arg(long = "config", global = true, help = "TOML file with node settings")]
    pub config: Option<PathBuf>,
    #[arg(long = "json", global = true, help = "Print results as JSON")]
    pub json: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    #[command(name = "createkey", about = "Create a new key in the local keyring")]
    CreateKey,
    #[command(name = "listkeys", about = "Print the names in the local keyring")]
    ListKeys,
    #[command(name = "register", about = "Register a name for a key")]
    Register {
        #[arg(help = "The name to claim")]
        name: String,
        #[arg(help = "Keyring entry whose public key the name will carry")]
        key: String,
        #[arg(long = "signer", help = "Keyring entry holding the name's current key")]
        signer: Option<String>,
    },
    #[command(name = "issue", about = "Issue the stock named after an account")]
    Issue {
        #[arg(help = "Registered name to issue as a stock")]
        stock: String,
    },
    #[command(name = "transfer", about = "Move units of a stock between accounts")]
    Transfer {
        #[arg(help = "Sending account")]
        from: String,
        #[arg(help = "Receiving account or address; empty pays the block generator")]
        to: String,
        #[arg(help = "Stock name")]
        stock: String,
        #[arg(help = "Units to move")]
        amount: u64,
    },
    #[command(name = "balance", about = "Balance of an account in one stock")]
    Balance {
        account: String,
        stock: String,
    },
    #[command(name = "contents", about = "Stocks an account holds")]
    Contents { account: String },
    #[command(name = "history", about = "Transfer history of an account in one stock")]
    History {
        account: String,
        stock: String,
        #[arg(long = "since", default_value_t = 0, help = "Earliest time in ms")]
        since: u64,
        #[arg(long = "until", default_value_t = u64::MAX, help = "Latest time in ms")]
        until: u64,
    },
    #[command(name = "printchain", about = "Print all blocks in the chain")]
    Printchain,
    #[command(name = "names", about = "List registered names in a range")]
    Names {
        #[arg(default_value = "")]
        start: String,
        #[arg(default_value = "\u{10ffff}")]
        end: String,
        #[arg(long = "limit", default_value_t = 100)]
        limit: usize,
    },
    #[command(name = "startnode", about = "Run the node")]
    StartNode {
        #[arg(long = "generate", help = "Mine blocks, crediting GENERATOR")]
        generator: Option<String>,
    },
}
