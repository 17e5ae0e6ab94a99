// This is my main entry point for the market-chain CLI
// Wallet commands only touch the keyring; everything else opens the node's data directory
use clap::Parser;
use log::{error, info};
use market_chain::core::Command as LedgerCommand;
use market_chain::{
    Command, EventLoop, Node, NodeConfig, Opt, SignedTransaction, Transaction, Wallets,
};
use std::process;

fn main() {
    let opt = Opt::parse();

    // I need the config before logging so the configured level applies; RUST_LOG still wins
    let config = match NodeConfig::load(opt.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    };
    env_logger::builder()
        .filter_level(config.level_filter())
        .parse_default_env()
        .init();

    // If something goes wrong, I log the error and exit with code 1
    if let Err(e) = run_command(config, opt.json, opt.command) {
        error!("Error: {e}");
        process::exit(1);
    }
}

// Signs one command with the named key and queues it in the local pool
// The node mines it the next time it runs with generation on
fn submit(
    config: &NodeConfig,
    wallets: &Wallets,
    signer: &str,
    command: LedgerCommand,
) -> Result<(), Box<dyn std::error::Error>> {
    let wallet = wallets.require(signer)?;
    let mut trx = SignedTransaction::new(Transaction::new(vec![command])?);
    wallet.sign(&mut trx)?;
    let digest = trx.digest()?;

    let mut node = Node::open(config.clone())?;
    if node.add_transaction(trx)? {
        println!("Queued transaction {digest}");
    } else {
        println!("Transaction {digest} is already known");
    }
    Ok(())
}

fn run_command(
    config: NodeConfig,
    json: bool,
    command: Command,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::CreateKey => {
            let mut wallets = Wallets::open(&config.wallet_file)?;
            let address = wallets.create_wallet()?;
            println!("Your new address: {address}");
        }
        Command::ListKeys => {
            let wallets = Wallets::open(&config.wallet_file)?;
            for name in wallets.names() {
                println!("{name}");
            }
        }
        Command::Register { name, key, signer } => {
            let mut wallets = Wallets::open(&config.wallet_file)?;
            let public_key = wallets.require(&key)?.public_key().clone();
            // a fresh name is signed by the key it names; taking over a name needs its current key
            let signer = signer.unwrap_or_else(|| key.clone());
            submit(
                &config,
                &wallets,
                &signer,
                LedgerCommand::RegisterName {
                    name: name.clone(),
                    public_key,
                },
            )?;
            wallets.alias(&key, &name)?;
        }
        Command::Issue { stock } => {
            let wallets = Wallets::open(&config.wallet_file)?;
            submit(
                &config,
                &wallets,
                &stock,
                LedgerCommand::Issue {
                    stock_name: stock.clone(),
                },
            )?;
        }
        Command::Transfer {
            from,
            to,
            stock,
            amount,
        } => {
            if amount == 0 {
                return Err("Amount must be positive".into());
            }
            let wallets = Wallets::open(&config.wallet_file)?;
            submit(
                &config,
                &wallets,
                &from,
                LedgerCommand::Transfer {
                    amount,
                    stock_name: stock,
                    from_name: from.clone(),
                    to_name: to,
                },
            )?;
        }
        Command::Balance { account, stock } => {
            let node = Node::open(config)?;
            match node.get_balance(&account, &stock)? {
                Some(balance) if json => println!("{}", serde_json::json!({ "balance": balance })),
                Some(balance) => println!("Balance of {account} in {stock}: {balance}"),
                None => println!("{account} holds no {stock}"),
            }
        }
        Command::Contents { account } => {
            let node = Node::open(config)?;
            let stocks = node.get_account_contents(&account)?;
            if json {
                println!("{}", serde_json::to_string(&stocks)?);
            } else {
                for stock in stocks {
                    let balance = node.get_balance(&account, &stock)?.unwrap_or(0);
                    println!("{stock}: {balance}");
                }
            }
        }
        Command::History {
            account,
            stock,
            since,
            until,
        } => {
            let node = Node::open(config)?;
            let entries = node.get_transaction_log(&account, &stock, since, until)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                for entry in entries {
                    println!(
                        "{} {} -> {} {} {} (balances {} / {})",
                        entry.utc_time,
                        entry.from,
                        entry.to,
                        entry.amount,
                        entry.stock,
                        entry.from_balance,
                        entry.to_balance
                    );
                }
            }
        }
        Command::Printchain => {
            let node = Node::open(config)?;
            // I walk from the newest block down, the way I always read a chain
            for (index, block) in node.chain().iter().enumerate().rev() {
                let state = node.get_block_state(&block.state)?;
                if json {
                    println!(
                        "{}",
                        serde_json::json!({ "index": index, "block": block, "state": state })
                    );
                    continue;
                }
                println!("Block {index}: {}", block.digest());
                println!("Pre block hash: {}", block.prev_block);
                println!("Timestamp: {}", block.utc_time);
                println!("Nonce: {}", block.nonce);
                if let Some(state) = state {
                    println!("Generator: {}", state.generator);
                    for digest in state.transactions {
                        println!("- Transaction {digest}");
                    }
                }
                println!();
            }
        }
        Command::Names { start, end, limit } => {
            let node = Node::open(config)?;
            let names = node.query_names(&start, &end, limit)?;
            if json {
                println!("{}", serde_json::to_string(&names)?);
            } else {
                for name in names {
                    println!("{name}");
                }
                println!("{} names registered", node.name_count()?);
            }
        }
        Command::StartNode { generator } => {
            let mut node = Node::open(config)?;
            if let Some(generator) = generator {
                println!("Generation is on. Transfers to nobody pay: {generator}");
                node.configure_generation(&generator, true)?;
            }
            info!(
                "Head block {:?}, difficulty {}",
                node.get_head_block_index(),
                node.difficulty()
            );
            let mut event_loop = EventLoop::new(node);
            event_loop.run()?;
        }
    }
    Ok(())
}
