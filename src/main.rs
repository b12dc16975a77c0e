use std::{
    fs,
    path::{Path, PathBuf},
    process::ExitCode,
    time::{SystemTime, UNIX_EPOCH},
};

use clap::{Parser, Subcommand};
use rand::{rngs::OsRng, RngCore};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use trading_platform::{
    address::ADDRESS_LEN, deploy, Address, Amount, Call, ConfigError, LedgerError, Platform,
    PlatformConfig, PlatformError, TokenLedger,
};

//==================== CLI surface ====================//

#[derive(Parser)]
#[command(
    name = "trading-platform",
    version,
    about = "Referral token platform: sale rounds, trade rounds, order book"
)]
struct Cli {
    /// Platform state file, rewritten after every successful mutation.
    #[arg(long, global = true, default_value = "platform-state.json")]
    state: PathBuf,

    /// Clock override in unix seconds; defaults to the system clock.
    #[arg(long, global = true)]
    now: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a fresh ledger and platform and write the state file.
    Deploy {
        #[arg(long)]
        deployer: Address,
        #[arg(long)]
        platform: Address,
        /// JSON file with platform parameters; missing keys take defaults.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Overwrite an existing state file.
        #[arg(long)]
        force: bool,
    },
    /// Print a random address.
    Keygen,
    /// Credit native currency to an account.
    Fund { account: Address, amount: Amount },
    Register {
        #[arg(long)]
        from: Address,
        #[arg(long)]
        referrer: Option<Address>,
    },
    /// Let the platform pull up to `amount` tokens from `from`.
    Approve {
        #[arg(long)]
        from: Address,
        amount: Amount,
    },
    /// Buy tokens in the live Sale round.
    Buy {
        #[arg(long)]
        from: Address,
        #[arg(long)]
        value: Amount,
    },
    CreateOrder {
        #[arg(long)]
        from: Address,
        amount: Amount,
        price: Amount,
    },
    BuyOrder {
        #[arg(long)]
        from: Address,
        id: u64,
        #[arg(long)]
        value: Amount,
    },
    FinishOrder {
        #[arg(long)]
        from: Address,
        id: u64,
    },
    NextRound {
        #[arg(long)]
        from: Address,
    },
    /// Show a participant's registration record.
    User { address: Address },
    /// Show a round; the current one when no id is given.
    Round { id: Option<u64> },
    /// Show token and native balances of an account.
    Balance { address: Address },
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("state file {path}: {reason}")]
    State { path: String, reason: String },
    #[error("state file {0} already exists, pass --force to overwrite")]
    StateExists(String),
    #[error("round {0} does not exist")]
    UnknownRound(u64),
    #[error(transparent)]
    Platform(#[from] PlatformError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

//==================== state file ====================//

fn load_state(path: &Path) -> Result<Platform, CliError> {
    let state_err = |reason: String| CliError::State {
        path: path.display().to_string(),
        reason,
    };
    let bytes = fs::read(path).map_err(|e| state_err(e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| state_err(e.to_string()))
}

fn save_state(path: &Path, platform: &Platform) -> Result<(), CliError> {
    let state_err = |reason: String| CliError::State {
        path: path.display().to_string(),
        reason,
    };
    let json = serde_json::to_vec_pretty(platform).map_err(|e| state_err(e.to_string()))?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).map_err(|e| state_err(e.to_string()))?;
    fs::rename(&tmp, path).map_err(|e| state_err(e.to_string()))?;
    tracing::debug!(path = %path.display(), "state saved");
    Ok(())
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{s}"),
        Err(e) => eprintln!("error: cannot render output: {e}"),
    }
}

fn system_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[derive(Serialize)]
struct BalanceView {
    address: Address,
    tokens: String,
    native: String,
    allowance_to_platform: String,
}

//==================== commands ====================//

fn run(cli: Cli) -> Result<(), CliError> {
    let now = cli.now.unwrap_or_else(system_now);
    let state = cli.state.as_path();

    let platform = match cli.command {
        Command::Deploy {
            deployer,
            platform,
            config,
            force,
        } => {
            if state.exists() && !force {
                return Err(CliError::StateExists(state.display().to_string()));
            }
            let config = match config {
                Some(path) => PlatformConfig::load(&path)?,
                None => PlatformConfig::default(),
            };
            let deployed = deploy(deployer, platform, config, now)?;
            save_state(state, &deployed)?;
            print_json(deployed.current_round());
            return Ok(());
        }
        Command::Keygen => {
            let mut bytes = [0u8; ADDRESS_LEN];
            OsRng.fill_bytes(&mut bytes);
            println!("{}", Address::from_bytes(bytes));
            return Ok(());
        }
        Command::User { address } => {
            print_json(&load_state(state)?.get_user(&address));
            return Ok(());
        }
        Command::Round { id } => {
            let platform = load_state(state)?;
            let round = match id {
                Some(id) => platform.get_round(id).ok_or(CliError::UnknownRound(id))?,
                None => platform.current_round(),
            };
            print_json(round);
            return Ok(());
        }
        Command::Balance { address } => {
            let platform = load_state(state)?;
            let ledger = platform.ledger();
            print_json(&BalanceView {
                address,
                tokens: ledger.balance_of(&address).to_string(),
                native: ledger.native_balance_of(&address).to_string(),
                allowance_to_platform: ledger
                    .allowance(&address, &platform.address())
                    .to_string(),
            });
            return Ok(());
        }
        mutation => {
            let mut platform = load_state(state)?;
            apply_command(&mut platform, mutation, now)?;
            platform
        }
    };

    save_state(state, &platform)?;
    print_json(platform.current_round());
    Ok(())
}

fn apply_command(platform: &mut Platform, command: Command, now: u64) -> Result<(), CliError> {
    match command {
        Command::Fund { account, amount } => {
            platform.ledger_mut().credit_native(&account, amount)?;
            println!("funded {account} with {amount}");
        }
        Command::Register { from, referrer } => {
            platform.register(Call::new(from, now), referrer)?;
            println!("registered {from}");
        }
        Command::Approve { from, amount } => {
            let spender = platform.address();
            platform.ledger_mut().approve(from, spender, amount, now)?;
            println!("{from} approved {amount} tokens to {spender}");
        }
        Command::Buy { from, value } => {
            let tokens = platform.buy_tokens(Call::new(from, now).with_value(value))?;
            println!("bought {tokens} tokens");
        }
        Command::CreateOrder {
            from,
            amount,
            price,
        } => {
            let id = platform.create_order(Call::new(from, now), amount, price)?;
            println!("order {id} created");
        }
        Command::BuyOrder { from, id, value } => {
            platform.buy_order(Call::new(from, now).with_value(value), id)?;
            println!("order {id} bought");
        }
        Command::FinishOrder { from, id } => {
            platform.finish_order(Call::new(from, now), id)?;
            println!("order {id} cancelled");
        }
        Command::NextRound { from } => {
            platform.next_round(Call::new(from, now))?;
            println!("round {} opened", platform.current_round().id);
        }
        Command::Deploy { .. }
        | Command::Keygen
        | Command::User { .. }
        | Command::Round { .. }
        | Command::Balance { .. } => {}
    }
    Ok(())
}

//==================== main ====================//

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::warn!(error = %err, "operation rejected");
            eprintln!("error: {err}");
            ExitCode::from(2)
        }
    }
}
