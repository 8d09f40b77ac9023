use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use purchases_backend::{
    BackendConfig, DispatchDelay, PostReceiptData, PostReceiptOutcome, PurchasesClient,
    RequestError,
};
use serde_json::json;
use std::path::PathBuf;
use tracing::{info, warn};

/// Coalescing, cache-validating client for the purchases backend
#[derive(Parser)]
#[command(name = "purchases-backend")]
#[command(version)]
#[command(about = "Coalescing, cache-validating client for the purchases backend", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level: trace, debug, info, warn, error
    #[arg(short = 'v', long, value_name = "LEVEL", global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch the offerings presented to a user
    Offerings {
        #[arg(long, value_name = "APP_USER_ID")]
        user: String,
        #[arg(long, value_enum, default_value_t = Delay::None)]
        delay: Delay,
    },
    /// Fetch customer info for a user
    Customer {
        #[arg(long, value_name = "APP_USER_ID")]
        user: String,
        #[arg(long, value_enum, default_value_t = Delay::None)]
        delay: Delay,
    },
    /// Fetch the product to entitlement mapping
    ProductsEntitlements {
        #[arg(long, value_enum, default_value_t = Delay::None)]
        delay: Delay,
    },
    /// Upload a receipt for transactions not yet synced
    PostReceipt {
        #[arg(long, value_name = "APP_USER_ID")]
        user: String,
        /// File holding the raw receipt bytes
        #[arg(long, value_name = "FILE")]
        receipt: PathBuf,
        /// Transaction covered by the receipt (repeatable)
        #[arg(long = "transaction", value_name = "ID")]
        transactions: Vec<String>,
        /// Product purchased (repeatable)
        #[arg(long = "product", value_name = "ID")]
        products: Vec<String>,
        /// Send as a restore even if every transaction is synced
        #[arg(long)]
        restore: bool,
        #[arg(long, value_name = "OFFERING_ID")]
        offering: Option<String>,
    },
    /// Inspect or reset local synced-transaction state
    Ledger {
        #[command(subcommand)]
        action: LedgerCommand,
    },
}

#[derive(Subcommand)]
enum LedgerCommand {
    /// Print synced transaction ids
    List,
    /// Forget synced transactions and cached responses
    Reset,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Delay {
    None,
    Default,
    Long,
}

impl From<Delay> for DispatchDelay {
    fn from(delay: Delay) -> Self {
        match delay {
            Delay::None => DispatchDelay::None,
            Delay::Default => DispatchDelay::Default,
            Delay::Long => DispatchDelay::Long,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?
        .block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<()> {
    let mut config = if let Some(config_path) = &cli.config {
        BackendConfig::load_from_path(config_path)
            .with_context(|| format!("Failed to load config from {}", config_path.display()))?
    } else {
        BackendConfig::load().context("Failed to load configuration")?
    };

    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }

    purchases_backend::init_tracing(&config);
    config.validate().context("Invalid configuration")?;

    let client = purchases_backend::build_client(&config)?;
    run_command(&client, cli.command).await
}

async fn run_command(client: &PurchasesClient, command: Commands) -> Result<()> {
    match command {
        Commands::Offerings { user, delay } => {
            let offerings = client
                .get_offerings(&user, delay.into())
                .await
                .map_err(|e| request_failed("offerings", e))?;
            print_json(&offerings)
        }
        Commands::Customer { user, delay } => {
            let info = client
                .get_customer_info(&user, delay.into())
                .await
                .map_err(|e| request_failed("customer info", e))?;
            print_json(&info)
        }
        Commands::ProductsEntitlements { delay } => {
            let mapping = client
                .get_products_entitlements(delay.into())
                .await
                .map_err(|e| request_failed("products entitlements", e))?;
            print_json(&mapping)
        }
        Commands::PostReceipt {
            user,
            receipt,
            transactions,
            products,
            restore,
            offering,
        } => {
            let receipt = std::fs::read(&receipt)
                .with_context(|| format!("Failed to read receipt from {}", receipt.display()))?;
            let data = PostReceiptData {
                app_user_id: user,
                receipt,
                transaction_ids: transactions,
                product_ids: products,
                is_restore: restore,
                presented_offering_identifier: offering,
            };

            match client
                .post_receipt(data)
                .await
                .map_err(|e| request_failed("receipt post", e))?
            {
                PostReceiptOutcome::Posted(info) => print_json(&info),
                PostReceiptOutcome::AlreadySynced => {
                    print_json(&json!({ "status": "already_synced" }))
                }
            }
        }
        Commands::Ledger { action } => match action {
            LedgerCommand::List => print_json(&client.ledger().synced_ids()),
            LedgerCommand::Reset => {
                let forgotten = client.ledger().len();
                client
                    .ledger()
                    .reset()
                    .context("Failed to reset synced transaction ledger")?;
                client.clear_caches();
                info!(forgotten, "local purchase state reset");
                print_json(&json!({ "forgotten_transactions": forgotten }))
            }
        },
    }
}

fn request_failed(operation: &str, error: RequestError) -> anyhow::Error {
    warn!(
        operation,
        error_type = error.error_type(),
        retryable = error.is_retryable(),
        successfully_synced = error.successfully_synced(),
        "request failed"
    );
    anyhow::Error::new(error).context(format!("{operation} request failed"))
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("Failed to render output")?;
    println!("{rendered}");
    Ok(())
}
