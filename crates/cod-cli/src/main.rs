//! codctl - Command-line interface for COD batching and settlement
//!
//! State lives in a JSON file (default `cod-state.json`). Pass
//! `--database-url` or set `DATABASE_URL` to keep shipments and batches in
//! PostgreSQL instead.
//!
//! # Quick Start
//!
//! ```bash
//! codctl quote --goods 100 --shipping 10 --service 15
//! codctl carrier add --code BOSTA --name Bosta --days mon,thu
//! codctl shipment import shipments.json
//! codctl bill <shipment-id>...
//! codctl batch create --carrier BOSTA
//! codctl batch confirm BOSTA-20261016-001
//! codctl receive BOSTA-20261016-001 --amount 1050
//! codctl settle-carrier BOSTA-20261016-001
//! codctl payouts prepare BOSTA-20261016-001
//! codctl payouts settle BOSTA-20261016-001 --method cash --reference RCPT-7
//! ```

use std::path::PathBuf;

use anyhow::anyhow;
use chrono::{NaiveDate, Utc, Weekday};
use clap::{Parser, Subcommand};
use colored::*;

mod commands;
mod display;
mod state;

use cod_amounts::Calculator;
use cod_settlement::SettlementConfig;
use cod_types::{Money, PayoutMethod};
use commands::{batch, parse_shipments, quote, settle, setup};
use state::Workspace;

const DEFAULT_STATE_FILE: &str = "cod-state.json";

/// COD batch & settlement engine
#[derive(Parser)]
#[command(name = "codctl")]
#[command(author = "COD Engine Contributors")]
#[command(version)]
#[command(about = "Batch cash-on-delivery collections and settle carriers and sellers", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// JSON state file holding the store and ledger
    #[arg(long, global = true, default_value = DEFAULT_STATE_FILE, env = "COD_STATE_FILE")]
    state: PathBuf,

    /// Keep shipments and batches in PostgreSQL
    #[arg(long, global = true, env = "DATABASE_URL")]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the COD figures for a set of cost inputs
    Quote {
        /// Goods value paid by the buyer
        #[arg(long)]
        goods: Money,

        /// Shipping cost kept by the carrier
        #[arg(long, default_value = "0")]
        shipping: Money,

        /// Service fee charged to the seller
        #[arg(long, default_value = "0")]
        service: Money,

        /// Base fee used when services are excluded
        #[arg(long)]
        base: Option<Money>,

        /// Buyer does not pay the service fee as part of COD
        #[arg(long)]
        exclude_services: bool,

        /// Advance collected at pickup
        #[arg(long)]
        advance: Option<Money>,
    },

    /// Manage carriers
    Carrier {
        #[command(subcommand)]
        action: CarrierCommands,
    },

    /// Load shipments
    Shipment {
        #[command(subcommand)]
        action: ShipmentCommands,
    },

    /// Post the invoice and vendor bill of shipments
    Bill {
        /// Shipment ids
        #[arg(required = true)]
        shipments: Vec<String>,
    },

    /// Manage collection batches
    Batch {
        #[command(subcommand)]
        action: BatchCommands,
    },

    /// Record the cash a carrier handed over for a batch
    Receive {
        /// Batch name or id
        batch: String,

        /// Amount actually received
        #[arg(long)]
        amount: Money,
    },

    /// Pay the carrier's outstanding vendor bills for a batch
    SettleCarrier {
        /// Batch name or id
        batch: String,
    },

    /// Seller payouts of a batch
    Payouts {
        #[command(subcommand)]
        action: PayoutCommands,
    },

    /// Open today's scheduled batches
    Scan {
        /// Collection date (defaults to today)
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Batch shipments left at the carrier too long
    Sweep {
        /// Overdue threshold in days (defaults to COD_OVERDUE_DAYS)
        #[arg(long)]
        days: Option<u32>,
    },

    /// Run database migrations
    Migrate,
}

#[derive(Subcommand)]
enum CarrierCommands {
    /// Add a carrier
    Add {
        /// Short code used in batch names
        #[arg(long)]
        code: String,

        /// Display name
        #[arg(long)]
        name: String,

        /// Collection weekdays for scheduled batches, e.g. mon,thu
        #[arg(long, value_delimiter = ',')]
        days: Vec<Weekday>,
    },
}

#[derive(Subcommand)]
enum ShipmentCommands {
    /// Import shipments from a JSON array
    Import {
        /// Path to the JSON file
        file: PathBuf,
    },
}

#[derive(Subcommand)]
enum BatchCommands {
    /// Create a batch from eligible shipments
    Create {
        /// Carrier code or id
        #[arg(long)]
        carrier: String,

        /// Collection date (defaults to today)
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Explicit shipment ids; all eligible shipments when omitted
        #[arg(long = "shipment")]
        shipments: Vec<String>,
    },

    /// Confirm a draft batch
    Confirm {
        /// Batch name or id
        batch: String,
    },

    /// Cancel a draft or confirmed batch
    Cancel {
        /// Batch name or id
        batch: String,
    },

    /// Show a batch with its totals and payouts
    Show {
        /// Batch name or id
        batch: String,
    },

    /// List batches
    List {
        /// Only this carrier
        #[arg(long)]
        carrier: Option<String>,

        /// Hide cancelled batches
        #[arg(long)]
        open: bool,
    },
}

#[derive(Subcommand)]
enum PayoutCommands {
    /// Group the batch's shipments into one payout per seller
    Prepare {
        /// Batch name or id
        batch: String,
    },

    /// Confirm and settle every unpaid payout
    Settle {
        /// Batch name or id
        batch: String,

        /// How sellers are paid: cash, bank or check
        #[arg(long)]
        method: Option<PayoutMethod>,

        /// Payment reference recorded on every unpaid payout
        #[arg(long)]
        reference: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("{} {:#}", "error:".bright_red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Commands::Migrate = cli.command {
        let url = cli
            .database_url
            .as_deref()
            .ok_or_else(|| anyhow!("migrate needs --database-url or DATABASE_URL"))?;
        let db = state::connect(url).await?;
        db.migrate().await?;
        display::success("Migrations applied");
        return Ok(());
    }

    let config = SettlementConfig::from_env()?;
    if let Commands::Quote {
        goods,
        shipping,
        service,
        base,
        exclude_services,
        advance,
    } = cli.command
    {
        let calculator = Calculator::for_currency(&config.currency);
        return quote::show_quote(
            &calculator,
            quote::QuoteInput {
                goods,
                shipping,
                service,
                base: base.unwrap_or(service),
                exclude_services,
                advance,
            },
        );
    }

    let today = Utc::now().date_naive();
    let ws = Workspace::open(cli.state, cli.database_url.as_deref(), config).await?;

    match cli.command {
        Commands::Carrier { action } => match action {
            CarrierCommands::Add { code, name, days } => {
                setup::add_carrier(&ws, &code, &name, days).await?;
            }
        },
        Commands::Shipment { action } => match action {
            ShipmentCommands::Import { file } => setup::import_shipments(&ws, &file).await?,
        },
        Commands::Bill { shipments } => {
            setup::bill_shipments(&ws, &parse_shipments(&shipments)?).await?;
        }
        Commands::Batch { action } => match action {
            BatchCommands::Create {
                carrier,
                date,
                shipments,
            } => {
                batch::create(
                    &ws,
                    &carrier,
                    date.unwrap_or(today),
                    parse_shipments(&shipments)?,
                )
                .await?;
            }
            BatchCommands::Confirm { batch: key } => batch::confirm(&ws, &key).await?,
            BatchCommands::Cancel { batch: key } => batch::cancel(&ws, &key).await?,
            BatchCommands::Show { batch: key } => {
                batch::show(&ws, &key).await?;
                return Ok(());
            }
            BatchCommands::List { carrier, open } => {
                batch::list(&ws, carrier.as_deref(), open).await?;
                return Ok(());
            }
        },
        Commands::Receive { batch: key, amount } => settle::receive(&ws, &key, amount).await?,
        Commands::SettleCarrier { batch: key } => settle::settle_carrier(&ws, &key).await?,
        Commands::Payouts { action } => match action {
            PayoutCommands::Prepare { batch: key } => settle::prepare_payouts(&ws, &key).await?,
            PayoutCommands::Settle {
                batch: key,
                method,
                reference,
            } => settle::settle_payouts(&ws, &key, method, reference).await?,
        },
        Commands::Scan { date } => batch::scan(&ws, date.unwrap_or(today)).await?,
        Commands::Sweep { days } => batch::sweep(&ws, days).await?,
        Commands::Quote { .. } | Commands::Migrate => {}
    }

    ws.save().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_batch_create() {
        let cli = Cli::try_parse_from([
            "codctl",
            "--state",
            "/tmp/cod.json",
            "batch",
            "create",
            "--carrier",
            "BOSTA",
            "--date",
            "2026-10-16",
            "--shipment",
            "shp_a",
            "--shipment",
            "shp_b",
        ])
        .unwrap();
        match cli.command {
            Commands::Batch {
                action:
                    BatchCommands::Create {
                        carrier,
                        date,
                        shipments,
                    },
            } => {
                assert_eq!(carrier, "BOSTA");
                assert_eq!(date, NaiveDate::from_ymd_opt(2026, 10, 16));
                assert_eq!(shipments, vec!["shp_a", "shp_b"]);
            }
            _ => panic!("expected batch create"),
        }
    }

    #[test]
    fn test_parse_money_and_weekdays() {
        let cli = Cli::try_parse_from(["codctl", "quote", "--goods", "100.50", "--shipping", "10"]).unwrap();
        match cli.command {
            Commands::Quote { goods, base, .. } => {
                assert_eq!(goods, Money::from_minor(10050, 2));
                assert_eq!(base, None);
            }
            _ => panic!("expected quote"),
        }

        let cli = Cli::try_parse_from([
            "codctl", "carrier", "add", "--code", "arx", "--name", "Aramex", "--days", "mon,thu",
        ])
        .unwrap();
        match cli.command {
            Commands::Carrier {
                action: CarrierCommands::Add { days, .. },
            } => assert_eq!(days, vec![Weekday::Mon, Weekday::Thu]),
            _ => panic!("expected carrier add"),
        }
    }

    #[test]
    fn test_parse_payout_method() {
        let cli = Cli::try_parse_from([
            "codctl", "payouts", "settle", "BOSTA-20261016-001", "--method", "cash", "--reference", "RCPT-7",
        ])
        .unwrap();
        match cli.command {
            Commands::Payouts {
                action: PayoutCommands::Settle { method, reference, .. },
            } => {
                assert_eq!(method, Some(PayoutMethod::Cash));
                assert_eq!(reference.as_deref(), Some("RCPT-7"));
            }
            _ => panic!("expected payouts settle"),
        }

        let bad = Cli::try_parse_from(["codctl", "payouts", "settle", "B", "--method", "wire"]);
        assert!(bad.is_err());
    }
}
