// SPDX-License-Identifier: Apache-2.0
use anyhow::{bail, Context, Result};
use clap::Parser;
use definition_core::{definition_chash, Expr, Unit};
use definition_engine::{has_references, Engine, MemoryLedger, UpgradeSchedule, ValidationContext};
use dotenv::dotenv;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Checks an address or asset definition against a unit and a ledger
/// fixture.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Definition in its JSON array form.
    #[clap(long)]
    definition_file: String,
    /// Unit the definition is judged against.
    #[clap(long)]
    unit_file: String,
    /// Chain state; an empty ledger when absent.
    #[clap(long)]
    ledger_file: Option<String>,
    /// Upgrade activation heights; production heights when absent.
    #[clap(long)]
    upgrades_file: Option<String>,
    /// Authentifier map (path -> signature/preimage/proof). Defaults to the
    /// authentifiers of the unit's author with this address.
    #[clap(long)]
    authentifiers_file: Option<String>,
    /// Address being spent from; the chash of the definition when absent.
    #[clap(long, conflicts_with = "asset")]
    address: Option<String>,
    /// Evaluate as the condition of this asset instead of an address.
    #[clap(long)]
    asset: Option<String>,
    #[clap(long)]
    last_ball_mci: u64,
    #[clap(long, default_value_t = 0)]
    timestamp: u64,
    /// Hex of the 32-byte hash the unit is signed over.
    #[clap(long)]
    hash_to_sign: Option<String>,
    /// Accept all-dash placeholder signatures.
    #[clap(long)]
    unsigned: bool,
    #[clap(long)]
    no_references: bool,
    #[clap(long)]
    private_asset: bool,
    /// Only run static validation.
    #[clap(long)]
    validate_only: bool,
}

fn read_json<T: DeserializeOwned>(path: &str) -> Result<T> {
    let file = File::open(path).with_context(|| format!("opening {path}"))?;
    let reader = BufReader::new(file);
    serde_json::from_reader(reader).with_context(|| format!("parsing {path}"))
}

fn parse_hash(hex_str: Option<&str>) -> Result<[u8; 32]> {
    let Some(hex_str) = hex_str else {
        return Ok([0u8; 32]);
    };
    let stripped = hex_str.strip_prefix("0x").unwrap_or(hex_str);
    let bytes = hex::decode(stripped)?;
    let Ok(hash) = <[u8; 32]>::try_from(bytes.as_slice()) else {
        bail!("hash to sign must be 32 bytes, got {}", bytes.len());
    };
    Ok(hash)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let definition: Expr = read_json(&args.definition_file)?;
    let unit: Unit = read_json(&args.unit_file)?;
    let ledger = match &args.ledger_file {
        Some(path) => read_json(path)?,
        None => MemoryLedger::new(),
    };
    let upgrades = match &args.upgrades_file {
        Some(path) => read_json(path)?,
        None => UpgradeSchedule::default(),
    };

    let mut ctx = ValidationContext::new(args.last_ball_mci, parse_hash(args.hash_to_sign.as_deref())?)
        .with_upgrades(upgrades)
        .with_timestamp(args.timestamp);
    if args.unsigned {
        ctx = ctx.unsigned();
    }
    if args.no_references {
        ctx = ctx.without_references();
    }
    if args.private_asset {
        ctx = ctx.defining_private_asset();
    }

    let engine = Engine::new(&ledger);
    let is_asset = args.asset.is_some();

    if args.validate_only {
        engine
            .validate_definition(&definition, &unit, &ctx, None, is_asset)
            .await?;
        info!(has_references = has_references(&definition), "definition is valid");
        println!("valid");
        return Ok(());
    }

    let verdict = if is_asset {
        engine
            .validate_authentifiers(None, args.asset.as_deref(), &definition, &unit, &ctx, None)
            .await?
    } else {
        let address = args.address.clone().unwrap_or_else(|| definition_chash(&definition));
        let authentifiers: BTreeMap<String, String> = match &args.authentifiers_file {
            Some(path) => read_json(path)?,
            None => unit
                .authors
                .iter()
                .find(|author| author.address == address)
                .map(|author| author.authentifiers.clone())
                .unwrap_or_default(),
        };
        info!(address = %address, paths = authentifiers.len(), "evaluating authentifiers");
        engine
            .validate_authentifiers(Some(&address), None, &definition, &unit, &ctx, Some(&authentifiers))
            .await?
    };

    println!("{verdict}");
    Ok(())
}
