#![forbid(unsafe_code)]
//! EduChain command line: key generation, a local demo run and chain inspection.

use clap::{Parser, Subcommand};
use colored::*;
use educhain::blockchain::Blockchain;
use educhain::config::{load_config, Config};
use educhain::credential::CredentialMetadata;
use educhain::crypto::KeyPair;
use educhain::node::Node;
use educhain::persistence::{Database, Persistence};
use educhain::registry::CredentialRegistry;
use educhain::scheduler::RoundRobinScheduler;
use educhain::transaction::{Payload, Transaction};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "educhain.toml")]
    config: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generates a key pair and prints it with its address
    Keygen,
    /// Boots a throwaway chain and walks through the credential lifecycle
    Demo {
        /// Save the resulting ledger and registry to the configured database
        #[arg(long)]
        persist: bool,
    },
    /// Prints the chain stored in the database
    Inspect {
        /// Database file, overriding the configured path
        #[arg(long)]
        db: Option<String>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    config.install_crypto()?;

    match &cli.command {
        Commands::Keygen => keygen()?,
        Commands::Demo { persist } => demo(&config, *persist)?,
        Commands::Inspect { db } => inspect(&config, db.as_deref())?,
    }

    Ok(())
}

fn keygen() -> Result<(), Box<dyn std::error::Error>> {
    let keypair = KeyPair::generate()?;
    println!("{}", "New key pair".bright_cyan().bold());
    println!("  {} {}", "Private key:".bright_white(), keypair.secret_key_hex().red());
    println!("  {} {}", "Public key: ".bright_white(), keypair.public_key_hex());
    println!("  {} {}", "Address:    ".bright_white(), keypair.address().bright_green());
    Ok(())
}

/// Mines the next block with whichever of `authorities` the schedule names.
fn mine_next(node: &Node, authorities: &[&KeyPair]) -> Result<(), Box<dyn std::error::Error>> {
    let next = node.height().map(|h| h + 1).unwrap_or(0);
    let expected = node
        .read(|s| s.chain.expected_authority(next))
        .ok_or("authority set is empty")?;
    let authority = authorities
        .iter()
        .find(|kp| kp.public_key_hex() == expected)
        .ok_or("scheduled authority is not held locally")?;
    let block = node.mine_block(authority).ok_or("block production failed")?;
    println!(
        "{} height {} with {} transaction(s), digest {}",
        "⛏  Mined block".bright_green(),
        block.height,
        block.transactions.len(),
        &block.digest[..16]
    );
    Ok(())
}

fn demo(config: &Config, persist: bool) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", "EduChain demo".bright_cyan().bold());
    println!("{}", "-------------".bright_cyan());

    let root = KeyPair::generate()?;
    let school = KeyPair::generate()?;
    let student = KeyPair::generate()?;
    let employer = KeyPair::generate()?;

    let mut chain = Blockchain::new(
        root.public_key_hex(),
        vec![school.public_key_hex()],
        Arc::new(RoundRobinScheduler),
    )
    .with_batch_limit(config.ledger.batch_limit)
    .with_max_transaction_size(config.ledger.max_transaction_size);
    chain.init_genesis(root.public_key_hex())?;

    let mut node = Node::new(chain, CredentialRegistry::new(school.public_key_hex()));
    if persist {
        node = node.with_persistence(Node::open_persistence(config));
    }
    println!("Root authority:   {}", root.address().bright_yellow());
    println!("School authority: {}", school.address().bright_yellow());
    println!("Student:          {}", student.address().bright_yellow());

    let mut mint = Transaction::new(
        school.public_key_hex(),
        student.address(),
        Payload::mint_degree(student.address(), "QmDemoDiplomaHash"),
    )?;
    mint.sign_with(&school)?;
    let accepted = node.submit_transaction(mint);
    println!("Mint transaction admitted: {}", accepted);

    mine_next(&node, &[&root, &school])?;
    let refs = node.read(|s| s.chain.state().credentials_of(&student.address()).to_vec());
    for credential_ref in &refs {
        println!("  {} {}", "On-chain credential:".bright_white(), credential_ref.bright_green());
    }

    println!();
    println!("{}", "Credential registry".bright_cyan().bold());
    let metadata = CredentialMetadata::new(
        "20210001",
        "Bachelor of Science",
        "ipfs://QmDemoDiploma",
        "QmDemoDiplomaHash",
        "Demo University",
    );
    let token = node.mint(
        metadata,
        &school.public_key_hex(),
        &school.secret_key_hex(),
        &student.address(),
    )?;
    println!("Minted token {}", token.token_id.bright_green());
    println!("Verify: {}", serde_json::to_string_pretty(&node.verify(&token.token_id)?)?);

    node.transfer(&token.token_id, &student.address(), &employer.address())?;
    println!(
        "Transferred to {} (balance {})",
        employer.address().bright_yellow(),
        node.balance(&employer.address())
    );

    node.revoke(&token.token_id)?;
    println!("{}", "Revoked.".red());
    println!("Verify: {}", serde_json::to_string_pretty(&node.verify(&token.token_id)?)?);

    if persist {
        node.persist()?;
        println!("Saved to {}", config.database.path.bright_white());
    }
    Ok(())
}

fn inspect(config: &Config, db: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    let path = db.unwrap_or(&config.database.path);
    let database = Database::open(path)?;
    let snapshot = database
        .load_ledger()?
        .ok_or_else(|| format!("No ledger stored in {}", path))?;

    let chain = Blockchain::from_snapshot(snapshot, Arc::new(RoundRobinScheduler))?;
    println!("{}", "EduChain ledger".bright_cyan().bold());
    println!("Root authority: {}", chain.root_authority_pubkey());
    println!("Authorities:    {}", chain.authority_set().len());
    println!("Pending:        {}", chain.mempool_len());
    println!();

    for block in chain.blocks() {
        println!(
            "{} {} {}",
            format!("#{}", block.height).bright_green().bold(),
            block.digest.bright_white(),
            format!("({} tx)", block.transactions.len()).dimmed()
        );
        for tx in &block.transactions {
            println!(
                "    {} {} -> {}",
                tx.payload.kind().unwrap_or("UNKNOWN").yellow(),
                tx.sender_address,
                tx.recipient_address
            );
        }
    }

    if let Some(registry) = database.load_registry()? {
        let registry = CredentialRegistry::from_snapshot(registry)?;
        println!();
        println!(
            "Registry: {} credential(s), {} revoked",
            registry.len(),
            registry.revoked_ids().len()
        );
    }
    Ok(())
}
