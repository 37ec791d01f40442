//! App Deployer CLI Application
//!
//! Compile contract sources, deploy them to a ledger and interact with the
//! resulting applications, either directly or through the REST API.

use app_deployer::api::{create_router, ApiState};
use app_deployer::config::LedgerArgs;
use app_deployer::contract::{disassemble, SandboxedCompiler};
use app_deployer::ledger::{HttpGateway, LedgerGateway, MemoryLedger};
use app_deployer::pipeline::{InteractOutcome, Orchestrator};
use app_deployer::transaction::{Credential, LocalSigner, TransactionSigner};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "app-deployer")]
#[command(author = "Darshan")]
#[command(version = "0.1.0")]
#[command(about = "Compile, deploy and interact with ledger applications", long_about = None)]
struct Cli {
    #[command(flatten)]
    ledger: LedgerArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the REST API server
    Serve {
        /// Port to listen on
        #[arg(short, long, env = "PORT", default_value = "5000")]
        port: u16,
    },

    /// Compile and deploy a contract source file
    Deploy {
        /// Contract source file
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Store a value in, or read the value of, a deployed application
    Interact {
        /// Application id
        #[arg(short, long)]
        app_id: u64,

        /// `store` or `read`
        #[arg(long)]
        action: String,

        /// Value to store
        #[arg(long)]
        value: Option<String>,
    },

    /// Compile a contract source file and print its programs
    Compile {
        /// Contract source file
        #[arg(short, long)]
        file: PathBuf,

        /// Print the assembly listing instead of disassembled bytecode
        #[arg(long)]
        listing: bool,
    },

    /// Generate a new signing key
    Keygen,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Compile { file, listing } => cmd_compile(file, *listing),
        Commands::Keygen => {
            cmd_keygen();
            Ok(())
        }
        command => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(run_pipeline_command(command, &cli.ledger))
        }
    }
}

/// Build the orchestrator from configuration
fn build_orchestrator(args: &LedgerArgs) -> Result<Orchestrator, Box<dyn std::error::Error>> {
    let config = args.pipeline_config()?;

    let gateway: Arc<dyn LedgerGateway> = if args.memory_ledger {
        println!("🧪 Using in-process memory ledger");
        Arc::new(MemoryLedger::default())
    } else {
        let gateway_config = args.gateway_config()?;
        println!("🌐 Ledger node: {}", gateway_config.node_url);
        Arc::new(HttpGateway::new(&gateway_config)?)
    };

    let (signer, key_error) = LocalSigner::from_config(args.signer_key.as_deref());
    if let Some(e) = key_error {
        log::warn!("Ignoring signer key: {}", e);
    }
    match signer.address() {
        Ok(address) => println!("🔑 Signing as {}", address),
        Err(_) => println!("⚠️  No signing key configured; only reads will succeed"),
    }

    Ok(Orchestrator::new(
        gateway,
        Arc::new(signer),
        SandboxedCompiler::new(),
        config,
    ))
}

async fn run_pipeline_command(
    command: &Commands,
    args: &LedgerArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let orchestrator = build_orchestrator(args)?;

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        println!("\n📴 Shutting down...");
        trigger.cancel();
    });

    match command {
        Commands::Serve { port } => {
            let app = create_router(ApiState::new(orchestrator, shutdown.clone()));

            let addr = format!("0.0.0.0:{}", port);
            println!("🚀 REST API server starting on http://localhost:{}", port);
            println!();
            println!("📖 Available endpoints:");
            println!("   GET  /health                      - Health check");
            println!("   POST /api/smart-contract/deploy   - Compile and deploy");
            println!("   POST /api/smart-contract/interact - Store or read a value");
            println!();

            let listener = tokio::net::TcpListener::bind(&addr).await?;
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await?;
        }

        Commands::Deploy { file } => {
            println!("📜 Deploying contract from {:?}...", file);
            let source = fs::read_to_string(file)?;
            let outcome = orchestrator.deploy(&source, &shutdown).await?;

            println!("✅ Application deployed!");
            println!("   App ID: {}", outcome.application_id);
            println!("   Transaction: {}", outcome.tx_id);
            println!("   Confirmed in round: {}", outcome.confirmed_round);
        }

        Commands::Interact {
            app_id,
            action,
            value,
        } => match orchestrator
            .interact(*app_id, action, value.as_deref(), &shutdown)
            .await?
        {
            InteractOutcome::Stored {
                tx_id,
                confirmed_round,
            } => {
                println!("✅ Value stored successfully");
                println!("   Transaction: {}", tx_id);
                println!("   Confirmed in round: {}", confirmed_round);
            }
            InteractOutcome::Value(Some(value)) => println!("📦 Stored value: {}", value),
            InteractOutcome::Value(None) => println!("📦 Application {} holds no value", app_id),
        },

        Commands::Compile { .. } | Commands::Keygen => unreachable!(),
    }

    Ok(())
}

fn cmd_compile(file: &Path, listing: bool) -> Result<(), Box<dyn std::error::Error>> {
    let source = fs::read_to_string(file)?;
    let compiler = SandboxedCompiler::new();

    if listing {
        let programs = compiler.compile_listing(&source)?;
        println!("📜 Approval program:");
        println!("{}", programs.approval);
        println!("📜 Clear program:");
        println!("{}", programs.clear);
        return Ok(());
    }

    let artifact = compiler.compile(&source)?;
    println!("📜 Approval program ({} bytes):", artifact.approval().len());
    for line in disassemble(artifact.approval()).lines() {
        println!("   {}", line);
    }
    println!("📜 Clear program ({} bytes):", artifact.clear().len());
    for line in disassemble(artifact.clear()).lines() {
        println!("   {}", line);
    }
    Ok(())
}

fn cmd_keygen() {
    let credential = Credential::generate();
    println!("🔑 New signing key");
    println!("   Address: {}", credential.address());
    println!("   Secret:  {}", credential.secret_hex());
    println!();
    println!("   Set LEDGER_SIGNER_KEY to the secret to sign with this key.");
}
