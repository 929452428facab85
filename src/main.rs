use anyhow::Context;
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use serde_json::json;
use std::collections::HashMap;
use std::io::Write;

use relay_rs::flow::executor::{Executor, RunOutcome};
use relay_rs::flow::state::{StateUpdate, ThreadId};
use relay_rs::flow::store::StateStore;
use relay_rs::triage::email::fields;
use relay_rs::triage::{build_graph, RuntimeConfig};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a YAML runtime config
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Triage one email, prompting on the terminal when a reviewer is needed
    Triage {
        /// Body of the customer email
        #[arg(short, long)]
        email: String,

        /// Sender address
        #[arg(short, long)]
        sender: String,

        /// Thread id for persistence (defaults to a fresh uuid)
        #[arg(short, long)]
        thread: Option<String>,
    },
    /// Serve the triage workflow over HTTP
    Serve {
        #[arg(short, long, default_value_t = 8080)]
        port: u16,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => {
            RuntimeConfig::load(path).with_context(|| format!("failed to load config {}", path))?
        }
        None => RuntimeConfig::default(),
    }
    .with_env_overrides();

    let services = config.services()?;
    let graph = build_graph(&services)?;
    let executor = Executor::new(graph, StateStore::new());

    match args.command {
        Commands::Triage {
            email,
            sender,
            thread,
        } => {
            let thread =
                ThreadId::new(thread.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()));
            run_triage(&executor, &thread, &email, &sender).await?;
        }
        Commands::Serve { port } => {
            relay_rs::triage::server::serve(executor, port)
                .await
                .map_err(|e| anyhow::anyhow!(e))?;
        }
    }

    Ok(())
}

async fn run_triage(
    executor: &Executor,
    thread: &ThreadId,
    email: &str,
    sender: &str,
) -> anyhow::Result<()> {
    let initial: StateUpdate = HashMap::from([
        (fields::EMAIL_CONTENT.to_string(), json!(email)),
        (fields::SENDER_ID.to_string(), json!(sender)),
    ]);

    let mut outcome = executor.start(thread, initial).await?;

    while let RunOutcome::Suspended { payload, .. } = &outcome {
        println!("Escalated for review:");
        println!("{}", serde_json::to_string_pretty(payload)?);

        print!("Approve an automatic draft? [Y/N] ");
        std::io::stdout().flush()?;
        let mut approval = String::new();
        std::io::stdin().read_line(&mut approval)?;

        let answer = if approval.trim().eq_ignore_ascii_case("y") {
            json!({ "approval": "Y" })
        } else {
            print!("Enter your edited response: ");
            std::io::stdout().flush()?;
            let mut edited = String::new();
            std::io::stdin().read_line(&mut edited)?;
            json!({ "approval": "N", "edited_response": edited.trim() })
        };

        outcome = executor.resume(thread, answer).await?;
    }

    if let RunOutcome::Completed { state, visited } = outcome {
        println!("Run completed: {}", visited.join(" -> "));
        if let Some(draft) = state.get_str(fields::DRAFT_RESPONSE) {
            println!("Reply sent to {}:\n{}", sender, draft);
        }
    }

    Ok(())
}
