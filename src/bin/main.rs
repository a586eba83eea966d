use clap::Parser;
use stock_news_assistant::{
    agent::Orchestrator, config::AssistantConfig, error::OrchestrationError, TurnResult,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Ask about stock prices and company news
#[derive(Parser, Debug)]
#[command(name = "assistant")]
#[command(about = "Stock price and news assistant")]
#[command(version)]
struct Cli {
    /// Session to continue; a new one is started when omitted
    #[arg(long, short)]
    session: Option<String>,

    /// Ask a single question and exit
    question: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = AssistantConfig::from_env()?;
    let orchestrator = Orchestrator::from_config(&config)?;
    let session_id = cli
        .session
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    info!(%session_id, "Assistant ready");

    if !cli.question.is_empty() {
        let question = cli.question.join(" ");
        let result = ask(&orchestrator, &session_id, &question).await?;
        println!("{}", result.final_answer);
        return Ok(());
    }

    println!("Ask about a stock price or company news. Type 'quit' to leave.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"\n> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let question = line.trim();

        if question.is_empty() {
            continue;
        }
        if question.eq_ignore_ascii_case("quit") || question.eq_ignore_ascii_case("exit") {
            break;
        }

        match ask(&orchestrator, &session_id, question).await {
            Ok(result) => println!("{}", result.final_answer),
            Err(OrchestrationError::Cancelled) => println!("(cancelled)"),
            Err(e) => eprintln!("Error: {}", e),
        }
    }

    Ok(())
}

/// Run one turn; Ctrl-C abandons it
async fn ask(
    orchestrator: &Orchestrator,
    session_id: &str,
    question: &str,
) -> Result<TurnResult, OrchestrationError> {
    let cancel = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    let result = orchestrator
        .handle_turn_with_cancel(session_id, question, &cancel)
        .await;
    watcher.abort();
    result
}
