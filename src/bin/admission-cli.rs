use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "admission-cli")]
#[command(about = "Management CLI for the admission gateway", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080", env = "ADMISSION_URL")]
    url: String,

    #[arg(short, long, env = "ADMISSION_API_KEY")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show gateway status, throttle and dependency state
    Status,
    /// List circuit breaker state per dependency
    Circuits,
    /// Revoke a single token until it expires
    RevokeToken {
        token_id: String,
        /// Token expiry, unix seconds
        #[arg(long)]
        expires_at: u64,
    },
    /// Revoke every token a subject was issued before the cutover
    RevokeSubject {
        subject_id: String,
        /// Cutover, unix seconds (defaults to now on the server)
        #[arg(long)]
        cutover: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    let res = match cli.command {
        Commands::Status => {
            client.get(format!("{}/admin/status", cli.url))
                .headers(headers)
                .send()
                .await?
        }
        Commands::Circuits => {
            client.get(format!("{}/admin/circuits", cli.url))
                .headers(headers)
                .send()
                .await?
        }
        Commands::RevokeToken { token_id, expires_at } => {
            client.post(format!("{}/admin/revocations/token", cli.url))
                .headers(headers)
                .json(&json!({ "token_id": token_id, "expires_at": expires_at }))
                .send()
                .await?
        }
        Commands::RevokeSubject { subject_id, cutover } => {
            client.post(format!("{}/admin/revocations/subject", cli.url))
                .headers(headers)
                .json(&json!({ "subject_id": subject_id, "cutover": cutover }))
                .send()
                .await?
        }
    };

    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("{}", text);
        }
        std::process::exit(1);
    }

    if status == reqwest::StatusCode::NO_CONTENT {
        println!("OK");
        return Ok(());
    }

    let body: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}
