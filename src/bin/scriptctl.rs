use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "scriptctl")]
#[command(about = "Management CLI for the scriptd admin API", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://127.0.0.1:8081")]
    url: String,

    #[arg(short, long, env = "SCRIPTD_ADMIN_KEY")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check server status
    Status,
    /// List registered routes
    Routes,
    /// List held connections
    Connections,
    /// Close a held connection by id or alias
    Close { handle: String },
    /// Run a script on the server; prefix with @ to read it from a file
    Eval { script: String },
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

    match cli.command {
        Commands::Status => {
            let res = client
                .get(format!("{}/admin/status", cli.url))
                .headers(headers)
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Routes => {
            let res = client
                .get(format!("{}/admin/routes", cli.url))
                .headers(headers)
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Connections => {
            let res = client
                .get(format!("{}/admin/connections", cli.url))
                .headers(headers)
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Close { handle } => {
            let res = client
                .delete(format!("{}/admin/connections/{}", cli.url, handle))
                .headers(headers)
                .send()
                .await?;
            if res.status().is_success() {
                println!("closed {handle}");
            } else {
                print_response(res).await?;
            }
        }
        Commands::Eval { script } => {
            let source = match script.strip_prefix('@') {
                Some(path) => tokio::fs::read_to_string(path).await?,
                None => script,
            };
            let res = client
                .post(format!("{}/admin/eval", cli.url))
                .headers(headers)
                .body(source)
                .send()
                .await?;
            if !res.status().is_success() {
                return print_response(res).await;
            }
            if print_events(res).await? {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}

/// Print eval records as they arrive. Returns true if the script failed.
async fn print_events(res: reqwest::Response) -> Result<bool, Box<dyn std::error::Error>> {
    let mut failed = false;
    let mut buffer = String::new();
    let mut chunks = res.bytes_stream();

    while let Some(chunk) = chunks.next().await {
        buffer.push_str(&String::from_utf8_lossy(&chunk?));
        while let Some(end) = buffer.find("\n\n") {
            let record: String = buffer.drain(..end + 2).collect();
            let (event, data) = parse_record(&record);
            match event.as_str() {
                "error" => {
                    failed = true;
                    eprintln!("error: {data}");
                }
                "result" => println!("=> {data}"),
                _ => println!("{data}"),
            }
        }
    }
    Ok(failed)
}

fn parse_record(record: &str) -> (String, String) {
    let mut event = String::from("message");
    let mut data = Vec::new();
    for line in record.lines() {
        if let Some(name) = line.strip_prefix("event: ") {
            event = name.to_string();
        } else if let Some(value) = line.strip_prefix("data: ") {
            data.push(value);
        }
    }
    (event, data.join("\n"))
}
