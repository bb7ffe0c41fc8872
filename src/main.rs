use clap::Parser;
use dotenv::dotenv;
use ollama_chat::cli::Args;
use std::error::Error;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    dotenv().ok();
    let args = Args::parse();
    ollama_chat::init_logging(&args);
    ollama_chat::run(args).await
}
