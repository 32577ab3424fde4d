use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod collector;
mod config;
mod digest;
mod error;
mod logger;
mod mailer;
mod models;
mod scheduler;
mod service;

use collector::Collector;
use config::AppConfig;
use mailer::SmtpSender;

#[derive(Parser, Debug)]
#[command(author, version, about = "Aggregate RSS feeds and email digests on a schedule")]
struct Args {
    /// Path to configuration file.
    #[arg(long, global = true, default_value = "config.yml")]
    config: PathBuf,

    /// Enable debug logging.
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render the digest for a delivery and print it without sending.
    Preview { delivery: String },
    /// Send a digest immediately.
    Send { delivery: String },
    /// Start the scheduler and run until interrupted.
    Run,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logger::init(args.verbose)?;

    let config = AppConfig::load(&args.config)?;
    let fetcher = Collector::new()?;

    match args.command {
        Command::Preview { delivery } => {
            let context = config.resolve_delivery(&delivery)?;
            let articles = service::gather_articles(&context, &fetcher, None).await?;
            let rendered = digest::render(&context, &articles, chrono::Utc::now());
            println!("Subject: {}\n", rendered.subject);
            println!("{}", rendered.text);
        }
        Command::Send { delivery } => {
            let context = config.resolve_delivery(&delivery)?;
            let (count, _) = service::deliver(&context, &fetcher, &SmtpSender).await?;
            println!(
                "Sent digest '{}' with {} articles to {}",
                delivery,
                count,
                context.delivery.recipients.join(", ")
            );
        }
        Command::Run => {
            scheduler::run(&config, &fetcher, &SmtpSender).await?;
        }
    }

    Ok(())
}
