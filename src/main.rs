use log_tail::{Config, SeekInfo, tail_file};
use std::env;
use std::process;
use tokio_stream::StreamExt;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "Usage: log-tail [-f | -F] [--poll] [-n] <file>";

fn parse_args(args: &[String]) -> Option<(Config, String)> {
    let mut config = Config::default();
    let mut file = None;

    for arg in args {
        match arg.as_str() {
            "-f" => config.follow = true,
            "-F" => {
                config.follow = true;
                config.reopen = true;
            }
            "--poll" => config.poll = true,
            "-n" => config.location = Some(SeekInfo::end(0)),
            other if other.starts_with('-') => return None,
            other if file.is_none() => file = Some(other.to_string()),
            _ => return None,
        }
    }

    file.map(|file| (config, file))
}

#[tokio::main]
async fn main() {
    // Logs go to stderr so stdout carries only the tailed lines
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let Some((config, file_path)) = parse_args(&args) else {
        eprintln!("{}", USAGE);
        process::exit(1);
    };

    let (tail, mut lines) = match tail_file(&file_path, config).await {
        Ok(started) => started,
        Err(e) => {
            eprintln!("Error setting up tail: {}", e);
            process::exit(1);
        }
    };

    let stopper = tail.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, stopping tail of {}", stopper.filename().display());
            stopper.stop();
        }
    });

    while let Some(line) = lines.next().await {
        if line.err.is_none() {
            println!("{}", line.text);
        }
    }

    let result = tail.wait().await;
    tail.cleanup();
    if let Err(e) = result {
        eprintln!("Error reading file: {}", e);
        process::exit(1);
    }
}
