use std::path::PathBuf;

use anyhow::Result;
use log::debug;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

use gattscope::commands;
use gattscope::config::AppConfig;
use gattscope::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    gattscope::setup_logging();

    let config = match std::env::args().nth(1).map(PathBuf::from) {
        Some(path) => AppConfig::load(&path).await?,
        None => AppConfig::default(),
    };

    let state = AppState::new(&config).await?;

    // Tail the event stream: one printed line per event, like a log pane.
    let mut events = state.events.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => println!("{event}"),
                Err(RecvError::Lagged(missed)) => {
                    eprintln!("(event printer lagged, {missed} events skipped)");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    println!("gattscope ready. Type `help` for commands.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let command = match commands::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                println!("error: {e:#}");
                continue;
            }
        };
        match commands::dispatch(command, &state).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => println!("error: {e:#}"),
        }
    }

    debug!("REPL finished, exiting");
    Ok(())
}
