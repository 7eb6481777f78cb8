use std::io::{self, BufRead, Write};

use async_trait::async_trait;
use colored::Colorize;
use tokio::task::spawn_blocking;
use wss_client::explorer::{Confirmation, Prompt, Prompter};

/// `y` or `yes` in any case, everything else is a no.
pub fn parse_answer(line: &str) -> Confirmation {
    match line.trim().to_lowercase().as_str() {
        "y" | "yes" => Confirmation::Confirmed,
        _ => Confirmation::Cancelled,
    }
}

fn ask(prompt: Prompt) -> io::Result<Confirmation> {
    let mut stderr = io::stderr().lock();
    write!(stderr, "{}: {} [y/N] ", prompt.title.bold(), prompt.message)?;
    stderr.flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(parse_answer(&line))
}

/// Asks on the terminal.
pub struct TerminalPrompter;

#[async_trait]
impl Prompter for TerminalPrompter {
    async fn confirm(&self, prompt: Prompt) -> Confirmation {
        match spawn_blocking(move || ask(prompt)).await {
            Ok(Ok(answer)) => answer,
            Ok(Err(e)) => {
                log::error!("Could not read the answer: {}", e);
                Confirmation::Cancelled
            }
            Err(e) => {
                log::error!("Prompt task failed: {}", e);
                Confirmation::Cancelled
            }
        }
    }

    async fn alert(&self, prompt: Prompt) {
        eprintln!("{}: {}", prompt.title.red().bold(), prompt.message);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_answer() {
        assert_eq!(parse_answer("y\n"), Confirmation::Confirmed);
        assert_eq!(parse_answer(" YES "), Confirmation::Confirmed);
        assert_eq!(parse_answer(""), Confirmation::Cancelled);
        assert_eq!(parse_answer("yep"), Confirmation::Cancelled);
    }
}
