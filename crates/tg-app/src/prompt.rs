//! Terminal prompts: one-time codes, login details, retry choices.

use async_trait::async_trait;
use std::sync::OnceLock;
use tg_vpn::SecondFactorPrompt;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};
use tokio::sync::Mutex;

type StdinLines = Lines<BufReader<Stdin>>;

/// One buffered reader for the whole process, so piped input is never lost
fn stdin_lines() -> &'static Mutex<StdinLines> {
    static STDIN: OnceLock<Mutex<StdinLines>> = OnceLock::new();
    STDIN.get_or_init(|| Mutex::new(BufReader::new(tokio::io::stdin()).lines()))
}

/// Reads the one-time code from stdin
pub struct StdinPrompt;

#[async_trait]
impl SecondFactorPrompt for StdinPrompt {
    async fn one_time_code(&self) -> Option<String> {
        ask("One-time code (empty to cancel): ").await
    }
}

/// Print `question` and read one line; `None` on EOF or empty answer
pub async fn ask(question: &str) -> Option<String> {
    let mut lines = stdin_lines().lock().await;

    let mut stdout = tokio::io::stdout();
    stdout.write_all(question.as_bytes()).await.ok()?;
    stdout.flush().await.ok()?;

    next_answer(&mut lines).await
}

async fn next_answer<R: AsyncBufRead + Unpin>(lines: &mut Lines<R>) -> Option<String> {
    let line = lines.next_line().await.ok()??;
    normalize(&line)
}

/// Yes/no question, defaulting to no
pub async fn confirm(question: &str) -> bool {
    ask(question).await.as_deref().is_some_and(is_yes)
}

fn normalize(line: &str) -> Option<String> {
    let trimmed = line.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.to_ascii_lowercase().as_str(), "y" | "yes")
}
