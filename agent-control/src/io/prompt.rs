//! Human prompt backends.
//!
//! The [`Prompter`] trait decouples ask dispatch from how a human is reached.
//! [`TerminalPrompter`] talks over a line-oriented reader/writer pair (stdin and
//! stderr by default, keeping stdout free for outbound payloads). Tests use
//! scripted prompters from `test_support`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Stderr, Stdin,
};
use tokio::sync::Mutex;

/// Yes/no decision request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmRequest {
    pub ask_id: u64,
    pub title: String,
    pub detail: Option<String>,
    /// Answer used when the human just presses enter.
    pub default: bool,
}

/// Free-text question, optionally with suggested answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextRequest {
    pub ask_id: u64,
    pub question: String,
    pub suggestions: Vec<String>,
    /// Answer used when the human just presses enter.
    pub default: Option<String>,
}

/// Abstraction over ways of asking a human.
///
/// `Ok(None)` means the prompt was interrupted (closed input, cancelled UI);
/// callers fall back to their safe default.
#[async_trait]
pub trait Prompter: Send + Sync {
    async fn confirm(&self, request: ConfirmRequest) -> Result<Option<bool>>;

    async fn ask_text(&self, request: TextRequest) -> Result<Option<String>>;
}

/// Line-oriented prompter.
pub struct TerminalPrompter<R, W> {
    io: Mutex<(R, W)>,
}

impl TerminalPrompter<BufReader<Stdin>, Stderr> {
    pub fn stdio() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), tokio::io::stderr())
    }
}

impl<R, W> TerminalPrompter<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            io: Mutex::new((reader, writer)),
        }
    }

    /// Consume the prompter and return its writer (tests inspect what was shown).
    pub fn into_writer(self) -> W {
        self.io.into_inner().1
    }
}

async fn read_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Option<String>> {
    let mut line = String::new();
    let read = reader.read_line(&mut line).await.context("read prompt input")?;
    if read == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_string()))
}

fn parse_yes_no(input: &str) -> Option<bool> {
    match input.to_ascii_lowercase().as_str() {
        "y" | "yes" => Some(true),
        "n" | "no" => Some(false),
        _ => None,
    }
}

#[async_trait]
impl<R, W> Prompter for TerminalPrompter<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn confirm(&self, request: ConfirmRequest) -> Result<Option<bool>> {
        let mut guard = self.io.lock().await;
        let (reader, writer) = &mut *guard;

        let hint = if request.default { "[Y/n]" } else { "[y/N]" };
        let mut text = request.title.clone();
        if let Some(detail) = &request.detail {
            text.push('\n');
            text.push_str(detail);
        }
        loop {
            writer
                .write_all(format!("{text} {hint} ").as_bytes())
                .await
                .context("write prompt")?;
            writer.flush().await.context("flush prompt")?;

            let Some(input) = read_line(reader).await? else {
                return Ok(None);
            };
            if input.is_empty() {
                return Ok(Some(request.default));
            }
            if let Some(answer) = parse_yes_no(&input) {
                return Ok(Some(answer));
            }
            writer
                .write_all(b"please answer y or n\n")
                .await
                .context("write prompt")?;
        }
    }

    async fn ask_text(&self, request: TextRequest) -> Result<Option<String>> {
        let mut guard = self.io.lock().await;
        let (reader, writer) = &mut *guard;

        let mut text = format!("{}\n", request.question);
        for (idx, suggestion) in request.suggestions.iter().enumerate() {
            text.push_str(&format!("  {}. {}\n", idx + 1, suggestion));
        }
        match &request.default {
            Some(default) => text.push_str(&format!("> [{default}] ")),
            None => text.push_str("> "),
        }
        writer.write_all(text.as_bytes()).await.context("write prompt")?;
        writer.flush().await.context("flush prompt")?;

        let Some(input) = read_line(reader).await? else {
            return Ok(None);
        };
        if input.is_empty() {
            return Ok(request.default.or(Some(input)));
        }
        Ok(Some(input))
    }
}
