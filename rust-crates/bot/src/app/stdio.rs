// JSON-lines chat transport: intents arrive on stdin, actions leave on stdout.
use crate::{
    Result,
    app::{
        chat_output::ChatOutput,
        intent_source::IntentSource,
    },
    intents::Intent,
    render::Reply,
};
use anyhow::Context;
use serde::Serialize;
use tokio::io::{
    AsyncBufReadExt,
    AsyncWrite,
    AsyncWriteExt,
    BufReader,
    Lines,
    Stdin,
    Stdout,
};

pub struct StdinIntents {
    lines: Lines<BufReader<Stdin>>,
}

impl StdinIntents {
    pub fn new() -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
        }
    }
}

impl Default for StdinIntents {
    fn default() -> Self {
        Self::new()
    }
}

impl IntentSource for StdinIntents {
    async fn next_intent(&mut self) -> Result<Option<Intent>> {
        loop {
            let Some(line) = self.lines.next_line().await.context("read stdin")? else {
                return Ok(None);
            };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(intent) => return Ok(Some(intent)),
                Err(error) => tracing::warn!("Skipping unreadable intent line: {error}"),
            }
        }
    }
}

#[derive(Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum Action<'a> {
    Send {
        chat_id: i64,
        message_id: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        reply_to: Option<i64>,
        #[serde(flatten)]
        reply: &'a Reply,
    },
    Edit {
        chat_id: i64,
        message_id: i64,
        #[serde(flatten)]
        reply: &'a Reply,
    },
}

/// Writes one JSON action per line and hands out sequential message ids.
pub struct JsonLinesChat<W> {
    writer: W,
    next_message_id: i64,
}

pub type StdoutChat = JsonLinesChat<Stdout>;

impl StdoutChat {
    pub fn stdout() -> Self {
        JsonLinesChat::new(tokio::io::stdout())
    }
}

impl<W> JsonLinesChat<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            next_message_id: 1,
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: AsyncWrite + Unpin> JsonLinesChat<W> {
    async fn write(&mut self, action: &Action<'_>) -> Result<()> {
        let mut line = serde_json::to_vec(action).context("serialize chat action")?;
        line.push(b'\n');
        self.writer
            .write_all(&line)
            .await
            .context("write chat action")?;
        self.writer.flush().await.context("flush chat output")?;
        Ok(())
    }
}

impl<W: AsyncWrite + Unpin> ChatOutput for JsonLinesChat<W> {
    async fn send(&mut self, chat_id: i64, reply_to: Option<i64>, reply: &Reply) -> Result<i64> {
        let message_id = self.next_message_id;
        self.next_message_id += 1;
        self.write(&Action::Send {
            chat_id,
            message_id,
            reply_to,
            reply,
        })
        .await?;
        Ok(message_id)
    }

    async fn edit(&mut self, chat_id: i64, message_id: i64, reply: &Reply) -> Result<()> {
        self.write(&Action::Edit {
            chat_id,
            message_id,
            reply,
        })
        .await
    }
}
