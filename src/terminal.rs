//! Interactive terminal bridge for `exec`.
//!
//! Once the primary connection hands off a URL, a second WebSocket is opened
//! with its own subprotocol. Lines from local input go out as text frames;
//! frames from the remote are written to local output. An empty frame marks
//! the end of a command's output and only redraws the prompt.

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{info, warn};

use crate::error::{CliError, Outcome};
use crate::progress::clear_line_sequence;

/// Subprotocol of the terminal connection.
pub const PROTOCOL_TERMINAL: &str = "test";

/// State of one exec invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecSession {
    pub service_name: String,
    /// Sent lines, oldest first.
    pub history: Vec<String>,
    pub history_index: usize,
}

impl ExecSession {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            history: Vec::new(),
            history_index: 0,
        }
    }

    pub fn record(&mut self, line: &str) {
        self.history.push(line.to_string());
        self.history_index = self.history.len();
    }

    pub fn prompt(&self) -> String {
        format!("{}# ", self.service_name)
    }
}

/// Bridge `input`/`output` to the remote shell until either side closes.
///
/// End of local input is a clean exit; the remote closing is a failure.
pub async fn run_bridge<S, R, W>(
    ws: WebSocketStream<S>,
    input: R,
    mut output: W,
    session: &mut ExecSession,
) -> Outcome
where
    S: AsyncRead + AsyncWrite + Unpin,
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let (mut sink, mut stream) = ws.split();
    let mut lines = input.lines();
    let clear = clear_line_sequence();

    if let Err(e) = redraw(&mut output, &clear, None, session).await {
        return CliError::from(e).into();
    }

    loop {
        tokio::select! {
            biased;
            frame = stream.next() => {
                let text = match frame {
                    Some(Ok(Message::Text(text))) => text.as_str().to_string(),
                    Some(Ok(Message::Binary(bytes))) => String::from_utf8_lossy(&bytes).into_owned(),
                    Some(Ok(Message::Close(_))) | None => {
                        warn!(service = %session.service_name, "Connection aborting, try again later");
                        return Outcome::fatal("terminal connection closed");
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        warn!(error = %e, "Terminal connection failed");
                        return Outcome::fatal(format!("terminal connection error: {e}"));
                    }
                };
                if let Err(e) = redraw(&mut output, &clear, Some(&text), session).await {
                    return CliError::from(e).into();
                }
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    session.record(&line);
                    if let Err(e) = sink.send(Message::Text(line.into())).await {
                        return CliError::from(e).into();
                    }
                }
                Ok(None) => {
                    let _ = sink.close().await;
                    let _ = output.write_all(format!("{clear}\n").as_bytes()).await;
                    let _ = output.flush().await;
                    info!(service = %session.service_name, "Terminal exited");
                    return Outcome::Success;
                }
                Err(e) => return CliError::from(e).into(),
            },
        }
    }
}

/// Print remote `text` (if any, minus one trailing newline) and redraw the prompt.
async fn redraw<W: AsyncWrite + Unpin>(
    output: &mut W,
    clear: &str,
    text: Option<&str>,
    session: &ExecSession,
) -> std::io::Result<()> {
    let mut buf = String::new();
    if let Some(text) = text.filter(|t| !t.is_empty()) {
        buf.push_str(clear);
        buf.push_str(text.strip_suffix('\n').unwrap_or(text));
        buf.push('\n');
    }
    buf.push_str(clear);
    buf.push_str(&session.prompt());
    output.write_all(buf.as_bytes()).await?;
    output.flush().await
}
