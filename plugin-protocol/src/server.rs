use crate::codec::{decode_frame, write_frame};
use crate::messages::{Event, Frame, Request, Response};
use crate::model::Handshake;
use anyhow::{bail, Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, BufReader, Lines, Stdin, Stdout};

/// The plugin side of the protocol.
///
/// Reads requests from the host and writes the handshake, responses and
/// stream events back. Plugins written in Rust wrap their stdio in one of
/// these and never print anything else on stdout.
pub struct PluginServer<R, W> {
    lines: Lines<R>,
    writer: W,
}

impl PluginServer<BufReader<Stdin>, Stdout> {
    /// A server bound to the process' own stdin/stdout.
    pub fn stdio() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
    }
}

impl<R, W> PluginServer<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            lines: reader.lines(),
            writer,
        }
    }

    pub async fn handshake(&mut self, handshake: Handshake) -> Result<()> {
        self.send(Frame::Handshake(handshake)).await
    }

    /// Waits for the next request.
    ///
    /// # Returns
    ///
    /// * `Ok(Some(request))` for each request frame.
    /// * `Ok(None)` once the host closed our stdin.
    /// * `Err` if the host sent something that is not a request.
    pub async fn next_request(&mut self) -> Result<Option<Request>> {
        loop {
            let line = match self.lines.next_line().await.context("read request line")? {
                Some(line) => line,
                None => return Ok(None),
            };
            if line.trim().is_empty() {
                continue;
            }
            match decode_frame(&line)? {
                Frame::Request(req) => return Ok(Some(req)),
                other => bail!("host sent a {} frame", other.kind()),
            }
        }
    }

    pub async fn respond(&mut self, response: Response) -> Result<()> {
        self.send(Frame::Response(response)).await
    }

    pub async fn emit(&mut self, event: Event) -> Result<()> {
        self.send(Frame::Event(event)).await
    }

    async fn send(&mut self, frame: Frame) -> Result<()> {
        write_frame(&mut self.writer, &frame).await?;
        Ok(())
    }
}
