//! Model hosted in a separate process, spoken to over stdin/stdout.
//!
//! Keeps the detector and OCR runtimes (and their crashes) out of the station
//! process. Each request is one JSON header line, followed for frame requests
//! by the raw pixel bytes; each reply is one JSON line:
//!
//! ```text
//! -> {"op":"hello"}
//! <- {"ready":true,"name":"yolov8n+paddleocr"}
//! -> {"op":"detect","width":1280,"height":720,"format":"bgr8","len":2764800}
//! -> <2764800 bytes>
//! <- {"detections":[{"bbox":[x1,y1,x2,y2],"score":0.91,"class_id":7}]}
//! -> {"op":"read_text",...same header...}
//! <- {"candidates":[{"text":"ABC1234","confidence":0.88}]}
//! -> {"op":"quit"}
//! ```
//!
//! A reply of `{"error":"..."}` fails that request only.

use std::{
    io::{self, BufRead, BufReader, BufWriter, Write},
    process::{Child, ChildStdin, ChildStdout, Command, Stdio},
    thread,
    time::{Duration, Instant},
};

use anyhow::{anyhow, bail, Context, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use video_ingest::{Frame, FrameFormat};

use crate::{
    detector::{Detection, PlateModel},
    plate::TextCandidate,
};

const QUIT_GRACE: Duration = Duration::from_secs(2);

/// How long a freshly launched model process may take to answer `hello`.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Serialize)]
struct FrameHeader<'a> {
    op: &'a str,
    width: u32,
    height: u32,
    format: &'static str,
    len: usize,
}

#[derive(Deserialize)]
struct Hello {
    ready: bool,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Reply<T> {
    Error { error: String },
    Ok(T),
}

#[derive(Deserialize)]
struct DetectReply {
    detections: Vec<Detection>,
}

#[derive(Deserialize)]
struct ReadTextReply {
    candidates: Vec<TextCandidate>,
}

pub struct SidecarModel {
    command: String,
    name: String,
    child: Child,
    stdin: Option<BufWriter<ChildStdin>>,
    replies: Receiver<io::Result<String>>,
}

impl SidecarModel {
    /// Launch `command` through `sh -c` and wait for its ready handshake.
    ///
    /// An error here means the model could not be loaded.
    pub fn spawn(command: &str) -> Result<Self> {
        Self::spawn_with_timeout(command, HANDSHAKE_TIMEOUT)
    }

    /// As [`SidecarModel::spawn`], failing if `hello` is not answered within
    /// `timeout`. The process is killed on any handshake failure.
    pub fn spawn_with_timeout(command: &str, timeout: Duration) -> Result<Self> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| format!("failed to launch model process `{command}`"))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("failed to capture model process stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("failed to capture model process stdout"))?;

        let replies = match spawn_reader(stdout) {
            Ok(replies) => replies,
            Err(err) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(err).context("failed to start model process reader");
            }
        };

        let mut model = Self {
            command: command.to_string(),
            name: command.to_string(),
            child,
            stdin: Some(BufWriter::new(stdin)),
            replies,
        };

        if let Err(err) = model.handshake(timeout) {
            model.kill();
            return Err(err);
        }
        info!("model process ready: {}", model.name);
        Ok(model)
    }

    fn handshake(&mut self, timeout: Duration) -> Result<()> {
        self.send_line(&serde_json::json!({ "op": "hello" }))?;
        let hello: Reply<Hello> = self
            .read_reply(Some(timeout))
            .context("model process handshake failed")?;
        match hello {
            Reply::Error { error } => bail!("model process refused to start: {error}"),
            Reply::Ok(hello) if !hello.ready => bail!("model process reported not ready"),
            Reply::Ok(hello) => {
                if let Some(name) = hello.name {
                    self.name = name;
                }
                Ok(())
            }
        }
    }

    fn kill(&mut self) {
        self.stdin = None;
        if let Err(err) = self.child.kill() {
            debug!("failed to kill model process: {err}");
        }
        let _ = self.child.wait();
    }

    fn send_line<T: Serialize>(&mut self, message: &T) -> Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| anyhow!("model process stdin already closed"))?;
        serde_json::to_writer(&mut *stdin, message)?;
        stdin.write_all(b"\n")?;
        stdin.flush()?;
        Ok(())
    }

    fn send_frame(&mut self, op: &str, frame: &Frame) -> Result<()> {
        let header = FrameHeader {
            op,
            width: frame.width,
            height: frame.height,
            format: format_name(frame.format),
            len: frame.data.len(),
        };
        self.send_line(&header)?;
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| anyhow!("model process stdin already closed"))?;
        stdin.write_all(&frame.data)?;
        stdin.flush()?;
        Ok(())
    }

    /// Next reply line; `None` waits for as long as the model needs.
    fn read_reply<T>(&mut self, timeout: Option<Duration>) -> Result<T>
    where
        T: for<'de> Deserialize<'de>,
    {
        let received = match timeout {
            Some(timeout) => self.replies.recv_timeout(timeout).map_err(|err| match err {
                RecvTimeoutError::Timeout => anyhow!("no reply within {timeout:?}"),
                RecvTimeoutError::Disconnected => anyhow!("model process closed its output"),
            })?,
            None => self
                .replies
                .recv()
                .map_err(|_| anyhow!("model process closed its output"))?,
        };
        let line = received.context("failed to read from model process")?;
        serde_json::from_str(line.trim_end())
            .with_context(|| format!("malformed model reply: {:?}", line.trim_end()))
    }

    fn request<T: for<'de> Deserialize<'de>>(&mut self, op: &str, frame: &Frame) -> Result<T> {
        self.send_frame(op, frame)?;
        match self.read_reply::<Reply<T>>(None)? {
            Reply::Ok(value) => Ok(value),
            Reply::Error { error } => bail!("model {op} failed: {error}"),
        }
    }
}

impl PlateModel for SidecarModel {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        Ok(self.request::<DetectReply>("detect", frame)?.detections)
    }

    fn read_text(&mut self, frame: &Frame) -> Result<Vec<TextCandidate>> {
        Ok(self.request::<ReadTextReply>("read_text", frame)?.candidates)
    }

    fn release(&mut self) {
        if let Err(err) = self.send_line(&serde_json::json!({ "op": "quit" })) {
            debug!("model process quit request failed: {err}");
        }
        // Closing stdin doubles as a quit signal for simple scripts.
        self.stdin = None;

        let deadline = Instant::now() + QUIT_GRACE;
        loop {
            match self.child.try_wait() {
                Ok(Some(status)) => {
                    debug!("model process exited with {status}");
                    return;
                }
                Ok(None) if Instant::now() < deadline => thread::sleep(Duration::from_millis(20)),
                Ok(None) => break,
                Err(err) => {
                    warn!("failed to poll model process: {err}");
                    break;
                }
            }
        }
        warn!("model process `{}` did not exit; killing it", self.command);
        let _ = self.child.kill();
        let _ = self.child.wait();
    }

    fn describe(&self) -> String {
        format!("model process {}", self.name)
    }
}

/// Forward stdout lines to a channel so replies can be awaited with a deadline.
/// The thread ends when the process closes its output.
fn spawn_reader(stdout: ChildStdout) -> io::Result<Receiver<io::Result<String>>> {
    let (tx, rx) = crossbeam_channel::bounded(1);
    thread::Builder::new()
        .name("model-reader".into())
        .spawn(move || {
            let mut reader = BufReader::new(stdout);
            loop {
                let mut line = String::new();
                match reader.read_line(&mut line) {
                    Ok(0) => break,
                    Ok(_) => {
                        if tx.send(Ok(line)).is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        let _ = tx.send(Err(err));
                        break;
                    }
                }
            }
        })?;
    Ok(rx)
}

fn format_name(format: FrameFormat) -> &'static str {
    match format {
        FrameFormat::Bgr8 => "bgr8",
        FrameFormat::Rgb8 => "rgb8",
        FrameFormat::Gray8 => "gray8",
    }
}
