//! Administrator console input.
//!
//! Standard input is read on a dedicated OS thread because reads block.
//! Lines are handed to the async side over a channel; the thread exits
//! on end of input, when the receiver is gone, or once `stop` is
//! cancelled and the next line arrives.

use std::io::BufRead;
use std::thread::JoinHandle;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Capacity of the console line channel.
pub const CONSOLE_CHANNEL_CAPACITY: usize = 32;

/// Spawn a thread that forwards lines from `input` to `tx`.
pub fn spawn_reader<R>(input: R, tx: mpsc::Sender<String>, stop: CancellationToken) -> JoinHandle<()>
where
    R: BufRead + Send + 'static,
{
    std::thread::spawn(move || {
        let mut input = input;
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match input.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to read console input");
                    break;
                }
            }
            if stop.is_cancelled() {
                break;
            }
            if tx.blocking_send(decode_line(&buf)).is_err() {
                break;
            }
        }
        tracing::info!("Console reader stopped");
    })
}

/// Strip the line terminator; invalid UTF-8 becomes U+FFFD.
fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

/// Spawn a reader on the process's standard input.
pub fn spawn_stdin_reader(
    tx: mpsc::Sender<String>,
    stop: CancellationToken,
) -> JoinHandle<()> {
    spawn_reader(std::io::BufReader::new(std::io::stdin()), tx, stop)
}
