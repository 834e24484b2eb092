//! Blocking client for the daemon's line-delimited JSON endpoint.

use anyhow::{bail, Context, Result};
use bmi_core::{CommandRequest, CommandResponse};
use serde_json::Value;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::time::Duration;

/// Positional arguments as typed on the command line. `null` marks an
/// omitted optional; everything else is passed as a string.
pub fn positional_args(raw: &[String]) -> Vec<Value> {
    raw.iter()
        .map(|arg| match arg.as_str() {
            "null" => Value::Null,
            other => Value::String(other.to_string()),
        })
        .collect()
}

pub fn send(addr: &str, request: &CommandRequest, timeout: Duration) -> Result<CommandResponse> {
    let stream = TcpStream::connect(addr).with_context(|| format!("connect to daemon at {addr}"))?;
    stream.set_read_timeout(Some(timeout))?;
    stream.set_write_timeout(Some(timeout))?;

    let mut payload = serde_json::to_vec(request)?;
    payload.push(b'\n');
    (&stream).write_all(&payload).context("send request")?;

    let mut line = String::new();
    BufReader::new(&stream)
        .read_line(&mut line)
        .context("read response")?;
    if line.trim().is_empty() {
        bail!("daemon at {addr} closed the connection without replying");
    }
    serde_json::from_str(&line).with_context(|| format!("decode response: {}", line.trim()))
}
