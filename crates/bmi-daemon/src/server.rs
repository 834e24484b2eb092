//! Line-delimited JSON command transport.
//!
//! Each line on a connection is one `CommandRequest`; each reply is one
//! `CommandResponse` line. Commands block, so they run on the blocking pool.

use anyhow::{Context, Result};
use bmi_core::{BmiError, CommandRequest, CommandResponse};
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task;

pub type Handler = Arc<dyn Fn(CommandRequest) -> CommandResponse + Send + Sync>;

pub async fn serve(listener: TcpListener, handler: Handler) -> Result<()> {
    let addr = listener.local_addr()?;
    info!("command endpoint listening on {addr}");

    loop {
        let (stream, peer) = listener.accept().await?;
        debug!("accepted connection from {peer}");
        let handler = handler.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_connection(stream, handler).await {
                warn!("connection from {peer} failed: {err:#}");
            }
        });
    }
}

async fn handle_connection(stream: TcpStream, handler: Handler) -> Result<()> {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<CommandRequest>(&line) {
            Ok(request) => {
                let handler = handler.clone();
                task::spawn_blocking(move || handler(request))
                    .await
                    .context("command worker panicked")?
            }
            Err(err) => CommandResponse::from_error(&BmiError::InvalidArguments(format!(
                "malformed request: {err}"
            ))),
        };

        let mut payload = serde_json::to_vec(&response)?;
        payload.push(b'\n');
        write.write_all(&payload).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bmi_core::{Credentials, ErrorKind};
    use serde_json::{json, Value};

    async fn start(handler: Handler) -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, handler));
        addr
    }

    async fn exchange(addr: std::net::SocketAddr, lines: &[String]) -> Vec<Value> {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read, mut write) = stream.into_split();
        for line in lines {
            write.write_all(format!("{line}\n").as_bytes()).await.unwrap();
        }
        write.shutdown().await.unwrap();

        let mut replies = Vec::new();
        let mut reader = BufReader::new(read).lines();
        while let Some(line) = reader.next_line().await.unwrap() {
            replies.push(serde_json::from_str(&line).unwrap());
        }
        replies
    }

    fn echo() -> Handler {
        Arc::new(|request: CommandRequest| {
            CommandResponse::ok(json!({
                "command": request.command,
                "project": request.credentials.project,
                "args": request.args,
            }))
        })
    }

    #[tokio::test]
    async fn replies_once_per_request_line() {
        let addr = start(echo()).await;
        let request = CommandRequest {
            credentials: Credentials::new("alice", "pw", "bmi"),
            command: "list_images".into(),
            args: vec![json!("x")],
        };
        let line = serde_json::to_string(&request).unwrap();

        let replies = exchange(addr, &[line.clone(), String::new(), line]).await;
        assert_eq!(replies.len(), 2);
        assert_eq!(
            replies[0],
            json!({"status_code": 200, "body": {"command": "list_images", "project": "bmi", "args": ["x"]}})
        );
    }

    #[tokio::test]
    async fn malformed_lines_get_a_400() {
        let addr = start(echo()).await;
        let replies = exchange(addr, &["{\"command\": 1}".to_string()]).await;
        let reply: CommandResponse = serde_json::from_value(replies[0].clone()).unwrap();
        assert_eq!(reply.status_code(), 400);
        assert!(matches!(
            reply,
            CommandResponse::Failure { kind: ErrorKind::InvalidArguments, .. }
        ));
    }
}
