use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{AnyDelimiterCodec, Framed};
use tracing::{debug, info, warn};

use gaia_lib::tasks::{LineOutcome, Shell, TransportKind};

const MAX_LINE: usize = 8192;

/// Accept loop for the telnet transport. Lines in are LF- or CRLF-
/// terminated; lines out are CRLF-terminated.
pub async fn run_telnet_listener(
    listener: TcpListener,
    shell: Arc<Shell>,
) -> Result<(), anyhow::Error> {
    info!(addr = %listener.local_addr()?, "telnet listener up");
    loop {
        let (socket, peer) = listener.accept().await?;
        let shell = shell.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(socket, peer, shell).await {
                debug!(peer = %peer, error = %e, "telnet connection ended with error");
            }
        });
    }
}

async fn handle_connection(
    socket: TcpStream,
    peer: SocketAddr,
    shell: Arc<Shell>,
) -> Result<(), anyhow::Error> {
    info!(peer = %peer, "telnet connection");
    let codec = AnyDelimiterCodec::new_with_max_length(vec![b'\n'], b"\r\n".to_vec(), MAX_LINE);
    let (mut write, mut read) = Framed::new(socket, codec).split();

    let (sid, mut outbound) = shell.hub.connect(TransportKind::Telnet);
    // Serialized per-session output: one pump owns the socket's write half.
    let pump = tokio::spawn(async move {
        while let Some(line) = outbound.recv().await {
            if write.send(line).await.is_err() {
                break;
            }
        }
    });

    shell.greet(sid).await;

    while let Some(frame) = read.next().await {
        match frame {
            Ok(bytes) => {
                let line = decode_line(&bytes);
                if shell.process_line(sid, &line).await == LineOutcome::Disconnect {
                    break;
                }
            }
            Err(e) => {
                warn!(peer = %peer, error = %e, "telnet framing error");
                break;
            }
        }
    }

    shell.hub.disconnect(sid);
    // The hub dropped the session's sender; the pump drains what is left
    // and exits.
    pump.await.ok();
    info!(peer = %peer, "telnet connection closed");
    Ok(())
}

/// Input is UTF-8 with a Latin-1 fallback for stray bytes from older
/// clients.
fn decode_line(bytes: &[u8]) -> String {
    let text = match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => bytes.iter().map(|b| *b as char).collect(),
    };
    text.trim_end_matches('\r').to_string()
}
