//! Newline-delimited-JSON transport (§6 Transport): one accepting thread
//! per controller, one reader/writer thread pair per connected executor.
//! Framing mirrors the teacher's `JsonlWriter` idiom (`crates/beak-core/
//! src/fuzz/jsonl.rs`), generalized from an append-only file sink to a
//! live duplex socket.

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{info, warn};

use crate::error::{Result, RpcError};
use crate::wire::Envelope;

/// One connected executor's duplex channel, already framed as
/// `Envelope`s. The reader thread feeds `inbox`; sending on `outbox`
/// writes a line to the socket.
pub struct Connection {
    pub name: String,
    pub inbox: Receiver<Envelope>,
    outbox: Sender<Envelope>,
}

impl Connection {
    pub fn send(&self, envelope: Envelope) -> Result<()> {
        self.outbox.send(envelope).map_err(|_| RpcError::ConnectionLost {
            name: self.name.clone(),
            reason: "writer thread already exited".into(),
        })
    }
}

/// Accepts TCP connections and hands each one, framed, to `on_connect`.
/// Spawns one accepting thread plus a reader/writer pair per connection;
/// never returns until the listener errors or is dropped from another
/// thread (e.g. by closing the underlying socket).
pub fn serve(
    listener: TcpListener,
    on_connect: impl Fn(Connection) + Send + Sync + 'static,
) -> Result<()> {
    let on_connect = std::sync::Arc::new(on_connect);
    for stream in listener.incoming() {
        let stream = match stream {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "accept failed, continuing");
                continue;
            }
        };
        let on_connect = std::sync::Arc::clone(&on_connect);
        thread::Builder::new()
            .name("rpc-conn-setup".to_string())
            .spawn(move || handle_stream(stream, &on_connect))
            .map_err(|e| RpcError::Listen { reason: e.to_string() })?;
    }
    Ok(())
}

fn handle_stream(stream: TcpStream, on_connect: &(dyn Fn(Connection) + Send + Sync)) {
    let peer = stream.peer_addr().map(|a| a.to_string()).unwrap_or_else(|_| "unknown".to_string());
    let read_stream = match stream.try_clone() {
        Ok(s) => s,
        Err(e) => {
            warn!(peer, error = %e, "failed to clone stream for reader thread");
            return;
        }
    };
    let (inbox_tx, inbox_rx) = unbounded();
    let (outbox_tx, outbox_rx) = unbounded::<Envelope>();

    let reader_peer = peer.clone();
    thread::Builder::new()
        .name("rpc-reader".to_string())
        .spawn(move || {
            let mut lines = BufReader::new(read_stream).lines();
            while let Some(Ok(line)) = lines.next() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<Envelope>(&line) {
                    Ok(env) => {
                        if inbox_tx.send(env).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(peer = reader_peer, error = %e, "dropping malformed frame"),
                }
            }
            info!(peer = reader_peer, "reader thread exiting, connection closed");
        })
        .expect("spawn rpc reader thread");

    let mut write_stream = stream;
    let writer_peer = peer.clone();
    thread::Builder::new()
        .name("rpc-writer".to_string())
        .spawn(move || {
            for env in outbox_rx.iter() {
                let Ok(line) = serde_json::to_string(&env) else { continue };
                if writeln!(write_stream, "{line}").is_err() {
                    break;
                }
            }
            info!(peer = writer_peer, "writer thread exiting");
        })
        .expect("spawn rpc writer thread");

    on_connect(Connection { name: peer, inbox: inbox_rx, outbox: outbox_tx });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{CheckRequest, Envelope};
    use std::io::Write as _;
    use std::time::Duration;

    #[test]
    fn serve_delivers_one_framed_envelope_per_line() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let (conn_tx, conn_rx) = unbounded::<Connection>();
        thread::spawn(move || {
            let _ = serve(listener, move |conn| {
                let _ = conn_tx.send(conn);
            });
        });

        let mut client = TcpStream::connect(addr).unwrap();
        let env = Envelope::Check(CheckRequest { features: vec!["cover".into()], disabled_calls: vec![], error: None });
        writeln!(client, "{}", serde_json::to_string(&env).unwrap()).unwrap();

        let conn = conn_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        let received = conn.inbox.recv_timeout(Duration::from_secs(2)).unwrap();
        match received {
            Envelope::Check(req) => assert_eq!(req.features, vec!["cover".to_string()]),
            _ => panic!("wrong variant"),
        }
    }
}
