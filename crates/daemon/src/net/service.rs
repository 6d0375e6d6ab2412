//! Loopback socket service
//!
//! Listens on 127.0.0.1 and keeps a small pool of client slots. Accepting
//! pauses while every slot is taken and resumes as soon as one frees up;
//! connected clients are never dropped to make room. Each connection gets
//! a reader task that frames bytes into lines for the control loop.

use common::Result;
use protocol::{BELL, LineBuffer, normalize_newlines};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Delay before retrying after a failed accept.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// How long `stop` waits for connections to drain.
const STOP_TIMEOUT: Duration = Duration::from_secs(2);

const READ_CHUNK: usize = 1024;

/// One complete line received from a client connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientLine {
    pub conn_id: u64,
    pub line: String,
}

struct Slot {
    writer: OwnedWriteHalf,
    reader: JoinHandle<()>,
}

#[derive(Default)]
struct SlotTable {
    slots: HashMap<u64, Slot>,
    next_id: u64,
}

/// Accepts extension connections and moves lines in and bytes out.
pub struct SocketService {
    table: Arc<Mutex<SlotTable>>,
    slot_freed: Arc<Notify>,
    port: u16,
    accept_task: JoinHandle<()>,
}

impl SocketService {
    /// Bind the loopback listener and start accepting.
    ///
    /// Port 0 binds an ephemeral port; the chosen one is reported by
    /// [`SocketService::port`] and written to `port_file` when given.
    pub async fn bind(
        port: u16,
        max_clients: usize,
        port_file: Option<&Path>,
        line_tx: async_channel::Sender<ClientLine>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", port)).await?;
        let port = listener.local_addr()?.port();
        info!("extension socket listening on 127.0.0.1:{}", port);

        if let Some(path) = port_file
            && let Err(e) = std::fs::write(path, format!("{}\n", port))
        {
            warn!("could not write port file {}: {}", path.display(), e);
        }

        let table = Arc::new(Mutex::new(SlotTable::default()));
        let slot_freed = Arc::new(Notify::new());
        let accept_task = tokio::spawn(accept_loop(
            listener,
            table.clone(),
            slot_freed.clone(),
            max_clients,
            line_tx,
        ));

        Ok(Self {
            table,
            slot_freed,
            port,
            accept_task,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub async fn client_count(&self) -> usize {
        self.table.lock().await.slots.len()
    }

    /// Write one reply line to a single connection. Newlines in the payload
    /// are normalized to the wire convention and a terminator is appended.
    /// Returns false when the connection is gone.
    pub async fn send_line(&self, conn_id: u64, line: &str) -> bool {
        let mut payload = normalize_newlines(line);
        payload.push_str("\r\n");

        let mut table = self.table.lock().await;
        let Some(slot) = table.slots.get_mut(&conn_id) else {
            debug!("dropping reply for closed connection {}", conn_id);
            return false;
        };
        if let Err(e) = slot.writer.write_all(payload.as_bytes()).await {
            warn!("write to connection {} failed: {}", conn_id, e);
            remove_slot(&mut table, conn_id);
            self.slot_freed.notify_one();
            return false;
        }
        true
    }

    /// Push the out-of-band new-message marker to every client.
    pub async fn ping_clients(&self) {
        let mut table = self.table.lock().await;
        let mut dead = Vec::new();
        for (&conn_id, slot) in table.slots.iter_mut() {
            if let Err(e) = slot.writer.write_all(&[BELL]).await {
                debug!("ping to connection {} failed: {}", conn_id, e);
                dead.push(conn_id);
            }
        }
        for conn_id in dead {
            remove_slot(&mut table, conn_id);
            self.slot_freed.notify_one();
        }
    }

    /// Close the listener and every connection. Returns whether the drain
    /// finished within its timeout.
    pub async fn stop(self) -> bool {
        self.accept_task.abort();

        let table = self.table.clone();
        let drain = async move {
            let mut table = table.lock().await;
            let ids: Vec<u64> = table.slots.keys().copied().collect();
            for conn_id in ids {
                if let Some(mut slot) = table.slots.remove(&conn_id) {
                    slot.reader.abort();
                    let _ = slot.writer.shutdown().await;
                }
            }
        };
        if timeout(STOP_TIMEOUT, drain).await.is_err() {
            warn!("socket service did not drain within {:?}", STOP_TIMEOUT);
            return false;
        }
        debug!("extension socket stopped");
        true
    }
}

fn remove_slot(table: &mut SlotTable, conn_id: u64) {
    if let Some(slot) = table.slots.remove(&conn_id) {
        slot.reader.abort();
        debug!("connection {} closed", conn_id);
    }
}

async fn accept_loop(
    listener: TcpListener,
    table: Arc<Mutex<SlotTable>>,
    slot_freed: Arc<Notify>,
    max_clients: usize,
    line_tx: async_channel::Sender<ClientLine>,
) {
    loop {
        // Hold off while the pool is full; a freed slot wakes us.
        loop {
            if table.lock().await.slots.len() < max_clients {
                break;
            }
            warn!("connection limit exceeded, pausing accept");
            slot_freed.notified().await;
        }

        let (stream, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("accept failed: {}", e);
                tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                continue;
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!("set_nodelay failed: {}", e);
        }

        let (read_half, write_half) = stream.into_split();
        let mut table_guard = table.lock().await;
        let conn_id = table_guard.next_id;
        table_guard.next_id += 1;

        debug!("connection {} accepted from {}", conn_id, addr);
        let reader = tokio::spawn(read_task(
            conn_id,
            read_half,
            table.clone(),
            slot_freed.clone(),
            line_tx.clone(),
        ));
        table_guard.slots.insert(
            conn_id,
            Slot {
                writer: write_half,
                reader,
            },
        );
    }
}

async fn read_task(
    conn_id: u64,
    mut read_half: OwnedReadHalf,
    table: Arc<Mutex<SlotTable>>,
    slot_freed: Arc<Notify>,
    line_tx: async_channel::Sender<ClientLine>,
) {
    let mut buffer = LineBuffer::new();
    let mut chunk = [0u8; READ_CHUNK];

    'conn: loop {
        let n = match read_half.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug!("read on connection {} failed: {}", conn_id, e);
                break;
            }
        };

        for line in buffer.push_bytes(&chunk[..n]) {
            if line_tx.send(ClientLine { conn_id, line }).await.is_err() {
                // Control loop is gone.
                break 'conn;
            }
        }
        let dropped = buffer.take_dropped();
        if dropped > 0 {
            warn!("connection {} dropped {} malformed lines", conn_id, dropped);
        }
    }

    let mut table = table.lock().await;
    remove_slot(&mut table, conn_id);
    slot_freed.notify_one();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpStream;

    async fn connect(port: u16) -> TcpStream {
        TcpStream::connect(("127.0.0.1", port)).await.unwrap()
    }

    #[tokio::test]
    async fn lines_reach_the_channel_with_connection_ids() {
        let (line_tx, line_rx) = async_channel::bounded(16);
        let service = SocketService::bind(0, 2, None, line_tx).await.unwrap();

        let mut client = connect(service.port()).await;
        client.write_all(b"info\r\n").await.unwrap();
        // Partial write completed later still forms one line.
        client.write_all(b"li").await.unwrap();
        client.write_all(b"st\n").await.unwrap();

        let first = line_rx.recv().await.unwrap();
        assert_eq!(first.line, "info");
        let second = line_rx.recv().await.unwrap();
        assert_eq!(second.line, "list");
        assert_eq!(first.conn_id, second.conn_id);

        assert_eq!(service.client_count().await, 1);
        assert!(service.stop().await);
    }

    #[tokio::test]
    async fn replies_and_pings_reach_the_client() {
        let (line_tx, _line_rx) = async_channel::bounded(16);
        let service = SocketService::bind(0, 2, None, line_tx).await.unwrap();

        let client = connect(service.port()).await;
        let (read_half, _write_half) = client.into_split();
        let mut reader = BufReader::new(read_half);

        while service.client_count().await == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        // First connection of the service, so it holds the first slot id.
        let conn_id = 0;
        assert!(service.send_line(conn_id, "{\"type\":\"install\",\"data\":{}}").await);
        service.ping_clients().await;

        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            reader.read_exact(&mut byte).await.unwrap();
            if byte[0] == b'\n' {
                break;
            }
            line.push(byte[0]);
        }
        assert_eq!(line, b"{\"type\":\"install\",\"data\":{}}\r");

        reader.read_exact(&mut byte).await.unwrap();
        assert_eq!(byte[0], BELL);

        assert!(service.stop().await);
    }

    #[tokio::test]
    async fn full_pool_defers_new_clients_until_a_slot_frees() {
        let (line_tx, line_rx) = async_channel::bounded(16);
        let service = SocketService::bind(0, 1, None, line_tx).await.unwrap();

        let mut first = connect(service.port()).await;
        first.write_all(b"info\n").await.unwrap();
        assert_eq!(line_rx.recv().await.unwrap().line, "info");

        // The pool is full: the second client can write, but nothing is
        // read from it yet.
        let mut second = connect(service.port()).await;
        second.write_all(b"list\n").await.unwrap();
        let undelivered = timeout(Duration::from_millis(200), line_rx.recv()).await;
        assert!(undelivered.is_err());

        // Dropping the first client frees the slot and the queued
        // connection gets picked up.
        drop(first);
        let line = timeout(Duration::from_secs(2), line_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(line.line, "list");

        assert!(service.stop().await);
    }
}
