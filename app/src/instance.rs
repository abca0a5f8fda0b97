/// Single-instance guard over a loopback TCP port derived from the lock key.
///
/// The first process binds the port and keeps listening; every later launch
/// fails to bind, connects instead and sends the lock key. The primary echoes
/// the key back and turns the knock into [`AppEvent::SecondInstance`]. A port
/// held by anything that does not echo the key is not ours to defer to.
use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::event::AppEvent;

pub const APP_LOCK_KEY: &str = "loa-details";

const PORT_BASE: u16 = 49152;
const PORT_SPAN: u16 = 16000;
const KNOCK_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum InstanceError {
    #[error("failed to bind instance lock on port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },
    #[error("instance lock port {port} is held by another program")]
    Foreign { port: u16 },
}

/// Outcome of [`acquire`].
pub enum Acquire {
    Held(InstanceGuard),
    Denied,
}

/// Keeps the lock for as long as it is alive.
pub struct InstanceGuard {
    port: u16,
    listener: JoinHandle<()>,
}

impl InstanceGuard {
    #[cfg(test)]
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Drop for InstanceGuard {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

/// Loopback port for `lock_key` (FNV-1a, folded into the dynamic port range).
pub fn lock_port(lock_key: &str) -> u16 {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in lock_key.bytes() {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    PORT_BASE + (hash % u32::from(PORT_SPAN)) as u16
}

/// Tries to become the primary instance for `lock_key`.
///
/// On denial the primary has already been asked to come to the foreground.
pub async fn acquire(
    lock_key: &str,
    events: mpsc::Sender<AppEvent>,
) -> Result<Acquire, InstanceError> {
    let port = lock_port(lock_key);
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));

    match TcpListener::bind(addr).await {
        Ok(listener) => {
            info!("[instance] Holding instance lock on port {port}");
            let key = lock_key.to_string();
            let listener = tokio::spawn(accept_knocks(listener, key, events));
            Ok(Acquire::Held(InstanceGuard { port, listener }))
        }
        Err(e) if e.kind() == ErrorKind::AddrInUse => {
            match knock(addr, lock_key).await {
                Ok(true) => {
                    info!("[instance] Another instance is running; asked it to come forward");
                    Ok(Acquire::Denied)
                }
                Ok(false) => Err(InstanceError::Foreign { port }),
                Err(e) => {
                    debug!("[instance] Knock on port {port} failed: {e}");
                    Err(InstanceError::Foreign { port })
                }
            }
        }
        Err(source) => Err(InstanceError::Bind { port, source }),
    }
}

/// Sends the lock key and reports whether the listener echoed it back.
async fn knock(addr: SocketAddr, lock_key: &str) -> std::io::Result<bool> {
    let mut stream = tokio::time::timeout(KNOCK_TIMEOUT, TcpStream::connect(addr))
        .await
        .map_err(|_| std::io::Error::from(ErrorKind::TimedOut))??;
    stream.write_all(format!("{lock_key}\n").as_bytes()).await?;

    let mut reply = String::new();
    let mut reader = BufReader::new(stream);
    match tokio::time::timeout(KNOCK_TIMEOUT, reader.read_line(&mut reply)).await {
        Ok(read) => {
            read?;
            Ok(reply.trim_end() == lock_key)
        }
        Err(_) => Ok(false),
    }
}

async fn accept_knocks(listener: TcpListener, lock_key: String, events: mpsc::Sender<AppEvent>) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("[instance] Accept failed: {e}");
                continue;
            }
        };
        let mut line = String::new();
        let mut reader = BufReader::new(stream);
        match tokio::time::timeout(KNOCK_TIMEOUT, reader.read_line(&mut line)).await {
            Ok(Ok(_)) if line.trim_end() == lock_key => {
                info!("[instance] Second instance attempted to start");
                if let Err(e) = reader.get_mut().write_all(line.as_bytes()).await {
                    debug!("[instance] Could not answer the knock from {peer}: {e}");
                }
                if events.send(AppEvent::SecondInstance).await.is_err() {
                    break;
                }
            }
            _ => debug!("[instance] Ignoring unexpected connection from {peer}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_key(name: &str) -> String {
        format!("loa-details-test-{name}-{}", std::process::id())
    }

    #[test]
    fn lock_port_is_stable_and_in_range() {
        let a = lock_port(APP_LOCK_KEY);
        assert_eq!(a, lock_port(APP_LOCK_KEY));
        assert!((PORT_BASE..PORT_BASE + PORT_SPAN).contains(&a));
    }

    #[tokio::test]
    async fn second_acquire_is_denied_and_signals_primary() {
        let key = unique_key("second");
        let (tx, mut rx) = mpsc::channel(4);

        let guard = match acquire(&key, tx.clone()).await.unwrap() {
            Acquire::Held(guard) => guard,
            Acquire::Denied => panic!("first acquire must hold the lock"),
        };
        assert_eq!(guard.port(), lock_port(&key));

        assert!(matches!(acquire(&key, tx).await.unwrap(), Acquire::Denied));
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap();
        assert!(matches!(event, Some(AppEvent::SecondInstance)));
    }

    #[tokio::test]
    async fn stray_connection_is_not_a_second_instance() {
        let key = unique_key("stray");
        let (tx, mut rx) = mpsc::channel(4);
        let _guard = match acquire(&key, tx).await.unwrap() {
            Acquire::Held(guard) => guard,
            Acquire::Denied => panic!("first acquire must hold the lock"),
        };

        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, lock_port(&key)));
        assert!(!knock(addr, "someone-else").await.unwrap());
        let event = tokio::time::timeout(Duration::from_millis(300), rx.recv()).await;
        assert!(event.is_err());
    }

    #[tokio::test]
    async fn port_held_by_another_program_is_not_a_denial() {
        let key = unique_key("foreign");
        let port = lock_port(&key);
        let _foreign = std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, port)).unwrap();
        let (tx, _rx) = mpsc::channel(4);

        match acquire(&key, tx).await {
            Err(InstanceError::Foreign { port: held }) => assert_eq!(held, port),
            Err(e) => panic!("unexpected error {e}"),
            Ok(Acquire::Held(_)) => panic!("port is taken"),
            Ok(Acquire::Denied) => panic!("a foreign listener must not deny startup"),
        }
    }
}
