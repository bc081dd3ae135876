//! Scripted counter store speaking the inline protocol over TCP.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use ratewire::wire::ConnectOptions;

/// How the fake store behaves.
#[derive(Debug, Clone, Default)]
pub struct FakeStoreConfig {
    pub password: Option<String>,
    /// Write every reply one byte at a time.
    pub split_replies: bool,
    /// Close each connection right after accepting it.
    pub hang_up: bool,
}

/// A running fake store.
pub struct FakeStore {
    pub addr: SocketAddr,
    commands: Arc<Mutex<Vec<String>>>,
    connections: Arc<Mutex<usize>>,
}

impl FakeStore {
    pub async fn start(config: FakeStoreConfig) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let commands = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(Mutex::new(0));
        let data = Arc::new(Mutex::new(HashMap::new()));

        let log = commands.clone();
        let accepted = connections.clone();
        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    return;
                };
                *accepted.lock() += 1;
                if config.hang_up {
                    drop(socket);
                    continue;
                }
                tokio::spawn(serve(socket, config.clone(), log.clone(), data.clone()));
            }
        });

        Self {
            addr,
            commands,
            connections,
        }
    }

    pub fn options(&self) -> ConnectOptions {
        ConnectOptions::new("127.0.0.1", self.addr.port()).with_timeouts(
            Some(Duration::from_secs(2)),
            Some(Duration::from_secs(2)),
        )
    }

    /// Every command line received so far, in order.
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().clone()
    }

    pub fn verbs(&self) -> Vec<String> {
        self.commands()
            .iter()
            .map(|c| c.split(' ').next().unwrap_or_default().to_string())
            .collect()
    }

    pub fn connections(&self) -> usize {
        *self.connections.lock()
    }
}

async fn serve(
    socket: TcpStream,
    config: FakeStoreConfig,
    log: Arc<Mutex<Vec<String>>>,
    data: Arc<Mutex<HashMap<String, i64>>>,
) {
    let (read, mut write) = socket.into_split();
    let mut lines = BufReader::new(read);
    let mut authenticated = config.password.is_none();
    let mut line = String::new();

    loop {
        line.clear();
        match lines.read_line(&mut line).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }

        let command = line.trim_end_matches("\r\n").to_string();
        log.lock().push(command.clone());
        let parts: Vec<&str> = command.split(' ').collect();

        let reply = match parts.as_slice() {
            ["AUTH", password] => {
                if config.password.as_deref() == Some(*password) {
                    authenticated = true;
                    "+OK\r\n".to_string()
                } else {
                    "-ERR invalid password\r\n".to_string()
                }
            }
            _ if !authenticated => "-NOAUTH Authentication required.\r\n".to_string(),
            ["SELECT", index] => match index.parse::<u32>() {
                Ok(n) if n < 16 => "+OK\r\n".to_string(),
                _ => "-ERR DB index is out of range\r\n".to_string(),
            },
            ["GET", key] => match data.lock().get(*key) {
                Some(value) => {
                    let value = value.to_string();
                    format!("${}\r\n{}\r\n", value.len(), value)
                }
                None => "$-1\r\n".to_string(),
            },
            ["INCR", key] => {
                let mut data = data.lock();
                let value = data.entry(key.to_string()).or_insert(0);
                *value += 1;
                format!(":{}\r\n", value)
            }
            ["EXPIRE", key, _seconds] => {
                let exists = data.lock().contains_key(*key);
                format!(":{}\r\n", u8::from(exists))
            }
            _ => "-ERR unknown command\r\n".to_string(),
        };

        let written = if config.split_replies {
            write_split(&mut write, reply.as_bytes()).await
        } else {
            write.write_all(reply.as_bytes()).await
        };
        if written.is_err() {
            return;
        }
    }
}

async fn write_split(
    write: &mut tokio::net::tcp::OwnedWriteHalf,
    bytes: &[u8],
) -> std::io::Result<()> {
    for byte in bytes {
        write.write_all(std::slice::from_ref(byte)).await?;
        write.flush().await?;
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    Ok(())
}
