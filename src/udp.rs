use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::net::{lookup_host, UdpSocket};
use tokio::sync::{broadcast, mpsc};

use crate::driver::{
    DriverError, MediaDriver, Publication, Subscription, CONTROL_STREAM_ID, LARGE_STREAM_ID,
    ORDINARY_STREAM_ID,
};
use crate::error::{Error, Result};

/// Largest UDP datagram the embedded driver will read.
pub(crate) const RECEIVE_MTU: usize = 64 * 1024;

/// Frames queued per subscription before the demultiplexer starts dropping.
pub(crate) const SUBSCRIPTION_QUEUE_SIZE: usize = 1024;

/// Embedded UDP media driver: one socket, stream multiplexing via a 4-byte
/// stream-id prefix on every datagram.
///
/// It exists for tests and single-host deployments; frames are bounded by a
/// single datagram, so the large-message pipeline only carries what loopback
/// MTUs allow. Production setups attach an external driver instead.
pub struct UdpDriver {
    name: String,
    socket: Arc<UdpSocket>,
    local_port: u16,
    subscriptions: HashMap<u32, Arc<UdpSubscription>>,
    errors: Arc<Mutex<Vec<DriverError>>>,
    close_tx: broadcast::Sender<()>,
}

impl UdpDriver {
    /// Binds `host:port` (port 0 auto-assigns) and starts the demultiplexer.
    pub async fn bind(name: &str, host: &str, port: u16) -> Result<Arc<Self>> {
        let socket = UdpSocket::bind((host, port))
            .await
            .map_err(|e| Error::ErrDriver(format!("bind {host}:{port}: {e}")))?;
        let local_port = socket
            .local_addr()
            .map_err(|e| Error::ErrDriver(e.to_string()))?
            .port();
        let socket = Arc::new(socket);

        let mut subscriptions = HashMap::new();
        let mut queues = HashMap::new();
        for stream_id in [CONTROL_STREAM_ID, ORDINARY_STREAM_ID, LARGE_STREAM_ID] {
            let (tx, rx) = mpsc::channel(SUBSCRIPTION_QUEUE_SIZE);
            queues.insert(stream_id, tx);
            subscriptions.insert(
                stream_id,
                Arc::new(UdpSubscription {
                    rx: tokio::sync::Mutex::new(rx),
                }),
            );
        }

        let errors = Arc::new(Mutex::new(vec![]));
        let (close_tx, close_rx) = broadcast::channel(1);

        let driver = Arc::new(UdpDriver {
            name: name.to_owned(),
            socket: Arc::clone(&socket),
            local_port,
            subscriptions,
            errors: Arc::clone(&errors),
            close_tx,
        });

        let demux_name = driver.name.clone();
        tokio::spawn(async move {
            UdpDriver::demux_loop(demux_name, socket, queues, errors, close_rx).await;
        });

        Ok(driver)
    }

    async fn demux_loop(
        name: String,
        socket: Arc<UdpSocket>,
        queues: HashMap<u32, mpsc::Sender<Bytes>>,
        errors: Arc<Mutex<Vec<DriverError>>>,
        mut close_rx: broadcast::Receiver<()>,
    ) {
        log::debug!("[{}] demux_loop entered", name);

        let mut buffer = vec![0u8; RECEIVE_MTU];
        loop {
            let n = tokio::select! {
                _ = close_rx.recv() => break,
                result = socket.recv_from(&mut buffer) => {
                    match result {
                        Ok((n, _)) => n,
                        Err(err) => {
                            errors
                                .lock()
                                .unwrap()
                                .push(DriverError::Other(format!("recv: {err}")));
                            continue;
                        }
                    }
                }
            };

            if n < 4 {
                log::warn!("[{}] runt datagram of {} bytes dropped", name, n);
                continue;
            }
            let mut datagram = Bytes::from(buffer[..n].to_vec());
            let stream_id = datagram.get_u32();
            match queues.get(&stream_id) {
                Some(tx) => {
                    // a full subscription queue sheds load; the substrate is
                    // unreliable by contract
                    if tx.try_send(datagram).is_err() {
                        log::warn!(
                            "[{}] subscription queue full, dropping frame on stream {}",
                            name,
                            stream_id
                        );
                    }
                }
                None => {
                    log::warn!("[{}] datagram for unknown stream {} dropped", name, stream_id);
                }
            }
        }

        log::debug!("[{}] demux_loop exited", name);
    }
}

#[async_trait]
impl MediaDriver for UdpDriver {
    fn local_port(&self) -> u16 {
        self.local_port
    }

    async fn add_publication(
        &self,
        remote: &crate::address::Address,
        stream_id: u32,
    ) -> Result<Arc<dyn Publication>> {
        let dest = lookup_host((remote.host.as_str(), remote.port))
            .await
            .map_err(|e| Error::ErrDriver(format!("resolve {}: {e}", remote)))?
            .next()
            .ok_or_else(|| Error::ErrDriver(format!("no address for {remote}")))?;

        Ok(Arc::new(UdpPublication {
            socket: Arc::clone(&self.socket),
            dest,
            stream_id,
        }))
    }

    async fn add_subscription(&self, stream_id: u32) -> Result<Arc<dyn Subscription>> {
        self.subscriptions
            .get(&stream_id)
            .cloned()
            .map(|s| s as Arc<dyn Subscription>)
            .ok_or_else(|| Error::ErrDriver(format!("unknown stream {stream_id}")))
    }

    fn poll_errors(&self) -> Vec<DriverError> {
        self.errors.lock().unwrap().drain(..).collect()
    }

    async fn close(&self) -> Result<()> {
        let _ = self.close_tx.send(());
        Ok(())
    }
}

struct UdpPublication {
    socket: Arc<UdpSocket>,
    dest: SocketAddr,
    stream_id: u32,
}

#[async_trait]
impl Publication for UdpPublication {
    async fn offer(&self, frame: &[u8]) -> Result<()> {
        let mut datagram = BytesMut::with_capacity(4 + frame.len());
        datagram.put_u32(self.stream_id);
        datagram.put_slice(frame);
        self.socket
            .send_to(&datagram, self.dest)
            .await
            .map_err(|e| Error::ErrDriver(format!("send to {}: {e}", self.dest)))?;
        Ok(())
    }
}

struct UdpSubscription {
    rx: tokio::sync::Mutex<mpsc::Receiver<Bytes>>,
}

#[async_trait]
impl Subscription for UdpSubscription {
    async fn poll(&self) -> Result<Bytes> {
        let mut rx = self.rx.lock().await;
        rx.recv().await.ok_or(Error::ErrSubscriptionClosed)
    }
}
