
use std::io::{self, ErrorKind, Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Mutex;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, warn};

use paxos::prelude::*;

use crate::error::{CouncilError, Result};
use crate::node::Envelope;
use crate::util::{lock_then_release, CancellationToken, POLL_INTERVAL};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(500);
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_WORKER_THREADS: usize = 4;

type Outbound = (Message, Host);

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub connect_timeout: Duration,
    // how long a peer may keep a connection open without finishing its message
    pub read_timeout: Duration,
    pub worker_threads: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            worker_threads: DEFAULT_WORKER_THREADS,
        }
    }
}

/// Moves [`Message`]s between council members over TCP, one message per connection.
///
/// Sending only queues the message; a drain thread delivers the queue in order. A failed delivery is logged and
/// the message is lost, retrying is left to the protocol.
pub struct Transport {
    host: Host,
    config: TransportConfig,
    outbound_sender: Sender<Outbound>,
    outbound_receiver: Receiver<Outbound>,
    listening: CancellationToken,
    sending: CancellationToken,
    listener_thread: Mutex<Option<JoinHandle<()>>>,
    sender_thread: Mutex<Option<JoinHandle<()>>>,
}

impl Transport {
    pub fn new(host: Host, config: TransportConfig) -> Self {
        let (outbound_sender, outbound_receiver) = unbounded::<Outbound>();

        Transport {
            host,
            config,
            outbound_sender,
            outbound_receiver,
            listening: CancellationToken::new(),
            sending: CancellationToken::new(),
            listener_thread: Mutex::new(None),
            sender_thread: Mutex::new(None),
        }
    }

    pub fn host(&self) -> &Host {
        &self.host
    }

    /// Binds the member's address and forwards every message read from it to `inbound`.
    ///
    /// The address is bound before this returns, so peers can connect as soon as it does.
    pub fn start_listening(&self, inbound: Sender<Envelope>) -> Result<()> {
        let mut listener_thread = lock_then_release(&self.listener_thread);
        if listener_thread.is_some() {
            return Ok(());
        }

        let address = format!("{}:{}", self.host.address(), self.host.port());
        let listener = match TcpListener::bind(&address) {
            Ok(listener) => listener,
            Err(source) => return Err(CouncilError::Bind { address, source }),
        };
        listener.set_nonblocking(true)?;

        let host_id = self.host.id().to_string();
        let thread_pool = rayon::ThreadPoolBuilder::new()
            .thread_name(move |index| format!("{} connection {}", host_id, index))
            .num_threads(self.config.worker_threads)
            .build()?;

        let host_id = self.host.id().to_string();
        let cancelled = self.listening.clone();
        let read_timeout = self.config.read_timeout;

        let handle = thread::Builder::new()
            .name(format!("{} listener", self.host.id()))
            .spawn(move || {
                debug!("{} listening on {}", host_id, address);

                for stream in listener.incoming() {
                    match stream {
                        Ok(tcp_stream) => {
                            let inbound = inbound.clone();
                            let host_id = host_id.clone();

                            thread_pool.spawn(move || {
                                match read_message(tcp_stream, read_timeout) {
                                    Ok(message) => {
                                        let _ = inbound.send(Envelope::Peer(message));
                                    }
                                    Err(err) => warn!("{} discarded a connection: {}", host_id, err),
                                }
                            });
                        }
                        Err(err) if err.kind() == ErrorKind::WouldBlock => {
                            thread::sleep(POLL_INTERVAL);
                        }
                        Err(err) => {
                            warn!("{} failed to accept a connection: {}", host_id, err);
                            thread::sleep(POLL_INTERVAL);
                        }
                    }

                    if cancelled.is_cancelled() {
                        break;
                    }
                }

                debug!("{} stopped listening on {}", host_id, address);
            })?;

        *listener_thread = Some(handle);
        Ok(())
    }

    /// Starts delivering queued messages.
    pub fn start_sending(&self) -> Result<()> {
        let mut sender_thread = lock_then_release(&self.sender_thread);
        if sender_thread.is_some() {
            return Ok(());
        }

        let host_id = self.host.id().to_string();
        let outbound = self.outbound_receiver.clone();
        let cancelled = self.sending.clone();
        let connect_timeout = self.config.connect_timeout;

        let handle = thread::Builder::new()
            .name(format!("{} sender", self.host.id()))
            .spawn(move || loop {
                match outbound.recv_timeout(POLL_INTERVAL) {
                    Ok((message, target)) => {
                        if cancelled.is_cancelled() {
                            break;
                        }

                        if let Err(err) = write_message(&message, &target, connect_timeout) {
                            warn!(
                                "{} could not deliver {} to {}: {}",
                                host_id, message, target, err
                            );
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break,
                }

                if cancelled.is_cancelled() {
                    break;
                }
            })?;

        *sender_thread = Some(handle);
        Ok(())
    }

    /// Queues `message` for `target`. Never blocks. Once sending was stopped the message is dropped instead.
    pub fn send_message(&self, message: Message, target: &Host) {
        if self.sending.is_cancelled() {
            debug!(
                "{} stopped sending, dropping {} to {}",
                self.host.id(),
                message,
                target
            );
            return;
        }

        let _ = self.outbound_sender.send((message, target.clone()));
    }

    /// The number of messages waiting for the drain thread.
    pub fn queued(&self) -> usize {
        self.outbound_receiver.len()
    }

    /// Stops accepting connections and releases the member's address.
    pub fn stop_listening(&self) {
        self.listening.cancel();
        join(&self.listener_thread);
    }

    /// Stops delivering; messages still queued are abandoned.
    pub fn stop_sending(&self) {
        self.sending.cancel();
        join(&self.sender_thread);

        let abandoned = self.outbound_receiver.try_iter().count();
        if abandoned > 0 {
            debug!("{} abandoned {} queued messages", self.host.id(), abandoned);
        }
    }
}

fn join(thread: &Mutex<Option<JoinHandle<()>>>) {
    let handle = lock_then_release(thread).take();
    if let Some(handle) = handle {
        let _ = handle.join();
    }
}

fn read_message(mut stream: TcpStream, read_timeout: Duration) -> Result<Message> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(read_timeout))?;

    let mut buf = Vec::new();
    stream.read_to_end(&mut buf)?;

    Ok(Message::from_bytes(&buf[..])?)
}

fn write_message(message: &Message, target: &Host, connect_timeout: Duration) -> io::Result<()> {
    let socket_addr = (target.address(), target.port())
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| io::Error::new(ErrorKind::AddrNotAvailable, "address did not resolve"))?;

    let mut stream = TcpStream::connect_timeout(&socket_addr, connect_timeout)?;
    stream.write_all(&message.to_bytes())?;
    stream.shutdown(Shutdown::Write)
}
