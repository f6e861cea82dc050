// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Event driven TCP server. The listening socket and every accepted connection are
//! watched with [`Reactor::create_socket_event()`], so a single dispatch thread (or the
//! worker pool, depending on [`DispatchMode`]) serves all of them.
//!
//! ```text
//! listener readable ──▶ accept until WouldBlock ──▶ create_socket_event(conn)
//! conn readable     ──▶ read until WouldBlock   ──▶ on_receive(fd, bytes)
//! conn EOF / error  ──▶ delete_socket_event(conn), then close it
//! ```
//!
//! [`DispatchMode`]: crate::DispatchMode

use crate::{Reactor, WeakReactor};
use miette::{IntoDiagnostic, WrapErr};
use rustc_hash::FxHashMap;
use std::{fmt::{Debug, Formatter},
          io::{ErrorKind, Read, Write},
          net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs},
          os::fd::{AsRawFd, RawFd},
          sync::{Arc, Mutex, MutexGuard, PoisonError, Weak}};

/// Size of each read from a readable connection.
const READ_CHUNK_SIZE: usize = 4096;

/// Receives the bytes read from one connection during one readiness event.
pub type ReceiveFn = Arc<dyn Fn(RawFd, &[u8]) + Send + Sync>;

/// A TCP server whose sockets are all multiplexed by one [`Reactor`].
///
/// Connections beyond `max_connections` are accepted and closed right away. Dropping
/// the service stops watching every socket it owns, then closes them.
pub struct EvtTcpService {
    inner: Arc<ServiceInner>,
}

struct ServiceInner {
    reactor: WeakReactor,
    listener: TcpListener,
    local_addr: SocketAddr,
    max_connections: usize,
    connections: Mutex<FxHashMap<RawFd, TcpStream>>,
    on_receive: ReceiveFn,
}

/// What a read pass found on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionStatus {
    Open,
    Closed,
}

impl Debug for EvtTcpService {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvtTcpService")
            .field("local_addr", &self.inner.local_addr)
            .field("max_connections", &self.inner.max_connections)
            .field("connections", &self.connection_count())
            .finish_non_exhaustive()
    }
}

impl EvtTcpService {
    /// Binds `addr`, and starts watching the listener on `reactor`. Connections are
    /// served whenever the reactor's dispatch loop runs.
    ///
    /// # Errors
    ///
    /// If the address can't be bound, or the listener can't be registered.
    pub fn start(
        reactor: &Reactor,
        addr: impl ToSocketAddrs,
        max_connections: usize,
        on_receive: impl Fn(RawFd, &[u8]) + Send + Sync + 'static,
    ) -> miette::Result<Self> {
        let listener = TcpListener::bind(addr)
            .into_diagnostic()
            .wrap_err("Failed to bind the TCP listener")?;
        listener.set_nonblocking(true).into_diagnostic()?;
        let local_addr = listener.local_addr().into_diagnostic()?;

        let inner = Arc::new(ServiceInner {
            reactor: reactor.downgrade(),
            listener,
            local_addr,
            max_connections,
            connections: Mutex::new(FxHashMap::default()),
            on_receive: Arc::new(on_receive),
        });

        let weak_inner = Arc::downgrade(&inner);
        reactor.create_socket_event(inner.listener.as_raw_fd(), move |_| {
            if let Some(inner) = weak_inner.upgrade() {
                inner.accept_pending();
            }
        })?;

        tracing::info!(
            message = "tcp service: listening",
            %local_addr,
            max_connections
        );
        Ok(Self { inner })
    }

    #[must_use]
    pub fn local_addr(&self) -> SocketAddr { self.inner.local_addr }

    #[must_use]
    pub fn connection_count(&self) -> usize { self.inner.lock_connections().len() }

    /// Writes all of `bytes` to the connection `fd`. The socket is non blocking, so
    /// a payload larger than the kernel send buffer fails with `WouldBlock`.
    ///
    /// # Errors
    ///
    /// If `fd` is not a connection of this service, or the write fails.
    pub fn send(&self, fd: RawFd, bytes: &[u8]) -> miette::Result<()> {
        let connections = self.inner.lock_connections();
        let Some(mut stream) = connections.get(&fd) else {
            miette::bail!("No connection with fd {fd}");
        };
        stream
            .write_all(bytes)
            .into_diagnostic()
            .wrap_err_with(|| format!("Failed to send to fd {fd}"))
    }
}

impl ServiceInner {
    fn lock_connections(&self) -> MutexGuard<'_, FxHashMap<RawFd, TcpStream>> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn accept_pending(self: &Arc<Self>) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer_addr)) => self.add_connection(stream, peer_addr),
                Err(err) if err.kind() == ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) => {
                    tracing::warn!(message = "tcp service: accept failed", error = %err);
                    break;
                }
            }
        }
    }

    fn add_connection(self: &Arc<Self>, stream: TcpStream, peer_addr: SocketAddr) {
        let Some(reactor) = self.reactor.upgrade() else {
            return;
        };
        if self.lock_connections().len() >= self.max_connections {
            tracing::warn!(
                message = "tcp service: connection limit reached, closing",
                %peer_addr,
                max_connections = self.max_connections
            );
            return;
        }
        if let Err(err) = stream.set_nonblocking(true) {
            tracing::warn!(message = "tcp service: set_nonblocking failed", error = %err);
            return;
        }

        // In the table before it is watched, so the first read finds it.
        let fd = stream.as_raw_fd();
        self.lock_connections().insert(fd, stream);

        let weak_inner: Weak<Self> = Arc::downgrade(self);
        let result = reactor.create_socket_event(fd, move |fd| {
            if let Some(inner) = weak_inner.upgrade() {
                inner.receive(fd);
            }
        });
        match result {
            Ok(id) => {
                tracing::debug!(message = "tcp service: accepted", %peer_addr, fd, %id);
            }
            Err(err) => {
                tracing::warn!(message = "tcp service: can't watch connection", error = %err);
                self.lock_connections().remove(&fd);
            }
        }
    }

    fn receive(&self, fd: RawFd) {
        let mut received = Vec::new();
        let status = {
            let connections = self.lock_connections();
            let Some(stream) = connections.get(&fd) else {
                return;
            };
            read_available(stream, &mut received)
        };

        if !received.is_empty() {
            (self.on_receive)(fd, &received);
        }
        if status == ConnectionStatus::Closed {
            self.close_connection(fd);
        }
    }

    /// Stops watching `fd` before the stream (and its descriptor) is dropped.
    fn close_connection(&self, fd: RawFd) {
        if let Some(reactor) = self.reactor.upgrade() {
            reactor.delete_socket_event(fd);
        }
        if self.lock_connections().remove(&fd).is_some() {
            tracing::debug!(message = "tcp service: connection closed", fd);
        }
    }
}

/// Reads until the socket would block. Bytes read before EOF or an error are kept.
fn read_available(mut stream: &TcpStream, acc: &mut Vec<u8>) -> ConnectionStatus {
    let mut buf = [0_u8; READ_CHUNK_SIZE];
    loop {
        match stream.read(&mut buf) {
            Ok(0) => return ConnectionStatus::Closed,
            Ok(n) => acc.extend_from_slice(&buf[..n]),
            Err(err) if err.kind() == ErrorKind::WouldBlock => {
                return ConnectionStatus::Open;
            }
            Err(err) if err.kind() == ErrorKind::Interrupted => {}
            Err(err) => {
                tracing::debug!(message = "tcp service: read failed", error = %err);
                return ConnectionStatus::Closed;
            }
        }
    }
}

impl Drop for EvtTcpService {
    fn drop(&mut self) {
        let mut connections = self.inner.lock_connections();
        if let Some(reactor) = self.inner.reactor.upgrade() {
            reactor.delete_socket_event(self.inner.listener.as_raw_fd());
            for fd in connections.keys() {
                reactor.delete_socket_event(*fd);
            }
        }
        connections.clear();
        tracing::info!(message = "tcp service: stopped", local_addr = %self.inner.local_addr);
    }
}
