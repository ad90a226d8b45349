//! The protocol connection: socket ownership, packet routing, actor registry.

use crate::error::{Error, Result};
use crate::rdp::actors::ActorProxy;
use crate::rdp::event::{ActorCategory, RdpEvent};
use crate::rdp::packet::Packet;
use crate::rdp::transport::{RdpReader, RdpWriter};
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task;

/// One live connection to the browser.
///
/// The writer half of the stream is exclusively owned by the writer task and
/// fed through an unbounded channel; the reader half is consumed by the
/// dispatch task. All routing state lives on the single-threaded executor,
/// so interior mutability needs no locks.
pub struct Connection {
    actors: RefCell<HashMap<String, Rc<ActorProxy>>>,
    out_tx: RefCell<Option<mpsc::UnboundedSender<Value>>>,
    events: mpsc::UnboundedSender<RdpEvent>,
    closed: Cell<bool>,
}

impl Connection {
    /// Connect to a listening browser socket.
    pub async fn connect(
        host: &str,
        port: u16,
        events: mpsc::UnboundedSender<RdpEvent>,
    ) -> Result<Rc<Connection>> {
        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|e| Error::Connect(format!("{host}:{port}: {e}")))?;
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();
        Ok(Self::start(read_half, write_half, events))
    }

    /// Drive an already-established stream. Split out so tests can run the
    /// connection over an in-process duplex pipe.
    pub fn start<R, W>(
        read_half: R,
        write_half: W,
        events: mpsc::UnboundedSender<RdpEvent>,
    ) -> Rc<Connection>
    where
        R: AsyncRead + Unpin + 'static,
        W: AsyncWrite + Unpin + 'static,
    {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let conn = Rc::new(Connection {
            actors: RefCell::new(HashMap::new()),
            out_tx: RefCell::new(Some(out_tx)),
            events,
            closed: Cell::new(false),
        });

        task::spawn_local(Self::write_loop(RdpWriter::new(write_half), out_rx));
        task::spawn_local(Self::read_loop(Rc::clone(&conn), RdpReader::new(read_half)));
        conn
    }

    /// Return the existing proxy for `name` or construct one. At most one
    /// live proxy exists per actor name.
    pub fn get_or_create(self: &Rc<Self>, name: &str, category: ActorCategory) -> Rc<ActorProxy> {
        if let Some(proxy) = self.actors.borrow().get(name) {
            return Rc::clone(proxy);
        }
        let proxy = Rc::new(ActorProxy::new(
            name.to_string(),
            category,
            Rc::downgrade(self),
        ));
        self.actors
            .borrow_mut()
            .insert(name.to_string(), Rc::clone(&proxy));
        proxy
    }

    /// Deregister a destroyed actor. Pending requests are failed; the name
    /// may be reused by the server afterwards.
    pub fn release(&self, name: &str) {
        if let Some(proxy) = self.actors.borrow_mut().remove(name) {
            proxy.reject_pending();
        }
    }

    /// Close the transport and fail every pending request.
    pub fn disconnect(&self) {
        self.out_tx.borrow_mut().take();
        self.teardown(false);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }

    pub(crate) fn events(&self) -> &mpsc::UnboundedSender<RdpEvent> {
        &self.events
    }

    pub(crate) fn enqueue(&self, packet: Value) -> Result<()> {
        if log::log_enabled!(target: "rdp", log::Level::Trace)
            && let Ok(line) = serde_json::to_string(&packet)
        {
            log::trace!(target: "rdp", "-> {line}");
        }
        let guard = self.out_tx.borrow();
        let Some(tx) = guard.as_ref() else {
            return Err(Error::Disconnected);
        };
        tx.send(packet).map_err(|_| Error::Disconnected)
    }

    fn dispatch(&self, packet: Packet) {
        if log::log_enabled!(target: "rdp", log::Level::Trace) {
            log::trace!(target: "rdp", "<- {}", Value::Object(packet.body.clone()));
        }
        let proxy = self.actors.borrow().get(&packet.from).cloned();
        match proxy {
            Some(proxy) => proxy.handle_packet(packet),
            None => {
                log::warn!(target: "rdp", "packet from unknown actor `{}` dropped", packet.from)
            }
        }
    }

    fn teardown(&self, announce: bool) {
        if self.closed.replace(true) {
            return;
        }
        self.out_tx.borrow_mut().take();
        for proxy in self.actors.borrow().values() {
            proxy.reject_pending();
        }
        if announce {
            let _ = self.events.send(RdpEvent::Disconnected);
        }
    }

    async fn write_loop<W: AsyncWrite + Unpin>(
        mut writer: RdpWriter<W>,
        mut out_rx: mpsc::UnboundedReceiver<Value>,
    ) {
        while let Some(packet) = out_rx.recv().await {
            if let Err(e) = writer.write_packet(&packet).await {
                log::warn!(target: "rdp", "write failed: {e:#}");
                break;
            }
        }
        // Dropping the writer closes our half of the socket.
    }

    async fn read_loop<R: AsyncRead + Unpin>(conn: Rc<Connection>, mut reader: RdpReader<R>) {
        loop {
            match reader.read_packet().await {
                Ok(Some(packet)) => conn.dispatch(packet),
                Ok(None) => {
                    log::info!(target: "rdp", "remote closed the connection");
                    break;
                }
                Err(e) => {
                    if !conn.is_closed() {
                        log::warn!(target: "rdp", "transport error: {e:#}");
                    }
                    break;
                }
            }
        }
        conn.teardown(true);
    }
}
