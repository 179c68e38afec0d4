use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, RwLock};
use std::time::Duration;

use tokio::io::{ReadHalf, WriteHalf};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::StreamExt;
use tracing::{debug, warn};

use confab_core::{
    xml::{
        namespaces,
        stream_parser::{Frame, StreamParser},
        stream_writer::StreamWriter,
        Element,
    },
    xmpp::jid::Jid,
    xmpp::stanza::{Header, Iq, Message, Presence, Stanza, StanzaError, StreamError},
    xmpp::stream::Connection,
};

use crate::error::Error;

/// How long a graceful teardown waits for the TLS close alert / TCP FIN to
/// flush before giving up. A peer that never answers must not deadlock close.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to an established session. Clones share one connection; any number
/// of tasks may send while the router task reads.
pub struct Session<C: Connection> {
    inner: Arc<SessionInner<C>>,
}

impl<C: Connection> Clone for Session<C> {
    fn clone(&self) -> Self {
        Session {
            inner: self.inner.clone(),
        }
    }
}

struct SessionInner<C: Connection> {
    writer: tokio::sync::Mutex<StreamWriter<WriteHalf<C>>>,
    callbacks: Mutex<HashMap<String, oneshot::Sender<Iq>>>,
    subscribers: RwLock<Vec<mpsc::Sender<Stanza>>>,
    next_id: AtomicU64,
    jid: OnceLock<Jid>,
    closing: AtomicBool,
}

/// Single-shot slot for one IQ response. Dropping it abandons the exchange;
/// a response that arrives afterwards is discarded by the router.
pub struct IqResponse {
    receiver: oneshot::Receiver<Iq>,
}

impl IqResponse {
    /// Resolves to the `result` or `error` IQ matching the request id, or to
    /// `ConnectionLost` if the stream ends first.
    pub async fn recv(self) -> Result<Iq, Error> {
        self.receiver.await.map_err(|_| Error::ConnectionLost)
    }
}

impl<C: Connection> Session<C> {
    /// Takes ownership of the negotiated stream halves and spawns the router
    /// task. Callers keep the returned handle; the router keeps a twin.
    pub(crate) fn start<P>(parser: P, writer: StreamWriter<WriteHalf<C>>) -> Self
    where
        P: StreamParser<ReadHalf<C>> + Send + 'static,
    {
        let inner = Arc::new(SessionInner {
            writer: tokio::sync::Mutex::new(writer),
            callbacks: Mutex::new(HashMap::new()),
            subscribers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(0),
            jid: OnceLock::new(),
            closing: AtomicBool::new(false),
        });

        tokio::spawn(route_stanzas(parser, inner.clone()));

        Session { inner }
    }

    /// The server-assigned full JID; `None` until resource binding finishes.
    pub fn jid(&self) -> Option<Jid> {
        self.inner.jid.get().cloned()
    }

    pub(crate) fn set_jid(&self, jid: Jid) {
        if self.inner.jid.set(jid).is_err() {
            debug_assert!(false, "jid bound twice");
        }
    }

    /// Sends an IQ with a freshly allocated id and returns the slot its
    /// response will be delivered to, along with the id. The callback entry
    /// is registered before any byte is written, so the response can never
    /// outrun the registration.
    pub async fn send_iq(
        &self,
        to: Option<&str>,
        kind: &str,
        payload: Option<Element>,
    ) -> Result<(IqResponse, String), Error> {
        let id = self.fresh_id();
        let (sender, receiver) = oneshot::channel();
        self.inner
            .callbacks
            .lock()
            .unwrap()
            .insert(id.clone(), sender);

        if let Err(err) = self.write_iq(to, kind, &id, payload).await {
            self.inner.callbacks.lock().unwrap().remove(&id);
            return Err(err);
        }

        Ok((IqResponse { receiver }, id))
    }

    /// Sends an IQ that answers an inbound `get`/`set` (notably roster
    /// pushes): the caller supplies the id and no callback is registered.
    pub async fn send_iq_reply(
        &self,
        to: Option<&str>,
        kind: &str,
        id: &str,
        payload: Option<Element>,
    ) -> Result<(), Error> {
        self.write_iq(to, kind, id, payload).await
    }

    /// Fills in a fresh id, writes the presence, and returns the id.
    pub async fn send_presence(&self, mut presence: Presence) -> Result<String, Error> {
        let id = self.fresh_id();
        presence.header.id = Some(id.clone());
        self.write_element(&presence.into_element()).await?;
        Ok(id)
    }

    pub async fn send_message(&self, kind: &str, to: &str, body: &str) -> Result<(), Error> {
        let message = Message {
            header: Header {
                from: Some(self.jid_attribute()),
                id: None,
                to: Some(to.to_string()),
                kind: Some(kind.to_string()),
            },
            subject: None,
            body: Some(body.to_string()),
            thread: None,
        };
        self.write_element(&message.into_element()).await
    }

    /// Registers a sink for inbound stanzas. Delivery is non-blocking: a
    /// sink that is full when the router fans out loses that stanza.
    pub fn subscribe(&self, sink: mpsc::Sender<Stanza>) {
        self.inner.subscribers.write().unwrap().push(sink);
    }

    /// Injects a stanza into the subscriber fan-out, as if the router had
    /// read it. Higher layers use this to re-classify stanzas.
    pub fn emit_stanza(&self, stanza: Stanza) {
        self.inner.fan_out(stanza);
    }

    /// First call: writes the stream epilogue and leaves the transport open
    /// so the router can drain the peer's closing tag. Second call: tears
    /// the transport down.
    pub async fn close(&self) -> Result<(), Error> {
        if self.inner.closing.swap(true, Ordering::SeqCst) {
            self.inner.shutdown_transport().await
        } else {
            let mut writer = self.inner.writer.lock().await;
            writer.write_stream_close().await?;
            Ok(())
        }
    }

    fn fresh_id(&self) -> String {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed).to_string()
    }

    fn jid_attribute(&self) -> String {
        self.inner
            .jid
            .get()
            .map(|jid| jid.to_string())
            .unwrap_or_default()
    }

    async fn write_iq(
        &self,
        to: Option<&str>,
        kind: &str,
        id: &str,
        payload: Option<Element>,
    ) -> Result<(), Error> {
        let mut iq = Element::new("iq", Some(namespaces::XMPP_CLIENT));
        if let Some(to) = to.filter(|to| !to.is_empty()) {
            iq.set_attribute("to", None, to);
        }
        iq.set_attribute("from", None, self.jid_attribute());
        iq.set_attribute("type", None, kind);
        iq.set_attribute("id", None, id);
        if let Some(payload) = payload {
            iq.add_child(payload);
        }

        self.write_element(&iq).await
    }

    async fn write_element(&self, element: &Element) -> Result<(), Error> {
        let mut writer = self.inner.writer.lock().await;
        writer.write_xml_element(element).await?;
        Ok(())
    }
}

impl<C: Connection> SessionInner<C> {
    fn fan_out(&self, stanza: Stanza) {
        let subscribers = self.subscribers.read().unwrap();
        for sink in subscribers.iter() {
            match sink.try_send(stanza.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!("subscriber not keeping up, dropping stanza for it");
                }
                Err(TrySendError::Closed(_)) => {}
            }
        }
    }

    async fn shutdown_transport(&self) -> Result<(), Error> {
        let mut writer = self.writer.lock().await;
        match tokio::time::timeout(SHUTDOWN_TIMEOUT, writer.shutdown()).await {
            Ok(result) => result.map_err(Error::from),
            Err(_) => {
                debug!("peer did not acknowledge shutdown in time");
                Ok(())
            }
        }
    }
}

/// The router: reads stanzas off the stream until it ends, correlating IQ
/// responses to waiting callers and fanning everything else out. It must
/// never block on a subscriber, otherwise one slow consumer would stall all
/// IQ correlation on the shared inbound stream.
async fn route_stanzas<C, P>(mut parser: P, inner: Arc<SessionInner<C>>)
where
    C: Connection,
    P: StreamParser<ReadHalf<C>> + Send + 'static,
{
    loop {
        match parser.next().await {
            Some(Ok(Frame::XmlFragment(element))) => dispatch(&inner, element),
            Some(Ok(Frame::StreamStart(_))) => {
                warn!("ignoring unexpected stream restart");
            }
            Some(Ok(Frame::StreamEnd)) => {
                debug!("peer closed the stream");
                break;
            }
            Some(Err(error)) => {
                warn!(%error, "stream parse failure");
                break;
            }
            None => {
                debug!("transport ended");
                break;
            }
        }
    }

    teardown(&inner).await;
}

fn dispatch<C: Connection>(inner: &SessionInner<C>, element: Element) {
    let stanza = match (element.namespace(), element.name()) {
        (Some(namespaces::XMPP_STREAMS), "error") => {
            Stanza::StreamError(StreamError::from_element(&element))
        }
        (Some(namespaces::XMPP_CLIENT), "message") => {
            Stanza::Message(Message::from_element(&element))
        }
        (Some(namespaces::XMPP_CLIENT), "presence") => {
            Stanza::Presence(Presence::from_element(&element))
        }
        (Some(namespaces::XMPP_CLIENT), "iq") => {
            let iq = Iq::from_element(&element);
            let kind = iq.header.kind.clone();
            match kind.as_deref() {
                Some("result") | Some("error") => {
                    deliver_response(inner, iq);
                    return;
                }
                Some("get") | Some("set") => Stanza::Iq(iq),
                _ => {
                    warn!(id = ?iq.header.id, "ignoring iq without a valid type");
                    return;
                }
            }
        }
        (Some(namespaces::XMPP_CLIENT), "error") => {
            Stanza::StanzaError(StanzaError::from_element(&element))
        }
        (namespace, name) => {
            warn!(?namespace, name, "ignoring unknown element");
            return;
        }
    };

    inner.fan_out(stanza);
}

/// Hands a `result`/`error` IQ to the caller that registered its id. The
/// entry is removed before the slot is signalled; an id nobody waits for
/// belongs to a caller that has gone away and is dropped silently.
fn deliver_response<C: Connection>(inner: &SessionInner<C>, iq: Iq) {
    let Some(id) = iq.header.id.clone() else {
        warn!("ignoring iq response without an id");
        return;
    };

    let callback = inner.callbacks.lock().unwrap().remove(&id);
    match callback {
        Some(slot) => {
            let _ = slot.send(iq);
        }
        None => debug!(%id, "dropping iq response with no waiting caller"),
    }
}

/// End-of-stream: cancel every pending IQ awaiter, close the subscriber
/// channels, and tear the transport down.
async fn teardown<C: Connection>(inner: &SessionInner<C>) {
    let pending: Vec<_> = inner.callbacks.lock().unwrap().drain().collect();
    if !pending.is_empty() {
        debug!(count = pending.len(), "cancelling pending iq callbacks");
    }
    drop(pending);

    inner.subscribers.write().unwrap().clear();

    inner.closing.store(true, Ordering::SeqCst);
    if let Err(error) = inner.shutdown_transport().await {
        debug!(%error, "transport shutdown failed");
    }
}
