use tokio::io::ReadHalf;
use tokio_stream::StreamExt;
use tracing::{debug, info};

use confab_core::{
    xml::{
        namespaces,
        stream_parser::{rusty_xml::RustyXmlStreamParser, Frame, StreamParser},
        Element,
    },
    xmpp::stanza::StreamError,
    xmpp::stream::{Connection, XmppStream},
};

pub mod connection;
pub mod error;
pub mod features;
pub mod resolver;
pub mod session;

mod bind;
mod sasl;
mod starttls;

pub use connection::TcpConnection;
pub use error::Error;
pub use session::{IqResponse, Session};

use bind::BindNegotiator;
use features::Features;
use sasl::SaslNegotiator;
use starttls::StarttlsNegotiator;

/// Resolves `host`, dials the first reachable address, negotiates the stream
/// (STARTTLS, SASL PLAIN, resource binding), and returns a running session.
/// Partial resolution failures are logged; only a completely unreachable
/// host fails the call.
pub async fn connect(
    user: &str,
    host: &str,
    password: &str,
) -> Result<Session<TcpConnection>, Error> {
    let (addresses, resolve_errors) = resolver::resolve(host).await;
    if addresses.is_empty() {
        return Err(Error::Resolve {
            host: host.to_string(),
            errors: resolve_errors,
        });
    }
    for error in &resolve_errors {
        debug!(%error, "partial resolution failure");
    }

    let connection = TcpConnection::connect(&addresses, host).await?;
    let stream = XmppStream::<_, RustyXmlStreamParser<_>>::new(connection);

    OutboundStream::new(stream, user, host, password)
        .establish()
        .await
}

/// Drives the opening handshake over an already-connected transport: the
/// open / receive / features loop with its stream restarts, then the router
/// launch and resource binding.
pub struct OutboundStream<C, P>
where
    C: Connection,
    P: StreamParser<ReadHalf<C>>,
{
    stream: XmppStream<C, P>,
    user: String,
    host: String,
    password: String,
}

impl<C, P> OutboundStream<C, P>
where
    C: Connection,
    P: StreamParser<ReadHalf<C>> + Send + 'static,
{
    pub fn new(stream: XmppStream<C, P>, user: &str, host: &str, password: &str) -> Self {
        OutboundStream {
            stream,
            user: user.to_string(),
            host: host.to_string(),
            password: password.to_string(),
        }
    }

    pub async fn establish(mut self) -> Result<Session<C>, Error> {
        loop {
            self.open_stream().await?;
            self.receive_stream_header().await?;
            let features = self.receive_features().await?;

            // Each accepted feature mandates a stream restart: parser and
            // feature set are discarded, a fresh opener goes out.
            if features.includes("starttls") {
                StarttlsNegotiator::negotiate(&mut self.stream).await?;
                continue;
            }

            if features.requires("sasl") {
                SaslNegotiator::negotiate(&mut self.stream, &self.user, &self.password, &features)
                    .await?;
                self.stream.reset();
                continue;
            }

            break;
        }

        let (parser, writer) = self.stream.into_parts();
        let session = Session::start(parser, writer);

        let jid = BindNegotiator::negotiate(&session).await?;
        info!(%jid, "session established");
        session.set_jid(jid);

        Ok(session)
    }

    async fn open_stream(&mut self) -> Result<(), Error> {
        let from = format!("{}@{}", self.user, self.host);
        self.stream
            .writer()
            .write_stream_header(&from, &self.host)
            .await?;
        Ok(())
    }

    async fn receive_stream_header(&mut self) -> Result<(), Error> {
        let header = match self.stream.reader().next().await {
            Some(Ok(Frame::StreamStart(header))) => header,
            Some(Ok(Frame::XmlFragment(element))) => {
                return Err(Error::UnexpectedElement(element.name().to_string()))
            }
            Some(Ok(Frame::StreamEnd)) | None => return Err(Error::ConnectionLost),
            Some(Err(error)) => return Err(Error::Stream(error)),
        };

        if header.name != "stream" {
            return Err(Error::UnexpectedElement(header.name));
        }

        if header.namespace.as_deref() != Some(namespaces::XMPP_STREAMS) {
            let mut error = Element::new("error", Some(namespaces::XMPP_STREAMS));
            error.with_child(
                "invalid-namespace",
                Some(namespaces::XMPP_STREAM_ERRORS),
                |condition| {
                    condition.set_attribute("xmlns", None, namespaces::XMPP_STREAM_ERRORS);
                },
            );
            let _ = self.stream.writer().write_xml_element(&error).await;
            let _ = self.stream.writer().write_stream_close().await;

            let namespace = header.namespace.unwrap_or_default();
            return Err(Error::UnexpectedElement(format!(
                "{{{namespace}}}{}",
                header.name
            )));
        }

        // A peer that does not advertise a version speaks pre-RFC "0.9".
        let version = header.version.unwrap_or_else(|| "0.9".to_string());
        if version.split('.').next() != Some("1") {
            return Err(Error::UnsupportedVersion(version));
        }

        Ok(())
    }

    async fn receive_features(&mut self) -> Result<Features, Error> {
        let element = next_fragment(&mut self.stream).await?;
        if !element.validate("features", Some(namespaces::XMPP_STREAMS)) {
            return Err(Error::UnexpectedElement(element.name().to_string()));
        }
        Ok(Features::from_element(&element))
    }
}

/// The next first-level element off the stream. A `<stream:error>` here is
/// terminal for the whole handshake and surfaces its condition; anything
/// else unexpected is a protocol violation or a lost connection.
pub(crate) async fn next_fragment<C, P>(stream: &mut XmppStream<C, P>) -> Result<Element, Error>
where
    C: Connection,
    P: StreamParser<ReadHalf<C>>,
{
    match stream.reader().next().await {
        Some(Ok(Frame::XmlFragment(element))) => {
            if element.validate("error", Some(namespaces::XMPP_STREAMS)) {
                let error = StreamError::from_element(&element);
                return Err(Error::StreamError {
                    condition: error
                        .condition
                        .unwrap_or_else(|| "undefined-condition".to_string()),
                    text: error.text,
                });
            }
            Ok(element)
        }
        Some(Ok(Frame::StreamStart(header))) => Err(Error::UnexpectedElement(header.name)),
        Some(Ok(Frame::StreamEnd)) | None => Err(Error::ConnectionLost),
        Some(Err(error)) => Err(Error::Stream(error)),
    }
}
