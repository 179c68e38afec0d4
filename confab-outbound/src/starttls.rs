use tokio::io::ReadHalf;
use tracing::debug;

use confab_core::{
    xml::{namespaces, stream_parser::StreamParser, Element},
    xmpp::stream::{Connection, XmppStream},
};

use crate::error::Error;
use crate::next_fragment;

pub(crate) struct StarttlsNegotiator {
    _private: (),
}

impl StarttlsNegotiator {
    /// Asks the server to proceed, then swaps the TLS layer in underneath
    /// the stream. A `<failure/>` answer means the server will close the
    /// connection on us.
    pub async fn negotiate<C, P>(stream: &mut XmppStream<C, P>) -> Result<(), Error>
    where
        C: Connection,
        P: StreamParser<ReadHalf<C>>,
    {
        let mut starttls = Element::new("starttls", Some(namespaces::XMPP_STARTTLS));
        starttls.set_attribute("xmlns", None, namespaces::XMPP_STARTTLS);
        stream.writer().write_xml_element(&starttls).await?;

        let answer = next_fragment(stream).await?;
        if !answer.validate("proceed", Some(namespaces::XMPP_STARTTLS)) {
            if answer.validate("failure", Some(namespaces::XMPP_STARTTLS)) {
                return Err(Error::TlsRefused);
            }
            return Err(Error::UnexpectedElement(answer.name().to_string()));
        }

        debug!("server agreed to STARTTLS, upgrading transport");
        stream.upgrade_to_tls().await.map_err(flatten_tls_error)?;

        Ok(())
    }
}

/// Upgrade failures travel through the transport-agnostic `Connection` trait
/// as `anyhow::Error`; recover the taxonomy where the transport produced one.
fn flatten_tls_error(error: anyhow::Error) -> Error {
    match error.downcast::<Error>() {
        Ok(error) => error,
        Err(error) => Error::Stream(error),
    }
}
