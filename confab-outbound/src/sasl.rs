use base64::prelude::*;
use tokio::io::ReadHalf;
use tracing::debug;

use confab_core::{
    xml::{namespaces, stream_parser::StreamParser, Element},
    xmpp::stream::{Connection, XmppStream},
};

use crate::error::Error;
use crate::features::Features;
use crate::next_fragment;

/// Mechanisms this client can speak, in order of preference.
const SUPPORTED_MECHANISMS: &[&str] = &["PLAIN"];

pub(crate) struct SaslNegotiator {
    _private: (),
}

impl SaslNegotiator {
    pub async fn negotiate<C, P>(
        stream: &mut XmppStream<C, P>,
        user: &str,
        password: &str,
        features: &Features,
    ) -> Result<(), Error>
    where
        C: Connection,
        P: StreamParser<ReadHalf<C>>,
    {
        let mechanism = Self::select_mechanism(features.mechanisms())
            .ok_or_else(|| Error::AuthFailed("no compatible mechanism".to_string()))?;
        debug!(mechanism, "authenticating");

        let mut auth = Element::new("auth", Some(namespaces::XMPP_SASL));
        auth.set_attribute("xmlns", None, namespaces::XMPP_SASL);
        auth.set_attribute("mechanism", None, mechanism);
        auth.add_text(plain_payload(user, password));
        stream.writer().write_xml_element(&auth).await?;

        let answer = next_fragment(stream).await?;
        if answer.validate("success", Some(namespaces::XMPP_SASL)) {
            return Ok(());
        }
        if answer.validate("failure", Some(namespaces::XMPP_SASL)) {
            let condition = answer
                .children()
                .next()
                .map(|child| child.name().to_string())
                .unwrap_or_else(|| "not-authorized".to_string());
            return Err(Error::AuthFailed(condition));
        }

        Err(Error::UnexpectedElement(answer.name().to_string()))
    }

    /// The first locally supported mechanism the server also advertises.
    fn select_mechanism(offered: &[String]) -> Option<&'static str> {
        SUPPORTED_MECHANISMS
            .iter()
            .copied()
            .find(|ours| offered.iter().any(|theirs| theirs == ours))
    }
}

/// RFC 4616 PLAIN initial response: `\0authcid\0password`, base64-encoded.
fn plain_payload(user: &str, password: &str) -> String {
    BASE64_STANDARD.encode(format!("\0{user}\0{password}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offered(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn plain_payload_encoding() {
        assert_eq!(plain_payload("alice", "s3cret"), "AGFsaWNlAHMzY3JldA==");
    }

    #[test]
    fn selects_plain_when_offered() {
        let mechanisms = offered(&["SCRAM-SHA-1", "PLAIN"]);
        assert_eq!(SaslNegotiator::select_mechanism(&mechanisms), Some("PLAIN"));
    }

    #[test]
    fn selects_nothing_without_overlap() {
        let mechanisms = offered(&["SCRAM-SHA-1", "EXTERNAL"]);
        assert_eq!(SaslNegotiator::select_mechanism(&mechanisms), None);
    }

    #[test]
    fn selects_nothing_from_empty_offer() {
        assert_eq!(SaslNegotiator::select_mechanism(&[]), None);
    }
}
