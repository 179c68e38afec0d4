use anyhow::anyhow;

use confab_core::{
    xml::{namespaces, Element},
    xmpp::jid::Jid,
    xmpp::stream::Connection,
};

use crate::error::Error;
use crate::session::Session;

pub(crate) struct BindNegotiator {
    _private: (),
}

impl BindNegotiator {
    /// Asks the server to bind a resource to this session. The router must
    /// already be running: the bind request is an ordinary IQ whose response
    /// is correlated like any other. Resource-specific binding is not
    /// supported; the server chooses.
    pub async fn negotiate<C: Connection>(session: &Session<C>) -> Result<Jid, Error> {
        let mut bind = Element::new("bind", Some(namespaces::XMPP_BIND));
        bind.set_attribute("xmlns", None, namespaces::XMPP_BIND);

        let (response, _) = session.send_iq(None, "set", Some(bind)).await?;
        let response = response.recv().await?;

        if response.header.kind.as_deref() == Some("error") {
            let condition = response
                .error
                .and_then(|error| error.condition)
                .unwrap_or_else(|| "undefined-condition".to_string());
            return Err(Error::Stream(anyhow!("resource binding failed: {condition}")));
        }

        let payload = response
            .payload
            .filter(|payload| payload.validate("bind", Some(namespaces::XMPP_BIND)))
            .ok_or_else(|| anyhow!("bind response carries no bind payload"))?;
        let jid = payload
            .find_child("jid", Some(namespaces::XMPP_BIND))
            .map(|jid| jid.text())
            .ok_or_else(|| anyhow!("bind response carries no jid"))?;

        Ok(jid.trim().parse()?)
    }
}
