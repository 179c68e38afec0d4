pub mod xml;
pub mod xmpp;
