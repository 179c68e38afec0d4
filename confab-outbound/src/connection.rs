pub mod tcp;

pub use confab_core::xmpp::stream::Connection;
pub use tcp::TcpConnection;
