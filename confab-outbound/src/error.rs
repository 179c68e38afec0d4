/// Everything that can go wrong between dialing and a bound session, plus
/// the one post-negotiation failure an API caller can observe.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("could not resolve any address for {host}")]
    Resolve {
        host: String,
        errors: Vec<anyhow::Error>,
    },

    #[error("could not connect to any resolved address")]
    Connect(Vec<std::io::Error>),

    #[error("unsupported XMPP version: {0}")]
    UnsupportedVersion(String),

    #[error("unexpected element: {0}")]
    UnexpectedElement(String),

    #[error("server refused STARTTLS")]
    TlsRefused,

    #[error("TLS handshake failed")]
    TlsHandshake(#[source] std::io::Error),

    #[error("could not verify the server certificate")]
    CertUnverified,

    #[error("server certificate does not match {host}")]
    HostnameMismatch {
        host: String,
        #[source]
        source: std::io::Error,
    },

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("stream error: {condition}")]
    StreamError {
        condition: String,
        text: Option<String>,
    },

    #[error("connection lost")]
    ConnectionLost,

    #[error(transparent)]
    Stream(#[from] anyhow::Error),
}
