use anyhow::Error;
use tokio::io::AsyncRead;
use tokio_stream::Stream;

use crate::xmpp::stream_header::StreamHeader;

use super::Element;

pub mod rusty_xml;

#[derive(Debug)]
pub enum Frame {
    /// The peer's opening tag. Carried raw so the negotiator can reject a
    /// root that is not `stream` in the streams namespace.
    StreamStart(StreamHeader),
    /// One complete first-level child of the stream root.
    XmlFragment(Element),
    /// The peer's `</stream:stream>` closing tag.
    StreamEnd,
}

/// Token-level XML decoder over an async byte stream. `None` means the
/// transport reached end of file. A parser is bound to one transport for one
/// stream lifetime; after STARTTLS or SASL the old parser is discarded along
/// with all its buffered state and a fresh one is built over the reader it
/// returns from `into_inner`.
pub trait StreamParser<R: AsyncRead + Unpin>: Stream<Item = Result<Frame, Error>> + Unpin {
    fn new(reader: R) -> Self;
    fn into_inner(self) -> R;
}
