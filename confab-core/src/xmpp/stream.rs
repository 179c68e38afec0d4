use std::future::Future;

use anyhow::Error;
use tokio::io::{split, AsyncRead, AsyncWrite, ReadHalf, WriteHalf};

use crate::xml::{stream_parser::StreamParser, stream_writer::StreamWriter};

/// A full-duplex byte stream that can be upgraded to TLS in place. The
/// upgrade consumes the connection and yields a new one over the same
/// underlying socket; how the TLS client is configured is the
/// implementation's business.
pub trait Connection: AsyncRead + AsyncWrite + Unpin + Sized + Send + 'static {
    type Upgrade: Future<Output = Result<Self, Error>> + Send;

    fn upgrade(self) -> Result<Self::Upgrade, Error>;
    fn is_secure(&self) -> bool;
}

/// Parser/writer pair over one connection. The parser is always bound to the
/// currently-outermost transport layer: `reset` rebuilds both halves after a
/// SASL restart, `upgrade_to_tls` swaps the transport and rebuilds them in
/// lockstep, discarding any bytes the old parser had buffered.
pub struct XmppStream<C, P>
where
    C: Connection,
    P: StreamParser<ReadHalf<C>>,
{
    secure: bool,
    reader: Option<P>,
    writer: Option<StreamWriter<WriteHalf<C>>>,
}

impl<C, P> XmppStream<C, P>
where
    C: Connection,
    P: StreamParser<ReadHalf<C>>,
{
    pub fn new(connection: C) -> Self {
        let secure = connection.is_secure();
        let (reader, writer) = split(connection);
        let reader = Some(P::new(reader));
        let writer = Some(StreamWriter::new(writer));

        Self {
            secure,
            reader,
            writer,
        }
    }

    pub fn reset(&mut self) {
        let reader = self.reader.take().unwrap().into_inner();
        let writer = self.writer.take().unwrap().into_inner();
        self.reader = Some(P::new(reader));
        self.writer = Some(StreamWriter::new(writer));
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    pub fn reader(&mut self) -> &mut P {
        self.reader.as_mut().unwrap()
    }

    pub fn writer(&mut self) -> &mut StreamWriter<WriteHalf<C>> {
        self.writer.as_mut().unwrap()
    }

    /// Hands the halves over once negotiation is done: the parser to the
    /// router task, the writer to the session.
    pub fn into_parts(mut self) -> (P, StreamWriter<WriteHalf<C>>) {
        (self.reader.take().unwrap(), self.writer.take().unwrap())
    }

    pub async fn upgrade_to_tls(&mut self) -> Result<(), Error> {
        let reader = self.reader.take().unwrap().into_inner();
        let writer = self.writer.take().unwrap().into_inner();
        let connection = reader.unsplit(writer);

        let connection = connection.upgrade()?.await?;

        self.secure = connection.is_secure();

        let (reader, writer) = split(connection);
        self.reader = Some(P::new(reader));
        self.writer = Some(StreamWriter::new(writer));

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::xml::stream_parser::rusty_xml::RustyXmlStreamParser;

    use super::*;

    #[derive(Default)]
    struct DummyConnection {
        secure: bool,
    }

    impl AsyncRead for DummyConnection {
        fn poll_read(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            _buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }
    }

    impl AsyncWrite for DummyConnection {
        fn poll_write(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            _buf: &[u8],
        ) -> std::task::Poll<std::io::Result<usize>> {
            std::task::Poll::Ready(Ok(0))
        }

        fn poll_flush(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }

        fn poll_shutdown(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }
    }

    impl Connection for DummyConnection {
        type Upgrade = std::future::Ready<Result<Self, Error>>;

        fn upgrade(mut self) -> Result<Self::Upgrade, Error> {
            self.secure = true;
            Ok(std::future::ready(Ok(self)))
        }

        fn is_secure(&self) -> bool {
            self.secure
        }
    }

    #[tokio::test]
    async fn upgrade_works() {
        let mut stream = XmppStream::<_, RustyXmlStreamParser<_>>::new(DummyConnection::default());
        assert!(!stream.is_secure());
        stream.upgrade_to_tls().await.unwrap();
        assert!(stream.is_secure());
    }

    #[test]
    fn reader_and_writer_are_available_after_new() {
        let stream = XmppStream::<_, RustyXmlStreamParser<_>>::new(DummyConnection::default());
        assert!(stream.reader.is_some());
        assert!(stream.writer.is_some());
    }

    #[test]
    fn reader_and_writer_are_available_after_reset() {
        let mut stream = XmppStream::<_, RustyXmlStreamParser<_>>::new(DummyConnection::default());
        stream.reset();
        assert!(stream.reader.is_some());
        assert!(stream.writer.is_some());
    }

    #[tokio::test]
    async fn reader_and_writer_are_available_after_upgrade() {
        let mut stream = XmppStream::<_, RustyXmlStreamParser<_>>::new(DummyConnection::default());
        stream.upgrade_to_tls().await.unwrap();
        assert!(stream.reader.is_some());
        assert!(stream.writer.is_some());
    }
}
