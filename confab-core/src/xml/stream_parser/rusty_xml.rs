use std::pin::Pin;
use std::task::{ready, Context, Poll};

use anyhow::{anyhow, bail, Error};
use bytes::BytesMut;
use rustyxml::{EndTag, Event, Parser, StartTag};
use tokio::io::{AsyncRead, ReadBuf};
use tokio_stream::Stream;

use crate::xml::{namespaces, Element};
use crate::xmpp::stream_header::{LanguageTag, StreamHeader};

use super::{Frame, StreamParser};

const READ_CHUNK_SIZE: usize = 4096;

fn is_stream_root(name: &str, namespace: Option<&str>) -> bool {
    name == "stream" && namespace == Some(namespaces::XMPP_STREAMS)
}

fn stream_header(tag: &StartTag) -> StreamHeader {
    StreamHeader {
        name: tag.name.clone(),
        namespace: tag.ns.clone(),
        from: tag.attributes.get(&("from".to_string(), None)).cloned(),
        id: tag.attributes.get(&("id".to_string(), None)).cloned(),
        version: tag.attributes.get(&("version".to_string(), None)).cloned(),
        language: tag
            .attributes
            .get(&("lang".to_string(), Some(namespaces::XML.to_string())))
            .map(|lang| LanguageTag(lang.to_string())),
    }
}

/// Assembles first-level elements from the parser's tag events. The stream
/// root itself is never pushed here, so an empty stack means "between
/// stanzas".
struct FragmentBuilder {
    stack: Vec<Element>,
}

impl FragmentBuilder {
    fn new() -> Self {
        FragmentBuilder { stack: Vec::new() }
    }

    fn depth(&self) -> usize {
        self.stack.len()
    }

    fn start(&mut self, tag: StartTag) {
        let mut element = Element::new(&tag.name, tag.ns.as_deref());
        for ((name, namespace), value) in tag.attributes {
            element.set_attribute(&name, namespace.as_deref(), value);
        }
        self.stack.push(element);
    }

    fn end(&mut self, tag: &EndTag) -> Result<Option<Element>, Error> {
        let element = match self.stack.pop() {
            Some(element) => element,
            None => bail!("unbalanced end element </{}>", tag.name),
        };
        if !element.validate(&tag.name, tag.ns.as_deref()) {
            bail!("mismatched end element </{}>", tag.name);
        }

        match self.stack.last_mut() {
            Some(parent) => {
                parent.add_child(element);
                Ok(None)
            }
            None => Ok(Some(element)),
        }
    }

    fn text(&mut self, text: String) {
        // Character data outside any stanza is whitespace keepalive.
        if let Some(element) = self.stack.last_mut() {
            element.add_text(text);
        }
    }
}

pub struct RustyXmlStreamParser<R: AsyncRead + Unpin> {
    reader: R,
    buffer: BytesMut,
    parser: Parser,
    builder: FragmentBuilder,
    root_seen: bool,
}

impl<R: AsyncRead + Unpin> StreamParser<R> for RustyXmlStreamParser<R> {
    fn new(reader: R) -> Self {
        Self {
            reader,
            buffer: BytesMut::with_capacity(READ_CHUNK_SIZE),
            parser: Parser::new(),
            builder: FragmentBuilder::new(),
            root_seen: false,
        }
    }

    fn into_inner(self) -> R {
        self.reader
    }
}

impl<R: AsyncRead + Unpin> Stream for RustyXmlStreamParser<R> {
    type Item = Result<Frame, Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let me = self.get_mut();

        loop {
            for parser_result in &mut me.parser {
                let event = match parser_result {
                    Ok(event) => event,
                    Err(err) => return Poll::Ready(Some(Err(anyhow!(err)))),
                };

                match event {
                    Event::ElementStart(tag) => {
                        if me.builder.depth() == 0 && !me.root_seen {
                            me.root_seen = true;
                            return Poll::Ready(Some(Ok(Frame::StreamStart(stream_header(&tag)))));
                        }
                        me.builder.start(tag);
                    }
                    Event::ElementEnd(tag) => {
                        if me.builder.depth() == 0 {
                            if is_stream_root(&tag.name, tag.ns.as_deref()) {
                                return Poll::Ready(Some(Ok(Frame::StreamEnd)));
                            }
                            return Poll::Ready(Some(Err(anyhow!(
                                "unbalanced end element </{}>",
                                tag.name
                            ))));
                        }
                        match me.builder.end(&tag) {
                            Ok(Some(element)) => {
                                return Poll::Ready(Some(Ok(Frame::XmlFragment(element))))
                            }
                            Ok(None) => {}
                            Err(err) => return Poll::Ready(Some(Err(err))),
                        }
                    }
                    Event::Characters(text) | Event::CDATA(text) => me.builder.text(text),
                    Event::Comment(_) | Event::PI(_) => {}
                }
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let mut read_buf = ReadBuf::new(&mut chunk);
            ready!(Pin::new(&mut me.reader).poll_read(cx, &mut read_buf))?;

            if read_buf.filled().is_empty() {
                return Poll::Ready(None);
            }
            me.buffer.extend_from_slice(read_buf.filled());

            // Feed the longest valid UTF-8 prefix; a sequence split across
            // reads stays buffered until its remaining bytes arrive.
            let valid_len = match std::str::from_utf8(&me.buffer) {
                Ok(_) => me.buffer.len(),
                Err(err) if err.error_len().is_none() => err.valid_up_to(),
                Err(err) => return Poll::Ready(Some(Err(anyhow!(err)))),
            };
            if valid_len > 0 {
                let complete = me.buffer.split_to(valid_len);
                me.parser.feed_str(std::str::from_utf8(&complete)?);
            }
        }
    }
}
