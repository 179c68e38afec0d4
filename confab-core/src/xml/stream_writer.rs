use std::collections::HashMap;

use anyhow::{anyhow, Error};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::xml::{escape, namespaces, Element, Node};

/// Escape-aware XML serializer over an async byte sink. Namespace
/// declarations seen on opening tags are kept on a scope stack so that
/// children can be rendered with the right prefix (or none, for the default
/// namespace). The stream header's declarations stay on the stack for the
/// life of the stream.
pub struct StreamWriter<W: AsyncWrite + Unpin> {
    writer: W,
    namespaces: Vec<HashMap<String, String>>, // stacked namespace to prefix map
}

impl<W: AsyncWrite + Unpin> StreamWriter<W> {
    pub fn new(writer: W) -> Self {
        let mut namespaces = HashMap::new();
        namespaces.insert(namespaces::XML.to_string(), "xml".to_string());
        namespaces.insert(namespaces::XMLNS.to_string(), "xmlns".to_string());
        let namespaces = vec![namespaces];

        Self { writer, namespaces }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    /// Emits the XML prolog and the client stream opener. The element is
    /// intentionally left open; its body is the entire session.
    pub async fn write_stream_header(&mut self, from: &str, to: &str) -> Result<(), Error> {
        let header = format!(
            "<?xml version='1.0' encoding='UTF-8'?>\
             <stream:stream from='{}' to='{}' version='1.0' xml:lang='en' \
             xmlns='jabber:client' xmlns:stream='http://etherx.jabber.org/streams'>",
            escape(from),
            escape(to),
        );

        let mut scope = HashMap::new();
        scope.insert(namespaces::XMPP_CLIENT.to_string(), String::new());
        scope.insert(namespaces::XMPP_STREAMS.to_string(), "stream".to_string());
        self.namespaces.push(scope);

        self.write_str(&header).await
    }

    pub async fn write_stream_close(&mut self) -> Result<(), Error> {
        let stream_element = Element::new("stream", Some(namespaces::XMPP_STREAMS));
        let closing_tag = self.build_closing_tag(&stream_element);
        self.write_str(&closing_tag).await
    }

    pub async fn write_xml_element(&mut self, element: &Element) -> Result<(), Error> {
        let xml = self.build_xml_element(element);
        self.write_str(&xml).await
    }

    pub async fn shutdown(&mut self) -> Result<(), Error> {
        self.writer.shutdown().await.map_err(|err| anyhow!(err))
    }

    async fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.writer
            .write_all(bytes)
            .await
            .map_err(|err| anyhow!(err))?;

        self.writer.flush().await.map_err(|err| anyhow!(err))
    }

    async fn write_str(&mut self, string: &str) -> Result<(), Error> {
        self.write_bytes(string.as_bytes()).await
    }

    fn lookup_namespace_prefix(&self, namespace: &str) -> Option<&str> {
        for namespaces in self.namespaces.iter().rev() {
            if let Some(prefix) = namespaces.get(namespace) {
                return Some(prefix);
            }
        }

        None
    }

    fn build_xml_element(&mut self, element: &Element) -> String {
        let mut xml = String::new();

        if !element.children.is_empty() {
            xml.push_str(&self.build_opening_tag(element, false));
            xml.push_str(&self.build_children(element));
            xml.push_str(&self.build_closing_tag(element));
        } else {
            xml.push_str(&self.build_opening_tag(element, true));
        }

        xml
    }

    fn build_opening_tag(&mut self, element: &Element, self_closing: bool) -> String {
        let mut xml = String::new();

        // Collect namespace declarations carried as attributes into a fresh
        // scope before rendering the tag itself.
        let mut scope = HashMap::new();
        for ((attribute, namespace), value) in &element.attributes {
            match namespace {
                Some(namespace) => {
                    if namespace == namespaces::XMLNS {
                        scope.insert(value.clone(), attribute.clone()); // prefixed namespace
                    }
                }
                None => {
                    if attribute == "xmlns" {
                        scope.insert(value.clone(), String::new()); // default namespace
                    }
                }
            }
        }
        self.namespaces.push(scope);

        match &element.namespace {
            Some(namespace) => match self.lookup_namespace_prefix(namespace) {
                Some("") => {
                    xml.push_str(&format!(
                        "<{}{}",
                        element.name,
                        self.build_attributes(element)
                    ));
                }
                Some(prefix) => {
                    xml.push_str(&format!(
                        "<{}:{}{}",
                        prefix,
                        element.name,
                        self.build_attributes(element)
                    ));
                }
                None => {
                    debug_assert!(false, "namespace not declared: {namespace}");
                    xml.push_str(&format!(
                        "<{}{}",
                        element.name,
                        self.build_attributes(element)
                    ));
                }
            },
            None => {
                xml.push_str(&format!(
                    "<{}{}",
                    element.name,
                    self.build_attributes(element)
                ));
            }
        }

        if self_closing {
            self.namespaces.pop();
            xml.push_str("/>");
        } else {
            xml.push('>');
        }

        xml
    }

    fn build_attributes(&self, element: &Element) -> String {
        let mut xml = String::new();

        for ((attribute, namespace), value) in &element.attributes {
            match namespace {
                Some(namespace) => match self.lookup_namespace_prefix(namespace) {
                    Some("") | None => {
                        debug_assert!(false, "attribute namespace not usable: {namespace}");
                    }
                    Some(prefix) => {
                        xml.push_str(&format!(r#" {}:{}="{}""#, prefix, attribute, escape(value)));
                    }
                },
                None => {
                    xml.push_str(&format!(r#" {}="{}""#, attribute, escape(value)));
                }
            }
        }

        xml
    }

    fn build_children(&mut self, element: &Element) -> String {
        let mut xml = String::new();

        for child in &element.children {
            match child {
                Node::Element(child_element) => {
                    xml.push_str(&self.build_xml_element(child_element));
                }
                Node::Text(text) => {
                    xml.push_str(&escape(text));
                }
            }
        }

        xml
    }

    fn build_closing_tag(&mut self, element: &Element) -> String {
        let mut xml = String::new();

        match &element.namespace {
            Some(namespace) => match self.lookup_namespace_prefix(namespace) {
                Some("") => {
                    xml.push_str(&format!("</{}>", element.name));
                }
                Some(prefix) => {
                    xml.push_str(&format!("</{}:{}>", prefix, element.name));
                }
                None => {
                    debug_assert!(false, "namespace not declared: {namespace}");
                    xml.push_str(&format!("</{}>", element.name));
                }
            },
            None => {
                xml.push_str(&format!("</{}>", element.name));
            }
        }

        self.namespaces.pop();

        xml
    }
}
