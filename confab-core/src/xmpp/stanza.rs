use crate::xml::{namespaces, Element};

/// Attributes shared by all first-class stanzas. `kind` is the wire-level
/// `type` attribute.
#[derive(Debug, Clone, Default)]
pub struct Header {
    pub from: Option<String>,
    pub id: Option<String>,
    pub to: Option<String>,
    pub kind: Option<String>,
}

impl Header {
    fn from_element(element: &Element) -> Self {
        Header {
            from: element.attribute("from", None).map(str::to_string),
            id: element.attribute("id", None).map(str::to_string),
            to: element.attribute("to", None).map(str::to_string),
            kind: element.attribute("type", None).map(str::to_string),
        }
    }

    fn apply_to(&self, element: &mut Element) {
        if let Some(from) = &self.from {
            element.set_attribute("from", None, from.clone());
        }
        if let Some(id) = &self.id {
            element.set_attribute("id", None, id.clone());
        }
        if let Some(to) = &self.to {
            element.set_attribute("to", None, to.clone());
        }
        if let Some(kind) = &self.kind {
            element.set_attribute("type", None, kind.clone());
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Message {
    pub header: Header,
    pub subject: Option<String>,
    pub body: Option<String>,
    pub thread: Option<String>,
}

impl Message {
    pub fn from_element(element: &Element) -> Self {
        let child_text = |name: &str| {
            element
                .find_child(name, Some(namespaces::XMPP_CLIENT))
                .map(|child| child.text())
        };

        Message {
            header: Header::from_element(element),
            subject: child_text("subject"),
            body: child_text("body"),
            thread: child_text("thread"),
        }
    }

    pub fn into_element(self) -> Element {
        let mut element = Element::new("message", Some(namespaces::XMPP_CLIENT));
        self.header.apply_to(&mut element);

        let children = [
            ("subject", self.subject),
            ("body", self.body),
            ("thread", self.thread),
        ];
        for (name, value) in children {
            if let Some(value) = value {
                element.with_child(name, Some(namespaces::XMPP_CLIENT), |child| {
                    child.add_text(value);
                });
            }
        }

        element
    }
}

#[derive(Debug, Clone, Default)]
pub struct Presence {
    pub header: Header,
    pub show: Option<String>,
    pub status: Option<String>,
    pub priority: Option<i8>,
    pub error: Option<StanzaError>,
}

impl Presence {
    pub fn from_element(element: &Element) -> Self {
        let child_text = |name: &str| {
            element
                .find_child(name, Some(namespaces::XMPP_CLIENT))
                .map(|child| child.text())
        };

        Presence {
            header: Header::from_element(element),
            show: child_text("show"),
            status: child_text("status"),
            priority: child_text("priority").and_then(|text| text.trim().parse().ok()),
            error: element
                .find_child("error", Some(namespaces::XMPP_CLIENT))
                .map(StanzaError::from_element),
        }
    }

    pub fn into_element(self) -> Element {
        let mut element = Element::new("presence", Some(namespaces::XMPP_CLIENT));
        self.header.apply_to(&mut element);

        let children = [
            ("show", self.show),
            ("status", self.status),
            ("priority", self.priority.map(|p| p.to_string())),
        ];
        for (name, value) in children {
            if let Some(value) = value {
                element.with_child(name, Some(namespaces::XMPP_CLIENT), |child| {
                    child.add_text(value);
                });
            }
        }

        element
    }
}

/// An info/query stanza. The payload child is kept as a decoded element so
/// higher layers can inspect its qualified name and inner content.
#[derive(Debug, Clone)]
pub struct Iq {
    pub header: Header,
    pub payload: Option<Element>,
    pub error: Option<StanzaError>,
}

impl Iq {
    pub fn from_element(element: &Element) -> Self {
        Iq {
            header: Header::from_element(element),
            payload: element
                .children()
                .find(|child| !child.validate("error", Some(namespaces::XMPP_CLIENT)))
                .cloned(),
            error: element
                .find_child("error", Some(namespaces::XMPP_CLIENT))
                .map(StanzaError::from_element),
        }
    }
}

/// A `<stream:error>` condition, terminal for the whole stream.
#[derive(Debug, Clone)]
pub struct StreamError {
    pub condition: Option<String>,
    pub text: Option<String>,
}

impl StreamError {
    pub fn from_element(element: &Element) -> Self {
        error_parts(element, namespaces::XMPP_STREAM_ERRORS)
    }
}

/// A stanza-level `<error>` child, per RFC 6120 §8.3.
#[derive(Debug, Clone)]
pub struct StanzaError {
    pub code: Option<String>,
    pub kind: Option<String>,
    pub condition: Option<String>,
    pub text: Option<String>,
}

impl StanzaError {
    pub fn from_element(element: &Element) -> Self {
        let parts = error_parts(element, namespaces::XMPP_STANZA_ERRORS);
        StanzaError {
            code: element.attribute("code", None).map(str::to_string),
            kind: element.attribute("type", None).map(str::to_string),
            condition: parts.condition,
            text: parts.text,
        }
    }
}

fn error_parts(element: &Element, condition_namespace: &str) -> StreamError {
    let condition = element
        .children()
        .find(|child| child.name() != "text")
        .map(|child| child.name().to_string());
    let text = element
        .find_child("text", Some(condition_namespace))
        .map(|child| child.text());

    StreamError { condition, text }
}

/// The sum of everything the router can hand out.
#[derive(Debug, Clone)]
pub enum Stanza {
    Message(Message),
    Presence(Presence),
    Iq(Iq),
    StreamError(StreamError),
    StanzaError(StanzaError),
}

impl Stanza {
    pub fn id(&self) -> Option<&str> {
        match self {
            Stanza::Message(message) => message.header.id.as_deref(),
            Stanza::Presence(presence) => presence.header.id.as_deref(),
            Stanza::Iq(iq) => iq.header.id.as_deref(),
            Stanza::StreamError(_) | Stanza::StanzaError(_) => None,
        }
    }

    pub fn is_error(&self) -> bool {
        match self {
            Stanza::Message(message) => message.header.kind.as_deref() == Some("error"),
            Stanza::Presence(presence) => presence.header.kind.as_deref() == Some("error"),
            Stanza::Iq(iq) => iq.header.kind.as_deref() == Some("error"),
            Stanza::StreamError(_) | Stanza::StanzaError(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message_element() -> Element {
        let mut element = Element::new("message", Some(namespaces::XMPP_CLIENT));
        element.set_attribute("from", None, "romeo@example.net/orchard");
        element.set_attribute("id", None, "m1");
        element.set_attribute("type", None, "chat");
        element.with_child("body", Some(namespaces::XMPP_CLIENT), |body| {
            body.add_text("wherefore art thou");
        });
        element.with_child("thread", Some(namespaces::XMPP_CLIENT), |thread| {
            thread.add_text("act2");
        });
        element
    }

    #[test]
    fn message_round_trips_through_element() {
        let message = Message::from_element(&message_element());
        assert_eq!(message.body.as_deref(), Some("wherefore art thou"));
        assert_eq!(message.thread.as_deref(), Some("act2"));
        assert_eq!(message.subject, None);

        let reencoded = Message::from_element(&message.clone().into_element());
        assert_eq!(reencoded.header.from, message.header.from);
        assert_eq!(reencoded.header.id, message.header.id);
        assert_eq!(reencoded.body, message.body);
        assert_eq!(reencoded.thread, message.thread);
    }

    #[test]
    fn message_without_body_still_decodes() {
        let mut element = Element::new("message", Some(namespaces::XMPP_CLIENT));
        element.set_attribute("id", None, "m2");
        let message = Message::from_element(&element);
        assert_eq!(message.body, None);
        assert_eq!(message.header.id.as_deref(), Some("m2"));
    }

    #[test]
    fn presence_round_trips_through_element() {
        let mut element = Element::new("presence", Some(namespaces::XMPP_CLIENT));
        element.set_attribute("id", None, "p1");
        element.with_child("show", Some(namespaces::XMPP_CLIENT), |show| {
            show.add_text("away");
        });
        element.with_child("priority", Some(namespaces::XMPP_CLIENT), |priority| {
            priority.add_text("5");
        });

        let presence = Presence::from_element(&element);
        assert_eq!(presence.show.as_deref(), Some("away"));
        assert_eq!(presence.priority, Some(5));

        let reencoded = Presence::from_element(&presence.clone().into_element());
        assert_eq!(reencoded.show, presence.show);
        assert_eq!(reencoded.priority, presence.priority);
    }

    #[test]
    fn iq_keeps_payload_and_qualified_name() {
        let mut element = Element::new("iq", Some(namespaces::XMPP_CLIENT));
        element.set_attribute("type", None, "set");
        element.set_attribute("id", None, "push-1");
        element.with_child("query", Some("jabber:iq:roster"), |query| {
            query.with_child("item", Some("jabber:iq:roster"), |item| {
                item.set_attribute("jid", None, "nurse@example.com");
            });
        });

        let iq = Iq::from_element(&element);
        let payload = iq.payload.expect("payload");
        assert!(payload.validate("query", Some("jabber:iq:roster")));
        assert!(payload.find_child("item", Some("jabber:iq:roster")).is_some());
        assert!(iq.error.is_none());
    }

    #[test]
    fn iq_error_is_split_from_payload() {
        let mut element = Element::new("iq", Some(namespaces::XMPP_CLIENT));
        element.set_attribute("type", None, "error");
        element.set_attribute("id", None, "42");
        element.with_child("error", Some(namespaces::XMPP_CLIENT), |error| {
            error.set_attribute("type", None, "cancel");
            error.with_child(
                "service-unavailable",
                Some(namespaces::XMPP_STANZA_ERRORS),
                |_| {},
            );
        });

        let iq = Iq::from_element(&element);
        assert!(iq.payload.is_none());
        assert!(Stanza::Iq(iq.clone()).is_error());
        let error = iq.error.expect("error");
        assert_eq!(error.kind.as_deref(), Some("cancel"));
        assert_eq!(error.condition.as_deref(), Some("service-unavailable"));
    }

    #[test]
    fn stream_error_condition_and_text() {
        let mut element = Element::new("error", Some(namespaces::XMPP_STREAMS));
        element.with_child("host-gone", Some(namespaces::XMPP_STREAM_ERRORS), |_| {});
        element.with_child("text", Some(namespaces::XMPP_STREAM_ERRORS), |text| {
            text.add_text("moved away");
        });

        let error = StreamError::from_element(&element);
        assert_eq!(error.condition.as_deref(), Some("host-gone"));
        assert_eq!(error.text.as_deref(), Some("moved away"));
        assert!(Stanza::StreamError(error).is_error());
    }

    #[test]
    fn stanza_id_comes_from_the_header() {
        let stanza = Stanza::Message(Message::from_element(&message_element()));
        assert_eq!(stanza.id(), Some("m1"));
        assert!(!stanza.is_error());
    }
}
