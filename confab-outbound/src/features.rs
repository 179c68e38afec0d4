use std::collections::HashMap;

use confab_core::xml::{namespaces, Element};

/// The negotiable capabilities a `<stream:features>` element advertised.
/// Rebuilt from scratch after every stream restart; a stale set must never
/// survive a reset.
#[derive(Debug, Default)]
pub struct Features {
    entries: HashMap<String, Feature>,
}

#[derive(Debug, Default)]
struct Feature {
    required: bool,
    mechanisms: Vec<String>,
}

impl Features {
    pub fn from_element(element: &Element) -> Self {
        let mut entries = HashMap::new();

        for child in element.children() {
            let mut feature = Feature {
                required: child.find_child("required", child.namespace()).is_some(),
                mechanisms: Vec::new(),
            };

            if child.namespace() == Some(namespaces::XMPP_SASL) {
                feature.mechanisms = child
                    .children()
                    .filter(|mechanism| mechanism.name() == "mechanism")
                    .map(|mechanism| mechanism.text())
                    .collect();
            }

            entries.insert(feature_name(child), feature);
        }

        Features { entries }
    }

    pub fn includes(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn requires(&self, name: &str) -> bool {
        self.entries
            .get(name)
            .map(|feature| feature.required)
            .unwrap_or(false)
    }

    /// The SASL mechanism names the server advertised, in document order.
    pub fn mechanisms(&self) -> &[String] {
        self.entries
            .get("sasl")
            .map(|feature| feature.mechanisms.as_slice())
            .unwrap_or(&[])
    }
}

/// Features are keyed by a short well-known name derived from their
/// namespace; anything unrecognized keeps its element name.
fn feature_name(element: &Element) -> String {
    match element.namespace() {
        Some(namespaces::XMPP_STARTTLS) => "starttls",
        Some(namespaces::XMPP_SASL) => "sasl",
        Some(namespaces::XMPP_BIND) => "bind",
        Some(namespaces::XMPP_SESSION) => "session",
        _ => element.name(),
    }
    .to_string()
}
