use std::collections::HashMap;

pub mod namespaces;
pub mod stream_parser;
pub mod stream_writer;

#[derive(Debug, Clone)]
enum Node {
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone)]
pub struct Element {
    name: String,
    namespace: Option<String>,
    attributes: HashMap<(String, Option<String>), String>,
    children: Vec<Node>,
}

impl Element {
    pub fn new(name: &str, namespace: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.map(|s| s.to_string()),
            attributes: HashMap::new(),
            children: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn validate(&self, name: &str, namespace: Option<&str>) -> bool {
        self.name == name && self.namespace.as_deref() == namespace
    }

    pub fn attribute(&self, name: &str, namespace: Option<&str>) -> Option<&str> {
        self.attributes
            .get(&(name.to_string(), namespace.map(|s| s.to_string())))
            .map(|s| s.as_str())
    }

    pub fn set_attribute(&mut self, name: &str, namespace: Option<&str>, value: impl Into<String>) {
        self.attributes.insert(
            (name.to_string(), namespace.map(|s| s.to_string())),
            value.into(),
        );
    }

    pub fn children(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|child| match child {
            Node::Element(element) => Some(element),
            _ => None,
        })
    }

    pub fn find_child(&self, name: &str, namespace: Option<&str>) -> Option<&Element> {
        self.children()
            .find(|element| element.validate(name, namespace))
    }

    pub fn text(&self) -> String {
        let mut text = String::new();
        for child in &self.children {
            match child {
                Node::Element(element) => text.push_str(&element.text()),
                Node::Text(s) => text.push_str(s),
            }
        }
        text
    }

    pub fn add_child(&mut self, element: Element) {
        self.children.push(Node::Element(element));
    }

    pub fn with_child<F>(&mut self, name: &str, namespace: Option<&str>, f: F)
    where
        F: FnOnce(&mut Element),
    {
        let mut element = Element::new(name, namespace);
        f(&mut element);
        self.children.push(Node::Element(element));
    }

    pub fn add_text(&mut self, text: impl Into<String>) {
        self.children.push(Node::Text(text.into()));
    }
}

/// Replaces the five XML-special characters with their named entities.
pub fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            '&' => escaped.push_str("&amp;"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// Resolves the named entities produced by [`escape`]. Unknown entities are
/// left untouched.
pub fn unescape(text: &str) -> String {
    const ENTITIES: [(&str, char); 5] = [
        ("&lt;", '<'),
        ("&gt;", '>'),
        ("&quot;", '"'),
        ("&apos;", '\''),
        ("&amp;", '&'),
    ];

    let mut unescaped = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(position) = rest.find('&') {
        unescaped.push_str(&rest[..position]);
        rest = &rest[position..];
        match ENTITIES.iter().find(|(entity, _)| rest.starts_with(entity)) {
            Some((entity, replacement)) => {
                unescaped.push(*replacement);
                rest = &rest[entity.len()..];
            }
            None => {
                unescaped.push('&');
                rest = &rest[1..];
            }
        }
    }
    unescaped.push_str(rest);
    unescaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_simple() {
        let element = Element::new("foo", Some("bar"));
        assert!(element.validate("foo", Some("bar")));
    }

    #[test]
    fn validate_different_name() {
        let element = Element::new("foo", Some("bar"));
        assert!(!element.validate("baz", Some("bar")));
    }

    #[test]
    fn validate_different_namespace() {
        let element = Element::new("foo", Some("bar"));
        assert!(!element.validate("foo", Some("baz")));
    }

    #[test]
    fn attribute_simple() {
        let mut element = Element::new("foo", Some("bar"));
        element.set_attribute("baz", None, "qux");
        assert_eq!(element.attribute("baz", None), Some("qux"));
    }

    #[test]
    fn attribute_missing() {
        let element = Element::new("foo", Some("bar"));
        assert_eq!(element.attribute("baz", None), None);
    }

    #[test]
    fn attribute_overwrite() {
        let mut element = Element::new("foo", Some("bar"));
        element.set_attribute("baz", None, "qux");
        element.set_attribute("baz", None, "overwritten");
        assert_eq!(element.attribute("baz", None), Some("overwritten"));
    }

    #[test]
    fn child_single() {
        let mut parent = Element::new("foo", Some("bar"));
        parent.add_child(Element::new("baz", Some("qux")));
        assert!(parent.find_child("baz", Some("qux")).is_some());
    }

    #[test]
    fn child_multiple() {
        let mut parent = Element::new("foo", Some("bar"));
        parent.add_child(Element::new("baz", Some("baz")));
        parent.add_child(Element::new("qux", Some("qux")));
        assert_eq!(parent.children().count(), 2);
        assert!(parent.find_child("qux", Some("qux")).is_some());
    }

    #[test]
    fn child_missing() {
        let parent = Element::new("foo", Some("bar"));
        assert!(parent.find_child("baz", Some("qux")).is_none());
    }

    #[test]
    fn child_helper() {
        let mut parent = Element::new("foo", Some("bar"));
        parent.with_child("baz", Some("qux"), |child| {
            child.set_attribute("quux", None, "corge");
        });
        assert_eq!(
            parent
                .find_child("baz", Some("qux"))
                .unwrap()
                .attribute("quux", None),
            Some("corge")
        );
    }

    #[test]
    fn text_simple() {
        let mut element = Element::new("foo", Some("bar"));
        element.add_text("baz");
        assert_eq!(element.text(), "baz");
    }

    #[test]
    fn text_nested() {
        let mut parent = Element::new("foo", Some("bar"));
        parent.add_text("before");
        parent.with_child("baz", Some("qux"), |child| {
            child.add_text("inside");
        });
        parent.add_text("after");
        assert_eq!(parent.text(), "beforeinsideafter");
    }

    #[test]
    fn escape_specials() {
        assert_eq!(
            escape(r#"<a href='x' title="y">&z</a>"#),
            "&lt;a href=&apos;x&apos; title=&quot;y&quot;&gt;&amp;z&lt;/a&gt;"
        );
    }

    #[test]
    fn escape_plain_text_is_unchanged() {
        assert_eq!(escape("nothing to do here"), "nothing to do here");
    }

    #[test]
    fn unescape_inverts_escape() {
        let inputs = [
            "plain",
            "<body>&amp;</body>",
            r#"quotes " and ' everywhere"#,
            "&&&",
            "trailing &",
        ];
        for input in inputs {
            assert_eq!(unescape(&escape(input)), input);
        }
    }

    #[test]
    fn unescape_leaves_unknown_entities() {
        assert_eq!(unescape("&unknown; &lt;"), "&unknown; <");
    }
}
