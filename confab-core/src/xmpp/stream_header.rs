#[derive(Debug, Clone)]
pub struct LanguageTag(pub String);

/// The peer's stream opening tag, kept raw. The negotiator decides whether
/// the root name, namespace and version are acceptable.
#[derive(Debug, Clone)]
pub struct StreamHeader {
    pub name: String,
    pub namespace: Option<String>,
    pub from: Option<String>,
    pub id: Option<String>,
    pub version: Option<String>,
    pub language: Option<LanguageTag>,
}
