use std::{
    fmt::{Display, Formatter},
    str::FromStr,
};

use anyhow::{bail, Error};
use regex::Regex;

#[derive(Debug, Clone, PartialEq, Eq)]
struct DomainPart(String);

impl Display for DomainPart {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct LocalPart(String);

impl Display for LocalPart {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ResourcePart(String);

impl Display for ResourcePart {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A Jabber Identifier: `local@domain/resource` with optional local and
/// resource parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Jid {
    local: Option<LocalPart>,
    domain: DomainPart,
    resource: Option<ResourcePart>,
}

impl Jid {
    pub fn is_full(&self) -> bool {
        self.resource.is_some()
    }

    pub fn domain(&self) -> &str {
        &self.domain.0
    }
}

impl FromStr for Jid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let regex =
            Regex::new("^(?:(?P<local>[^@/]+)@)?(?P<domain>[^@/]+)(?:/(?P<resource>.+))?$")
                .unwrap();
        match regex.captures(s) {
            Some(captures) => {
                let local = captures
                    .name("local")
                    .map(|m| LocalPart(m.as_str().to_string()));
                let domain = captures
                    .name("domain")
                    .map(|m| DomainPart(m.as_str().to_string()))
                    .unwrap();
                let resource = captures
                    .name("resource")
                    .map(|m| ResourcePart(m.as_str().to_string()));

                Ok(Jid {
                    local,
                    domain,
                    resource,
                })
            }
            None => bail!("could not parse JID: \"{s}\""),
        }
    }
}

impl Display for Jid {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.local {
            Some(local) => write!(f, "{}@{}", local, self.domain)?,
            None => write!(f, "{}", self.domain)?,
        }
        match &self.resource {
            Some(resource) => write!(f, "/{}", resource)?,
            None => (),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::Jid;

    #[test]
    fn fail_on_empty_string() {
        let result = "".parse::<Jid>();
        assert!(result.is_err());
    }

    #[test]
    fn parse_bare_jid() {
        let jid = "alice@example.org".parse::<Jid>().unwrap();
        assert!(!jid.is_full());
        assert_eq!(jid.domain(), "example.org");
        assert_eq!(jid.to_string(), "alice@example.org");
    }

    #[test]
    fn parse_full_jid() {
        let jid = "alice@example.org/abc".parse::<Jid>().unwrap();
        assert!(jid.is_full());
        assert_eq!(jid.to_string(), "alice@example.org/abc");
    }

    #[test]
    fn parse_domain_only() {
        let jid = "example.org".parse::<Jid>().unwrap();
        assert_eq!(jid.to_string(), "example.org");
    }

    #[test]
    fn resource_may_contain_slashes() {
        let jid = "alice@example.org/home/desk".parse::<Jid>().unwrap();
        assert_eq!(jid.to_string(), "alice@example.org/home/desk");
    }

    #[test]
    fn fail_on_missing_domain() {
        assert!("alice@".parse::<Jid>().is_err());
    }
}
