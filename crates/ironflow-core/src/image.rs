// Container image reference parsing
//
// Accepts the familiar short forms ("alpine", "writefile:v1") and expands
// them to a normalized reference with an explicit registry, repository
// path and tag ("docker.io/library/alpine:latest").

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

const DEFAULT_DOMAIN: &str = "docker.io";
const OFFICIAL_REPO_PREFIX: &str = "library";
const DEFAULT_TAG: &str = "latest";

/// Total reference length cap, matching common registry limits
const MAX_REFERENCE_LEN: usize = 255;

static PATH_COMPONENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]+(?:(?:\.|_|__|-+)[a-z0-9]+)*$").unwrap()
});
static DOMAIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[a-zA-Z0-9](?:[a-zA-Z0-9-]*[a-zA-Z0-9])?)(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]*[a-zA-Z0-9])?)*(?::[0-9]+)?$").unwrap()
});
static TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9._-]{0,127}$").unwrap());
static DIGEST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]+(?:[.+_-][a-z0-9]+)*:[a-fA-F0-9]{32,}$").unwrap());

/// A parsed and normalized container image reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub domain: String,
    pub path: String,
    pub tag: Option<String>,
    pub digest: Option<String>,
}

impl Reference {
    /// Parse an image reference, filling in registry and tag defaults
    pub fn parse(input: &str) -> Result<Self, String> {
        if input.is_empty() {
            return Err("image reference must not be empty".into());
        }
        if input.len() > MAX_REFERENCE_LEN {
            return Err(format!(
                "image reference longer than {} characters",
                MAX_REFERENCE_LEN
            ));
        }

        let (remainder, digest) = match input.split_once('@') {
            Some((name, digest)) => {
                if !DIGEST.is_match(digest) {
                    return Err(format!("invalid digest {:?}", digest));
                }
                (name, Some(digest.to_string()))
            }
            None => (input, None),
        };

        // A colon after the last slash separates the tag; earlier colons
        // belong to the registry port.
        let (name, tag) = match remainder.rfind(':') {
            Some(idx) if idx > remainder.rfind('/').map_or(0, |s| s) => {
                let (name, tag) = remainder.split_at(idx);
                (name, Some(tag[1..].to_string()))
            }
            _ => (remainder, None),
        };

        if let Some(tag) = &tag {
            if !TAG.is_match(tag) {
                return Err(format!("invalid tag {:?}", tag));
            }
        }

        let (domain, path) = split_domain(name);
        if !DOMAIN.is_match(&domain) {
            return Err(format!("invalid registry {:?}", domain));
        }
        if path.is_empty() {
            return Err("image reference has an empty repository path".into());
        }
        for component in path.split('/') {
            if !PATH_COMPONENT.is_match(component) {
                return Err(format!("invalid repository path component {:?}", component));
            }
        }

        let path = if domain == DEFAULT_DOMAIN && !path.contains('/') {
            format!("{}/{}", OFFICIAL_REPO_PREFIX, path)
        } else {
            path
        };

        // An explicit digest pins the image; a tag default only applies
        // without one.
        let tag = match (&tag, &digest) {
            (None, None) => Some(DEFAULT_TAG.to_string()),
            _ => tag,
        };

        Ok(Reference {
            domain,
            path,
            tag,
            digest,
        })
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.domain, self.path)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{}", tag)?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}

/// Split a name into registry domain and repository path.
///
/// The first component is a domain only if it looks like one (contains a
/// dot or port, or is "localhost"); otherwise the whole name is a path on
/// the default registry.
fn split_domain(name: &str) -> (String, String) {
    match name.split_once('/') {
        Some((first, rest))
            if first.contains('.') || first.contains(':') || first == "localhost" =>
        {
            (first.to_string(), rest.to_string())
        }
        _ => (DEFAULT_DOMAIN.to_string(), name.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_short_names() {
        let r = Reference::parse("alpine").unwrap();
        assert_eq!(r.to_string(), "docker.io/library/alpine:latest");
    }

    #[test]
    fn keeps_explicit_tag() {
        let r = Reference::parse("writefile:v1").unwrap();
        assert_eq!(r.to_string(), "docker.io/library/writefile:v1");
    }

    #[test]
    fn parses_full_reference() {
        let r = Reference::parse("quay.io/example/image2disk:v1.0.0").unwrap();
        assert_eq!(r.domain, "quay.io");
        assert_eq!(r.path, "example/image2disk");
        assert_eq!(r.tag.as_deref(), Some("v1.0.0"));
    }

    #[test]
    fn parses_registry_with_port() {
        let r = Reference::parse("localhost:5000/tools/cexec:latest").unwrap();
        assert_eq!(r.domain, "localhost:5000");
        assert_eq!(r.path, "tools/cexec");
    }

    #[test]
    fn parses_digest_reference() {
        let digest = "sha256:94b2db70f7476c98f4c4a1b7a922136e0c5600d2d74905407ad364dcca2bf852";
        let r = Reference::parse(&format!("alpine@{digest}")).unwrap();
        assert_eq!(r.digest.as_deref(), Some(digest));
        assert_eq!(r.tag, None);
    }

    #[test]
    fn rejects_garbage() {
        for bad in ["", "Writefile::bad", "UPPER/case", "a//b", "img:", "img:!!", "a@sha256:short"] {
            assert!(Reference::parse(bad).is_err(), "{bad:?} should be rejected");
        }
    }
}
