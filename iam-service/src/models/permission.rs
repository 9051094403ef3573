//! Permission strings of the form `resource.action` with `*` wildcards.

use std::fmt;
use std::str::FromStr;

const WILDCARD: &str = "*";

/// A parsed permission grant.
///
/// Accepted forms: `*`, `resource.action`, `resource.*`, `*.action`.
/// Segments are lowercase `[a-z0-9_-]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Permission {
    All,
    Scoped { resource: Segment, action: Segment },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    Any,
    Named(String),
}

impl Segment {
    fn parse(raw: &str) -> Option<Self> {
        if raw == WILDCARD {
            return Some(Segment::Any);
        }
        let valid = !raw.is_empty()
            && raw.len() <= 64
            && raw
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_' || b == b'-');
        valid.then(|| Segment::Named(raw.to_string()))
    }

    fn covers(&self, value: &str) -> bool {
        match self {
            Segment::Any => true,
            Segment::Named(name) => name == value,
        }
    }

    fn covers_segment(&self, other: &Segment) -> bool {
        match (self, other) {
            (Segment::Any, _) => true,
            (Segment::Named(_), Segment::Any) => false,
            (Segment::Named(a), Segment::Named(b)) => a == b,
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Any => f.write_str(WILDCARD),
            Segment::Named(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidPermission(pub String);

impl fmt::Display for InvalidPermission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid permission '{}': expected resource.action", self.0)
    }
}

impl std::error::Error for InvalidPermission {}

impl FromStr for Permission {
    type Err = InvalidPermission;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == WILDCARD {
            return Ok(Permission::All);
        }
        let (resource, action) = s
            .split_once('.')
            .ok_or_else(|| InvalidPermission(s.to_string()))?;
        match (Segment::parse(resource), Segment::parse(action)) {
            (Some(Segment::Any), Some(Segment::Any)) => Ok(Permission::All),
            (Some(resource), Some(action)) => Ok(Permission::Scoped { resource, action }),
            _ => Err(InvalidPermission(s.to_string())),
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Permission::All => f.write_str(WILDCARD),
            Permission::Scoped { resource, action } => write!(f, "{}.{}", resource, action),
        }
    }
}

impl Permission {
    /// True if this grant allows `action` on `resource`.
    pub fn allows(&self, resource: &str, action: &str) -> bool {
        match self {
            Permission::All => true,
            Permission::Scoped {
                resource: r,
                action: a,
            } => r.covers(resource) && a.covers(action),
        }
    }

    /// True if every request this `other` grant allows is also allowed by `self`.
    pub fn covers(&self, other: &Permission) -> bool {
        match (self, other) {
            (Permission::All, _) => true,
            (Permission::Scoped { .. }, Permission::All) => false,
            (
                Permission::Scoped {
                    resource: r1,
                    action: a1,
                },
                Permission::Scoped {
                    resource: r2,
                    action: a2,
                },
            ) => r1.covers_segment(r2) && a1.covers_segment(a2),
        }
    }
}

/// Parse a list of permission strings, failing on the first invalid one.
pub fn parse_permissions<S: AsRef<str>>(raw: &[S]) -> Result<Vec<Permission>, InvalidPermission> {
    raw.iter().map(|p| p.as_ref().parse()).collect()
}

/// Decision over a set of grants. Unparseable entries grant nothing.
pub fn any_allows<S: AsRef<str>>(grants: &[S], resource: &str, action: &str) -> bool {
    grants
        .iter()
        .filter_map(|g| g.as_ref().parse::<Permission>().ok())
        .any(|p| p.allows(resource, action))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_forms_match() {
        assert!(any_allows(&["*"], "projects", "delete"));
        assert!(any_allows(&["projects.*"], "projects", "delete"));
        assert!(any_allows(&["*.read"], "tasks", "read"));
        assert!(any_allows(&["tasks.read"], "tasks", "read"));
        assert!(!any_allows(&["tasks.read"], "tasks", "write"));
        assert!(!any_allows(&["*.read"], "tasks", "write"));
        assert!(!any_allows::<&str>(&[], "tasks", "read"));
    }

    #[test]
    fn rejects_malformed_permissions() {
        for bad in ["", "projects", "Projects.read", ".read", "projects.", "a.b.c", "tasks read"] {
            assert!(bad.parse::<Permission>().is_err(), "{} should be rejected", bad);
        }
        assert_eq!("*.*".parse::<Permission>().unwrap(), Permission::All);
    }

    #[test]
    fn covers_is_grant_containment() {
        let all: Permission = "*".parse().unwrap();
        let projects_any: Permission = "projects.*".parse().unwrap();
        let projects_read: Permission = "projects.read".parse().unwrap();
        let any_read: Permission = "*.read".parse().unwrap();

        assert!(all.covers(&projects_any));
        assert!(projects_any.covers(&projects_read));
        assert!(!projects_read.covers(&projects_any));
        assert!(any_read.covers(&projects_read));
        assert!(!projects_any.covers(&any_read));
        assert!(!projects_read.covers(&all));
    }

    #[test]
    fn display_round_trips() {
        for raw in ["*", "projects.*", "*.read", "kb.write"] {
            assert_eq!(raw.parse::<Permission>().unwrap().to_string(), raw);
        }
    }
}
