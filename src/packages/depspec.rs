// src/packages/depspec.rs

//! Dependency specifier parsing
//!
//! Link targets are stored exactly as the source declared them, e.g.
//! `glibc>=2.34`, `python-pip: for installing extras`, or plain `bash`.
//! Ingestion, search and resolution all go through [`DepSpec::parse`] so the
//! three agree on what the bare name of a specifier is.

use std::fmt;

/// Comparison operator of a version constraint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintOp {
    Eq,
    Ge,
    Le,
    Gt,
    Lt,
}

impl ConstraintOp {
    pub fn as_str(&self) -> &str {
        match self {
            ConstraintOp::Eq => "=",
            ConstraintOp::Ge => ">=",
            ConstraintOp::Le => "<=",
            ConstraintOp::Gt => ">",
            ConstraintOp::Lt => "<",
        }
    }
}

/// Version constraint attached to a specifier (`>=1.0`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionConstraint {
    pub op: ConstraintOp,
    pub version: String,
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.op.as_str(), self.version)
    }
}

/// A parsed dependency specifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepSpec {
    /// Bare package or virtual name
    pub name: String,
    pub constraint: Option<VersionConstraint>,
    /// Trailing human description (optional dependencies)
    pub description: Option<String>,
}

impl DepSpec {
    /// Parse a raw specifier. Never fails; a malformed string degrades to
    /// a bare name.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        let op_pos = raw.find(['<', '>', '=']);

        let (head, description) = match description_colon(raw, op_pos) {
            Some(pos) => {
                let desc = raw[pos + 1..].trim();
                (&raw[..pos], (!desc.is_empty()).then(|| desc.to_string()))
            }
            None => (raw, None),
        };

        let (name, constraint) = match head.find(['<', '>', '=']) {
            Some(pos) => {
                let rest = &head[pos..];
                let (op, len) = if rest.starts_with(">=") {
                    (ConstraintOp::Ge, 2)
                } else if rest.starts_with("<=") {
                    (ConstraintOp::Le, 2)
                } else if rest.starts_with('>') {
                    (ConstraintOp::Gt, 1)
                } else if rest.starts_with('<') {
                    (ConstraintOp::Lt, 1)
                } else {
                    (ConstraintOp::Eq, 1)
                };
                let version = rest[len..].trim().to_string();
                let constraint = (!version.is_empty()).then_some(VersionConstraint { op, version });
                (head[..pos].trim(), constraint)
            }
            None => (head.trim(), None),
        };

        Self {
            name: name.to_string(),
            constraint,
            description,
        }
    }

    /// Bare name of a raw specifier
    pub fn bare_name(raw: &str) -> String {
        Self::parse(raw).name
    }

    /// True when `raw` names `name`, ignoring constraint and description
    pub fn matches_name(raw: &str, name: &str) -> bool {
        Self::parse(raw).name == name
    }
}

impl fmt::Display for DepSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(constraint) = &self.constraint {
            write!(f, "{}", constraint)?;
        }
        if let Some(description) = &self.description {
            write!(f, ": {}", description)?;
        }
        Ok(())
    }
}

/// Locate the colon that introduces a description.
///
/// Epochs also use `:` (`foo=1:2.0`), so a colon after the version operator
/// only counts when followed by whitespace or the end of the string.
fn description_colon(raw: &str, op_pos: Option<usize>) -> Option<usize> {
    raw.char_indices()
        .filter(|&(_, c)| c == ':')
        .map(|(i, _)| i)
        .find(|&i| {
            let before_op = op_pos.is_none_or(|op| i < op);
            let spaced = raw[i + 1..].chars().next().is_none_or(char::is_whitespace);
            before_op || spaced
        })
}

/// Strip epoch and release from a version: `1:2.3.4-1` becomes `2.3.4`
pub fn clean_version(version: &str) -> &str {
    let without_rel = version.split('-').next().unwrap_or(version);
    without_rel.rsplit(':').next().unwrap_or(without_rel)
}
