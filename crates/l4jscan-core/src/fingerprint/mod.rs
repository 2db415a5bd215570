//! Classifying class files against a catalog of vulnerable builds.
//!
//! A class is examined only if its file name matches a catalog target. Its
//! constant pool is then parsed and each of the target's rules is tested
//! against the set of Utf8 constants: all `present` markers must be there and
//! none of the `absent` ones.

mod catalog;

pub use catalog::CATALOG;

use crate::class::{is_class_file, ClassFile};
use crate::error::Result;
use std::collections::HashSet;
use std::fmt;
use tracing::{debug, trace};

/// A declarative test for one vulnerable build of a target class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FingerprintRule {
    /// Lower-case file name of the class, e.g. `jndimanager.class`
    pub target: &'static str,
    /// Whether the rule covers the legacy 1.x line
    pub legacy: bool,
    /// Markers that must all be Utf8 constants of the class
    pub present: &'static [&'static str],
    /// Markers that must all be missing, excluding patched builds
    pub absent: &'static [&'static str],
    /// Returned as the verdict on a match
    pub description: &'static str,
}

impl FingerprintRule {
    /// Tests the rule against a class's Utf8 constants
    pub fn matches(&self, constants: &HashSet<&str>) -> bool {
        self.present.iter().all(|marker| constants.contains(marker))
            && !self.absent.iter().any(|marker| constants.contains(marker))
    }

    fn applies_to(&self, file_name: &str, check_legacy: bool) -> bool {
        self.target == file_name && (check_legacy || !self.legacy)
    }
}

/// Outcome of classifying one class file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Not a target class, or no rule matched
    Clean,
    /// The description of the first matching rule
    Vulnerable(&'static str),
}

impl Verdict {
    /// Returns true if a rule matched
    pub fn is_vulnerable(&self) -> bool {
        matches!(self, Self::Vulnerable(_))
    }

    /// The matched rule's description
    pub fn description(&self) -> Option<&'static str> {
        match self {
            Self::Vulnerable(description) => Some(description),
            Self::Clean => None,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description().unwrap_or_default())
    }
}

/// Reduces an entry name to its lower-case final path component
pub fn member_file_name(member_name: &str) -> String {
    member_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(member_name)
        .to_lowercase()
}

/// Classifies a class file against the built-in [`CATALOG`].
///
/// `check_legacy` enables the log4j 1.x targets.
pub fn classify(bytes: &[u8], member_name: &str, check_legacy: bool) -> Result<Verdict> {
    classify_with(CATALOG, bytes, member_name, check_legacy)
}

/// Classifies a class file against a caller-supplied rule list.
///
/// Returns [`Verdict::Clean`] without parsing when the name matches no target
/// or the bytes lack the class file magic. Structural problems in a target
/// class are errors.
pub fn classify_with(
    catalog: &[FingerprintRule],
    bytes: &[u8],
    member_name: &str,
    check_legacy: bool,
) -> Result<Verdict> {
    let file_name = member_file_name(member_name);
    let mut rules = catalog
        .iter()
        .filter(|rule| rule.applies_to(&file_name, check_legacy))
        .peekable();

    if rules.peek().is_none() {
        trace!("{} is not a file of interest", member_name);
        return Ok(Verdict::Clean);
    }
    if !is_class_file(bytes) {
        debug!("{} lacks the class file magic", member_name);
        return Ok(Verdict::Clean);
    }

    let class = ClassFile::parse(bytes)?;
    let constants = class.utf8_constants();
    trace!(
        "{} declares {} with {} distinct Utf8 constants",
        member_name,
        class.this_class_name(),
        constants.len()
    );

    for rule in rules {
        if rule.matches(&constants) {
            debug!("{} matches: {}", member_name, rule.description);
            return Ok(Verdict::Vulnerable(rule.description));
        }
    }
    Ok(Verdict::Clean)
}
