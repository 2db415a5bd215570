//! Known vulnerable builds, as marker sets over Utf8 constants.
//!
//! Rules are evaluated in order and the first full match wins, so a narrower
//! rule must precede any broader rule for the same target. Version numbers do
//! not appear in class files; distributions also ship patched classes under
//! unpatched version numbers. The guard strings a fix introduces are what
//! tell builds apart.

use super::FingerprintRule;

/// Property consulted by every JndiManager that gates JNDI behind a switch
/// (2.12.2, 2.16.0 and later, and distribution backports of either).
const JNDI_SWITCH: &str = "log4j2.enableJndi";

/// Log message introduced together with the 2.15.0 host allow-list
const ALLOW_LIST_MESSAGE: &str = "Invalid JNDI URI - {}";

/// The built-in rule set
pub static CATALOG: &[FingerprintRule] = &[
    FingerprintRule {
        target: "jndimanager.class",
        legacy: false,
        present: &["javax/naming/Context", "lookup", ALLOW_LIST_MESSAGE],
        absent: &[JNDI_SWITCH],
        description: "log4j 2.15.0 JndiManager: lookups restricted by host allow-list only (CVE-2021-45046)",
    },
    FingerprintRule {
        target: "jndimanager.class",
        legacy: false,
        present: &["javax/naming/Context", "lookup"],
        absent: &[JNDI_SWITCH, ALLOW_LIST_MESSAGE],
        description: "log4j 2.1 - 2.14.1 JndiManager: unrestricted JNDI lookups (CVE-2021-44228)",
    },
    FingerprintRule {
        target: "socketnode.class",
        legacy: true,
        present: &["java/io/ObjectInputStream", "readObject"],
        absent: &["org/apache/log4j/net/FilteredObjectInputStream"],
        description: "log4j 1.2.x SocketNode: deserializes untrusted objects (CVE-2019-17571)",
    },
];
