//! Builders for synthetic class files and archives.
//!
//! Compiled with `cfg(test)` and with the `test-support` feature, so that the
//! CLI crate can reuse the same fixtures.

use crate::class::CLASS_MAGIC;
use std::io::{Cursor, Write};
use zip::write::{FileOptions, ZipWriter};
use zip::CompressionMethod;

/// Builds a minimal class file: header, constant pool, identity, empty bodies
#[derive(Debug, Clone)]
pub struct ClassBuilder {
    pool: Vec<u8>,
    next_index: u16,
    major_version: u16,
}

impl Default for ClassBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ClassBuilder {
    /// Creates an empty builder for a Java 8 class file
    pub fn new() -> Self {
        Self {
            pool: Vec::new(),
            next_index: 1,
            major_version: 52,
        }
    }

    /// Sets the major version written to the header
    pub fn major_version(mut self, version: u16) -> Self {
        self.major_version = version;
        self
    }

    /// Appends a raw constant and returns its index
    pub fn raw(&mut self, tag: u8, payload: &[u8], slots: u16) -> u16 {
        let index = self.next_index;
        self.pool.push(tag);
        self.pool.extend_from_slice(payload);
        self.next_index += slots;
        index
    }

    /// Appends a Utf8 constant in Java's modified UTF-8
    pub fn utf8(&mut self, value: &str) -> u16 {
        let encoded = cesu8::to_java_cesu8(value);
        let mut payload = (encoded.len() as u16).to_be_bytes().to_vec();
        payload.extend_from_slice(&encoded);
        self.raw(1, &payload, 1)
    }

    /// Appends a Class constant and its name
    pub fn class(&mut self, name: &str) -> u16 {
        let name = self.utf8(name);
        self.raw(7, &name.to_be_bytes(), 1)
    }

    /// Appends a String constant and its value
    pub fn string(&mut self, value: &str) -> u16 {
        let value = self.utf8(value);
        self.raw(8, &value.to_be_bytes(), 1)
    }

    /// Appends an Integer constant
    pub fn integer(&mut self, value: i32) -> u16 {
        self.raw(3, &value.to_be_bytes(), 1)
    }

    /// Appends a Long constant, which occupies two slots
    pub fn long(&mut self, value: i64) -> u16 {
        self.raw(5, &value.to_be_bytes(), 2)
    }

    /// Appends a Double constant, which occupies two slots
    pub fn double(&mut self, value: f64) -> u16 {
        self.raw(6, &value.to_be_bytes(), 2)
    }

    /// Appends a NameAndType constant
    pub fn name_and_type(&mut self, name: &str, descriptor: &str) -> u16 {
        let name = self.utf8(name);
        let descriptor = self.utf8(descriptor);
        let mut payload = name.to_be_bytes().to_vec();
        payload.extend_from_slice(&descriptor.to_be_bytes());
        self.raw(12, &payload, 1)
    }

    fn member_ref(&mut self, tag: u8, class: &str, name: &str, descriptor: &str) -> u16 {
        let class = self.class(class);
        let name_and_type = self.name_and_type(name, descriptor);
        let mut payload = class.to_be_bytes().to_vec();
        payload.extend_from_slice(&name_and_type.to_be_bytes());
        self.raw(tag, &payload, 1)
    }

    /// Appends a Fieldref constant
    pub fn field_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        self.member_ref(9, class, name, descriptor)
    }

    /// Appends a Methodref constant
    pub fn method_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        self.member_ref(10, class, name, descriptor)
    }

    /// Appends an InterfaceMethodref constant
    pub fn interface_method_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        self.member_ref(11, class, name, descriptor)
    }

    /// Appends a MethodHandle constant
    pub fn method_handle(&mut self, kind: u8, reference: u16) -> u16 {
        let mut payload = vec![kind];
        payload.extend_from_slice(&reference.to_be_bytes());
        self.raw(15, &payload, 1)
    }

    /// Finishes the class with the given identity
    pub fn build(mut self, this_class: &str, super_class: &str) -> Vec<u8> {
        let this_index = self.class(this_class);
        let super_index = self.class(super_class);

        let mut out = CLASS_MAGIC.to_vec();
        out.extend_from_slice(&0u16.to_be_bytes());
        out.extend_from_slice(&self.major_version.to_be_bytes());
        out.extend_from_slice(&self.next_index.to_be_bytes());
        out.extend_from_slice(&self.pool);
        out.extend_from_slice(&0x0021u16.to_be_bytes());
        out.extend_from_slice(&this_index.to_be_bytes());
        out.extend_from_slice(&super_index.to_be_bytes());
        // interfaces, fields, methods, attributes
        out.extend_from_slice(&[0; 8]);
        out
    }
}

/// Internal name of log4j 2's JNDI manager
pub const JNDI_MANAGER: &str = "org/apache/logging/log4j/core/net/JndiManager";

/// Internal name of log4j 1's socket receiver node
pub const SOCKET_NODE: &str = "org/apache/log4j/net/SocketNode";

/// JndiManager fixtures and whether each release is vulnerable
///
/// Fixtures differ by class file version per release line (Java 6 up to 2.3,
/// Java 7 up to 2.12, Java 8 from 2.13) and by the JNDI guards each fixed
/// release adds. Releases of one line without new guards share a shape.
pub const JNDI_MANAGER_VERSIONS: &[(&str, bool)] = &[
    ("2.1", true),
    ("2.2", true),
    ("2.3", true),
    ("2.4", true),
    ("2.4.1", true),
    ("2.5", true),
    ("2.6", true),
    ("2.6.1", true),
    ("2.6.2", true),
    ("2.7", true),
    ("2.8", true),
    ("2.8.1", true),
    ("2.8.2", true),
    ("2.9.0", true),
    ("2.9.1", true),
    ("2.10.0", true),
    ("2.11.0", true),
    ("2.11.1", true),
    ("2.11.2", true),
    ("2.12.0", true),
    ("2.12.1", true),
    ("2.12.2", false),
    ("2.13.0", true),
    ("2.13.1", true),
    ("2.13.2", true),
    ("2.13.3", true),
    ("2.13-3-debian", true),
    ("2.14.0", true),
    ("2.14.1", true),
    ("2.15.0", true),
    ("2.16.0", false),
    ("2.16.0-debian", false),
    ("2.17.0", false),
];

/// SocketNode fixtures and whether each release is vulnerable
pub const SOCKET_NODE_VERSIONS: &[(&str, bool)] = &[
    ("1.2.4", true),
    ("1.2.5", true),
    ("1.2.6", true),
    ("1.2.7", true),
    ("1.2.8", true),
    ("1.2.9", true),
    ("1.2.11", true),
    ("1.2.12", true),
    ("1.2.13", true),
    ("1.2.14", true),
    ("1.2.15", true),
    ("1.2.16", true),
    ("1.2.17", true),
    ("1.2.17-debian", false),
];

const HOST_ALLOW_LIST: &[&str] = &[
    "Invalid JNDI URI - {}",
    "allowedHosts",
    "allowedClasses",
    "allowedProtocols",
    "Attempt to access ldap server not in allowed list",
];

/// A JndiManager class shaped like the given release
///
/// # Panics
///
/// Panics on a version missing from [`JNDI_MANAGER_VERSIONS`].
pub fn jndi_manager(version: &str) -> Vec<u8> {
    assert!(
        JNDI_MANAGER_VERSIONS.iter().any(|(v, _)| *v == version),
        "no JndiManager fixture for {version}"
    );

    let mut class = ClassBuilder::new().major_version(release_line_major_version(version));
    class.utf8("JndiManager.java");
    class.long(0x0123_4567_89ab_cdef);
    class.method_ref(JNDI_MANAGER, "getDefaultManager", "()Lorg/apache/logging/log4j/core/net/JndiManager;");
    class.interface_method_ref("javax/naming/Context", "lookup", "(Ljava/lang/String;)Ljava/lang/Object;");
    class.method_ref("javax/naming/InitialContext", "<init>", "(Ljava/util/Hashtable;)V");
    class.field_ref(JNDI_MANAGER, "context", "Ljavax/naming/Context;");
    class.string("java.naming.factory.initial");

    let guards: &[&str] = match version {
        "2.12.2" => &["log4j2.enableJndi", "isJndiEnabled", "Invalid JNDI URI - {}"],
        "2.15.0" => HOST_ALLOW_LIST,
        "2.16.0" | "2.16.0-debian" => &["log4j2.enableJndi", "isJndiEnabled", "JNDI is not enabled"],
        "2.17.0" => &[
            "log4j2.enableJndi",
            "isJndiContextSelectorEnabled",
            "isJndiJdbcEnabled",
            "isJndiJmsEnabled",
            "isJndiLookupEnabled",
            "Invalid JNDI URI - {}",
            "java",
        ],
        _ => &[],
    };
    for guard in guards {
        class.string(guard);
    }
    if version.starts_with("2.16.0") {
        for allow in HOST_ALLOW_LIST {
            class.string(allow);
        }
    }
    if version.ends_with("-debian") {
        class.double(1.0);
    }

    class.build(JNDI_MANAGER, "org/apache/logging/log4j/core/appender/AbstractManager")
}

/// Class file major version log4j 2 was compiled for, by minor release
fn release_line_major_version(version: &str) -> u16 {
    let minor = version
        .split(['.', '-'])
        .nth(1)
        .and_then(|minor| minor.parse::<u32>().ok())
        .unwrap_or(0);
    match minor {
        0..=3 => 50,
        4..=12 => 51,
        _ => 52,
    }
}

/// A SocketNode class shaped like the given release
///
/// # Panics
///
/// Panics on a version missing from [`SOCKET_NODE_VERSIONS`].
pub fn socket_node(version: &str) -> Vec<u8> {
    assert!(
        SOCKET_NODE_VERSIONS.iter().any(|(v, _)| *v == version),
        "no SocketNode fixture for {version}"
    );

    let mut class = ClassBuilder::new();
    class.utf8("SocketNode.java");
    class.method_ref("java/io/ObjectInputStream", "<init>", "(Ljava/io/InputStream;)V");
    class.method_ref("java/io/ObjectInputStream", "readObject", "()Ljava/lang/Object;");
    class.method_ref("java/io/BufferedInputStream", "<init>", "(Ljava/io/InputStream;)V");
    class.class("org/apache/log4j/spi/LoggingEvent");
    class.field_ref(SOCKET_NODE, "hierarchy", "Lorg/apache/log4j/spi/LoggerRepository;");
    class.string("Caught java.io.EOFException closing conneciton.");
    class.long(-5_926_734_813_482_117_632);

    if version == "1.2.17-debian" {
        class.method_ref(
            "org/apache/log4j/net/FilteredObjectInputStream",
            "<init>",
            "(Ljava/io/InputStream;Ljava/util/Collection;)V",
        );
        class.string("apache.log4j.allowedClasses");
    }

    class.build(SOCKET_NODE, "java/lang/Object")
}

fn write_archive(prefix: &[u8], entries: &[(&str, &[u8])], method: CompressionMethod) -> Vec<u8> {
    let mut cursor = Cursor::new(prefix.to_vec());
    cursor.set_position(prefix.len() as u64);
    // offsets are counted from the start of the cursor, prefix included
    let mut zip = ZipWriter::new(cursor);
    let options = FileOptions::default().compression_method(method);

    for (name, content) in entries {
        if name.ends_with('/') {
            zip.add_directory(name.trim_end_matches('/'), options)
                .expect("add directory");
        } else {
            zip.start_file(*name, options).expect("start file");
            zip.write_all(content).expect("write entry");
        }
    }

    zip.finish().expect("finish archive").into_inner()
}

/// A deflate-compressed ZIP archive; names ending in `/` become directories
pub fn zip_archive(entries: &[(&str, &[u8])]) -> Vec<u8> {
    write_archive(&[], entries, CompressionMethod::Deflated)
}

/// A ZIP archive whose entries are stored uncompressed
pub fn zip_archive_stored(entries: &[(&str, &[u8])]) -> Vec<u8> {
    write_archive(&[], entries, CompressionMethod::Stored)
}

/// A self-extracting style archive: `stub` followed by a deflated archive
/// whose directory and header offsets count from the start of the stub
pub fn self_extracting(stub: &[u8], entries: &[(&str, &[u8])]) -> Vec<u8> {
    write_archive(stub, entries, CompressionMethod::Deflated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::ClassFile;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_jndi_manager_release_lines_differ() {
        let major = |version| ClassFile::parse(&jndi_manager(version)).unwrap().major_version();
        assert_eq!(major("2.3"), 50);
        assert_eq!(major("2.4"), 51);
        assert_eq!(major("2.12.1"), 51);
        assert_eq!(major("2.13-3-debian"), 52);
        assert_eq!(major("2.14.1"), 52);

        assert_ne!(jndi_manager("2.3"), jndi_manager("2.4"));
        assert_ne!(jndi_manager("2.12.1"), jndi_manager("2.13.0"));
        assert_eq!(jndi_manager("2.13.0"), jndi_manager("2.14.1"));
    }

    #[test]
    fn test_self_extracting_offsets_include_stub() {
        let stub = b"MZ stub bytes";
        let data = self_extracting(stub, &[("a.txt", b"a")]);
        assert!(data.starts_with(stub));
        assert_eq!(&data[stub.len()..stub.len() + 4], b"PK\x03\x04");
        // first local header offset in the central directory record
        let central = data
            .windows(4)
            .position(|w| w == b"PK\x01\x02")
            .unwrap();
        let offset = u32::from_le_bytes(data[central + 42..central + 46].try_into().unwrap());
        assert_eq!(offset as usize, stub.len());
    }
}
