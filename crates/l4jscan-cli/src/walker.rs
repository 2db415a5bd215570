//! Walking directory trees and the archives found in them.

use crate::progress::Progress;
use anyhow::{Context, Result};
use l4jscan_core::{classify, is_class_file, locate, ByteSource, Payloads, Verdict};
use memmap2::Mmap;
use std::collections::HashMap;
use std::fmt::Display;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};
use walkdir::WalkDir;

/// Extensions of files handed to the archive locator
const ARCHIVE_EXTENSIONS: &[&str] = &["jar", "war", "ear", "zip"];

/// Extensions of archive entries that are descended into
const NESTED_EXTENSIONS: &[&str] = &["jar", "war", "ear"];

/// Settings derived from the command line
#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub excludes: Vec<PathBuf>,
    pub report_inaccessible: bool,
    pub check_legacy: bool,
    pub progress_interval: u64,
    pub max_depth: usize,
    pub max_entry_size: u64,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            excludes: Vec::new(),
            report_inaccessible: false,
            check_legacy: true,
            progress_interval: 100_000,
            max_depth: 8,
            max_entry_size: 512 * 1024 * 1024,
        }
    }
}

/// A vulnerable class, located relative to the archive it was found in
#[derive(Debug, Clone)]
struct Finding {
    /// `::`-separated path of nested archives below that archive
    location: String,
    member: String,
    description: &'static str,
}

impl Finding {
    fn nested_in(mut self, name: &str) -> Self {
        self.location = format!("::{name}{}", self.location);
        self
    }
}

/// Scans roots one after another, writing findings to `out`
pub struct Walker<W: Write> {
    options: ScanOptions,
    out: W,
    progress: Progress,
    /// Findings of nested archives already scanned, by content digest
    seen: HashMap<blake3::Hash, Vec<Finding>>,
}

impl<W: Write> Walker<W> {
    pub fn new(options: ScanOptions, out: W) -> Self {
        let progress = Progress::new(options.progress_interval);
        Self {
            options,
            out,
            progress,
            seen: HashMap::new(),
        }
    }

    /// Number of findings so far
    pub fn matched(&self) -> u64 {
        self.progress.matched()
    }

    pub fn scanned(&self) -> u64 {
        self.progress.scanned()
    }

    pub fn into_output(self) -> W {
        self.out
    }

    /// Walks one root. Only failures to write findings are errors.
    pub fn scan_root(&mut self, root: &Path) -> Result<()> {
        let excludes = self.options.excludes.clone();
        let walk = WalkDir::new(root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| !is_excluded(&excludes, entry.path()));

        for entry in walk {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e.path().unwrap_or(root).to_path_buf();
                    self.inaccessible("can't access", path.display(), &e);
                    continue;
                }
            };
            if entry.file_type().is_dir() {
                continue;
            }
            self.progress.increment(entry.path().display());

            if has_extension(entry.path(), ARCHIVE_EXTENSIONS) {
                self.scan_file(entry.path())?;
            }
        }
        self.out.flush().context("Failed to flush findings")?;
        Ok(())
    }

    fn scan_file(&mut self, path: &Path) -> Result<()> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) => {
                self.inaccessible("can't open", path.display(), &e);
                return Ok(());
            }
        };
        let size = match file.metadata() {
            Ok(metadata) => metadata.len(),
            Err(e) => {
                self.inaccessible("can't stat", path.display(), &e);
                return Ok(());
            }
        };
        let label = path.display().to_string();
        if size == 0 {
            let empty: &[u8] = &[];
            self.scan_archive(&label, empty, 0, 0)?;
            return Ok(());
        }

        // SAFETY: The file is opened read-only and outlives the map; the map is
        // dropped at the end of this function.
        let map = match unsafe { Mmap::map(&file) } {
            Ok(map) => map,
            Err(e) => {
                self.inaccessible("can't map", path.display(), &e);
                return Ok(());
            }
        };
        self.scan_archive(&label, &map[..], size, 0)?;
        Ok(())
    }

    /// Scans one archive and everything nested in it, returning its findings
    fn scan_archive<S: ByteSource + ?Sized>(
        &mut self,
        label: &str,
        source: &S,
        size: u64,
        depth: usize,
    ) -> Result<Vec<Finding>> {
        debug!("Inspecting {}...", label);
        let mut findings = Vec::new();

        let container = match locate(source, size) {
            Ok(container) => container,
            Err(e) => {
                warn!("can't open JAR file: {} (size {}): {}", label, size, e);
                return Ok(findings);
            }
        };
        let mut payloads = container.open();

        for (index, entry) in container.entries().iter().enumerate() {
            if entry.is_dir() {
                continue;
            }
            let name = entry.name();
            let member = format!("{label}/{name}");
            if entry.uncompressed_size() > self.options.max_entry_size {
                self.inaccessible("JAR file member too large", &member, &entry.uncompressed_size());
                continue;
            }

            if has_extension(Path::new(name), NESTED_EXTENSIONS) {
                if depth >= self.options.max_depth {
                    self.inaccessible("archive nested too deeply", &member, &depth);
                    continue;
                }
                let nested = match read_entry(&mut payloads, index, self.options.max_entry_size) {
                    Ok(nested) => nested,
                    Err(e) => {
                        self.inaccessible("can't read JAR file member", &member, &e);
                        continue;
                    }
                };
                let digest = blake3::hash(&nested);
                let nested_label = format!("{label}::{name}");
                let found = match self.seen.get(&digest).cloned() {
                    Some(cached) => {
                        debug!("{} was already scanned under another name, repeating its findings", member);
                        for finding in &cached {
                            self.report(&nested_label, finding)?;
                        }
                        cached
                    }
                    None => {
                        let found =
                            self.scan_archive(&nested_label, nested.as_slice(), nested.len() as u64, depth + 1)?;
                        self.seen.insert(digest, found.clone());
                        found
                    }
                };
                findings.extend(found.into_iter().map(|finding| finding.nested_in(name)));
                continue;
            }

            let bytes = match read_class(&mut payloads, index, self.options.max_entry_size) {
                Ok(Some(bytes)) => bytes,
                Ok(None) => continue,
                Err(e) => {
                    self.inaccessible("can't read JAR file member", &member, &e);
                    continue;
                }
            };
            self.progress.increment(&member);

            match classify(&bytes, name, self.options.check_legacy) {
                Ok(Verdict::Vulnerable(description)) => {
                    let finding = Finding {
                        location: String::new(),
                        member: name.to_string(),
                        description,
                    };
                    self.report(label, &finding)?;
                    findings.push(finding);
                }
                Ok(Verdict::Clean) => trace!("{} is clean", member),
                Err(e) => self.inaccessible("can't parse class file", &member, &e),
            }
        }
        Ok(findings)
    }

    fn report(&mut self, label: &str, finding: &Finding) -> Result<()> {
        self.progress.record_match();
        writeln!(
            self.out,
            "indicator for vulnerable component found in {}{} ({}): {}",
            label, finding.location, finding.member, finding.description
        )
        .context("Failed to write finding")
    }

    fn inaccessible(&self, message: &str, path: impl Display, err: &dyn Display) {
        if self.options.report_inaccessible {
            warn!("{} {}: {}", message, path, err);
        } else {
            debug!("{} {}: {}", message, path, err);
        }
    }
}

/// Compares component-wise, so `a/b/` excludes `a/b`
fn is_excluded(excludes: &[PathBuf], path: &Path) -> bool {
    excludes.iter().any(|exclude| exclude == path)
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| extensions.iter().any(|candidate| ext.eq_ignore_ascii_case(candidate)))
        .unwrap_or(false)
}

fn read_entry<S: ByteSource + ?Sized>(
    payloads: &mut Payloads<'_, S>,
    index: usize,
    limit: u64,
) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    payloads.entry(index)?.take(limit).read_to_end(&mut bytes)?;
    Ok(bytes)
}

/// Reads an entry only if it starts with the class file magic
fn read_class<S: ByteSource + ?Sized>(
    payloads: &mut Payloads<'_, S>,
    index: usize,
    limit: u64,
) -> Result<Option<Vec<u8>>> {
    let mut reader = payloads.entry(index)?.take(limit);
    let mut magic = [0u8; 4];
    match reader.read_exact(&mut magic) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    if !is_class_file(&magic) {
        return Ok(None);
    }
    let mut bytes = magic.to_vec();
    reader.read_to_end(&mut bytes)?;
    Ok(Some(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use l4jscan_core::testing::{jndi_manager, self_extracting, socket_node, zip_archive, zip_archive_stored};
    use std::fs;
    use tempfile::TempDir;

    const JNDI_PATH: &str = "org/apache/logging/log4j/core/net/JndiManager.class";
    const SOCKET_PATH: &str = "org/apache/log4j/net/SocketNode.class";

    fn scan(options: ScanOptions, root: &Path) -> (String, u64) {
        let mut walker = Walker::new(options, Vec::new());
        walker.scan_root(root).unwrap();
        let matched = walker.matched();
        (String::from_utf8(walker.into_output()).unwrap(), matched)
    }

    #[test]
    fn test_finds_class_in_plain_jar() {
        let dir = TempDir::new().unwrap();
        let jar = dir.path().join("app.jar");
        fs::write(&jar, zip_archive(&[(JNDI_PATH, &jndi_manager("2.14.1"))])).unwrap();

        let (out, matched) = scan(ScanOptions::default(), dir.path());
        assert_eq!(matched, 1);
        assert!(out.starts_with(&format!(
            "indicator for vulnerable component found in {} ({}): ",
            jar.display(),
            JNDI_PATH
        )));
        assert!(out.contains("CVE-2021-44228"));
    }

    #[test]
    fn test_finds_class_behind_launcher_prefix() {
        let dir = TempDir::new().unwrap();
        let mut data = b"#!/bin/sh\nexec java -jar \"$0\" \"$@\"\n".to_vec();
        data.extend_from_slice(&zip_archive_stored(&[(JNDI_PATH, &jndi_manager("2.15.0"))]));
        fs::write(dir.path().join("launcher.ZIP"), data).unwrap();

        let (out, matched) = scan(ScanOptions::default(), dir.path());
        assert_eq!(matched, 1);
        assert!(out.contains("CVE-2021-45046"));
    }

    #[test]
    fn test_finds_class_in_self_extracting_archive() {
        let dir = TempDir::new().unwrap();
        let mut stub = b"MZ\x90\x00".to_vec();
        stub.extend_from_slice(&[0u8; 508]);
        let installer = self_extracting(&stub, &[(JNDI_PATH, &jndi_manager("2.14.1"))]);
        fs::write(dir.path().join("installer.zip"), installer).unwrap();

        let (out, matched) = scan(ScanOptions::default(), dir.path());
        assert_eq!(matched, 1, "{out}");
        assert!(out.contains("CVE-2021-44228"));
    }

    #[test]
    fn test_identical_nested_archives_are_reported_at_every_location() {
        let dir = TempDir::new().unwrap();
        let inner = zip_archive(&[(SOCKET_PATH, &socket_node("1.2.17"))]);
        let app1 = zip_archive(&[
            ("WEB-INF/lib/log4j-1.2.17.jar", inner.as_slice()),
            ("WEB-INF/lib/copy.jar", inner.as_slice()),
            ("index.html", b"<html></html>".as_slice()),
        ]);
        let app2 = zip_archive(&[("WEB-INF/lib/log4j-1.2.17.jar", inner.as_slice())]);
        let app1_path = dir.path().join("app1.war");
        let app2_path = dir.path().join("app2.war");
        fs::write(&app1_path, app1).unwrap();
        fs::write(&app2_path, app2).unwrap();

        let (out, matched) = scan(ScanOptions::default(), dir.path());
        assert_eq!(matched, 3, "{out}");
        for location in [
            format!("{}::WEB-INF/lib/log4j-1.2.17.jar", app1_path.display()),
            format!("{}::WEB-INF/lib/copy.jar", app1_path.display()),
            format!("{}::WEB-INF/lib/log4j-1.2.17.jar", app2_path.display()),
        ] {
            assert!(out.contains(&format!("found in {location} ({SOCKET_PATH}): ")), "{location} missing from {out}");
        }
    }

    #[test]
    fn test_repeated_findings_keep_their_nested_path() {
        let dir = TempDir::new().unwrap();
        let jar = zip_archive(&[(JNDI_PATH, &jndi_manager("2.14.1"))]);
        let war = zip_archive(&[("WEB-INF/lib/log4j-core.jar", jar.as_slice())]);
        let ear = zip_archive(&[("a.war", war.as_slice()), ("b.war", war.as_slice())]);
        let ear_path = dir.path().join("bundle.ear");
        fs::write(&ear_path, ear).unwrap();

        let (out, matched) = scan(ScanOptions::default(), dir.path());
        assert_eq!(matched, 2, "{out}");
        for war in ["a.war", "b.war"] {
            let location = format!("{}::{war}::WEB-INF/lib/log4j-core.jar", ear_path.display());
            assert!(out.contains(&format!("found in {location} ({JNDI_PATH}): ")), "{location} missing from {out}");
        }
    }

    #[test]
    fn test_ignore_legacy() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("log4j.jar"),
            zip_archive(&[(SOCKET_PATH, &socket_node("1.2.8"))]),
        )
        .unwrap();

        let options = ScanOptions {
            check_legacy: false,
            ..ScanOptions::default()
        };
        let (out, matched) = scan(options, dir.path());
        assert_eq!(matched, 0);
        assert_eq!(out, "");
    }

    #[test]
    fn test_excluded_directories_are_pruned() {
        let dir = TempDir::new().unwrap();
        let excluded = dir.path().join("vendor");
        fs::create_dir(&excluded).unwrap();
        fs::write(
            excluded.join("app.jar"),
            zip_archive(&[(JNDI_PATH, &jndi_manager("2.14.1"))]),
        )
        .unwrap();

        let (_, matched) = scan(ScanOptions::default(), dir.path());
        assert_eq!(matched, 1);

        let options = ScanOptions {
            excludes: vec![excluded],
            ..ScanOptions::default()
        };
        let (out, matched) = scan(options, dir.path());
        assert_eq!(matched, 0);
        assert_eq!(out, "");
    }

    #[test]
    fn test_depth_limit() {
        let dir = TempDir::new().unwrap();
        let inner = zip_archive(&[(JNDI_PATH, &jndi_manager("2.14.1"))]);
        let outer = zip_archive(&[("lib/inner.jar", &inner)]);
        fs::write(dir.path().join("outer.jar"), outer).unwrap();

        let options = ScanOptions {
            max_depth: 0,
            ..ScanOptions::default()
        };
        let (_, matched) = scan(options, dir.path());
        assert_eq!(matched, 0);

        let (_, matched) = scan(ScanOptions::default(), dir.path());
        assert_eq!(matched, 1);
    }

    #[test]
    fn test_broken_and_unrelated_files_are_skipped() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("empty.jar"), b"").unwrap();
        fs::write(dir.path().join("garbage.zip"), b"PK\x03\x04 not really").unwrap();
        fs::write(dir.path().join("notes.txt"), b"JndiManager").unwrap();
        let mut truncated = jndi_manager("2.14.1");
        truncated.truncate(40);
        fs::write(
            dir.path().join("broken.jar"),
            zip_archive(&[(JNDI_PATH, &truncated), ("README", b"x")]),
        )
        .unwrap();

        let (out, matched) = scan(ScanOptions::default(), dir.path());
        assert_eq!(matched, 0);
        assert_eq!(out, "");
    }

    #[test]
    fn test_has_extension() {
        assert!(has_extension(Path::new("a/b.JAR"), ARCHIVE_EXTENSIONS));
        assert!(has_extension(Path::new("b.zip"), ARCHIVE_EXTENSIONS));
        assert!(!has_extension(Path::new("b.zip"), NESTED_EXTENSIONS));
        assert!(!has_extension(Path::new("jar"), ARCHIVE_EXTENSIONS));
    }

    #[test]
    fn test_is_excluded() {
        let excludes = vec![PathBuf::from("/opt/app/")];
        assert!(is_excluded(&excludes, Path::new("/opt/app")));
        assert!(!is_excluded(&excludes, Path::new("/opt/app/lib")));
    }
}
