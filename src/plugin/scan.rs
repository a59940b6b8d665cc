//! Structural security scan for plugin archives.
//!
//! The scan is a static policy check, not a sandbox: it inspects the
//! archive's files, descriptor, and manifest, and emits findings at
//! four severities. Registration is rejected iff any CRITICAL finding
//! is present; everything else is logged and accepted.

use aho_corasick::AhoCorasick;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::OnceLock;

use super::manifest::{self, PluginManifest};

/// Severity of one scan finding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Info,
    Minor,
    Warning,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Info => "INFO",
            Severity::Minor => "MINOR",
            Severity::Warning => "WARNING",
            Severity::Critical => "CRITICAL",
        };
        f.write_str(s)
    }
}

/// One finding: a rule name, its severity, and what tripped it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanFinding {
    pub severity: Severity,
    pub rule: String,
    pub message: String,
}

impl ScanFinding {
    fn new(severity: Severity, rule: &str, message: impl Into<String>) -> Self {
        Self {
            severity,
            rule: rule.to_owned(),
            message: message.into(),
        }
    }
}

/// The scan outcome for one archive.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ScanReport {
    pub findings: Vec<ScanFinding>,
}

impl ScanReport {
    /// Registration is rejected iff any CRITICAL finding is present.
    #[must_use]
    pub fn rejected(&self) -> bool {
        self.findings
            .iter()
            .any(|f| f.severity == Severity::Critical)
    }

    /// Findings at a given severity.
    #[must_use]
    pub fn at(&self, severity: Severity) -> Vec<&ScanFinding> {
        self.findings
            .iter()
            .filter(|f| f.severity == severity)
            .collect()
    }

    /// One-line summary of the critical findings.
    #[must_use]
    pub fn summary(&self) -> String {
        self.at(Severity::Critical)
            .iter()
            .map(|f| f.rule.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Scan options. `strict` adds the naming-convention probe.
#[derive(Clone, Copy, Debug, Default)]
pub struct ScanOptions {
    pub strict: bool,
}

/// Archive size ceiling before a WARNING.
const MAX_ARCHIVE_BYTES: u64 = 100 * 1024 * 1024;
/// Single-file size ceiling before a WARNING.
const MAX_FILE_BYTES: u64 = 10 * 1024 * 1024;

/// Symbol substrings whose presence anywhere in the archive is a
/// CRITICAL finding. Fixed policy: process spawning, security-policy
/// mutation, raw memory/filesystem access outside standard APIs, and
/// reflective loaders.
const SYMBOL_BLOCKLIST: &[&str] = &[
    "std::process::Command",
    "execve",
    "posix_spawn",
    "fork(",
    "system(",
    "setuid",
    "seteuid",
    "ptrace",
    "mprotect",
    "dlopen",
    "__libc_dlopen",
    "LD_PRELOAD",
    "/proc/self/mem",
    "/dev/mem",
];

/// Declared symbol suffixes that warrant a WARNING.
const DANGEROUS_SUFFIXES: &[&str] = &["_exec", "_shell", "_eval", "_spawn"];

/// Dependency name fragments that warrant a WARNING.
const SUSPICIOUS_DEPENDENCIES: &[&str] = &["runtime", "process", "script", "eval", "unsafe"];

fn blocklist_matcher() -> &'static AhoCorasick {
    static MATCHER: OnceLock<AhoCorasick> = OnceLock::new();
    MATCHER.get_or_init(|| AhoCorasick::new(SYMBOL_BLOCKLIST).expect("blocklist patterns"))
}

/// Run the scan against an archive directory.
pub fn scan_archive(archive: &Path, options: ScanOptions) -> std::io::Result<ScanReport> {
    let mut report = ScanReport::default();

    if !archive.is_dir() {
        report.findings.push(ScanFinding::new(
            Severity::Critical,
            "empty-archive",
            format!("archive '{}' does not exist", archive.display()),
        ));
        return Ok(report);
    }

    let mut total_bytes = 0u64;
    let mut file_count = 0usize;
    for entry in std::fs::read_dir(archive)? {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if !metadata.is_file() {
            continue;
        }
        file_count += 1;
        total_bytes += metadata.len();

        if metadata.len() > MAX_FILE_BYTES {
            report.findings.push(ScanFinding::new(
                Severity::Warning,
                "oversized-file",
                format!(
                    "{} is {} bytes (limit {MAX_FILE_BYTES})",
                    entry.path().display(),
                    metadata.len()
                ),
            ));
        }

        // Blocklist sweep over raw file bytes; symbol names survive in
        // both text descriptors and library symbol tables.
        let bytes = std::fs::read(entry.path())?;
        if let Some(found) = blocklist_matcher().find(&bytes) {
            report.findings.push(ScanFinding::new(
                Severity::Critical,
                "blocklisted-symbol",
                format!(
                    "{} references '{}'",
                    entry.path().display(),
                    SYMBOL_BLOCKLIST[found.pattern().as_usize()]
                ),
            ));
        }
    }

    if file_count == 0 {
        report.findings.push(ScanFinding::new(
            Severity::Critical,
            "empty-archive",
            format!("archive '{}' contains no files", archive.display()),
        ));
        return Ok(report);
    }

    if total_bytes > MAX_ARCHIVE_BYTES {
        report.findings.push(ScanFinding::new(
            Severity::Warning,
            "oversized-archive",
            format!("archive is {total_bytes} bytes (limit {MAX_ARCHIVE_BYTES})"),
        ));
    }

    match manifest::read_spi_symbol(archive)? {
        None => {
            report.findings.push(ScanFinding::new(
                Severity::Critical,
                "missing-spi",
                "archive has no SPI descriptor",
            ));
        }
        Some(symbol) => {
            if DANGEROUS_SUFFIXES.iter().any(|s| symbol.ends_with(s)) {
                report.findings.push(ScanFinding::new(
                    Severity::Warning,
                    "dangerous-symbol-suffix",
                    format!("constructor symbol '{symbol}' has a dangerous suffix"),
                ));
            }
        }
    }

    let manifest = PluginManifest::load_from(archive).unwrap_or_default();
    scan_manifest(manifest.as_ref(), options, &mut report);

    report.findings.push(ScanFinding::new(
        Severity::Info,
        "scanned",
        format!("{file_count} file(s), {total_bytes} bytes"),
    ));

    Ok(report)
}

fn scan_manifest(manifest: Option<&PluginManifest>, options: ScanOptions, report: &mut ScanReport) {
    let Some(manifest) = manifest else {
        report.findings.push(ScanFinding::new(
            Severity::Minor,
            "missing-manifest",
            "no plugin.yml; plugin self-reported metadata will be authoritative",
        ));
        return;
    };

    for (field, value) in [
        ("name", &manifest.name),
        ("version", &manifest.version),
        ("author", &manifest.author),
        ("description", &manifest.description),
    ] {
        if value.trim().is_empty() {
            report.findings.push(ScanFinding::new(
                Severity::Minor,
                "missing-metadata",
                format!("manifest field '{field}' is empty"),
            ));
        }
    }

    if manifest.author.trim().is_empty() || manifest.author.eq_ignore_ascii_case("unknown") {
        report.findings.push(ScanFinding::new(
            Severity::Warning,
            "unknown-author",
            "plugin author is unknown",
        ));
    }

    for tag in &manifest.tags {
        let lowered = tag.to_ascii_lowercase();
        if SUSPICIOUS_DEPENDENCIES.iter().any(|s| lowered.contains(s)) {
            report.findings.push(ScanFinding::new(
                Severity::Warning,
                "suspicious-dependency",
                format!("dependency/tag '{tag}' matches a watched name"),
            ));
        }
    }

    if options.strict && !manifest.id.is_empty() {
        let valid = manifest
            .id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
            && manifest.id.starts_with(|c: char| c.is_ascii_lowercase());
        if !valid {
            report.findings.push(ScanFinding::new(
                Severity::Warning,
                "naming-convention",
                format!("plugin id '{}' is not lower-kebab/snake case", manifest.id),
            ));
        }
    }
}

/// Scan the declared dependencies of an in-process plugin (the archive
/// rules do not apply, but the watched-name rule still does).
#[must_use]
pub fn scan_dependencies(dependencies: &[String]) -> ScanReport {
    let mut report = ScanReport::default();
    for dep in dependencies {
        let lowered = dep.to_ascii_lowercase();
        if SUSPICIOUS_DEPENDENCIES.iter().any(|s| lowered.contains(s)) {
            report.findings.push(ScanFinding::new(
                Severity::Warning,
                "suspicious-dependency",
                format!("dependency '{dep}' matches a watched name"),
            ));
        }
    }
    report
}
