//! Dependency manifest (`package.json`) parsing and import scanning.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

static IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:\bfrom\s*|\bimport\s*\(?\s*|\brequire\s*\(\s*)['"]([^'"\n]+)['"]"#)
        .expect("import regex")
});

/// Runtime modules that never need a manifest entry.
const BUILTINS: &[&str] = &[
    "assert",
    "async_hooks",
    "buffer",
    "child_process",
    "cluster",
    "crypto",
    "dns",
    "events",
    "fs",
    "http",
    "http2",
    "https",
    "module",
    "net",
    "os",
    "path",
    "perf_hooks",
    "process",
    "querystring",
    "readline",
    "stream",
    "string_decoder",
    "timers",
    "tls",
    "url",
    "util",
    "vm",
    "worker_threads",
    "zlib",
];

/// Parsed `package.json` dependency sections.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Manifest {
    pub dependencies: BTreeMap<String, serde_json::Value>,
    pub dev_dependencies: BTreeMap<String, serde_json::Value>,
    pub peer_dependencies: BTreeMap<String, serde_json::Value>,
    pub optional_dependencies: BTreeMap<String, serde_json::Value>,
}

impl Manifest {
    /// Whether `package` is declared in any dependency section.
    pub fn declares(&self, package: &str) -> bool {
        self.sections()
            .iter()
            .any(|section| section.contains_key(package))
    }

    /// Every declared package name, across sections.
    pub fn declared(&self) -> BTreeSet<&str> {
        self.sections()
            .iter()
            .flat_map(|section| section.keys().map(String::as_str))
            .collect()
    }

    fn sections(&self) -> [&BTreeMap<String, serde_json::Value>; 4] {
        [
            &self.dependencies,
            &self.dev_dependencies,
            &self.peer_dependencies,
            &self.optional_dependencies,
        ]
    }
}

pub fn parse_manifest(raw: &str) -> Result<Manifest, serde_json::Error> {
    serde_json::from_str(raw)
}

/// Bare package names imported or required by `source`.
///
/// Relative paths, URLs, `node:` specifiers and runtime builtins are skipped;
/// deep imports are reduced to their package (`lodash/fp` -> `lodash`,
/// `@aws-sdk/client-s3/dist` -> `@aws-sdk/client-s3`).
pub fn imported_packages(source: &str) -> BTreeSet<String> {
    IMPORT_RE
        .captures_iter(source)
        .filter_map(|caps| caps.get(1))
        .filter_map(|specifier| package_name(specifier.as_str()))
        .collect()
}

fn package_name(specifier: &str) -> Option<String> {
    let specifier = specifier.trim();
    if specifier.is_empty()
        || specifier.starts_with('.')
        || specifier.starts_with('/')
        || specifier.contains(':')
    {
        return None;
    }

    let mut segments = specifier.split('/');
    let first = segments.next()?;
    let name = if first.starts_with('@') {
        let second = segments.next().filter(|segment| !segment.is_empty())?;
        format!("{first}/{second}")
    } else {
        first.to_string()
    };

    if BUILTINS.contains(&name.as_str()) {
        None
    } else {
        Some(name)
    }
}
