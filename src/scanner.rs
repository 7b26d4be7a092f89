//! Import scanner: walks project sources, extracts `import`/`export from`/
//! `require` specifier literals, and reports relative imports that resolve
//! to nothing on disk.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use regex::Regex;
use tracing::debug;
use walkdir::WalkDir;

use crate::generator::GeneratorRegistry;
use crate::workspace::Workspace;

const SOURCE_EXTENSIONS: &[&str] = &["js", "jsx", "ts", "tsx", "mjs", "cjs"];
const SKIP_DIRS: &[&str] = &[
    "node_modules",
    "dist",
    "coverage",
    ".git",
    ".angular",
    ".nx",
    "tmp",
    ".cache",
];
const PROBE_EXTENSIONS: &[&str] = &["ts", "tsx", "js", "jsx", "mjs", "cjs", "d.ts", "json"];

/// A relative import whose target does not exist, aggregated by resolved
/// path across all files importing it.
#[derive(Debug)]
pub struct UnknownDependency {
    pub project: String,
    pub specifier: String,
    pub resolved: PathBuf,
    pub importers: Vec<PathBuf>,
}

#[derive(Debug, Default)]
pub struct ScanReport {
    pub unknown: Vec<UnknownDependency>,
}

impl ScanReport {
    pub fn is_clean(&self) -> bool {
        self.unknown.is_empty()
    }
}

pub struct ImportScanner {
    import_re: Regex,
    export_re: Regex,
    require_re: Regex,
}

impl Default for ImportScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl ImportScanner {
    pub fn new() -> Self {
        Self {
            import_re: Regex::new(r#"\bimport\s+(?:[\w$*\s{},]+?\s+from\s+)?["']([^"']+)["']"#)
                .unwrap(),
            export_re: Regex::new(r#"\bexport\s+[\w$*\s{},]*?\s*from\s+["']([^"']+)["']"#)
                .unwrap(),
            require_re: Regex::new(r#"\brequire\s*\(\s*["']([^"']+)["']\s*\)"#).unwrap(),
        }
    }

    /// Scan every project's sources. Generator output paths are expected to
    /// be missing on a clean checkout and are filtered from the report.
    pub fn scan(&self, workspace: &Workspace, registry: &GeneratorRegistry) -> ScanReport {
        let generator_outputs = registry.output_paths();
        let mut aggregated: BTreeMap<PathBuf, UnknownDependency> = BTreeMap::new();

        for project in workspace.projects.values() {
            for file in source_files(&project.abs_path) {
                let content = match std::fs::read_to_string(&file) {
                    Ok(c) => c,
                    Err(e) => {
                        debug!("skipping {}: {}", file.display(), e);
                        continue;
                    }
                };
                let base = match file.parent() {
                    Some(b) => b,
                    None => continue,
                };
                for specifier in self.extract(&content) {
                    if !specifier.starts_with("./") && !specifier.starts_with("../") {
                        continue;
                    }
                    let resolved = normalize(&base.join(&specifier));
                    if probe(&resolved) {
                        continue;
                    }
                    if generator_outputs.iter().any(|g| resolved.starts_with(g)) {
                        continue;
                    }
                    aggregated
                        .entry(resolved.clone())
                        .or_insert_with(|| UnknownDependency {
                            project: project.name.clone(),
                            specifier: specifier.clone(),
                            resolved,
                            importers: Vec::new(),
                        })
                        .importers
                        .push(file.clone());
                }
            }
        }

        ScanReport {
            unknown: aggregated.into_values().collect(),
        }
    }

    /// All specifier literals in one source file.
    pub fn extract(&self, content: &str) -> Vec<String> {
        let mut specifiers = Vec::new();
        for re in [&self.import_re, &self.export_re, &self.require_re] {
            for caps in re.captures_iter(content) {
                if let Some(m) = caps.get(1) {
                    specifiers.push(m.as_str().to_string());
                }
            }
        }
        specifiers
    }
}

fn source_files(project_dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let walker = WalkDir::new(project_dir).into_iter();
    for entry in walker.filter_entry(|e| {
        !(e.file_type().is_dir()
            && e.file_name()
                .to_str()
                .map_or(false, |n| SKIP_DIRS.contains(&n)))
    }) {
        let Ok(entry) = entry else { continue };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let name = entry.file_name().to_string_lossy();
        // Declaration files describe shape, not resolvable modules.
        if name.ends_with(".d.ts") {
            continue;
        }
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        if SOURCE_EXTENSIONS.contains(&ext) {
            files.push(path.to_path_buf());
        }
    }
    files
}

/// Conventional resolution probing: the exact path, extension variants, and
/// index files. Heuristic by design; symlinks and path aliases stay
/// unresolved.
fn probe(path: &Path) -> bool {
    if path.is_file() {
        return true;
    }
    let display = path.to_string_lossy();
    for ext in PROBE_EXTENSIONS {
        if PathBuf::from(format!("{}.{}", display, ext)).is_file() {
            return true;
        }
    }
    if path.is_dir() {
        for ext in PROBE_EXTENSIONS {
            if path.join(format!("index.{}", ext)).is_file() {
                return true;
            }
        }
    }
    false
}

/// Lexical `.`/`..` resolution; the target may not exist.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::MANIFEST_FILENAME;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn fixture(api_manifest: &str) -> (tempfile::TempDir, Workspace) {
        let tmp = tempfile::tempdir().unwrap();
        write(
            tmp.path(),
            MANIFEST_FILENAME,
            r#"{ "name": "root", "workspaces": ["packages/*"] }"#,
        );
        write(tmp.path(), "packages/api/package.json", api_manifest);
        let ws = Workspace::load(tmp.path()).unwrap();
        (tmp, ws)
    }

    #[test]
    fn test_extract_specifiers() {
        let scanner = ImportScanner::new();
        let content = r#"
import { a, b } from './util';
import * as fs from 'fs';
import './side-effect';
export { c } from "./types";
export * from './models';
const legacy = require('./legacy');
"#;
        let specs = scanner.extract(content);
        for expected in [
            "./util",
            "fs",
            "./side-effect",
            "./types",
            "./models",
            "./legacy",
        ] {
            assert!(specs.iter().any(|s| s == expected), "missing {}", expected);
        }
    }

    #[test]
    fn test_resolved_imports_are_clean() {
        let (tmp, ws) = fixture(r#"{ "name": "api" }"#);
        write(
            tmp.path(),
            "packages/api/src/main.ts",
            "import { x } from './util';\nexport * from './types';\nrequire('./legacy');",
        );
        write(tmp.path(), "packages/api/src/util.ts", "export const x = 1;");
        write(tmp.path(), "packages/api/src/types/index.ts", "export type T = string;");
        write(tmp.path(), "packages/api/src/legacy.js", "module.exports = {};");

        let report = ImportScanner::new().scan(&ws, &GeneratorRegistry::default());
        assert!(report.is_clean(), "{:?}", report.unknown);
    }

    #[test]
    fn test_unknown_import_reported_and_aggregated() {
        let (tmp, ws) = fixture(r#"{ "name": "api" }"#);
        write(
            tmp.path(),
            "packages/api/src/a.ts",
            "import { x } from './missing';",
        );
        write(
            tmp.path(),
            "packages/api/src/b.ts",
            "import { y } from './missing';",
        );

        let report = ImportScanner::new().scan(&ws, &GeneratorRegistry::default());
        assert_eq!(report.unknown.len(), 1);
        let unknown = &report.unknown[0];
        assert_eq!(unknown.project, "api");
        assert_eq!(unknown.specifier, "./missing");
        assert_eq!(unknown.importers.len(), 2);
    }

    #[test]
    fn test_external_packages_ignored() {
        let (tmp, ws) = fixture(r#"{ "name": "api" }"#);
        write(
            tmp.path(),
            "packages/api/src/main.ts",
            "import React from 'react';\nimport { z } from 'zod';",
        );
        let report = ImportScanner::new().scan(&ws, &GeneratorRegistry::default());
        assert!(report.is_clean());
    }

    #[test]
    fn test_declaration_files_skipped() {
        let (tmp, ws) = fixture(r#"{ "name": "api" }"#);
        write(
            tmp.path(),
            "packages/api/src/globals.d.ts",
            "import './does-not-exist';",
        );
        let report = ImportScanner::new().scan(&ws, &GeneratorRegistry::default());
        assert!(report.is_clean());
    }

    #[test]
    fn test_generator_outputs_filtered() {
        let (tmp, ws) = fixture(
            r#"{ "name": "api",
                 "sources": { "src/generated": { "command": "gen", "deps": ["api"] } } }"#,
        );
        write(
            tmp.path(),
            "packages/api/src/main.ts",
            "import { client } from './generated/client';",
        );
        let registry = GeneratorRegistry::load(&ws);
        let report = ImportScanner::new().scan(&ws, &registry);
        assert!(report.is_clean(), "{:?}", report.unknown);
    }

    #[test]
    fn test_vendored_directories_skipped() {
        let (tmp, ws) = fixture(r#"{ "name": "api" }"#);
        write(
            tmp.path(),
            "packages/api/node_modules/pkg/index.js",
            "require('./nope');",
        );
        let report = ImportScanner::new().scan(&ws, &GeneratorRegistry::default());
        assert!(report.is_clean());
    }

    #[test]
    fn test_parent_relative_import() {
        let (tmp, ws) = fixture(r#"{ "name": "api" }"#);
        write(
            tmp.path(),
            "packages/api/src/deep/mod.ts",
            "import { x } from '../util';",
        );
        write(tmp.path(), "packages/api/src/util.ts", "export const x = 1;");
        let report = ImportScanner::new().scan(&ws, &GeneratorRegistry::default());
        assert!(report.is_clean());
    }
}
