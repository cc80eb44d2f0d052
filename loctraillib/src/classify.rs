//! Path and content classification.
//!
//! Maps a repository-relative path to a language and a production/test label,
//! in priority order:
//!
//! 1. Skip list (lockfiles, generated or minified artifacts, binary formats,
//!    vendored directories) excludes the file entirely.
//! 2. A path segment naming a test directory marks the file as test.
//! 3. A per-language test filename convention marks the file as test.
//! 4. The extension picks the language (unknown → [`Language::Other`]).
//! 5. Rust files that are not already test run through the inline-test
//!    scanner in [`crate::visitor`].

use crate::language::Language;
use crate::visitor::split_rust_source;

/// Lockfiles and generated manifests, matched by exact filename.
const SKIP_FILENAMES: &[&str] = &[
    "Cargo.lock",
    "package-lock.json",
    "npm-shrinkwrap.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    "bun.lockb",
    "Gemfile.lock",
    "poetry.lock",
    "Pipfile.lock",
    "uv.lock",
    "composer.lock",
    "go.sum",
    "flake.lock",
    "mix.lock",
    "Podfile.lock",
    "packages.lock.json",
    "pubspec.lock",
    ".DS_Store",
];

/// Filename suffixes of generated, minified or binary artifacts.
const SKIP_SUFFIXES: &[&str] = &[
    ".min.js", ".min.css", ".map", ".bundle.js", ".pb.go", ".g.dart", ".png", ".jpg", ".jpeg",
    ".gif", ".bmp", ".ico", ".webp", ".svg", ".pdf", ".zip", ".gz", ".tgz", ".bz2", ".xz", ".7z",
    ".rar", ".tar", ".jar", ".war", ".woff", ".woff2", ".ttf", ".otf", ".eot", ".mp3", ".mp4",
    ".wav", ".ogg", ".mov", ".avi", ".webm", ".exe", ".dll", ".so", ".dylib", ".a", ".o", ".obj",
    ".class", ".pyc", ".wasm", ".bin", ".dat", ".db", ".sqlite", ".lockb",
];

/// Directories whose contents are vendored, never counted.
const SKIP_DIRS: &[&str] = &["node_modules", "vendor", "bower_components", ".git"];

/// Directory names that hold test code.
const TEST_DIRS: &[&str] = &[
    "test",
    "tests",
    "__tests__",
    "__test__",
    "spec",
    "specs",
    "testing",
    "testdata",
    "e2e",
];

/// A test filename convention.
enum TestName {
    Suffix(&'static str),
    Prefix(&'static str),
}

fn test_conventions(language: Language) -> &'static [TestName] {
    use TestName::{Prefix, Suffix};
    match language {
        Language::Go => &[Suffix("_test.go")],
        Language::Rust => &[Suffix("_test.rs"), Suffix("_tests.rs")],
        Language::TypeScript => &[
            Suffix(".test.ts"),
            Suffix(".spec.ts"),
            Suffix(".test.tsx"),
            Suffix(".spec.tsx"),
            Suffix(".test.mts"),
            Suffix(".spec.mts"),
        ],
        Language::JavaScript => &[
            Suffix(".test.js"),
            Suffix(".spec.js"),
            Suffix(".test.jsx"),
            Suffix(".spec.jsx"),
            Suffix(".test.mjs"),
            Suffix(".spec.mjs"),
            Suffix(".test.cjs"),
        ],
        Language::Python => &[Prefix("test_"), Suffix("_test.py"), Suffix("_tests.py")],
        Language::Java => &[Suffix("Test.java"), Suffix("Tests.java"), Suffix("IT.java")],
        Language::Kotlin => &[Suffix("Test.kt"), Suffix("Tests.kt")],
        Language::Swift => &[Suffix("Tests.swift"), Suffix("Test.swift")],
        Language::CSharp => &[Suffix("Tests.cs"), Suffix("Test.cs")],
        Language::Ruby => &[Suffix("_spec.rb"), Suffix("_test.rb")],
        Language::Php => &[Suffix("Test.php")],
        Language::Scala => &[Suffix("Spec.scala"), Suffix("Test.scala"), Suffix("Suite.scala")],
        Language::Dart => &[Suffix("_test.dart")],
        Language::Elixir => &[Suffix("_test.exs")],
        Language::Erlang => &[Suffix("_SUITE.erl"), Suffix("_tests.erl")],
        Language::C | Language::Cpp => &[
            Suffix("_test.c"),
            Suffix("_test.cc"),
            Suffix("_test.cpp"),
            Suffix("_unittest.cc"),
        ],
        Language::Haskell => &[Suffix("Spec.hs")],
        Language::Clojure => &[Suffix("_test.clj")],
        Language::Lua => &[Suffix("_spec.lua"), Suffix("_test.lua")],
        Language::Shell => &[Suffix(".bats")],
        Language::Zig => &[Suffix("_test.zig")],
        _ => &[],
    }
}

/// How a counted file is labelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileClass {
    pub language: Language,
    /// The whole file is test code (by directory or filename convention)
    pub is_test: bool,
}

/// Line counts for one file's content.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LineCounts {
    /// All counted (non-blank) lines
    pub lines: u64,
    /// The subset of `lines` that is test code
    pub test_lines: u64,
}

/// Lowercased extension of the final path segment, if any.
pub fn extension(path: &str) -> Option<String> {
    let name = file_name(path);
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Classify a repository-relative path. `None` means the file is excluded.
pub fn classify_path(path: &str) -> Option<FileClass> {
    let name = file_name(path);
    let lower = name.to_ascii_lowercase();

    if SKIP_FILENAMES.contains(&name) || SKIP_SUFFIXES.iter().any(|s| lower.ends_with(s)) {
        return None;
    }

    let mut in_test_dir = false;
    for dir in path.split('/').rev().skip(1) {
        if SKIP_DIRS.contains(&dir) {
            return None;
        }
        if TEST_DIRS.contains(&dir.to_ascii_lowercase().as_str()) {
            in_test_dir = true;
        }
    }

    let language = extension(path)
        .and_then(|ext| Language::from_extension(&ext))
        .unwrap_or(Language::Other);

    let named_as_test = test_conventions(language).iter().any(|convention| match convention {
        TestName::Suffix(suffix) => name.len() > suffix.len() && name.ends_with(suffix),
        TestName::Prefix(prefix) => name.starts_with(prefix),
    });

    Some(FileClass {
        language,
        is_test: in_test_dir || named_as_test,
    })
}

/// Count the lines of a file's content according to its class.
pub fn count_lines(class: FileClass, content: &str) -> LineCounts {
    if class.language == Language::Rust && !class.is_test {
        let split = split_rust_source(content);
        return LineCounts {
            lines: split.total(),
            test_lines: split.test,
        };
    }

    let lines = content.lines().filter(|l| !l.trim().is_empty()).count() as u64;
    LineCounts {
        lines,
        test_lines: if class.is_test { lines } else { 0 },
    }
}
