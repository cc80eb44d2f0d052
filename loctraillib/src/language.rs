//! The shared enumeration of valid language identifiers.
//!
//! Every language id that appears in an analysis result or a cache payload
//! must be one of these. The validator rejects anything else, so adding a
//! language means adding a variant here and nowhere else.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A language bucket. Serialized as its lowercase id (`"rust"`, `"csharp"`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Rust,
    TypeScript,
    JavaScript,
    Python,
    Go,
    Java,
    Kotlin,
    Swift,
    C,
    Cpp,
    CSharp,
    ObjectiveC,
    Ruby,
    Php,
    Scala,
    Shell,
    Html,
    Css,
    Scss,
    Vue,
    Svelte,
    Dart,
    Lua,
    Elixir,
    Erlang,
    Haskell,
    Clojure,
    OCaml,
    Zig,
    Julia,
    Perl,
    R,
    Sql,
    /// Catch-all for unrecognized extensions. Counts toward totals only.
    Other,
}

impl Language {
    /// All variants, in declaration order.
    pub const ALL: [Language; 34] = [
        Language::Rust,
        Language::TypeScript,
        Language::JavaScript,
        Language::Python,
        Language::Go,
        Language::Java,
        Language::Kotlin,
        Language::Swift,
        Language::C,
        Language::Cpp,
        Language::CSharp,
        Language::ObjectiveC,
        Language::Ruby,
        Language::Php,
        Language::Scala,
        Language::Shell,
        Language::Html,
        Language::Css,
        Language::Scss,
        Language::Vue,
        Language::Svelte,
        Language::Dart,
        Language::Lua,
        Language::Elixir,
        Language::Erlang,
        Language::Haskell,
        Language::Clojure,
        Language::OCaml,
        Language::Zig,
        Language::Julia,
        Language::Perl,
        Language::R,
        Language::Sql,
        Language::Other,
    ];

    /// The wire id. Matches the serde representation.
    pub fn id(self) -> &'static str {
        match self {
            Language::Rust => "rust",
            Language::TypeScript => "typescript",
            Language::JavaScript => "javascript",
            Language::Python => "python",
            Language::Go => "go",
            Language::Java => "java",
            Language::Kotlin => "kotlin",
            Language::Swift => "swift",
            Language::C => "c",
            Language::Cpp => "cpp",
            Language::CSharp => "csharp",
            Language::ObjectiveC => "objectivec",
            Language::Ruby => "ruby",
            Language::Php => "php",
            Language::Scala => "scala",
            Language::Shell => "shell",
            Language::Html => "html",
            Language::Css => "css",
            Language::Scss => "scss",
            Language::Vue => "vue",
            Language::Svelte => "svelte",
            Language::Dart => "dart",
            Language::Lua => "lua",
            Language::Elixir => "elixir",
            Language::Erlang => "erlang",
            Language::Haskell => "haskell",
            Language::Clojure => "clojure",
            Language::OCaml => "ocaml",
            Language::Zig => "zig",
            Language::Julia => "julia",
            Language::Perl => "perl",
            Language::R => "r",
            Language::Sql => "sql",
            Language::Other => "other",
        }
    }

    /// Look up a language by wire id. Unknown ids are `None`, never a default.
    pub fn from_id(id: &str) -> Option<Language> {
        Self::ALL.into_iter().find(|lang| lang.id() == id)
    }

    /// Map a lowercase file extension (without the dot) to a language.
    pub fn from_extension(ext: &str) -> Option<Language> {
        let lang = match ext {
            "rs" => Language::Rust,
            "ts" | "tsx" | "mts" | "cts" => Language::TypeScript,
            "js" | "jsx" | "mjs" | "cjs" => Language::JavaScript,
            "py" | "pyi" => Language::Python,
            "go" => Language::Go,
            "java" => Language::Java,
            "kt" | "kts" => Language::Kotlin,
            "swift" => Language::Swift,
            "c" | "h" => Language::C,
            "cc" | "cpp" | "cxx" | "hh" | "hpp" | "hxx" => Language::Cpp,
            "cs" => Language::CSharp,
            "m" | "mm" => Language::ObjectiveC,
            "rb" | "rake" => Language::Ruby,
            "php" => Language::Php,
            "scala" | "sc" => Language::Scala,
            "sh" | "bash" | "zsh" | "fish" => Language::Shell,
            "html" | "htm" => Language::Html,
            "css" => Language::Css,
            "scss" | "sass" | "less" => Language::Scss,
            "vue" => Language::Vue,
            "svelte" => Language::Svelte,
            "dart" => Language::Dart,
            "lua" => Language::Lua,
            "ex" | "exs" => Language::Elixir,
            "erl" | "hrl" => Language::Erlang,
            "hs" => Language::Haskell,
            "clj" | "cljs" | "cljc" => Language::Clojure,
            "ml" | "mli" => Language::OCaml,
            "zig" => Language::Zig,
            "jl" => Language::Julia,
            "pl" | "pm" => Language::Perl,
            "r" => Language::R,
            "sql" => Language::Sql,
            _ => return None,
        };
        Some(lang)
    }

    /// Whether counts for this language carry a production/test split.
    pub fn has_test_split(self) -> bool {
        self != Language::Other
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_match_serde_representation() {
        for lang in Language::ALL {
            let json = serde_json::to_string(&lang).unwrap();
            assert_eq!(json, format!("\"{}\"", lang.id()));
            let back: Language = serde_json::from_str(&json).unwrap();
            assert_eq!(back, lang);
        }
    }

    #[test]
    fn from_id_rejects_unknown() {
        assert_eq!(Language::from_id("rust"), Some(Language::Rust));
        assert_eq!(Language::from_id("csharp"), Some(Language::CSharp));
        assert_eq!(Language::from_id("Rust"), None);
        assert_eq!(Language::from_id("cobol"), None);
    }

    #[test]
    fn ids_are_unique() {
        let mut ids: Vec<_> = Language::ALL.iter().map(|l| l.id()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), Language::ALL.len());
    }

    #[test]
    fn extension_lookup() {
        assert_eq!(Language::from_extension("rs"), Some(Language::Rust));
        assert_eq!(Language::from_extension("tsx"), Some(Language::TypeScript));
        assert_eq!(Language::from_extension("hpp"), Some(Language::Cpp));
        assert_eq!(Language::from_extension("md"), None);
    }
}
