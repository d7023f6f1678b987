//! Static language registry.
//!
//! Maps a language identifier to the image that runs it, the file name the
//! source must be written under, and the shell invocation used inside the
//! container. Compiled languages build into `/tmp` inside the container so
//! the bind-mounted workspace only ever holds the submitted inputs.

use std::fmt;
use std::str::FromStr;

use crate::error::ExecError;

/// Stdin payload file name inside every workspace.
pub const INPUT_FILE: &str = "input.txt";

/// Where the workspace is mounted inside the container.
pub const CONTAINER_WORKDIR: &str = "/code";

/// Languages accepted by the execute endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    Python,
    JavaScript,
    Java,
    C,
    Cpp,
    Ruby,
    Go,
    Php,
    Rust,
    Swift,
}

/// Registry entry for one language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LanguageSpec {
    pub language: Language,
    /// Container image with the toolchain installed.
    pub image: &'static str,
    /// File name the source is written to; some toolchains require a fixed
    /// entry-point name.
    pub source_file: &'static str,
    /// Shell line run in the container's working directory.
    pub invocation: &'static str,
}

/// Indexed by `Language as usize`.
static REGISTRY: [LanguageSpec; 10] = [
    LanguageSpec {
        language: Language::Python,
        image: "code-runner-python",
        source_file: "code.py",
        invocation: "python3 code.py < input.txt",
    },
    LanguageSpec {
        language: Language::JavaScript,
        image: "code-runner-javascript",
        source_file: "code.js",
        invocation: "node code.js < input.txt",
    },
    LanguageSpec {
        language: Language::Java,
        image: "code-runner-java",
        source_file: "Main.java",
        invocation: "javac -d /tmp/build Main.java && java -cp /tmp/build Main < input.txt",
    },
    LanguageSpec {
        language: Language::C,
        image: "code-runner-c",
        source_file: "code.c",
        invocation: "gcc -O2 -o /tmp/code code.c -lm && /tmp/code < input.txt",
    },
    LanguageSpec {
        language: Language::Cpp,
        image: "code-runner-cpp",
        source_file: "code.cpp",
        invocation: "g++ -O2 -o /tmp/code code.cpp && /tmp/code < input.txt",
    },
    LanguageSpec {
        language: Language::Ruby,
        image: "code-runner-ruby",
        source_file: "code.rb",
        invocation: "ruby code.rb < input.txt",
    },
    LanguageSpec {
        language: Language::Go,
        image: "code-runner-go",
        source_file: "code.go",
        invocation: "GOCACHE=/tmp/go-cache go run code.go < input.txt",
    },
    LanguageSpec {
        language: Language::Php,
        image: "code-runner-php",
        source_file: "code.php",
        invocation: "php code.php < input.txt",
    },
    LanguageSpec {
        language: Language::Rust,
        image: "code-runner-rust",
        source_file: "main.rs",
        invocation: "rustc -O -o /tmp/main main.rs && /tmp/main < input.txt",
    },
    LanguageSpec {
        language: Language::Swift,
        image: "code-runner-swift",
        source_file: "code.swift",
        invocation: "swiftc -o /tmp/code code.swift && /tmp/code < input.txt",
    },
];

impl Language {
    pub const ALL: [Self; 10] = [
        Self::Python,
        Self::JavaScript,
        Self::Java,
        Self::C,
        Self::Cpp,
        Self::Ruby,
        Self::Go,
        Self::Php,
        Self::Rust,
        Self::Swift,
    ];

    /// Canonical lowercase identifier.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::JavaScript => "javascript",
            Self::Java => "java",
            Self::C => "c",
            Self::Cpp => "cpp",
            Self::Ruby => "ruby",
            Self::Go => "go",
            Self::Php => "php",
            Self::Rust => "rust",
            Self::Swift => "swift",
        }
    }

    /// Registry entry for this language.
    pub fn spec(self) -> &'static LanguageSpec {
        &REGISTRY[self as usize]
    }

    /// Resolve an identifier (case-insensitive) straight to its entry.
    pub fn lookup(id: &str) -> Result<&'static LanguageSpec, ExecError> {
        id.parse::<Self>().map(Self::spec)
    }
}

impl FromStr for Language {
    type Err = ExecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|lang| lang.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| ExecError::UnsupportedLanguage(s.to_string()))
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl LanguageSpec {
    /// Container command line.
    pub fn command(&self) -> Vec<String> {
        vec!["sh".into(), "-c".into(), self.invocation.into()]
    }
}
