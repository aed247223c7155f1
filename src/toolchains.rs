//! Build/test command classification.
//!
//! Each ecosystem contributes a keyword table. A shell command is matched
//! case-insensitively by substring against every table; a test keyword
//! anywhere wins over a build keyword.
use serde::Serialize;

/// Keyword table for one ecosystem.
#[derive(Debug)]
pub struct Toolchain {
    pub name: &'static str,
    pub build: &'static [&'static str],
    pub test: &'static [&'static str],
}

pub const TOOLCHAINS: &[Toolchain] = &[
    Toolchain {
        name: "dotnet",
        build: &["dotnet build", "dotnet msbuild", "msbuild"],
        test: &["dotnet test", "xunit", "nunit"],
    },
    Toolchain {
        name: "node",
        build: &["npm run build", "tsc", "webpack"],
        test: &["npm test", "npm run test", "jest", "mocha"],
    },
    Toolchain {
        name: "rust",
        build: &["cargo build"],
        test: &["cargo test"],
    },
    Toolchain {
        name: "go",
        build: &["go build"],
        test: &["go test"],
    },
    Toolchain {
        name: "python",
        build: &[],
        test: &["pytest"],
    },
    Toolchain {
        name: "jvm",
        build: &["gradle build", "mvn compile", "mvn package"],
        test: &["gradle test", "mvn test"],
    },
    Toolchain {
        name: "native",
        build: &["make", "cmake"],
        test: &[],
    },
];

/// Dev-loop category of a shell command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Build,
    Test,
}

/// Classify a shell command, or `None` if it is neither a build nor a test.
pub fn classify(command: &str) -> Option<ActionKind> {
    classify_with(TOOLCHAINS, command)
}

fn classify_with(tables: &[Toolchain], command: &str) -> Option<ActionKind> {
    let lower = command.to_lowercase();
    let hit = |keywords: &[&str]| keywords.iter().any(|kw| lower.contains(kw));

    if let Some(t) = tables.iter().find(|t| hit(t.test)) {
        tracing::debug!(toolchain = t.name, command = %command, "test command");
        Some(ActionKind::Test)
    } else if let Some(t) = tables.iter().find(|t| hit(t.build)) {
        tracing::debug!(toolchain = t.name, command = %command, "build command");
        Some(ActionKind::Build)
    } else {
        None
    }
}
