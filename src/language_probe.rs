//! Detects a project's language (and, where decidable, its test framework)
//! from marker files (spec.md §4.9).
//!
//! Ranks candidate languages by the weight of the markers found; confidence
//! is `max_weight + 0.1 * extra_markers`, capped at 1.0.

use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    Python,
    JavaScript,
    TypeScript,
    Go,
    Rust,
    Java,
    Ruby,
    CSharp,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::JavaScript => "javascript",
            Language::TypeScript => "typescript",
            Language::Go => "go",
            Language::Rust => "rust",
            Language::Java => "java",
            Language::Ruby => "ruby",
            Language::CSharp => "csharp",
        }
    }
}

#[derive(Debug, Clone)]
pub struct LanguageCandidate {
    pub language: Language,
    pub confidence: f64,
    pub markers_found: Vec<String>,
    /// Test framework, when the markers pin one down unambiguously.
    pub framework: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LanguageDetectionResult {
    pub best: Option<LanguageCandidate>,
    pub candidates: Vec<LanguageCandidate>,
}

const JS_FRAMEWORK_DEPS: &[&str] = &[
    "react", "vue", "next", "nuxt", "express", "nestjs", "@nestjs/core", "svelte", "angular",
    "vite", "webpack",
];

#[derive(Default)]
pub struct LanguageProbe;

impl LanguageProbe {
    pub fn new() -> Self {
        Self
    }

    /// Probes `project_dir` for language marker files and ranks candidates
    /// by confidence, highest first.
    pub async fn detect(&self, project_dir: &Path) -> LanguageDetectionResult {
        let mut candidates = Vec::new();

        if let Some(c) = self.probe_python(project_dir).await {
            candidates.push(c);
        }
        if let Some(c) = self.probe_js_ts(project_dir).await {
            candidates.push(c);
        }
        if exists(project_dir, "go.mod").await {
            candidates.push(LanguageCandidate {
                language: Language::Go,
                confidence: 1.0,
                markers_found: vec!["go.mod".to_string()],
                framework: Some("go test".to_string()),
            });
        }
        if exists(project_dir, "Cargo.toml").await {
            candidates.push(LanguageCandidate {
                language: Language::Rust,
                confidence: 1.0,
                markers_found: vec!["Cargo.toml".to_string()],
                framework: Some("cargo test".to_string()),
            });
        }
        if let Some(c) = self.probe_java(project_dir).await {
            candidates.push(c);
        }
        if let Some(c) = self.probe_ruby(project_dir).await {
            candidates.push(c);
        }
        if let Some(c) = self.probe_csharp(project_dir).await {
            candidates.push(c);
        }

        candidates.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap()
                .then_with(|| a.language.as_str().cmp(b.language.as_str()))
        });

        let best = candidates.first().cloned();
        LanguageDetectionResult { best, candidates }
    }

    async fn probe_python(&self, dir: &Path) -> Option<LanguageCandidate> {
        let markers: &[(&str, f64)] = &[
            ("pyproject.toml", 1.0),
            ("pytest.ini", 1.0),
            ("setup.py", 0.9),
            ("requirements.txt", 0.7),
        ];
        let mut found = Vec::new();
        let mut max_weight = 0.0_f64;
        for (file, weight) in markers {
            if exists(dir, file).await {
                found.push(file.to_string());
                max_weight = max_weight.max(*weight);
            }
        }
        if found.is_empty() {
            return None;
        }
        let extra = (found.len() - 1) as f64;
        let framework = if found.iter().any(|f| f == "pytest.ini") || found.iter().any(|f| f == "pyproject.toml") {
            Some("pytest".to_string())
        } else {
            Some("unittest".to_string())
        };
        Some(LanguageCandidate {
            language: Language::Python,
            confidence: (max_weight + 0.1 * extra).min(1.0),
            markers_found: found,
            framework,
        })
    }

    async fn probe_js_ts(&self, dir: &Path) -> Option<LanguageCandidate> {
        let package_json = read_to_string(dir, "package.json").await?;
        let parsed: serde_json::Value = serde_json::from_str(&package_json).unwrap_or_default();
        let deps = collect_dep_names(&parsed);

        let has_framework_dep = JS_FRAMEWORK_DEPS.iter().any(|d| deps.contains(&d.to_string()));
        let mut markers = vec!["package.json".to_string()];
        let mut weight = if has_framework_dep { 1.0 } else { 0.6 };

        let mut language = Language::JavaScript;
        if exists(dir, "tsconfig.json").await {
            markers.push("tsconfig.json".to_string());
            language = Language::TypeScript;
            weight = (weight + 0.1).min(1.0);
        }

        let framework = if deps.contains("jest") {
            Some("jest".to_string())
        } else if deps.contains("vitest") {
            Some("vitest".to_string())
        } else if deps.contains("mocha") {
            Some("mocha".to_string())
        } else {
            None
        };

        Some(LanguageCandidate {
            language,
            confidence: weight,
            markers_found: markers,
            framework,
        })
    }

    async fn probe_java(&self, dir: &Path) -> Option<LanguageCandidate> {
        let mut found = Vec::new();
        if exists(dir, "pom.xml").await {
            found.push("pom.xml".to_string());
        }
        if exists(dir, "build.gradle").await || exists(dir, "build.gradle.kts").await {
            found.push("build.gradle".to_string());
        }
        if found.is_empty() {
            return None;
        }
        let extra = (found.len() - 1) as f64;
        let framework = if found.iter().any(|f| f == "pom.xml") {
            Some("maven".to_string())
        } else {
            Some("gradle".to_string())
        };
        Some(LanguageCandidate {
            language: Language::Java,
            confidence: (1.0 + 0.1 * extra).min(1.0),
            markers_found: found,
            framework,
        })
    }

    async fn probe_ruby(&self, dir: &Path) -> Option<LanguageCandidate> {
        let gemfile = read_to_string(dir, "Gemfile").await?;
        let has_rspec = gemfile.to_lowercase().contains("rspec");
        Some(LanguageCandidate {
            language: Language::Ruby,
            confidence: if has_rspec { 0.9 } else { 0.5 },
            markers_found: vec!["Gemfile".to_string()],
            framework: if has_rspec {
                Some("rspec".to_string())
            } else {
                None
            },
        })
    }

    async fn probe_csharp(&self, dir: &Path) -> Option<LanguageCandidate> {
        let mut entries = tokio::fs::read_dir(dir).await.ok()?;
        let mut found = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            if entry.path().extension().and_then(|e| e.to_str()) == Some("csproj") {
                found.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        if found.is_empty() {
            return None;
        }
        let extra = (found.len() - 1) as f64;
        Some(LanguageCandidate {
            language: Language::CSharp,
            confidence: (1.0 + 0.1 * extra).min(1.0),
            markers_found: found,
            framework: Some("dotnet test".to_string()),
        })
    }
}

fn collect_dep_names(package_json: &serde_json::Value) -> std::collections::HashSet<String> {
    let mut deps = std::collections::HashSet::new();
    for key in ["dependencies", "devDependencies"] {
        if let Some(map) = package_json.get(key).and_then(|v| v.as_object()) {
            for name in map.keys() {
                deps.insert(name.clone());
            }
        }
    }
    deps
}

async fn exists(dir: &Path, file: &str) -> bool {
    tokio::fs::try_exists(dir.join(file)).await.unwrap_or(false)
}

async fn read_to_string(dir: &Path, file: &str) -> Option<String> {
    tokio::fs::read_to_string(dir.join(file)).await.ok()
}

/// Workspace-root-relative file path for a language marker, exposed for the
/// CLI's `init --detect`.
pub fn marker_path(dir: &Path, file: &str) -> PathBuf {
    dir.join(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn detects_rust_from_cargo_toml() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("Cargo.toml"), "[package]\nname=\"x\"").unwrap();

        let probe = LanguageProbe::new();
        let result = probe.detect(dir.path()).await;
        let best = result.best.unwrap();
        assert_eq!(best.language.as_str(), "rust");
        assert_eq!(best.confidence, 1.0);
    }

    #[tokio::test]
    async fn detects_python_with_extra_marker_bonus() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("pyproject.toml"), "[tool.poetry]").unwrap();
        std::fs::write(dir.path().join("requirements.txt"), "requests").unwrap();

        let probe = LanguageProbe::new();
        let result = probe.detect(dir.path()).await;
        let best = result.best.unwrap();
        assert_eq!(best.language.as_str(), "python");
        assert!(best.confidence > 1.0 - 1e-9 || best.confidence == 1.0);
        assert_eq!(best.framework.as_deref(), Some("pytest"));
    }

    #[tokio::test]
    async fn tsconfig_promotes_to_typescript() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("package.json"), r#"{"devDependencies":{"jest":"1.0.0"}}"#).unwrap();
        std::fs::write(dir.path().join("tsconfig.json"), "{}").unwrap();

        let probe = LanguageProbe::new();
        let result = probe.detect(dir.path()).await;
        let best = result.best.unwrap();
        assert_eq!(best.language.as_str(), "typescript");
        assert_eq!(best.framework.as_deref(), Some("jest"));
    }

    #[tokio::test]
    async fn no_markers_yields_no_candidates() {
        let dir = tempdir().unwrap();
        let probe = LanguageProbe::new();
        let result = probe.detect(dir.path()).await;
        assert!(result.best.is_none());
    }
}
