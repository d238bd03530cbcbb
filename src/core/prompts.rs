//! Versioned prompt templates and placeholder rendering.
//!
//! The built-in catalog is compiled into the binary from `prompts/*.yaml`.
//! Extra templates can be loaded from a directory; a template with the same
//! kind and name replaces the built-in one.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

const BUILTIN_SOURCES: [(&str, &str); 4] = [
    ("detection.yaml", include_str!("../../prompts/detection.yaml")),
    ("mcqa.yaml", include_str!("../../prompts/mcqa.yaml")),
    ("tagging.yaml", include_str!("../../prompts/tagging.yaml")),
    ("narrative.yaml", include_str!("../../prompts/narrative.yaml")),
];

/// Template lookup and rendering failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PromptError {
    #[error("Template not found: {kind} {version}")]
    TemplateNotFound { kind: TaskKind, version: String },

    #[error("Template {template} requires field '{field}'")]
    MissingField { template: String, field: String },

    #[error("Template {template} has an unclosed placeholder")]
    UnclosedPlaceholder { template: String },

    #[error("Failed to parse prompt catalog {source_name}: {message}")]
    Parse { source_name: String, message: String },
}

/// Which experiment a template belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Detection,
    McqaEasy,
    McqaHard,
    Tagging,
    NarrativeGeneration,
    NarrativeEvaluation,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Detection => "detection",
            Self::McqaEasy => "mcqa_easy",
            Self::McqaHard => "mcqa_hard",
            Self::Tagging => "tagging",
            Self::NarrativeGeneration => "narrative_generation",
            Self::NarrativeEvaluation => "narrative_evaluation",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named, versioned prompt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    /// Version name, e.g. `v2_zh_tw`
    pub name: String,
    pub kind: TaskKind,
    /// Language tag (`en`, `zh_tw`, ...)
    pub language: String,
    #[serde(default)]
    pub description: String,
    /// Body with `{field}` placeholders; `{{` and `}}` are literal braces
    pub text: String,
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    templates: Vec<Template>,
}

enum Segment<'a> {
    Literal(&'a str),
    Placeholder(&'a str),
}

impl Template {
    /// Split the body into literal runs and placeholder names
    fn segments(&self) -> Result<Vec<Segment<'_>>, PromptError> {
        let text = self.text.as_str();
        let bytes = text.as_bytes();
        let mut segments = Vec::new();
        let mut start = 0;
        let mut i = 0;

        while i < bytes.len() {
            match bytes[i] {
                b'{' if bytes.get(i + 1) == Some(&b'{') => {
                    segments.push(Segment::Literal(&text[start..i + 1]));
                    i += 2;
                    start = i;
                }
                b'}' if bytes.get(i + 1) == Some(&b'}') => {
                    segments.push(Segment::Literal(&text[start..i + 1]));
                    i += 2;
                    start = i;
                }
                b'{' => {
                    let close = text[i + 1..].find('}').ok_or_else(|| {
                        PromptError::UnclosedPlaceholder {
                            template: self.name.clone(),
                        }
                    })?;
                    segments.push(Segment::Literal(&text[start..i]));
                    segments.push(Segment::Placeholder(&text[i + 1..i + 1 + close]));
                    i += close + 2;
                    start = i;
                }
                _ => i += 1,
            }
        }
        segments.push(Segment::Literal(&text[start..]));

        Ok(segments)
    }

    /// Placeholder names used by this template, in order of first use
    pub fn placeholders(&self) -> Result<Vec<String>, PromptError> {
        let mut names: Vec<String> = Vec::new();
        for segment in self.segments()? {
            if let Segment::Placeholder(name) = segment {
                if !names.iter().any(|n| n == name) {
                    names.push(name.to_string());
                }
            }
        }
        Ok(names)
    }

    /// Substitute every placeholder; a field the template uses but the map
    /// lacks is an error
    pub fn render(&self, fields: &BTreeMap<&str, String>) -> Result<String, PromptError> {
        let mut out = String::with_capacity(self.text.len());
        for segment in self.segments()? {
            match segment {
                Segment::Literal(s) => out.push_str(s),
                Segment::Placeholder(name) => {
                    let value = fields.get(name).ok_or_else(|| PromptError::MissingField {
                        template: self.name.clone(),
                        field: name.to_string(),
                    })?;
                    out.push_str(value);
                }
            }
        }
        Ok(out)
    }

    /// Check up front that rendering with these field names will succeed
    pub fn validate_fields(&self, available: &[&str]) -> Result<(), PromptError> {
        for name in self.placeholders()? {
            if !available.contains(&name.as_str()) {
                return Err(PromptError::MissingField {
                    template: self.name.clone(),
                    field: name,
                });
            }
        }
        Ok(())
    }
}

/// All registered templates
#[derive(Debug, Clone, Default)]
pub struct PromptCatalog {
    templates: Vec<Template>,
}

impl PromptCatalog {
    /// Catalog of the templates compiled into the binary
    pub fn builtin() -> Result<Self, PromptError> {
        let mut catalog = Self::default();
        for (name, source) in BUILTIN_SOURCES {
            catalog.extend_from_yaml(name, source)?;
        }
        Ok(catalog)
    }

    /// Built-in catalog plus every `*.yaml` file in `dir`
    pub fn with_dir(dir: &Path) -> Result<Self> {
        let mut catalog = Self::builtin()?;

        let mut paths: Vec<_> = std::fs::read_dir(dir)
            .with_context(|| format!("Failed to read prompts directory: {}", dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| matches!(p.extension().and_then(|e| e.to_str()), Some("yaml" | "yml")))
            .collect();
        paths.sort();

        for path in paths {
            let source = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read prompt file: {}", path.display()))?;
            catalog.extend_from_yaml(&path.display().to_string(), &source)?;
            debug!(path = %path.display(), "Loaded prompt templates");
        }

        Ok(catalog)
    }

    /// Parse a catalog YAML document and register its templates
    pub fn extend_from_yaml(&mut self, source_name: &str, source: &str) -> Result<(), PromptError> {
        let file: CatalogFile = serde_yaml::from_str(source).map_err(|e| PromptError::Parse {
            source_name: source_name.to_string(),
            message: e.to_string(),
        })?;
        for template in file.templates {
            self.insert(template);
        }
        Ok(())
    }

    /// Register a template, replacing any with the same kind and name
    pub fn insert(&mut self, template: Template) {
        self.templates
            .retain(|t| !(t.kind == template.kind && t.name == template.name));
        self.templates.push(template);
    }

    pub fn get(&self, kind: TaskKind, version: &str) -> Result<&Template, PromptError> {
        self.templates
            .iter()
            .find(|t| t.kind == kind && t.name == version)
            .ok_or_else(|| PromptError::TemplateNotFound {
                kind,
                version: version.to_string(),
            })
    }

    /// Templates of one kind (or all), sorted by kind then name
    pub fn list(&self, kind: Option<TaskKind>) -> Vec<&Template> {
        let mut found: Vec<&Template> = self
            .templates
            .iter()
            .filter(|t| kind.map_or(true, |k| t.kind == k))
            .collect();
        found.sort_by(|a, b| (a.kind, &a.name).cmp(&(b.kind, &b.name)));
        found
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}
