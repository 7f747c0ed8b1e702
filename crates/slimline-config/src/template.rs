//! Command templates for external converters.
//!
//! # Design
//!
//! - Templates are parsed once when the task registry loads; rendering cannot fail.
//! - The variable set is closed. Unknown placeholders are rejected at load time so a
//!   typo never reaches the shell.
//! - Both `{{.name}}` and `{{name}}` spellings are accepted.

use std::fmt;

use crate::error::{ConfigError, ConfigResult};

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// Variables a command template may reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateVar {
    /// Fresh, empty directory the converter must write its single output file into.
    ResultFolder,
    /// Base64-encoded client filename.
    OriginalName,
    /// Directory containing the staged input file.
    Folder,
    /// Input file name without extension.
    Name,
    /// Input file extension without the leading dot.
    Extension,
}

impl TemplateVar {
    /// Every supported variable, in documentation order.
    pub const ALL: [Self; 5] = [
        Self::ResultFolder,
        Self::OriginalName,
        Self::Folder,
        Self::Name,
        Self::Extension,
    ];

    /// Placeholder name as written inside `{{ }}`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ResultFolder => "result_folder",
            Self::OriginalName => "original_name",
            Self::Folder => "folder",
            Self::Name => "name",
            Self::Extension => "extension",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|var| var.as_str() == name)
    }
}

/// Values substituted into a template for one conversion run.
#[derive(Debug, Clone, Copy)]
pub struct TemplateValues<'a> {
    /// Output directory for the converter.
    pub result_folder: &'a str,
    /// Base64-encoded original filename.
    pub original_name: &'a str,
    /// Directory of the staged input.
    pub folder: &'a str,
    /// Bare name of the staged input.
    pub name: &'a str,
    /// Extension of the staged input, without the dot.
    pub extension: &'a str,
}

impl<'a> TemplateValues<'a> {
    const fn get(&self, var: TemplateVar) -> &'a str {
        match var {
            TemplateVar::ResultFolder => self.result_folder,
            TemplateVar::OriginalName => self.original_name,
            TemplateVar::Folder => self.folder,
            TemplateVar::Name => self.name,
            TemplateVar::Extension => self.extension,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Var(TemplateVar),
}

/// A validated command template.
#[derive(Debug, Clone)]
pub struct CommandTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl CommandTemplate {
    /// Parse a template, validating every placeholder.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidTemplate`] when the template is blank, a placeholder is
    /// left open, empty, or names an unknown variable.
    pub fn parse(source: &str) -> ConfigResult<Self> {
        if source.trim().is_empty() {
            return Err(ConfigError::InvalidTemplate {
                reason: "empty",
                value: None,
            });
        }

        let mut segments = Vec::new();
        let mut rest = source;
        while let Some(start) = rest.find(OPEN) {
            if start > 0 {
                segments.push(Segment::Literal(rest[..start].to_string()));
            }
            let after_open = &rest[start + OPEN.len()..];
            let end = after_open
                .find(CLOSE)
                .ok_or_else(|| ConfigError::InvalidTemplate {
                    reason: "unterminated_placeholder",
                    value: Some(rest[start..].to_string()),
                })?;
            let raw = after_open[..end].trim();
            let name = raw.strip_prefix('.').unwrap_or(raw);
            if name.is_empty() {
                return Err(ConfigError::InvalidTemplate {
                    reason: "empty_placeholder",
                    value: None,
                });
            }
            let var = TemplateVar::from_name(name).ok_or_else(|| ConfigError::InvalidTemplate {
                reason: "unknown_variable",
                value: Some(name.to_string()),
            })?;
            segments.push(Segment::Var(var));
            rest = &after_open[end + CLOSE.len()..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    /// The template text as configured.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Whether the template references `var` at least once.
    #[must_use]
    pub fn references(&self, var: TemplateVar) -> bool {
        self.segments
            .iter()
            .any(|segment| matches!(segment, Segment::Var(found) if *found == var))
    }

    /// Substitute `values` into the template.
    #[must_use]
    pub fn render(&self, values: &TemplateValues<'_>) -> String {
        let mut out = String::with_capacity(self.source.len() * 2);
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Var(var) => out.push_str(values.get(*var)),
            }
        }
        out
    }
}

impl fmt::Display for CommandTemplate {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.source)
    }
}
