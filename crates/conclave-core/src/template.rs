//! `{{name}}` prompt templates and the named template registry.

use lazy_static::lazy_static;
use parking_lot::RwLock;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

lazy_static! {
    static ref PLACEHOLDER: Regex = Regex::new(r"\{\{(\w+)\}\}").expect("valid placeholder regex");
}

/// Errors from the template registry.
#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("no template registered under '{0}'")]
    NotFound(String),
}

/// A named prompt pair with default variable values.
///
/// Rendering merges caller variables over the defaults (caller wins) and
/// substitutes `{{identifier}}` in both prompts. Unknown placeholders are
/// left verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptTemplate {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    pub user_prompt: String,

    #[serde(default)]
    pub defaults: BTreeMap<String, String>,
}

impl PromptTemplate {
    pub fn new(name: impl Into<String>, user_prompt: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            system_prompt: None,
            user_prompt: user_prompt.into(),
            defaults: BTreeMap::new(),
        }
    }

    pub fn with_system(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn with_default(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.defaults.insert(name.into(), value.into());
        self
    }

    /// Substitute variables into both prompts.
    pub fn render(&self, vars: &BTreeMap<String, String>) -> RenderedPrompt {
        let mut merged = self.defaults.clone();
        for (name, value) in vars {
            merged.insert(name.clone(), value.clone());
        }

        RenderedPrompt {
            system_prompt: self
                .system_prompt
                .as_deref()
                .map(|text| substitute(text, &merged)),
            user_prompt: substitute(&self.user_prompt, &merged),
        }
    }
}

/// A template after variable substitution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPrompt {
    pub system_prompt: Option<String>,
    pub user_prompt: String,
}

fn substitute(text: &str, vars: &BTreeMap<String, String>) -> String {
    PLACEHOLDER
        .replace_all(text, |caps: &Captures| match vars.get(&caps[1]) {
            Some(value) => value.clone(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Thread-safe named registry of prompt templates.
#[derive(Default)]
pub struct PromptLibrary {
    templates: RwLock<HashMap<String, PromptTemplate>>,
}

impl PromptLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a template under its own name, replacing any previous one.
    pub fn register(&self, template: PromptTemplate) {
        self.templates
            .write()
            .insert(template.name.clone(), template);
    }

    pub fn get(&self, name: &str) -> Option<PromptTemplate> {
        self.templates.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.templates.read().contains_key(name)
    }

    /// Render a registered template with the given variables.
    pub fn render(
        &self,
        name: &str,
        vars: &BTreeMap<String, String>,
    ) -> Result<RenderedPrompt, TemplateError> {
        let template = self
            .get(name)
            .ok_or_else(|| TemplateError::NotFound(name.to_string()))?;
        Ok(template.render(vars))
    }

    /// Registered template names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.templates.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.templates.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.read().is_empty()
    }
}
