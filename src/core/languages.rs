//! Language configuration for sandboxed execution
//!
//! The set of languages is closed: every `Language` variant must have an
//! execution image in the table, otherwise loading fails at startup.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

/// Supported submission languages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Cpp,
    C,
    Java,
    Python,
    JavaScript,
}

impl Language {
    pub const ALL: [Language; 5] = [
        Language::Cpp,
        Language::C,
        Language::Java,
        Language::Python,
        Language::JavaScript,
    ];

    /// Table key of this language (e.g., "cpp")
    pub fn key(&self) -> &'static str {
        match self {
            Language::Cpp => "cpp",
            Language::C => "c",
            Language::Java => "java",
            Language::Python => "python",
            Language::JavaScript => "javascript",
        }
    }

    /// Source filename the execution image expects
    pub fn default_source_file(&self) -> &'static str {
        match self {
            Language::Cpp => "Main.cpp",
            Language::C => "Main.c",
            Language::Java => "Main.java",
            Language::Python => "script.py",
            Language::JavaScript => "script.js",
        }
    }

    fn from_key(key: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|lang| lang.key().eq_ignore_ascii_case(key))
    }
}

/// Execution image and filename convention for one language
#[derive(Debug, Clone, PartialEq)]
pub struct LanguageConfig {
    /// Container image reference
    pub image: String,
    /// Name of the source file inside the mounted directory (e.g., "Main.cpp")
    pub source_file: String,
}

/// Raw TOML configuration for a language
#[derive(Debug, Deserialize)]
struct RawLanguageConfig {
    image: String,
    source_file: Option<String>,
    #[serde(default)]
    aliases: Vec<String>,
}

/// Raw TOML override; only the image reference may be replaced
#[derive(Debug, Deserialize)]
struct RawImageOverride {
    image: String,
}

/// Static map from language identifiers to execution images
#[derive(Debug, Clone)]
pub struct LanguageTable {
    configs: HashMap<Language, LanguageConfig>,
    aliases: HashMap<String, Language>,
}

impl LanguageTable {
    /// Load the table compiled into the binary from `files/languages.toml`
    pub fn builtin() -> anyhow::Result<Self> {
        let content = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/files/languages.toml"));
        Self::from_toml(content)
    }

    /// Load the builtin table, then apply image overrides from `override_path` if given
    pub fn load(override_path: Option<&Path>) -> anyhow::Result<Self> {
        let table = Self::builtin()?;
        match override_path {
            Some(path) => {
                let content = fs::read_to_string(path).with_context(|| {
                    format!("Failed to read language overrides: {}", path.display())
                })?;
                table.with_overrides(&content)
            }
            None => Ok(table),
        }
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let raw_configs: HashMap<String, RawLanguageConfig> =
            toml::from_str(content).context("Invalid language table")?;

        let mut configs = HashMap::new();
        let mut aliases = HashMap::new();

        for (name, raw) in raw_configs {
            let language = Language::from_key(&name)
                .ok_or_else(|| anyhow::anyhow!("Unknown language in table: {}", name))?;

            let config = LanguageConfig {
                image: raw.image,
                source_file: raw
                    .source_file
                    .unwrap_or_else(|| language.default_source_file().to_string()),
            };

            aliases.insert(language.key().to_string(), language);
            for alias in raw.aliases {
                aliases.insert(alias.to_lowercase(), language);
            }
            configs.insert(language, config);
        }

        for language in Language::ALL {
            if !configs.contains_key(&language) {
                bail!("Language table has no entry for {}", language.key());
            }
        }

        Ok(Self { configs, aliases })
    }

    /// Replace image references with the ones given in `content`
    pub fn with_overrides(mut self, content: &str) -> anyhow::Result<Self> {
        let overrides: HashMap<String, RawImageOverride> =
            toml::from_str(content).context("Invalid language overrides")?;

        for (name, raw) in overrides {
            let language = self
                .lookup(&name)
                .ok_or_else(|| anyhow::anyhow!("Override for unsupported language: {}", name))?;
            if let Some(config) = self.configs.get_mut(&language) {
                config.image = raw.image;
            }
        }

        Ok(self)
    }

    /// Resolve a language identifier (or alias) to its configuration
    pub fn resolve(&self, name: &str) -> Option<(Language, &LanguageConfig)> {
        let language = self.lookup(name)?;
        self.configs.get(&language).map(|config| (language, config))
    }

    /// Whether `name` identifies a supported language
    pub fn is_supported(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    fn lookup(&self, name: &str) -> Option<Language> {
        self.aliases.get(&name.trim().to_lowercase()).copied()
    }
}
