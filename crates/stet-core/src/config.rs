//! Layered configuration: built-in defaults, the user file, the repository
//! file, then `STET_*` environment variables.

use crate::error::StetError;
use crate::findings::FilterThresholds;
use crate::types::Strictness;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_MODEL: &str = "qwen2.5-coder:32b";
pub const DEFAULT_OLLAMA_BASE_URL: &str = "http://localhost:11434";
pub const STATE_DIR_NAME: &str = ".review";
pub const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub model: String,
    pub ollama_base_url: String,
    pub context_limit: u32,
    pub warn_threshold: f64,
    pub timeout_secs: u64,
    pub temperature: f64,
    pub num_ctx: u32,
    pub state_dir: Option<PathBuf>,
    pub worktree_root: Option<PathBuf>,
    pub concurrency: usize,
    pub prepare_buffer_size: usize,
    pub rag_symbol_max_definitions: usize,
    pub rag_symbol_max_tokens: usize,
    pub rules_max_tokens: usize,
    /// Overrides the strictness preset when set.
    pub min_keep: Option<f64>,
    /// Overrides the strictness preset when set.
    pub min_maintainability: Option<f64>,
    pub critic_enabled: bool,
    pub critic_model: String,
    pub suppression_enabled: bool,
    pub suppression_history_count: usize,
    pub history_max_records: usize,
    pub capture_usage: bool,
    pub strictness: Strictness,
    pub nitpicky: bool,
    /// `None` applies the default patterns; `Some(vec![])` excludes nothing.
    pub exclude_patterns: Option<Vec<String>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            ollama_base_url: DEFAULT_OLLAMA_BASE_URL.to_string(),
            context_limit: 32768,
            warn_threshold: 0.9,
            timeout_secs: 300,
            temperature: 0.2,
            num_ctx: 32768,
            state_dir: None,
            worktree_root: None,
            concurrency: crate::pipeline::DEFAULT_CONCURRENCY,
            prepare_buffer_size: crate::pipeline::DEFAULT_PREPARE_BUFFER_SIZE,
            rag_symbol_max_definitions: 10,
            rag_symbol_max_tokens: 800,
            rules_max_tokens: crate::rules::DEFAULT_RULES_MAX_TOKENS,
            min_keep: None,
            min_maintainability: None,
            critic_enabled: false,
            critic_model: String::new(),
            suppression_enabled: true,
            suppression_history_count: crate::suppression::DEFAULT_SUPPRESSION_HISTORY_COUNT,
            history_max_records: 1000,
            capture_usage: true,
            strictness: Strictness::Default,
            nitpicky: false,
            exclude_patterns: None,
        }
    }
}

/// One file's worth of settings; absent keys leave the lower layer alone.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigLayer {
    model: Option<String>,
    ollama_base_url: Option<String>,
    context_limit: Option<u32>,
    warn_threshold: Option<f64>,
    timeout_secs: Option<u64>,
    temperature: Option<f64>,
    num_ctx: Option<u32>,
    state_dir: Option<PathBuf>,
    worktree_root: Option<PathBuf>,
    concurrency: Option<usize>,
    prepare_buffer_size: Option<usize>,
    rag_symbol_max_definitions: Option<usize>,
    rag_symbol_max_tokens: Option<usize>,
    rules_max_tokens: Option<usize>,
    min_keep: Option<f64>,
    min_maintainability: Option<f64>,
    critic_enabled: Option<bool>,
    critic_model: Option<String>,
    suppression_enabled: Option<bool>,
    suppression_history_count: Option<usize>,
    history_max_records: Option<usize>,
    capture_usage: Option<bool>,
    strictness: Option<Strictness>,
    nitpicky: Option<bool>,
    exclude_patterns: Option<Vec<String>>,
}

macro_rules! overlay {
    ($config:ident, $layer:ident, $($field:ident),+ $(,)?) => {
        $(
            if let Some(value) = $layer.$field {
                $config.$field = value;
            }
        )+
    };
}

impl Config {
    /// Loads every layer for `repo_root`, reading the process environment.
    pub fn load(repo_root: &Path) -> Result<Self, StetError> {
        let user_file = dirs::home_dir().map(|home| home.join(".config").join("stet").join(CONFIG_FILE_NAME));
        Self::load_with(
            user_file.as_deref(),
            &repo_root.join(STATE_DIR_NAME).join(CONFIG_FILE_NAME),
            |key| std::env::var(key).ok(),
        )
    }

    pub fn load_with(
        user_file: Option<&Path>,
        repo_file: &Path,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, StetError> {
        let mut config = Self::default();
        if let Some(path) = user_file {
            config.apply(read_layer(path)?);
        }
        config.apply(read_layer(repo_file)?);
        config.apply_env(env)?;
        config.validate()?;
        Ok(config)
    }

    fn apply(&mut self, layer: ConfigLayer) {
        overlay!(
            self,
            layer,
            model,
            ollama_base_url,
            context_limit,
            warn_threshold,
            timeout_secs,
            temperature,
            num_ctx,
            concurrency,
            prepare_buffer_size,
            rag_symbol_max_definitions,
            rag_symbol_max_tokens,
            rules_max_tokens,
            critic_enabled,
            critic_model,
            suppression_enabled,
            suppression_history_count,
            history_max_records,
            capture_usage,
            strictness,
            nitpicky,
        );
        if layer.state_dir.is_some() {
            self.state_dir = layer.state_dir;
        }
        if layer.worktree_root.is_some() {
            self.worktree_root = layer.worktree_root;
        }
        if layer.min_keep.is_some() {
            self.min_keep = layer.min_keep;
        }
        if layer.min_maintainability.is_some() {
            self.min_maintainability = layer.min_maintainability;
        }
        if layer.exclude_patterns.is_some() {
            self.exclude_patterns = layer.exclude_patterns;
        }
    }

    fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) -> Result<(), StetError> {
        let get = |key: &str| env(key).filter(|value| !value.trim().is_empty());
        if let Some(value) = get("STET_MODEL") {
            self.model = value;
        }
        if let Some(value) = get("STET_OLLAMA_BASE_URL") {
            self.ollama_base_url = value;
        }
        if let Some(value) = get("STET_STATE_DIR") {
            self.state_dir = Some(PathBuf::from(value));
        }
        if let Some(value) = get("STET_WORKTREE_ROOT") {
            self.worktree_root = Some(PathBuf::from(value));
        }
        if let Some(value) = get("STET_TIMEOUT") {
            self.timeout_secs = parse_env("STET_TIMEOUT", &value)?;
        }
        if let Some(value) = get("STET_TEMPERATURE") {
            self.temperature = parse_env("STET_TEMPERATURE", &value)?;
        }
        if let Some(value) = get("STET_NUM_CTX") {
            self.num_ctx = parse_env("STET_NUM_CTX", &value)?;
        }
        if let Some(value) = get("STET_CONTEXT_LIMIT") {
            self.context_limit = parse_env("STET_CONTEXT_LIMIT", &value)?;
        }
        if let Some(value) = get("STET_WARN_THRESHOLD") {
            self.warn_threshold = parse_env("STET_WARN_THRESHOLD", &value)?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), StetError> {
        if self.model.trim().is_empty() {
            return Err(StetError::config("model must not be empty"));
        }
        if !(0.0..=1.0).contains(&self.warn_threshold) {
            return Err(StetError::config("warn_threshold must be within [0, 1]"));
        }
        for (name, value) in [
            ("min_keep", self.min_keep),
            ("min_maintainability", self.min_maintainability),
        ] {
            if value.is_some_and(|v| !(0.0..=1.0).contains(&v)) {
                return Err(StetError::config(format!("{name} must be within [0, 1]")));
            }
        }
        url::Url::parse(&self.ollama_base_url).map_err(|err| {
            StetError::config(format!("invalid ollama_base_url {}: {err}", self.ollama_base_url))
        })?;
        Ok(())
    }

    /// Absolute state directory; relative settings resolve against the repo.
    pub fn state_dir(&self, repo_root: &Path) -> PathBuf {
        match &self.state_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => repo_root.join(dir),
            None => repo_root.join(STATE_DIR_NAME),
        }
    }

    pub fn worktree_root(&self, repo_root: &Path) -> PathBuf {
        match &self.worktree_root {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => repo_root.join(dir),
            None => repo_root.join(STATE_DIR_NAME).join("worktrees"),
        }
    }

    pub fn thresholds(&self, strictness: Strictness, nitpicky: bool) -> FilterThresholds {
        let mut thresholds = FilterThresholds::from_strictness(strictness, nitpicky);
        if let Some(min_keep) = self.min_keep {
            thresholds.min_keep = min_keep;
        }
        if let Some(min_maintainability) = self.min_maintainability {
            thresholds.min_maintainability = min_maintainability;
        }
        thresholds
    }
}

fn read_layer(path: &Path) -> Result<ConfigLayer, StetError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(ConfigLayer::default()),
        Err(err) => {
            return Err(StetError::config(format!("{}: {err}", path.display())));
        }
    };
    toml::from_str(&content).map_err(|err| StetError::config(format!("{}: {err}", path.display())))
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, StetError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|err| StetError::config(format!("{key}={value}: {err}")))
}
