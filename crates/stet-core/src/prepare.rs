//! Per-hunk prompt preparation: expansion, rules, suppression examples and
//! symbol enrichment.

use crate::expand::{AstRegistry, expand_hunk};
use crate::prompt::{self, estimate_prompt};
use crate::rules::{CursorRule, format_rules_section};
use crate::suppression::{SuppressionExample, examples_for_file, format_suppression_section};
use crate::symbols::{self, SymbolRegistry};
use crate::types::Hunk;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use stet_vcs::VcsBackend;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedPrompt {
    pub hunk: Hunk,
    pub system: String,
    pub user: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrepareLimits {
    /// Token cap for the enclosing function; 0 disables truncation.
    pub expand_max_tokens: usize,
    pub rules_max_tokens: usize,
    pub symbol_max_definitions: usize,
    pub symbol_max_tokens: usize,
    pub call_graph: bool,
}

impl Default for PrepareLimits {
    fn default() -> Self {
        Self {
            expand_max_tokens: 0,
            rules_max_tokens: crate::rules::DEFAULT_RULES_MAX_TOKENS,
            symbol_max_definitions: 10,
            symbol_max_tokens: 800,
            call_graph: true,
        }
    }
}

/// Everything a preparer needs, shared read-only across the pool.
pub struct PromptPreparer {
    pub repo_root: PathBuf,
    pub vcs: Arc<dyn VcsBackend>,
    pub ast: AstRegistry,
    pub symbols: SymbolRegistry,
    pub system_base: String,
    pub rules_by_file: HashMap<String, Vec<CursorRule>>,
    pub suppression: Vec<SuppressionExample>,
    pub limits: PrepareLimits,
}

impl PromptPreparer {
    pub fn system_for(&self, file_path: &str) -> String {
        let rules = self
            .rules_by_file
            .get(file_path)
            .and_then(|rules| format_rules_section(rules, self.limits.rules_max_tokens));
        let examples = examples_for_file(&self.suppression, file_path);
        let suppression = format_suppression_section(&examples);
        prompt::hunk_system_prompt(&self.system_base, rules.as_deref(), suppression.as_deref())
    }

    /// Language-aware expansion; CPU-bound, so callers run it off the reactor.
    pub fn expand(&self, hunk: &Hunk) -> Hunk {
        expand_hunk(
            &self.ast,
            &self.repo_root,
            hunk,
            self.limits.expand_max_tokens,
        )
    }

    /// Builds the prompt pair for an expanded hunk. Enrichment failures are
    /// swallowed.
    pub async fn assemble(&self, expanded: Hunk) -> PreparedPrompt {
        let system = self.system_for(&expanded.file_path);

        let mut definitions_block = None;
        let mut call_graph_block = None;
        if let Some(resolver) = self.symbols.resolver_for(&expanded.file_path) {
            let definitions = symbols::resolve_definitions(
                self.vcs.as_ref(),
                resolver,
                &expanded,
                self.limits.symbol_max_definitions,
            )
            .await;
            definitions_block =
                symbols::format_definitions(&definitions, self.limits.symbol_max_tokens);
            if self.limits.call_graph {
                call_graph_block = symbols::resolve_callers(self.vcs.as_ref(), resolver, &expanded)
                    .await
                    .map(|graph| symbols::format_call_graph(&graph));
            }
        }

        let user = prompt::user_prompt(
            &expanded.file_path,
            &expanded.context,
            &expanded.raw_content,
            definitions_block.as_deref(),
            call_graph_block.as_deref(),
        );
        PreparedPrompt {
            hunk: expanded,
            system,
            user,
        }
    }

    /// Upper-bound prompt estimate for `hunk` without running enrichment.
    pub fn estimate_tokens(&self, hunk: &Hunk) -> usize {
        let system = self.system_for(&hunk.file_path);
        let user = prompt::user_prompt(&hunk.file_path, "", &hunk.raw_content, None, None);
        let mut enrichment = 0;
        if self.ast.frontend_for(&hunk.file_path).is_some() {
            enrichment += self.limits.expand_max_tokens;
        }
        if self.symbols.resolver_for(&hunk.file_path).is_some() {
            enrichment += self.limits.symbol_max_tokens;
        }
        estimate_prompt(&system, &user) + enrichment
    }
}
