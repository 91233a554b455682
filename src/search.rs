//! 搜索引擎协作接口：自动补全建议与搜索结果。
//!
//! Search collaborator contract. Adapters for concrete engines live outside this
//! crate; the access layer only needs their data to build analysis prompts.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutocompleteSuggestion {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl AutocompleteSuggestion {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            position: None,
            source: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub snippet: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchOptions {
    pub max_results: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self { max_results: 10 }
    }
}

#[async_trait]
pub trait SearchEngine: Send + Sync {
    fn name(&self) -> &str;

    async fn get_suggestions(&self, keyword: &str) -> Result<Vec<AutocompleteSuggestion>>;

    async fn get_search_results(
        &self,
        keyword: &str,
        options: &SearchOptions,
    ) -> Result<Vec<SearchResult>>;
}

/// Prompt embedding engine data for analysis of `keyword`.
pub fn build_search_prompt(
    engine: &str,
    keyword: &str,
    suggestions: &[AutocompleteSuggestion],
    results: &[SearchResult],
) -> String {
    let mut prompt = format!(
        "Keyword: \"{}\"\nSearch engine: {}\n\nAutocomplete suggestions ({}):\n",
        keyword,
        engine,
        suggestions.len()
    );
    for s in suggestions {
        prompt.push_str("- ");
        prompt.push_str(&s.query);
        prompt.push('\n');
    }
    prompt.push_str(&format!("\nTop search results ({}):\n", results.len()));
    for (i, r) in results.iter().enumerate() {
        prompt.push_str(&format!("{}. {} ({})\n", i + 1, r.title, r.url));
        if !r.snippet.is_empty() {
            prompt.push_str("   ");
            prompt.push_str(&r.snippet);
            prompt.push('\n');
        }
    }
    prompt
}
