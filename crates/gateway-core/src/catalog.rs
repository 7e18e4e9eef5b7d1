//! Product catalog loading and the `product_search` tool offered to the
//! sales agent.
//!
//! A catalog is a plain text file. Entries are separated by blank lines; a
//! file without blank lines is treated as one entry per line.

use crate::error::AgentError;
use crate::tool_registry::Tool;
use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

/// Maximum number of entries returned by a single search.
const MAX_RESULTS: usize = 3;

#[derive(Debug, Clone, Default)]
pub struct ProductCatalog {
    entries: Vec<String>,
}

impl ProductCatalog {
    /// Read and parse a catalog file.
    pub async fn load(path: &Path) -> Result<Self, AgentError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| AgentError::ReadFile {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self::parse(&text))
    }

    pub fn parse(text: &str) -> Self {
        let blocks: Vec<String> = text
            .split("\n\n")
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .map(String::from)
            .collect();

        let entries = if blocks.len() > 1 {
            blocks
        } else {
            text.lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(String::from)
                .collect()
        };
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries ranked by how many query terms they contain (case-insensitive).
    /// Entries matching no term are dropped; ties keep catalog order.
    pub fn search(&self, query: &str, limit: usize) -> Vec<&str> {
        let terms: Vec<String> = query
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.len() > 1)
            .map(str::to_lowercase)
            .collect();
        if terms.is_empty() {
            return Vec::new();
        }

        let mut scored: Vec<(usize, usize, &str)> = self
            .entries
            .iter()
            .enumerate()
            .filter_map(|(idx, entry)| {
                let haystack = entry.to_lowercase();
                let score = terms.iter().filter(|t| haystack.contains(t.as_str())).count();
                (score > 0).then_some((score, idx, entry.as_str()))
            })
            .collect();

        scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        scored.into_iter().take(limit).map(|(_, _, e)| e).collect()
    }
}

/// Looks up products in the catalog for the model.
pub struct ProductSearchTool {
    catalog: Arc<ProductCatalog>,
}

impl ProductSearchTool {
    pub const NAME: &'static str = "product_search";

    pub fn new(catalog: Arc<ProductCatalog>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl Tool for ProductSearchTool {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "Search the product catalog. Use it to answer questions about products, \
         pricing, and availability."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Words describing the product the customer is asking about"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, AgentError> {
        let query = args["query"]
            .as_str()
            .ok_or_else(|| AgentError::ToolExecution {
                tool_name: Self::NAME.into(),
                message: "missing 'query' argument".into(),
            })?;

        let hits = self.catalog.search(query, MAX_RESULTS);
        if hits.is_empty() {
            return Ok(format!("No products found matching '{}'.", query));
        }
        Ok(hits.join("\n\n"))
    }
}
