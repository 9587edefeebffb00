//! cache_clear tool implementation.
//!
//! Deletes every stored entry. Safe while the proxy is running.

use httpcache_core::InterceptionController;
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::json_result;

/// Output from the cache_clear tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheClearOutput {
    /// Number of entry files deleted.
    pub removed: usize,

    /// Number of entry files that could not be deleted.
    pub failed: usize,
}

/// Implementation of the cache_clear tool.
pub async fn clear_impl(controller: &InterceptionController) -> Result<CallToolResult, McpError> {
    let summary = controller.clear_cache();
    json_result(&CacheClearOutput { removed: summary.removed, failed: summary.failed })
}
