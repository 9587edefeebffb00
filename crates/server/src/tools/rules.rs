//! rules_reload tool implementation.
//!
//! Replaces the active rule set from newline-separated rule text.

use httpcache_core::InterceptionController;
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::json_result;

/// Parameters for the rules_reload tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RulesReloadParams {
    /// Rule text, one rule per line: `[METHODS] <regex>`. Blank lines and `#` comments are skipped.
    pub rules: String,
}

/// Output from the rules_reload tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RulesReloadOutput {
    /// Number of compiled filters now active.
    pub filters: usize,
}

/// Implementation of the rules_reload tool.
///
/// An invalid rule rejects the whole text and the previous rules stay active.
pub async fn reload_impl(
    controller: &InterceptionController, params: RulesReloadParams,
) -> Result<CallToolResult, McpError> {
    let filters = controller.reload(&params.rules)?;
    json_result(&RulesReloadOutput { filters })
}
