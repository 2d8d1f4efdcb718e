//! Registered capture patterns.

use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementOptions {
    None,
    SystemTable,
    EventTable,
}

pub struct SchemaElement {
    pub owner_re: Regex,
    pub table_re: Regex,
    pub options: ElementOptions,
    /// Explicit user-supplied primary-key override, if any.
    pub keys: Option<Vec<String>>,
}

impl SchemaElement {
    pub fn matches(&self, owner: &str, table: &str) -> bool {
        self.owner_re.is_match(owner) && self.table_re.is_match(table)
    }
}

/// Anchors a user-supplied SQL-ish pattern (`%` wildcard) into a full regex,
/// the way `security_vault/vpd.rs` and `quality/quality_rules.rs` compile
/// user patterns once at registration time rather than per-row.
pub fn compile_pattern(pattern: &str) -> Result<Regex, regex::Error> {
    let escaped = regex::escape(pattern).replace("%", ".*").replace(r"\?", ".");
    Regex::new(&format!("^{}$", escaped))
}
