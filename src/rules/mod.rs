//! 规则层：确定性的快速路径（固定回复 / 本地计算 / 预置动作）

pub mod builtin;
pub mod loader;
pub mod router;

pub use builtin::{default_rules, extract_reply_content, MAIL_ID_PLACEHOLDER};
pub use loader::rules_from_toml_str;
pub use router::{ActionBuilder, DynamicResponder, Rule, RuleOutcome, RuleResponse, RuleRouter, RuleStats};
