pub mod rules;
pub mod settings;

pub use rules::{default_rules, load_rules, parse_rules};
pub use settings::Settings;
