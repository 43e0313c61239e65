// src/config/mod.rs
pub mod llm;
pub mod settings;

pub use llm::LlmConfig;
pub use settings::Settings;
