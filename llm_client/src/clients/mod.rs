pub mod anthropic;
pub mod llamacpp;
pub mod ollama;
pub mod openai;
pub mod types;
