pub mod gemini;
pub mod ollama;
pub mod remote;
