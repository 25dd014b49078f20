pub mod arxiv;
pub mod gemini;

pub use arxiv::ArxivClient;
pub use gemini::GeminiGenerator;
