pub mod canonicalizer;
pub mod chunker;
pub mod completion_service;
pub mod parse_service;
pub mod prompt_service;
pub mod response_normalizer;
pub mod template_cache;
