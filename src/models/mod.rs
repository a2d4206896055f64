pub mod chunk;
pub mod parse_result;
pub mod question;
pub mod template;
