pub mod text_chunk;
pub mod whitespace_normalization;
