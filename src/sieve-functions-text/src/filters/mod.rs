pub mod line_length;
pub mod stopwords;
pub mod text_length;
pub mod word_repetition;
pub mod words_num;
