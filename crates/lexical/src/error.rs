use thiserror::Error;

pub type Result<T> = std::result::Result<T, LexicalError>;

#[derive(Error, Debug)]
pub enum LexicalError {
    #[error("Invalid BM25 parameters: {0}")]
    InvalidParams(String),

    #[error("Corpus provider error: {0}")]
    Provider(String),

    #[error("Index build failed: {0}")]
    Build(String),
}

impl LexicalError {
    pub fn provider(err: anyhow::Error) -> Self {
        Self::Provider(format!("{err:#}"))
    }
}
