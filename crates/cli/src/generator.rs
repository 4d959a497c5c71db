use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use context_protocol::{AnswerGenerator, Document};

/// Answer generator that renders the grounded prompt instead of calling a
/// model. Lets the pipeline be inspected end to end from the command line.
#[derive(Debug, Clone, Default)]
pub struct PromptPreview;

impl PromptPreview {
    pub fn render(query: &str, documents: &[Arc<Document>]) -> String {
        let mut prompt = String::new();
        prompt.push_str("Answer using only the sources below. Cite sources as [n].\n\n");
        if documents.is_empty() {
            prompt.push_str("(no sources retrieved)\n");
        }
        for (idx, doc) in documents.iter().enumerate() {
            prompt.push_str(&format!("[{}] {}", idx + 1, doc.id));
            if let Some(source) = doc.metadata_text("source") {
                prompt.push_str(&format!(" ({source})"));
            }
            prompt.push('\n');
            prompt.push_str(doc.content.trim());
            prompt.push_str("\n\n");
        }
        prompt.push_str("Question: ");
        prompt.push_str(query.trim());
        prompt.push('\n');
        prompt
    }
}

#[async_trait]
impl AnswerGenerator for PromptPreview {
    async fn generate(&self, query: &str, documents: &[Arc<Document>]) -> Result<String> {
        Ok(Self::render(query, documents))
    }
}
