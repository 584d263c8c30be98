//! Boundary error taxonomy.
//!
//! Internal stages propagate `anyhow::Error` with context. At the upload and
//! query boundaries failures are classified into [`PipelineError`], whose
//! `Display` output is the string handed back to callers.

/// Returned by queries while no corpus is loaded.
pub const NO_DOCUMENTS_MESSAGE: &str =
    "No documents uploaded. Please upload a PDF before asking questions.";

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("{}", NO_DOCUMENTS_MESSAGE)]
    NoDocuments,
    #[error("Error processing document: {0}")]
    Ingestion(String),
    #[error("Error retrieving context: {0}")]
    Retrieval(String),
    #[error("Error generating answer: {0}")]
    Generation(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

impl PipelineError {
    /// Short machine-readable code for the HTTP error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::NoDocuments => "no_documents",
            PipelineError::Ingestion(_) => "ingestion_failed",
            PipelineError::Retrieval(_) => "retrieval_failed",
            PipelineError::Generation(_) => "generation_failed",
            PipelineError::Config(_) => "bad_config",
        }
    }

    pub(crate) fn ingestion(err: anyhow::Error) -> Self {
        PipelineError::Ingestion(format!("{:#}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_strings() {
        assert_eq!(PipelineError::NoDocuments.to_string(), NO_DOCUMENTS_MESSAGE);
        assert_eq!(
            PipelineError::Generation("timeout".into()).to_string(),
            "Error generating answer: timeout"
        );
    }

    #[test]
    fn test_ingestion_keeps_context_chain() {
        let err = anyhow::anyhow!("bad xref").context("Failed to load PDF");
        let msg = PipelineError::ingestion(err).to_string();
        assert!(msg.contains("Failed to load PDF"));
        assert!(msg.contains("bad xref"));
    }
}
