//! Prompt assembly for retrieval-augmented generation.

use docrag_core::SourceItem;

/// Answer returned when retrieval finds nothing. Not an error.
pub const NO_SOURCES_ANSWER: &str = "I don't have any relevant documents to answer this \
     question. Please upload documents related to your query first.";

/// System instruction: answer only from context, cite with bracketed
/// integers, refuse when the context is insufficient.
#[must_use]
pub fn system_prompt() -> String {
    "You are a helpful assistant that answers questions using context from the user's documents.\n\
     \n\
     Rules:\n\
     1. Answer using ONLY the information in the provided context.\n\
     2. Cite each claim with bracketed source numbers in the format [1], [2], etc., \
     referring to the numbered context entries.\n\
     3. If multiple sources support a claim, cite all of them: [1][2].\n\
     4. If the context does not contain enough information, reply exactly: \
     \"I don't have enough information in the provided documents to answer that question.\"\n\
     5. Never invent sources or cite numbers that do not appear in the context."
        .to_string()
}

/// Format retrieved sources as numbered context blocks:
/// `[i] (filename, page p): content`.
#[must_use]
pub fn format_context(sources: &[SourceItem]) -> String {
    if sources.is_empty() {
        return "No context available.".to_string();
    }

    sources
        .iter()
        .enumerate()
        .map(|(i, source)| {
            let location = match source.page_number {
                Some(page) => format!("{}, page {}", source.document_filename, page),
                None => source.document_filename.clone(),
            };
            format!("[{}] ({}): {}", i + 1, location, source.content)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// User message combining the formatted context and the question.
#[must_use]
pub fn user_prompt(query: &str, context: &str) -> String {
    format!(
        "Context from documents:\n\n{context}\n\n---\n\nQuestion: {query}\n\n\
         Answer based on the context above, citing sources as [1], [2], etc."
    )
}
