//! Prompts and fixed strings used by the extraction and summary stages.
//!
//! Every piece of prompt text lives here so wording changes touch exactly
//! one place and tests can inspect the prompts without a model.

/// Instruction sent with every page image.
///
/// Vision models sometimes answer a bare image with advice on OCR tooling;
/// the prompt rules that out explicitly.
pub const EXTRACTION_PROMPT: &str = "You are analyzing a page from a document. \
Please read and transcribe ALL the text content you can see in this image. \
Do not provide advice about OCR tools or text extraction methods. \
Simply read the content and provide the actual text that appears on this page. \
Include headings, paragraphs, bullet points, tables, captions, and any other visible text. \
Organize the output to maintain the document's structure. \
If you cannot read some text clearly, indicate this but still provide what you can see.";

/// System role for the summary call.
pub const SUMMARY_SYSTEM_PROMPT: &str = "You are a helpful assistant that creates clear, \
comprehensive summaries of documents. Focus on extracting the most important \
information and presenting it in an organized way.";

/// Returned instead of a summary when extraction produced no text at all.
pub const NO_TEXT_PLACEHOLDER: &str = "No text could be extracted from the PDF.";

/// Returned when the summary call succeeds but the model answers with nothing.
pub const SUMMARY_FAILED_PLACEHOLDER: &str = "Failed to generate summary.";

/// Trimmed extracted text shorter than this is returned as-is instead of
/// being summarised.
pub const MIN_SUMMARY_INPUT_CHARS: usize = 50;

/// Build the user message for the summary call.
pub fn summary_prompt(full_text: &str) -> String {
    format!(
        "Please provide a comprehensive summary of the following document. \
Focus on:\n\
1. Main topics and key points\n\
2. Important findings or conclusions\n\
3. Significant data or statistics if present\n\
4. Overall purpose and context of the document\n\n\
Make the summary clear, concise, and well-structured.\n\n\
Document content:\n\n{full_text}"
    )
}

/// Label one page's text block.
pub fn page_block(page: usize, text: &str) -> String {
    format!("--- Page {page} ---\n{text}\n")
}
