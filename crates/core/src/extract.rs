use std::path::Path;

use lopdf::Document;

use crate::error::IndexError;

/// Text of one page of a source document. `number` is `None` for
/// non-paginated sources such as plain text files.
#[derive(Debug, Clone)]
pub struct PageText {
    pub number: Option<u32>,
    pub text: String,
}

/// Yields per-page text for a source file.
///
/// Failures are caught per-document by the job controller and downgrade the
/// document rather than aborting the run.
pub trait Extraction: Send + Sync {
    fn extract(&self, path: &Path) -> Result<Vec<PageText>, IndexError>;
}

#[derive(Default)]
pub struct LopdfExtractor;

impl Extraction for LopdfExtractor {
    fn extract(&self, path: &Path) -> Result<Vec<PageText>, IndexError> {
        let document =
            Document::load(path).map_err(|error| IndexError::Extraction(error.to_string()))?;

        let mut pages = Vec::new();
        for (page_no, _page_id) in document.get_pages() {
            let text = document
                .extract_text(&[page_no])
                .map_err(|error| IndexError::Extraction(error.to_string()))?;

            if !text.trim().is_empty() {
                pages.push(PageText {
                    number: Some(page_no),
                    text,
                });
            }
        }

        if pages.is_empty() {
            return Err(IndexError::Extraction(format!(
                "pdf had no readable page text: {}",
                path.display()
            )));
        }

        Ok(pages)
    }
}

/// Reads the whole file as one unpaginated page. Covers txt and md sources.
#[derive(Default)]
pub struct PlainTextExtractor;

impl Extraction for PlainTextExtractor {
    fn extract(&self, path: &Path) -> Result<Vec<PageText>, IndexError> {
        let text = std::fs::read_to_string(path)
            .map_err(|error| IndexError::Extraction(format!("{}: {error}", path.display())))?;

        if text.trim().is_empty() {
            return Err(IndexError::Extraction(format!(
                "file has no readable text: {}",
                path.display()
            )));
        }

        Ok(vec![PageText { number: None, text }])
    }
}

/// Dispatches to the right extractor by file extension.
#[derive(Default)]
pub struct DefaultExtractor {
    pdf: LopdfExtractor,
    plain: PlainTextExtractor,
}

impl Extraction for DefaultExtractor {
    fn extract(&self, path: &Path) -> Result<Vec<PageText>, IndexError> {
        let ext = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .unwrap_or_default();

        match ext.as_str() {
            "pdf" => self.pdf.extract(path),
            "txt" | "md" => self.plain.extract(path),
            other => Err(IndexError::Extraction(format!(
                "unsupported extension '{other}': {}",
                path.display()
            ))),
        }
    }
}
