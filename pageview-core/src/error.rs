use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ViewerError {
    #[error("page {page} out of range (document has {page_count} pages)")]
    OutOfRange { page: usize, page_count: usize },

    #[error("invalid page range {lo}..={hi}")]
    InvalidRange { lo: usize, hi: usize },

    #[error("invalid zoom factor {0}")]
    InvalidZoom(f32),

    #[error("no document is open")]
    NoDocument,

    #[error("failed to render page {page}: {message}")]
    Render { page: usize, message: String },

    #[error("page source failed for page {page}: {message}")]
    Source { page: usize, message: String },
}

impl ViewerError {
    pub(crate) fn check_page(page: usize, page_count: usize) -> Result<(), ViewerError> {
        if page < page_count {
            Ok(())
        } else {
            Err(ViewerError::OutOfRange { page, page_count })
        }
    }
}
