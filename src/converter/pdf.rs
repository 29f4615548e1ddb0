//! Page surgery on existing PDFs.

use std::path::Path;

use log::debug;
use lopdf::Document;

use super::ConvertError;
use crate::conversion::pages::{PageRange, PageRangeError};

fn page_count(doc: &Document) -> u32 {
    doc.get_pages().len() as u32
}

/// Writes `input` minus the pages selected by `pages`.
pub fn remove_pages(input: &Path, output: &Path, pages: &PageRange) -> Result<(), ConvertError> {
    let mut doc = Document::load(input)?;
    let page_count = page_count(&doc);
    pages.validate_against(page_count)?;

    let doomed: Vec<u32> = pages.pages().into_iter().collect();
    if doomed.len() as u32 >= page_count {
        return Err(PageRangeError::RemovesAll { page_count }.into());
    }

    debug!("removing {} of {} page(s)", doomed.len(), page_count);
    write_without(&mut doc, &doomed, output)
}

/// Writes only the pages selected by `pages`, in document order.
pub fn extract_pages(input: &Path, output: &Path, pages: &PageRange) -> Result<(), ConvertError> {
    let mut doc = Document::load(input)?;
    let page_count = page_count(&doc);
    pages.validate_against(page_count)?;

    let keep = pages.pages();
    let doomed: Vec<u32> = (1..=page_count).filter(|p| !keep.contains(p)).collect();

    debug!("extracting {} of {} page(s)", keep.len(), page_count);
    write_without(&mut doc, &doomed, output)
}

fn write_without(doc: &mut Document, doomed: &[u32], output: &Path) -> Result<(), ConvertError> {
    if !doomed.is_empty() {
        doc.delete_pages(doomed);
        doc.prune_objects();
    }
    doc.save(output)?;
    Ok(())
}
