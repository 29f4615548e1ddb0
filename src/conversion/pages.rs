use std::{collections::BTreeSet, fmt, str::FromStr};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PageRangeError {
    #[error("page range is empty")]
    Empty,
    #[error("invalid page range item: {0:?}")]
    InvalidItem(String),
    #[error("page numbers start at 1")]
    ZeroPage,
    #[error("range {start}-{end} is reversed")]
    Reversed { start: u32, end: u32 },
    #[error("page {page} is out of range (document has {page_count} pages)")]
    OutOfRange { page: u32, page_count: u32 },
    #[error("cannot remove all {page_count} pages of the document")]
    RemovesAll { page_count: u32 },
}

/// A 1-based page selection such as `"1,3-5"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRange {
    spans: Vec<(u32, u32)>,
}

impl PageRange {
    /// Every selected page, deduplicated and in document order.
    pub fn pages(&self) -> BTreeSet<u32> {
        self.spans
            .iter()
            .flat_map(|&(start, end)| start..=end)
            .collect()
    }

    pub fn max_page(&self) -> u32 {
        self.spans.iter().map(|&(_, end)| end).max().unwrap_or(0)
    }

    /// Rejects selections that reach past the end of the document instead of
    /// silently truncating them.
    pub fn validate_against(&self, page_count: u32) -> Result<(), PageRangeError> {
        let max = self.max_page();
        if max > page_count {
            return Err(PageRangeError::OutOfRange {
                page: max,
                page_count,
            });
        }
        Ok(())
    }
}

fn parse_page(s: &str) -> Result<u32, PageRangeError> {
    let page: u32 = s
        .trim()
        .parse()
        .map_err(|_| PageRangeError::InvalidItem(s.trim().to_string()))?;
    if page == 0 {
        return Err(PageRangeError::ZeroPage);
    }
    Ok(page)
}

impl FromStr for PageRange {
    type Err = PageRangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Err(PageRangeError::Empty);
        }

        let mut spans = Vec::new();
        for item in s.split(',') {
            let item = item.trim();
            if item.is_empty() {
                return Err(PageRangeError::InvalidItem(item.to_string()));
            }
            let span = match item.split_once('-') {
                Some((start, end)) => {
                    let (start, end) = (parse_page(start)?, parse_page(end)?);
                    if start > end {
                        return Err(PageRangeError::Reversed { start, end });
                    }
                    (start, end)
                }
                None => {
                    let page = parse_page(item)?;
                    (page, page)
                }
            };
            spans.push(span);
        }

        Ok(Self { spans })
    }
}

impl fmt::Display for PageRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let items: Vec<String> = self
            .spans
            .iter()
            .map(|&(start, end)| {
                if start == end {
                    start.to_string()
                } else {
                    format!("{}-{}", start, end)
                }
            })
            .collect();
        write!(f, "{}", items.join(","))
    }
}
