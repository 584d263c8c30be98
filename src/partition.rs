//! Page-selective document partitioning.
//!
//! A cheap structure-only pass runs over every page. Pages that look visually
//! complex (a table or image element, or text mentioning one) are re-extracted
//! with the high-fidelity pass, which infers table structure and pulls
//! embedded image payloads. Simple documents never pay for the heavy pass.
//!
//! ```text
//! fast_pass(all pages) ──▶ flag complex pages ──▶ none? ──▶ done
//!                                   │
//!                                   ▼
//!                     hi_res_pass(complex pages only)
//!                                   │
//!                                   ▼
//!          merge: fast elements (simple pages) + hi-res elements (complex pages)
//! ```

use anyhow::{Context, Result};
use base64::Engine as _;
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::config::PartitionConfig;
use crate::models::{Element, ElementCategory};

/// Extraction passes over a document. Passes are CPU-bound and synchronous;
/// callers run them on a blocking thread.
pub trait PartitionBackend: Send + Sync {
    /// Structure-only pass over every page.
    fn fast_pass(&self, path: &Path) -> Result<Vec<Element>>;

    /// High-fidelity pass restricted to `pages` (1-based).
    fn hi_res_pass(&self, path: &Path, pages: &BTreeSet<u32>) -> Result<Vec<Element>>;
}

/// Output of [`partition_document`].
#[derive(Debug, Clone)]
pub struct Partitioned {
    pub elements: Vec<Element>,
    pub complex_pages: BTreeSet<u32>,
    pub page_count: usize,
}

/// Partition a document, running the heavy pass only where it is needed.
///
/// A failing high-fidelity pass is an error; complex pages never silently
/// fall back to their fast-pass elements.
pub fn partition_document(
    backend: &dyn PartitionBackend,
    path: &Path,
    config: &PartitionConfig,
) -> Result<Partitioned> {
    let fast = backend.fast_pass(path).context("fast partition pass failed")?;
    let pages: BTreeSet<u32> = fast.iter().map(|e| e.page).collect();
    let complex = complex_pages(&fast, &config.complex_keywords);

    if complex.is_empty() {
        info!(pages = pages.len(), "no complex pages detected, using fast pass only");
        return Ok(Partitioned {
            elements: fast,
            complex_pages: complex,
            page_count: pages.len(),
        });
    }

    info!(complex = ?complex, "running high-fidelity pass on complex pages");
    let hi_res = backend
        .hi_res_pass(path, &complex)
        .context("high-fidelity partition pass failed")?;

    let mut elements: Vec<Element> = fast
        .into_iter()
        .filter(|e| !complex.contains(&e.page))
        .collect();
    let mut covered = BTreeSet::new();
    for el in hi_res {
        if complex.contains(&el.page) {
            covered.insert(el.page);
            elements.push(el);
        } else {
            debug!(page = el.page, "dropping high-fidelity element outside requested pages");
        }
    }
    for missing in complex.difference(&covered) {
        warn!(page = missing, "high-fidelity pass produced no elements for page");
    }

    // Stable: preserves extraction order within each page.
    elements.sort_by_key(|e| e.page);

    Ok(Partitioned {
        elements,
        complex_pages: complex,
        page_count: pages.len(),
    })
}

/// Pages containing a table/image element or text mentioning one of `keywords`.
pub fn complex_pages(elements: &[Element], keywords: &[String]) -> BTreeSet<u32> {
    elements
        .iter()
        .filter(|e| e.category.is_visual() || mentions_any(&e.text, keywords))
        .map(|e| e.page)
        .collect()
}

/// True if any word in `text` starts with one of `keywords` (case-insensitive),
/// so "Tables" and "figures" match while "suitable" does not.
///
/// This is narrower than a plain substring test: a keyword buried inside a
/// longer word ("notable", "stable") does not flag the page.
pub fn mentions_any<S: AsRef<str>>(text: &str, keywords: &[S]) -> bool {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .any(|w| keywords.iter().any(|k| w.starts_with(k.as_ref())))
}

// ============ PDF backend ============

/// PDF backend: `pdf-extract` for per-page text, `lopdf` for image XObjects.
///
/// The fast pass splits each page into title/text elements and marks pages
/// that carry image XObjects. The high-fidelity pass additionally groups
/// column-aligned lines into table elements (with an HTML rendering) and
/// extracts JPEG/JPEG2000 image payloads as base64.
pub struct PdfBackend {
    min_table_rows: usize,
}

impl PdfBackend {
    pub fn new(config: &PartitionConfig) -> Self {
        Self {
            min_table_rows: config.min_table_rows.max(2),
        }
    }

    fn page_texts(path: &Path) -> Result<Vec<String>> {
        pdf_extract::extract_text_by_pages(path)
            .map_err(|e| anyhow::anyhow!("PDF text extraction failed: {}", e))
    }
}

impl PartitionBackend for PdfBackend {
    fn fast_pass(&self, path: &Path) -> Result<Vec<Element>> {
        let pages = Self::page_texts(path)?;
        let image_pages = match lopdf::Document::load(path) {
            Ok(doc) => pages_with_images(&doc),
            Err(e) => {
                debug!(error = %e, "lopdf could not parse document, skipping image scan");
                BTreeSet::new()
            }
        };

        let mut elements = Vec::new();
        for (idx, text) in pages.iter().enumerate() {
            let page = idx as u32 + 1;
            elements.extend(text_elements(text, page));
            if image_pages.contains(&page) {
                // Marker only; payloads are pulled by the high-fidelity pass.
                elements.push(Element::new(ElementCategory::Image, "", page));
            }
        }
        Ok(elements)
    }

    fn hi_res_pass(&self, path: &Path, pages: &BTreeSet<u32>) -> Result<Vec<Element>> {
        let page_texts = Self::page_texts(path)?;
        let doc = lopdf::Document::load(path).context("Failed to parse PDF structure")?;
        let page_ids = doc.get_pages();

        let mut elements = Vec::new();
        for &page in pages {
            let text = page
                .checked_sub(1)
                .and_then(|i| page_texts.get(i as usize))
                .map(String::as_str)
                .unwrap_or("");
            let page_elements = layout_elements(text, page, self.min_table_rows);
            let caption = page_elements
                .iter()
                .find(|e| is_caption(&e.text))
                .map(|e| e.text.clone())
                .unwrap_or_default();
            elements.extend(page_elements);

            if let Some(&page_id) = page_ids.get(&page) {
                let images = match doc.get_page_images(page_id) {
                    Ok(images) => images,
                    Err(e) => {
                        warn!(page, error = %e, "could not read page images");
                        Vec::new()
                    }
                };
                for image in images {
                    if !is_encoded_image(image.filters.as_deref()) {
                        debug!(page, "skipping raw bitmap image without an encoded format");
                        continue;
                    }
                    let payload = base64::engine::general_purpose::STANDARD.encode(image.content);
                    elements.push(Element::image(caption.clone(), payload, page));
                }
            }
        }
        Ok(elements)
    }
}

fn pages_with_images(doc: &lopdf::Document) -> BTreeSet<u32> {
    doc.get_pages()
        .into_iter()
        .filter(|(_, id)| {
            doc.get_page_images(*id)
                .map(|imgs| !imgs.is_empty())
                .unwrap_or(false)
        })
        .map(|(page, _)| page)
        .collect()
}

fn is_encoded_image(filters: Option<&[String]>) -> bool {
    filters
        .map(|f| f.iter().any(|name| name == "DCTDecode" || name == "JPXDecode"))
        .unwrap_or(false)
}

fn is_caption(text: &str) -> bool {
    let lower = text.trim_start().to_lowercase();
    lower.starts_with("figure") || lower.starts_with("fig.")
}

/// Split page text into paragraph elements, classifying short headings as titles.
pub fn text_elements(text: &str, page: u32) -> Vec<Element> {
    paragraphs(text)
        .into_iter()
        .map(|para| {
            let category = if looks_like_title(&para) {
                ElementCategory::Title
            } else {
                ElementCategory::Text
            };
            Element::new(category, para, page)
        })
        .collect()
}

fn paragraphs(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            if !current.is_empty() {
                out.push(current.join(" "));
                current.clear();
            }
        } else {
            current.push(trimmed);
        }
    }
    if !current.is_empty() {
        out.push(current.join(" "));
    }
    out
}

/// Short single-line text without terminal punctuation that starts with an
/// uppercase letter or a section number ("3.2 Results").
fn looks_like_title(para: &str) -> bool {
    let len = para.chars().count();
    if len == 0 || len > 80 {
        return false;
    }
    if para.ends_with('.') || para.ends_with(',') || para.ends_with(';') || para.ends_with(':') {
        return false;
    }
    let words = para.split_whitespace().count();
    if words > 10 {
        return false;
    }
    match para.chars().next() {
        Some(c) if c.is_uppercase() => true,
        Some(c) if c.is_ascii_digit() => para
            .split_whitespace()
            .nth(1)
            .and_then(|w| w.chars().next())
            .map(|c| c.is_uppercase())
            .unwrap_or(false),
        _ => false,
    }
}

/// Split a line into cells on runs of two or more spaces or tabs.
fn split_cells(line: &str) -> Vec<String> {
    let mut cells = Vec::new();
    let mut current = String::new();
    let mut gap = 0usize;
    for c in line.trim().chars() {
        if c == '\t' {
            gap += 2;
        } else if c == ' ' {
            gap += 1;
        } else {
            if gap >= 2 && !current.is_empty() {
                cells.push(std::mem::take(&mut current));
            } else if gap == 1 && !current.is_empty() {
                current.push(' ');
            }
            gap = 0;
            current.push(c);
        }
    }
    if !current.is_empty() {
        cells.push(current);
    }
    cells
}

/// Layout-aware split of page text: runs of at least `min_rows` consecutive
/// lines with the same number (≥ 2) of column-separated cells become tables;
/// everything else becomes title/text paragraphs.
pub fn layout_elements(text: &str, page: u32, min_rows: usize) -> Vec<Element> {
    let lines: Vec<&str> = text.lines().collect();
    let mut elements = Vec::new();
    let mut prose = String::new();
    let mut i = 0;

    while i < lines.len() {
        let cells = split_cells(lines[i]);
        if cells.len() >= 2 {
            let width = cells.len();
            let mut rows = vec![cells];
            let mut j = i + 1;
            while j < lines.len() {
                let next = split_cells(lines[j]);
                if next.len() != width {
                    break;
                }
                rows.push(next);
                j += 1;
            }
            if rows.len() >= min_rows {
                elements.extend(text_elements(&prose, page));
                prose.clear();
                elements.push(table_element(&rows, page));
                i = j;
                continue;
            }
        }
        prose.push_str(lines[i]);
        prose.push('\n');
        i += 1;
    }
    elements.extend(text_elements(&prose, page));
    elements
}

fn table_element(rows: &[Vec<String>], page: u32) -> Element {
    let text = rows
        .iter()
        .map(|r| r.join(" | "))
        .collect::<Vec<_>>()
        .join("\n");

    let mut html = String::from("<table>");
    for (i, row) in rows.iter().enumerate() {
        let tag = if i == 0 { "th" } else { "td" };
        html.push_str("<tr>");
        for cell in row {
            html.push_str(&format!("<{tag}>{}</{tag}>", escape_html(cell)));
        }
        html.push_str("</tr>");
    }
    html.push_str("</table>");

    Element::table(text, html, page)
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
