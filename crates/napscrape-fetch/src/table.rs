//! Submissions-table extraction.
//!
//! Pure transformation from the fetched HTML to [`NapRecord`]s. Columns are
//! positional: `[id, country, region, marker, languages, date]`. Extra trailing
//! columns are ignored.
//!
//! Only one table is read: the first whose header row names a "Country"
//! column, or else the first table with data rows. Rows of any other table on
//! the page, nested ones included, never become records.
//!
//! # Link selection
//!
//! The PDF link is the first `<a href>` in the language cell whose text or
//! `title` mentions "english" (case-insensitive). Failing that, the first link
//! pointing at a `.pdf`. Failing that, no link; the record is still emitted.

use napscrape_core::{LanguageLink, NapRecord, SlugAllocator};
use scraper::{ElementRef, Html, Selector};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Cells a data row needs to be usable.
pub const MIN_COLUMNS: usize = 6;

const COL_ID: usize = 0;
const COL_COUNTRY: usize = 1;
const COL_REGION: usize = 2;
const COL_MARKER: usize = 3;
const COL_LANGUAGES: usize = 4;
const COL_DATE: usize = 5;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TableError {
    /// The page no longer has the expected table; the site layout changed.
    #[error("submissions table not found: {0}")]
    StructureNotFound(String),
    #[error("invalid selector {css:?}: {reason}")]
    Selector { css: &'static str, reason: String },
}

/// A data row that was dropped instead of becoming a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedRow {
    /// 1-based position among data rows.
    pub row: usize,
    pub cells: usize,
    pub reason: String,
}

/// Result of scanning one table page.
#[derive(Debug, Clone, Default)]
pub struct TableScan {
    /// One record per usable row, in document order.
    pub records: Vec<NapRecord>,
    pub skipped: Vec<SkippedRow>,
}

/// Extract one record per usable row of the submissions table.
///
/// Header rows (no `<td>` cells) are ignored. Rows with fewer than
/// [`MIN_COLUMNS`] cells or an empty country are skipped and reported in
/// [`TableScan::skipped`]. Fails with [`TableError::StructureNotFound`] when the
/// page has no data rows, or none of them is usable.
pub fn extract_records(html: &str) -> Result<TableScan, TableError> {
    let document = Html::parse_document(html);
    let tables = selector("table")?;
    let links = selector("a[href]")?;

    let Some(rows) = submissions_rows(&document, &tables) else {
        return Err(TableError::StructureNotFound(
            "no table rows with data cells".to_string(),
        ));
    };

    let mut slugs = SlugAllocator::new();
    let mut scan = TableScan::default();
    let mut data_rows = 0;

    for row in rows {
        let cells = row_cells(row);
        if !is_data_row(&cells) {
            debug!("skipping header row");
            continue;
        }
        data_rows += 1;

        if cells.len() < MIN_COLUMNS {
            warn!(
                row = data_rows,
                cells = cells.len(),
                expected = MIN_COLUMNS,
                "malformed row, skipping"
            );
            scan.skipped.push(SkippedRow {
                row: data_rows,
                cells: cells.len(),
                reason: format!("expected at least {MIN_COLUMNS} cells"),
            });
            continue;
        }

        let country = cell_text(cells[COL_COUNTRY]);
        if country.is_empty() {
            warn!(row = data_rows, "row has no country name, skipping");
            scan.skipped.push(SkippedRow {
                row: data_rows,
                cells: cells.len(),
                reason: "empty country name".to_string(),
            });
            continue;
        }

        let slug = slugs.allocate(&country);
        let mut record = NapRecord::new(country, slug);
        record.nap_id = cell_text(cells[COL_ID]);
        record.region = cell_text(cells[COL_REGION]);
        record.ldc_sids_marker = cell_text(cells[COL_MARKER]);
        record.language_options = cell_text(cells[COL_LANGUAGES]);
        record.date_posted = cell_text(cells[COL_DATE]);
        record.language_links = language_links(cells[COL_LANGUAGES], &links);
        record.pdf_link = select_pdf_link(&record.language_links, cells[COL_LANGUAGES], &links);

        if record.pdf_link.is_none() {
            debug!(country = %record.country_name, "no PDF link in row");
        }
        scan.records.push(record);
    }

    if scan.records.is_empty() {
        return Err(TableError::StructureNotFound(format!(
            "all {data_rows} rows are malformed"
        )));
    }

    info!(
        records = scan.records.len(),
        skipped = scan.skipped.len(),
        "submissions table extracted"
    );
    Ok(scan)
}

fn selector(css: &'static str) -> Result<Selector, TableError> {
    Selector::parse(css).map_err(|e| TableError::Selector {
        css,
        reason: e.to_string(),
    })
}

/// Rows of the submissions table, or `None` if no table on the page has data rows.
fn submissions_rows<'a>(document: &'a Html, tables: &Selector) -> Option<Vec<ElementRef<'a>>> {
    let candidates: Vec<Vec<ElementRef<'a>>> = document
        .select(tables)
        .map(own_rows)
        .filter(|rows| rows.iter().any(|r| is_data_row(&row_cells(*r))))
        .collect();

    let labelled = candidates.iter().position(|rows| {
        rows.iter().any(|r| {
            let cells = row_cells(*r);
            !is_data_row(&cells)
                && cells
                    .iter()
                    .any(|c| cell_text(*c).to_lowercase().contains("country"))
        })
    });
    if labelled.is_none() && candidates.len() > 1 {
        debug!(tables = candidates.len(), "no table names a country column, using the first");
    }
    let index = labelled.unwrap_or(0);
    candidates.into_iter().nth(index)
}

/// Rows belonging to `table` itself: direct `<tr>` children and those of its
/// own `<thead>`/`<tbody>`/`<tfoot>`. Rows of nested tables are excluded.
fn own_rows(table: ElementRef<'_>) -> Vec<ElementRef<'_>> {
    let mut rows = Vec::new();
    for child in table.children().filter_map(ElementRef::wrap) {
        match child.value().name() {
            "tr" => rows.push(child),
            "thead" | "tbody" | "tfoot" => rows.extend(
                child
                    .children()
                    .filter_map(ElementRef::wrap)
                    .filter(|el| el.value().name() == "tr"),
            ),
            _ => {}
        }
    }
    rows
}

fn is_data_row(cells: &[ElementRef<'_>]) -> bool {
    cells.iter().any(|c| c.value().name() == "td")
}

/// Direct `<td>`/`<th>` children, so nested tables do not shift columns.
fn row_cells(row: ElementRef<'_>) -> Vec<ElementRef<'_>> {
    row.children()
        .filter_map(ElementRef::wrap)
        .filter(|el| matches!(el.value().name(), "td" | "th"))
        .collect()
}

/// Element text with whitespace runs collapsed to single spaces.
fn cell_text(el: ElementRef<'_>) -> String {
    normalize(&el.text().collect::<Vec<_>>().join(" "))
}

fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn language_links(cell: ElementRef<'_>, links: &Selector) -> Vec<LanguageLink> {
    cell.select(links)
        .filter_map(|a| {
            let href = a.value().attr("href")?.trim();
            if href.is_empty() {
                return None;
            }
            let mut label = cell_text(a);
            if label.is_empty() {
                label = normalize(a.value().attr("title").unwrap_or_default());
            }
            Some(LanguageLink {
                label,
                href: href.to_string(),
            })
        })
        .collect()
}

fn select_pdf_link(
    found: &[LanguageLink],
    cell: ElementRef<'_>,
    links: &Selector,
) -> Option<String> {
    let english = cell.select(links).find_map(|a| {
        let href = a.value().attr("href")?.trim();
        let title = a.value().attr("title").unwrap_or_default();
        let labelled = mentions_english(&cell_text(a)) || mentions_english(title);
        (labelled && !href.is_empty()).then(|| href.to_string())
    });
    english.or_else(|| {
        found
            .iter()
            .find(|l| is_pdf_href(&l.href))
            .map(|l| l.href.clone())
    })
}

fn mentions_english(text: &str) -> bool {
    text.to_lowercase().contains("english")
}

fn is_pdf_href(href: &str) -> bool {
    href.split(['?', '#'])
        .next()
        .is_some_and(|path| path.to_ascii_lowercase().ends_with(".pdf"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(rows: &str) -> String {
        format!(
            "<html><body><table>\
             <thead><tr><th>ID</th><th>Country</th><th>Region</th><th>LDC/SIDS</th>\
             <th>Languages</th><th>Date</th></tr></thead>\
             <tbody>{rows}</tbody></table></body></html>"
        )
    }

    fn row(id: &str, country: &str, languages: &str) -> String {
        format!(
            "<tr><td>{id}</td><td>{country}</td><td>Africa</td><td>LDC</td>\
             <td>{languages}</td><td>28 Feb 2017</td></tr>"
        )
    }

    #[test]
    fn extracts_rows_in_document_order() {
        let html = page(&[
            row("1", "Kenya", r#"<a href="/files/kenya_en.pdf">English</a>"#),
            row("2", "Chad", ""),
            row("3", "Peru", r#"<a href="https://cdn.example.org/peru.pdf">English</a>"#),
        ]
        .concat());

        let scan = extract_records(&html).unwrap();
        let names: Vec<_> = scan.records.iter().map(|r| r.country_name.as_str()).collect();
        assert_eq!(names, ["Kenya", "Chad", "Peru"]);
        assert!(scan.skipped.is_empty());

        let kenya = &scan.records[0];
        assert_eq!(kenya.nap_id, "1");
        assert_eq!(kenya.slug, "kenya");
        assert_eq!(kenya.region, "Africa");
        assert_eq!(kenya.ldc_sids_marker, "LDC");
        assert_eq!(kenya.date_posted, "28 Feb 2017");
        assert_eq!(kenya.pdf_link.as_deref(), Some("/files/kenya_en.pdf"));
        assert_eq!(kenya.pdf_path, None);
        assert!(!kenya.pdf_download_success());
    }

    #[test]
    fn row_without_links_is_kept_with_absent_link() {
        let scan = extract_records(&page(&row("2", "Chad", "French only"))).unwrap();
        assert_eq!(scan.records.len(), 1);
        assert_eq!(scan.records[0].pdf_link, None);
        assert_eq!(scan.records[0].language_options, "French only");
    }

    #[test]
    fn short_row_is_skipped_not_fatal() {
        let html = page(&[
            row("1", "Kenya", ""),
            "<tr><td>2</td><td>Chad</td><td>Africa</td><td>LDC</td></tr>".to_string(),
            row("3", "Peru", ""),
        ]
        .concat());

        let scan = extract_records(&html).unwrap();
        assert_eq!(scan.records.len(), 2);
        assert_eq!(
            scan.skipped,
            vec![SkippedRow {
                row: 2,
                cells: 4,
                reason: "expected at least 6 cells".to_string(),
            }]
        );
    }

    #[test]
    fn missing_table_is_structure_not_found() {
        let err = extract_records("<html><body><p>Maintenance</p></body></html>").unwrap_err();
        assert!(matches!(err, TableError::StructureNotFound(_)));

        let header_only = page("");
        assert!(matches!(
            extract_records(&header_only),
            Err(TableError::StructureNotFound(_))
        ));
    }

    #[test]
    fn only_malformed_rows_is_structure_not_found() {
        let html = page("<tr><td>1</td><td>Kenya</td></tr><tr><td>2</td></tr>");
        let err = extract_records(&html).unwrap_err();
        assert_eq!(
            err,
            TableError::StructureNotFound("all 2 rows are malformed".to_string())
        );
    }

    #[test]
    fn english_label_beats_earlier_links() {
        let cell = r#"<a href="/k_fr.pdf">Français</a>
            <a href="/k_es.pdf">Español</a>
            <a href="/k_en.pdf"><span class="lang">ENGLISH</span></a>"#;
        let scan = extract_records(&page(&row("1", "Kenya", cell))).unwrap();
        let kenya = &scan.records[0];
        assert_eq!(kenya.pdf_link.as_deref(), Some("/k_en.pdf"));
        assert_eq!(kenya.language_links.len(), 3);
        assert_eq!(kenya.language_links[0].label, "Français");
        assert_eq!(kenya.language_links[2].label, "ENGLISH");
    }

    #[test]
    fn title_attribute_counts_as_label() {
        let cell = r#"<a href="/fr.pdf">FR</a><a href="/en.pdf" title="English version"><img src="flag.png"></a>"#;
        let scan = extract_records(&page(&row("1", "Haiti", cell))).unwrap();
        assert_eq!(scan.records[0].pdf_link.as_deref(), Some("/en.pdf"));
        assert_eq!(scan.records[0].language_links[1].label, "English version");
    }

    #[test]
    fn falls_back_to_first_pdf_link() {
        let cell = r#"<a href="/about">About</a><a href="/docs/nap.PDF?v=2">Download</a>"#;
        let scan = extract_records(&page(&row("1", "Nepal", cell))).unwrap();
        assert_eq!(scan.records[0].pdf_link.as_deref(), Some("/docs/nap.PDF?v=2"));

        let no_pdf = r#"<a href="/about">About</a>"#;
        let scan = extract_records(&page(&row("1", "Nepal", no_pdf))).unwrap();
        assert_eq!(scan.records[0].pdf_link, None);
        assert_eq!(scan.records[0].language_links.len(), 1);
    }

    #[test]
    fn collapses_whitespace_and_slugs_diacritics() {
        let html = page(&row(" 7 ", "\n  Côte   d'Ivoire\n", ""));
        let scan = extract_records(&html).unwrap();
        let record = &scan.records[0];
        assert_eq!(record.nap_id, "7");
        assert_eq!(record.country_name, "Côte d'Ivoire");
        assert_eq!(record.slug, "cote_d_ivoire");
        assert_eq!(record.pdf_file_name(), "cote_d_ivoire.pdf");
    }

    #[test]
    fn colliding_slugs_get_suffixes() {
        let html = page(&[
            row("1", "Guinea-Bissau", ""),
            row("2", "Guinea Bissau", ""),
            row("3", "Guinea-Bissau", ""),
        ]
        .concat());
        let scan = extract_records(&html).unwrap();
        let slugs: Vec<_> = scan.records.iter().map(|r| r.slug.as_str()).collect();
        assert_eq!(slugs, ["guinea_bissau", "guinea_bissau_2", "guinea_bissau"]);
    }

    #[test]
    fn nested_table_does_not_shift_columns() {
        let languages = r#"<table><tr><td><a href="/en.pdf">English</a></td></tr></table>"#;
        let html = page(&row("1", "Fiji", languages));
        let scan = extract_records(&html).unwrap();
        assert_eq!(scan.records.len(), 1);
        assert_eq!(scan.records[0].pdf_link.as_deref(), Some("/en.pdf"));
        assert!(scan.skipped.is_empty());
    }

    const FOOTER: &str = "<table><tr><td>Contact</td><td>Privacy</td><td>Terms</td>\
        <td>Accessibility</td><td>Sitemap</td><td>Jobs</td></tr></table>";

    #[test]
    fn unrelated_tables_are_ignored() {
        let nap = page(&row("1", "Kenya", r#"<a href="/en.pdf">English</a>"#));
        let after = nap.replace("</body>", &format!("{FOOTER}</body>"));
        let before = nap.replace("<body>", &format!("<body>{FOOTER}"));

        for html in [after, before] {
            let scan = extract_records(&html).unwrap();
            let names: Vec<_> = scan.records.iter().map(|r| r.country_name.as_str()).collect();
            assert_eq!(names, ["Kenya"]);
            assert!(scan.skipped.is_empty());
        }
    }

    #[test]
    fn unlabelled_tables_fall_back_to_the_first() {
        let html = format!(
            "<html><body><table><tr><td>1</td><td>Kenya</td><td>Africa</td><td></td>\
             <td></td><td>2017</td></tr></table>{FOOTER}</body></html>"
        );
        let scan = extract_records(&html).unwrap();
        assert_eq!(scan.records.len(), 1);
        assert_eq!(scan.records[0].country_name, "Kenya");
    }
}
