//! End-of-run summary over a set of records.

use std::fmt;

use serde::Serialize;

use crate::record::{FailureStage, NapRecord, RecordState};

/// One per-record failure, for the summary listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureNote {
    pub country_name: String,
    pub stage: FailureStage,
    pub attempts: u32,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub with_link: usize,
    pub downloaded: usize,
    pub extracted: usize,
    pub total_pages: u64,
    pub failures: Vec<FailureNote>,
}

impl RunSummary {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a NapRecord>) -> Self {
        let mut summary = Self::default();
        for record in records {
            summary.total += 1;
            if record.pdf_link.is_some() {
                summary.with_link += 1;
            }
            if record.pdf_download_success() {
                summary.downloaded += 1;
            }
            match &record.state {
                RecordState::Extracted { pages, .. } => {
                    summary.extracted += 1;
                    summary.total_pages += u64::from(*pages);
                }
                RecordState::Failed {
                    stage,
                    attempts,
                    reason,
                } => summary.failures.push(FailureNote {
                    country_name: record.country_name.clone(),
                    stage: *stage,
                    attempts: *attempts,
                    reason: reason.clone(),
                }),
                RecordState::NotStarted | RecordState::Downloaded { .. } => {}
            }
        }
        summary
    }

    /// Mean page count over extracted documents.
    pub fn average_pages(&self) -> Option<f64> {
        (self.extracted > 0).then(|| self.total_pages as f64 / self.extracted as f64)
    }

    pub fn download_failures(&self) -> usize {
        self.failures_at(FailureStage::Download)
    }

    pub fn extraction_failures(&self) -> usize {
        self.failures_at(FailureStage::Extraction)
    }

    fn failures_at(&self, stage: FailureStage) -> usize {
        self.failures.iter().filter(|f| f.stage == stage).count()
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}/{} processed", self.extracted, self.total)?;
        writeln!(f, "  records:           {}", self.total)?;
        writeln!(f, "  with PDF link:     {}", self.with_link)?;
        writeln!(f, "  downloaded:        {}", self.downloaded)?;
        writeln!(f, "  text extracted:    {}", self.extracted)?;
        writeln!(f, "  download failures: {}", self.download_failures())?;
        writeln!(f, "  extract failures:  {}", self.extraction_failures())?;
        write!(f, "  pages:             {}", self.total_pages)?;
        if let Some(avg) = self.average_pages() {
            write!(f, " (avg {avg:.1} per document)")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    fn scenario() -> Vec<NapRecord> {
        let mut ok = NapRecord::new("Kenya", "kenya");
        ok.pdf_link = Some("/kenya.pdf".into());
        ok.mark_downloaded(Path::new("kenya.pdf"), 100);
        ok.mark_extracted(2, "one\n\ntwo".into());

        let no_link = NapRecord::new("Chad", "chad");

        let mut missing = NapRecord::new("Peru", "peru");
        missing.pdf_link = Some("/peru.pdf".into());
        missing.mark_download_failed(3, "HTTP 404 Not Found");

        vec![ok, no_link, missing]
    }

    #[test]
    fn counts_scenario() {
        let records = scenario();
        let summary = RunSummary::from_records(&records);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.with_link, 2);
        assert_eq!(summary.downloaded, 1);
        assert_eq!(summary.extracted, 1);
        assert_eq!(summary.total_pages, 2);
        assert_eq!(summary.average_pages(), Some(2.0));
        assert_eq!(summary.download_failures(), 1);
        assert_eq!(summary.extraction_failures(), 0);
        assert_eq!(summary.failures[0].country_name, "Peru");
    }

    #[test]
    fn display_leads_with_processed_ratio() {
        let records = scenario();
        let text = RunSummary::from_records(&records).to_string();
        assert!(text.starts_with("1/3 processed"));
        assert!(text.contains("avg 2.0"));
    }

    #[test]
    fn empty_has_no_average() {
        let summary = RunSummary::from_records(&Vec::<NapRecord>::new());
        assert_eq!(summary.total, 0);
        assert_eq!(summary.average_pages(), None);
    }
}
