//! Record counting pre-pass
//!
//! Produces the `total_records` denominator before processing starts. It uses the
//! same [`ElementScanner`] as the batch processor, so the count agrees with the
//! stream of records that will actually be dispatched.

use std::path::Path;

use tokio::io::AsyncBufRead;
use tracing::info;

use super::scanner::{is_record, ElementScanner};
use super::Result;

#[derive(Debug, Default, Clone, Copy)]
pub struct RecordCounter;

impl RecordCounter {
    pub fn new() -> Self {
        Self
    }

    /// Count well-formed records in the file at `path`
    pub async fn count_file(&self, path: &Path) -> Result<i64> {
        let scanner = ElementScanner::open(path).await?;
        let total = self.count(scanner).await?;
        info!(path = %path.display(), total, "Counted records");
        Ok(total)
    }

    /// Count well-formed records; malformed elements are excluded
    pub async fn count<R: AsyncBufRead + Unpin>(
        &self,
        mut scanner: ElementScanner<R>,
    ) -> Result<i64> {
        let mut total = 0i64;
        while let Some(element) = scanner.next_element().await? {
            if is_record(&element) {
                total += 1;
            }
        }
        Ok(total)
    }
}
