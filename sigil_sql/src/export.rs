//! Bulk export of TOTP configurations.

use sigil_core::{ExportFormat, RowFailure};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::StorageError;
use crate::provider::SqlProvider;

/// Number of configurations read per page during an export.
pub const EXPORT_PAGE_SIZE: usize = 10;

/// Outcome of an export.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportSummary {
    /// Configurations written.
    pub exported: usize,
    /// Rows that were skipped.
    pub failures: Vec<RowFailure>,
}

impl SqlProvider {
    /// Writes every TOTP configuration to `writer`, one line each.
    ///
    /// The schema must be at the latest version. Rows that fail to decrypt
    /// or render are skipped and listed in the summary.
    pub async fn export_totp_configurations<W>(
        &self,
        format: ExportFormat,
        writer: &mut W,
    ) -> Result<ExportSummary, StorageError>
    where
        W: AsyncWrite + Unpin + Send,
    {
        self.require_latest_schema().await?;

        let mut summary = ExportSummary::default();
        if let Some(header) = format.header() {
            writer.write_all(header.as_bytes()).await?;
            writer.write_all(b"\n").await?;
        }

        let mut page = 0;
        loop {
            let current = self
                .load_totp_configurations(EXPORT_PAGE_SIZE, page)
                .await?;
            let last = current.is_last();

            for config in &current.items {
                match format.render(config) {
                    Ok(line) => {
                        writer.write_all(line.as_bytes()).await?;
                        writer.write_all(b"\n").await?;
                        summary.exported += 1;
                    }
                    Err(err) => {
                        log::warn!("Skipping TOTP configuration of {}: {err}", config.username);
                        summary.failures.push(RowFailure {
                            table: "totp_configurations",
                            row_id: config.id.unwrap_or_default(),
                            reason: err.to_string(),
                        });
                    }
                }
            }
            summary.failures.extend(current.failures);

            if last {
                break;
            }
            page += 1;
        }

        writer.flush().await?;
        log::info!(
            "Exported {} TOTP configurations as {format}, {} skipped",
            summary.exported,
            summary.failures.len()
        );
        Ok(summary)
    }
}
