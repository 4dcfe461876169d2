//! Persisting scan evidence

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::{CustodyError, ResultExt};
use crate::imaging::UploadedImage;
use crate::recognition::ScanResult;
use crate::storage::Repositories;
use crate::types::{NewScan, NewScanDetail, Scan, ScanDirection};

/// Write one scan row plus one detail row per detection.
pub(crate) async fn record_scan(
    repos: &Repositories,
    transaction_id: u64,
    direction: ScanDirection,
    image: &UploadedImage,
    result: &ScanResult,
    now: DateTime<Utc>,
) -> Result<Scan, CustodyError> {
    let scan = repos
        .scans
        .create(NewScan {
            transaction_id,
            direction,
            image_url: image.url.clone(),
            debug_image_url: result.debug_image_url.clone(),
            created_at: now,
        })
        .await
        .op("record scan")?;

    for tool in &result.detections {
        repos
            .scan_details
            .create(NewScanDetail::from_recognized(scan.id, tool))
            .await
            .op("record scan detail")?;
    }

    debug!(
        transaction_id,
        scan_id = scan.id,
        %direction,
        detections = result.detections.len(),
        "Scan recorded"
    );
    Ok(scan)
}
