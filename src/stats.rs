//! Statistics artifact (§6 Outputs, §4.4 finalization step 7): a
//! gzip-compressed JSON array of [`StatisticsItem`], one per rule
//! invocation attempt for the job.

use std::io::Write;

use flate2::Compression;
use flate2::write::GzEncoder;

use crate::domain::StatisticsItem;
use crate::objectstore::ObjectStore;

pub fn statistics_key(job_id: &str) -> String {
    format!("stats/{job_id}.json.gz")
}

pub async fn write_statistics(
    store: &dyn ObjectStore,
    job_id: &str,
    items: &[StatisticsItem],
) -> anyhow::Result<()> {
    let json = serde_json::to_vec(items)?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json)?;
    let gz = encoder.finish()?;
    store.put_atomic(&statistics_key(job_id), gz).await
}
