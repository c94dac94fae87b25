//! CSV rendering of a submission's ordered rows. Formatting only; the
//! row list itself comes from the store.

use crate::store::submit::SubmissionDetail;

pub fn submission_filename(detail: &SubmissionDetail) -> String {
    format!("submission_{}.csv", detail.id)
}

pub fn submission_csv(detail: &SubmissionDetail) -> anyhow::Result<String> {
    let mut wtr = csv::Writer::from_writer(Vec::new());
    wtr.write_record(["Field", "Value"])?;
    for row in &detail.values {
        wtr.write_record([row.label.as_str(), row.value.as_str()])?;
    }
    wtr.flush()?;
    let bytes = wtr
        .into_inner()
        .map_err(|e| anyhow::anyhow!("csv writer: {}", e))?;
    Ok(String::from_utf8(bytes)?)
}
