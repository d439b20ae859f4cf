//! Job progress percentage computation
//!
//! Import stages weight by archive file counts (every JSON file in the
//! export counts once), falling back to message counts while file totals are
//! still unknown. Exporting/done weight by the four entity counters, each
//! processed value capped at its own total so duplicate or retried work
//! never pushes a bar past its segment.

use crate::models::{ImportStage, JobMeta, JobStatus};

/// Compute the display percentage for a job.
///
/// Returns a value in [1, 100] while the job is in progress and exactly 100
/// once the pipeline reaches `done`.
pub fn job_percent(status: JobStatus, stage: Option<ImportStage>, meta: &JobMeta) -> u8 {
    if status == JobStatus::Success || stage == Some(ImportStage::Done) {
        return 100;
    }

    let ratio = match stage {
        Some(stage) if stage.is_import_stage() => import_ratio(meta),
        Some(_) => export_ratio(meta),
        None => 0.0,
    };

    clamp_percent(ratio)
}

/// Import-phase ratio: files processed over files total, message fallback
fn import_ratio(meta: &JobMeta) -> f64 {
    if let Some(total) = meta.json_files_total.filter(|t| *t > 0) {
        return capped_ratio(meta.json_files_processed, total);
    }
    // File totals unknown (extraction still running): fall back to message
    // counters when the pre-count has landed.
    if let Some(totals) = meta.totals.as_ref().filter(|t| t.messages > 0) {
        return capped_ratio(meta.messages_processed, totals.messages);
    }
    0.0
}

/// Export-phase ratio: four counters, each capped at its own total
fn export_ratio(meta: &JobMeta) -> f64 {
    let Some(totals) = meta.totals else {
        return 0.0;
    };
    let denominator = totals.attachments + totals.messages + totals.reactions + totals.emojis;
    if denominator == 0 {
        return 0.0;
    }
    let numerator = meta.attachments_processed.min(totals.attachments)
        + meta.messages_processed.min(totals.messages)
        + meta.reactions_processed.min(totals.reactions)
        + meta.emojis_processed.min(totals.emojis);
    numerator as f64 / denominator as f64
}

fn capped_ratio(processed: u64, total: u64) -> f64 {
    processed.min(total) as f64 / total as f64
}

fn clamp_percent(ratio: f64) -> u8 {
    let pct = (ratio * 100.0).round() as i64;
    pct.clamp(1, 100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::JobTotals;

    fn meta_with(files: (u64, u64)) -> JobMeta {
        JobMeta {
            json_files_total: Some(files.1),
            json_files_processed: files.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_done_is_always_100() {
        let meta = JobMeta::default();
        assert_eq!(
            job_percent(JobStatus::Running, Some(ImportStage::Done), &meta),
            100
        );
        assert_eq!(
            job_percent(JobStatus::Success, Some(ImportStage::Exporting), &meta),
            100
        );
    }

    #[test]
    fn test_import_stage_weights_by_files() {
        let meta = meta_with((25, 100));
        assert_eq!(
            job_percent(JobStatus::Running, Some(ImportStage::Messages), &meta),
            25
        );
    }

    #[test]
    fn test_in_progress_floor_is_one() {
        let meta = meta_with((0, 100));
        assert_eq!(
            job_percent(JobStatus::Running, Some(ImportStage::Extracting), &meta),
            1
        );
    }

    #[test]
    fn test_processed_capped_at_total() {
        // Retried files can overshoot the counter; the bar must not.
        let meta = meta_with((150, 100));
        assert_eq!(
            job_percent(JobStatus::Running, Some(ImportStage::Attachments), &meta),
            100
        );
    }

    #[test]
    fn test_message_fallback_when_file_total_unknown() {
        let meta = JobMeta {
            totals: Some(JobTotals {
                messages: 200,
                ..Default::default()
            }),
            messages_processed: 50,
            ..Default::default()
        };
        assert_eq!(
            job_percent(JobStatus::Running, Some(ImportStage::Messages), &meta),
            25
        );
    }

    #[test]
    fn test_export_stage_weights_four_counters() {
        let meta = JobMeta {
            totals: Some(JobTotals {
                messages: 100,
                reactions: 50,
                attachments: 30,
                emojis: 20,
            }),
            messages_processed: 100,
            reactions_processed: 25,
            attachments_processed: 0,
            emojis_processed: 0,
            // Import-phase file counters must not leak into the export ratio
            json_files_total: Some(10),
            json_files_processed: 10,
            ..Default::default()
        };
        // (100 + 25 + 0 + 0) / 200 = 62.5 → 63
        assert_eq!(
            job_percent(JobStatus::Running, Some(ImportStage::Exporting), &meta),
            63
        );
    }

    #[test]
    fn test_export_counters_capped_individually() {
        let meta = JobMeta {
            totals: Some(JobTotals {
                messages: 10,
                reactions: 10,
                attachments: 0,
                emojis: 0,
            }),
            messages_processed: 25, // overshoot from retries
            reactions_processed: 0,
            ..Default::default()
        };
        // capped: (10 + 0) / 20 = 50%
        assert_eq!(
            job_percent(JobStatus::Running, Some(ImportStage::Exporting), &meta),
            50
        );
    }

    #[test]
    fn test_monotone_across_polls_within_stage() {
        let mut previous = 0;
        for processed in [0u64, 10, 10, 40, 90, 100] {
            let meta = meta_with((processed, 100));
            let pct = job_percent(JobStatus::Running, Some(ImportStage::Messages), &meta);
            assert!(pct >= previous, "progress regressed: {pct} < {previous}");
            previous = pct;
        }
        assert_eq!(previous, 100);
    }

    #[test]
    fn test_unknown_everything_reports_floor() {
        let meta = JobMeta::default();
        assert_eq!(
            job_percent(JobStatus::Running, Some(ImportStage::Extracting), &meta),
            1
        );
        assert_eq!(
            job_percent(JobStatus::Running, Some(ImportStage::Exporting), &meta),
            1
        );
    }
}
