use chrono::{DateTime, Local, TimeZone};

use crate::server::encode::SnapshotFormat;

/// Second-precision timestamp safe for filenames, e.g. `2024-05-01T13-45-09`
pub fn timestamp_slug<Tz: TimeZone>(at: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    at.format("%Y-%m-%dT%H-%M-%S").to_string()
}

/// `snapshot-<timestamp>.<ext>` for a snapshot taken now
pub fn snapshot_filename(format: SnapshotFormat) -> String {
    snapshot_filename_at(format, &Local::now())
}

pub fn snapshot_filename_at<Tz: TimeZone>(format: SnapshotFormat, at: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!("snapshot-{}.{}", timestamp_slug(at), format.extension())
}

/// `Content-Disposition` value: `attachment` when a download was asked for
pub fn content_disposition(filename: &str, download: bool) -> String {
    let kind = if download { "attachment" } else { "inline" };
    format!("{kind}; filename=\"{filename}\"")
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    #[test]
    fn filename_uses_second_precision_timestamp() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 13, 45, 9).unwrap();
        assert_eq!(
            snapshot_filename_at(SnapshotFormat::Jpeg, &at),
            "snapshot-2024-05-01T13-45-09.jpg"
        );
        assert_eq!(
            snapshot_filename_at(SnapshotFormat::WebP, &at),
            "snapshot-2024-05-01T13-45-09.webp"
        );
    }

    #[test]
    fn disposition_defaults_to_inline() {
        assert_eq!(
            content_disposition("snapshot-x.jpg", false),
            "inline; filename=\"snapshot-x.jpg\""
        );
        assert_eq!(
            content_disposition("snapshot-x.jpg", true),
            "attachment; filename=\"snapshot-x.jpg\""
        );
    }
}
