use std::path::PathBuf;

use crate::frame_extractor::Timestamp;

pub const REPORT_FILENAME: &str = "report.ron";

/// A captioned frame
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FrameReport {
    /// 1-based, same as in the file names
    pub number: usize,
    /// Index of the frame in the video
    pub index: usize,
    pub timestamp: Timestamp,
    pub caption: String,
}

/// Everything one run came up with
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Report {
    pub video: PathBuf,
    pub model: String,
    /// Seconds, zero if unknown
    pub duration: f64,
    pub frames: Vec<FrameReport>,
    pub aggregated: String,
}

pub fn save_to(writer: impl std::io::Write, report: &Report) -> ron::Result<()> {
    let conf = ron::ser::PrettyConfig::new().struct_names(true);
    ron::ser::to_writer_pretty(writer, report, conf)
}

pub fn read_from(reader: impl std::io::Read) -> ron::error::SpannedResult<Report> {
    ron::de::from_reader(reader)
}
