//! Sampled frames to captions to a report, and the report to disk.

use std::{path::Path, time::Instant};

use color_eyre::eyre::{self, Context};
use framecap_common::{aggregate::aggregate, utils::results::ResultsDir};
use image::RgbImage;

use crate::{
    captioner::{self, Captioner},
    report::{self, FrameReport, Report, REPORT_FILENAME},
    sampler::Sampled,
};

/// Captions every sampled frame and aggregates the captions. `load` is only called if
/// there is something to caption, and `None` is returned otherwise.
///
/// The results directory is not even created until every frame has a caption, so a
/// failing model leaves no partial output behind.
pub fn describe<C, F>(
    video: &Path,
    model_name: &str,
    sampled: &Sampled,
    load: F,
    results_dir: Option<&Path>,
) -> eyre::Result<Option<Report>>
where
    C: Captioner,
    F: FnOnce() -> eyre::Result<C>,
{
    if sampled.frames.is_empty() {
        log::info!("No frames to caption");
        return Ok(None);
    }

    let mut model = load().wrap_err("failed to load the captioning model")?;

    let before = Instant::now();
    let images: Vec<&RgbImage> = sampled.frames.iter().map(|f| &f.image).collect();
    let total = images.len();
    let mut frames = Vec::with_capacity(total);
    for (i, caption) in captioner::captions(&mut model, &images).enumerate() {
        let frame = &sampled.frames[i];
        let caption = caption.wrap_err_with(|| {
            format!("failed to caption frame {} at {}", frame.index, frame.timestamp)
        })?;
        log::info!("Captioned frame {}/{total}", i + 1);
        log::debug!("Frame {} at {}: {caption}", frame.index, frame.timestamp);
        frames.push(FrameReport {
            number: i + 1,
            index: frame.index,
            timestamp: frame.timestamp.clone(),
            caption,
        });
    }
    log::info!(
        "Captioning took {}",
        humantime::Duration::from(before.elapsed())
    );

    let captions: Vec<&str> = frames.iter().map(|f| f.caption.as_str()).collect();
    let aggregated = aggregate(&captions);

    let report = Report {
        video: video.to_owned(),
        model: model_name.to_string(),
        duration: sampled.duration,
        frames,
        aggregated,
    };

    if let Some(dir) = results_dir {
        let results = ResultsDir::open(dir)?;
        save(&results, sampled, &report)?;
    }

    Ok(Some(report))
}

/// Writes `frame_NN.jpg`, `frame_NN.txt` and the report
pub fn save(results: &ResultsDir, sampled: &Sampled, report: &Report) -> eyre::Result<()> {
    eyre::ensure!(
        sampled.frames.len() == report.frames.len(),
        "{} frames but {} captions",
        sampled.frames.len(),
        report.frames.len()
    );

    for (frame, described) in sampled.frames.iter().zip(&report.frames) {
        results.save_frame(described.number, &frame.image, &described.caption)?;
    }

    results
        .create_file(REPORT_FILENAME, |w| report::save_to(w, report))
        .wrap_err("failed to save the report")
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{captioner::CaptionError, frame_extractor::Timestamp, sampler::SampledFrame};
    use image::Rgb;
    use std::{cell::Cell, time::Duration};

    /// Names the top left pixel's red value, optionally failing on one call
    struct RedNamer<'a> {
        calls: &'a Cell<usize>,
        fail_on: Option<usize>,
    }

    impl Captioner for RedNamer<'_> {
        type Input = u8;

        fn prepare(image: &RgbImage) -> Self::Input {
            image.get_pixel(0, 0).0[0]
        }

        fn generate(&mut self, input: Self::Input) -> Result<String, CaptionError> {
            self.calls.set(self.calls.get() + 1);
            if self.fail_on == Some(self.calls.get()) {
                return Err(std::io::Error::other("out of memory").into());
            }
            Ok(format!("red {input}"))
        }
    }

    fn sampled(reds: &[u8]) -> Sampled {
        Sampled {
            frames: reds
                .iter()
                .enumerate()
                .map(|(i, &red)| SampledFrame {
                    index: i * 25,
                    timestamp: Timestamp::from_duration(Duration::from_secs(i as u64)),
                    image: RgbImage::from_pixel(4, 4, Rgb([red, 0, 0])),
                })
                .collect(),
            duration: reds.len() as f64,
        }
    }

    fn entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn no_frames_never_loads_the_model() -> eyre::Result<()> {
        let tmp = tempfile::tempdir()?;
        let results = tmp.path().join("results");
        let calls = Cell::new(0);
        let loaded = Cell::new(false);

        let report = describe(
            Path::new("empty.mp4"),
            "model",
            &sampled(&[]),
            || {
                loaded.set(true);
                Ok(RedNamer {
                    calls: &calls,
                    fail_on: None,
                })
            },
            Some(results.as_path()),
        )?;

        assert!(report.is_none());
        assert!(!loaded.get());
        assert_eq!(0, calls.get());
        assert!(!results.exists());
        Ok(())
    }

    #[test]
    fn a_failing_frame_saves_nothing() -> eyre::Result<()> {
        let tmp = tempfile::tempdir()?;
        let results = tmp.path().join("results");
        let calls = Cell::new(0);

        let res = describe(
            Path::new("clip.mp4"),
            "model",
            &sampled(&[1, 2, 3, 4]),
            || {
                Ok(RedNamer {
                    calls: &calls,
                    fail_on: Some(3),
                })
            },
            Some(results.as_path()),
        );

        assert!(res.is_err());
        assert_eq!(3, calls.get());
        assert!(!results.exists());
        Ok(())
    }

    #[test]
    fn a_failing_load_is_fatal() {
        let res = describe::<RedNamer, _>(
            Path::new("clip.mp4"),
            "model",
            &sampled(&[1]),
            || eyre::bail!("no weights"),
            None,
        );
        assert!(res.is_err());
    }

    #[test]
    fn everything_is_saved_after_captioning() -> eyre::Result<()> {
        let tmp = tempfile::tempdir()?;
        let results = tmp.path().join("results");
        let calls = Cell::new(0);

        let report = describe(
            Path::new("clip.mp4"),
            "model",
            &sampled(&[7, 7, 9]),
            || {
                Ok(RedNamer {
                    calls: &calls,
                    fail_on: None,
                })
            },
            Some(results.as_path()),
        )?
        .expect("there were frames");

        assert_eq!("red 7", report.aggregated);
        assert_eq!(
            vec![(1, 0, "red 7"), (2, 25, "red 7"), (3, 50, "red 9")],
            report
                .frames
                .iter()
                .map(|f| (f.number, f.index, f.caption.as_str()))
                .collect::<Vec<_>>()
        );
        assert_eq!(
            vec![
                "frame_01.jpg",
                "frame_01.txt",
                "frame_02.jpg",
                "frame_02.txt",
                "frame_03.jpg",
                "frame_03.txt",
                REPORT_FILENAME,
            ],
            entries(&results)
        );
        assert_eq!(
            "red 9",
            std::fs::read_to_string(results.join("frame_03.txt"))?
        );

        let saved = report::read_from(std::fs::File::open(results.join(REPORT_FILENAME))?)?;
        assert_eq!(report, saved);
        Ok(())
    }

    #[test]
    fn no_results_dir_writes_nothing() -> eyre::Result<()> {
        let calls = Cell::new(0);
        let report = describe(
            Path::new("clip.mp4"),
            "model",
            &sampled(&[5]),
            || {
                Ok(RedNamer {
                    calls: &calls,
                    fail_on: None,
                })
            },
            None,
        )?;
        assert_eq!(Some("red 5"), report.as_ref().map(|r| r.aggregated.as_str()));
        Ok(())
    }
}
