// NOTE: every test will complain about the functions it doesn't use
#![allow(unused)]

use std::{
    path::{Path, PathBuf},
    process::Stdio,
};

/// 10 seconds at 25 fps
pub const TEST_VIDEO_FRAMES: usize = 250;
pub const TEST_VIDEO_LENGTH_SEC: u64 = 10;
pub const TEST_VIDEO_FPS: f64 = 25.0;

/// Returns cargo's tmpdir
pub fn cargo_tmpdir() -> PathBuf {
    PathBuf::from(option_env!("CARGO_TARGET_TMPDIR").expect("no cargo tmpdir???"))
}

/// Creates a test video with the ffmpeg binary, once per test executable
pub fn create_test_video() -> PathBuf {
    let tmpvideo = cargo_tmpdir().join("testvideo.mkv");

    use std::sync::Once;
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        std::fs::remove_file(&tmpvideo).ok();
        run_ffmpeg(&tmpvideo, "testsrc=duration=10:rate=25");
    });

    tmpvideo
}

pub fn run_ffmpeg(output: &Path, source: &str) {
    let status = std::process::Command::new("ffmpeg")
        .args([
            "-f",
            "lavfi",
            "-i",
            source,
            output.as_os_str().to_str().expect("no probs, probably"),
        ])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .stdin(Stdio::null())
        .status()
        .expect("failed to execute ffmpeg");
    assert!(status.success(), "ffmpeg failed to create {output:?}");
}
