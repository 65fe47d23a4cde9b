extern crate ffmpeg_next as ffmpeg;

use std::borrow::Cow;
use std::cell::RefCell;
use std::fmt;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use super::logger::{self, fault, verbose, warning, Item};
use super::timestamp::Timestamp;

use color_eyre::eyre::{self, Context};
use ffmpeg::codec::Context as CodecContext;
use ffmpeg::decoder::Video as DecoderVideo;
use ffmpeg::format::context::Input as FormatContext;
use ffmpeg::format::{input_with_dictionary, Pixel};
use ffmpeg::frame::Video as FrameVideo;
use ffmpeg::media::Type;
use ffmpeg::software::scaling::context::Context as ScalingContext;
use ffmpeg::util::log as ffmpeglog;
use ffmpeg::{Dictionary, Packet as CodecPacket, Rational, Rescale};
use ffmpeg_sys_next::{AV_NOPTS_VALUE, AV_TIME_BASE_Q};
use image::RgbImage;

pub type Result<T> = eyre::Result<T>;

static FFMPEG_INITIALIZED: OnceLock<std::result::Result<(), ffmpeg::Error>> =
    OnceLock::new();

/// What the container says about the video stream
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoInfo {
    /// Number of frames. Estimated from the length and the frame rate if the container
    /// doesn't store it.
    pub frame_count: usize,
    /// Frames per second, `None` if unknown or nonsensical
    pub frame_rate: Option<f64>,
    pub length: Duration,
}

/// Decodes RGB frames from the best video stream of a file, with random access by frame
/// index.
pub struct FrameExtractor<L: logger::Logger = logger::LogLogger> {
    logger: L,

    // ffmpeg contexts
    ictx: FormatContext,
    decoder: DecoderVideo,
    converter: ScalingContext,

    // internal timestamp bookkeeping
    seek_target_timestamp: i64,
    cur_timestamp: i64,

    // constants/metadata
    first_timestamp: i64,
    timebase: Rational,
    video_stream_index: usize,
    orientation: Orientation,
    info: VideoInfo,
}

thread_local! {
    static LOGS: RefCell<Vec<Item>> = const {RefCell::new(Vec::new())};
}

impl FrameExtractor<logger::LogLogger> {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::new_with_logger(path, logger::LogLogger)
    }
}

impl<L> FrameExtractor<L>
where
    L: logger::Logger,
{
    pub fn new_with_logger(path: impl AsRef<Path>, logger: L) -> Result<Self> {
        if let Err(e) = FFMPEG_INITIALIZED.get_or_init(|| {
            ffmpeg::init()?;
            ffmpeglog::set_level(ffmpeglog::Level::Warning);
            unsafe {
                ffmpeg_sys_next::av_log_set_callback(Some(ffmpeg_log_adaptor));
            }
            Ok(())
        }) {
            return Err(e).wrap_err("Failed to initialize ffmpeg");
        }

        let options = {
            let mut options = Dictionary::new();
            options.set("analyzeduration", "10M");
            options.set("probesize", "5M");
            options
        };
        let mut ictx =
            input_with_dictionary(&path, options).wrap_err("Failed to open the file")?;

        let video = ictx
            .streams()
            .best(Type::Video)
            .ok_or(eyre::eyre!("No video stream"))?;

        let video_stream_index = video.index();
        let timebase = video.time_base();
        eyre::ensure!(
            timebase.numerator() > 0 && timebase.denominator() > 0,
            "The video stream has a weird timebase: {}/{}",
            timebase.numerator(),
            timebase.denominator()
        );

        let first_timestamp = if video.start_time() == AV_NOPTS_VALUE {
            verbose!(logger, "No start time, assuming zero");
            0
        } else {
            video.start_time()
        };

        let duration = if video.duration() != AV_NOPTS_VALUE {
            video.duration()
        } else if ictx.duration() != AV_NOPTS_VALUE {
            ictx.duration().rescale(AV_TIME_BASE_Q, timebase)
        } else {
            warning!(logger, "Does not have a duration");
            0
        };
        eyre::ensure!(duration >= 0, "The duration is negative");
        let end_timestamp = first_timestamp + duration;

        let frame_rate =
            positive_rate(video.avg_frame_rate()).or_else(|| positive_rate(video.rate()));
        let length = Timestamp::new(end_timestamp, timebase, first_timestamp).to_duration();
        let frame_count = match usize::try_from(video.frames()) {
            Ok(n) if n > 0 => n,
            _ => frame_rate
                .map(|rate| (length.as_secs_f64() * rate).round() as usize)
                .unwrap_or(0),
        };
        let info = VideoInfo {
            frame_count,
            frame_rate,
            length,
        };

        let orientation = match get_orientation(&video) {
            Some(x) => x,
            None => {
                warning!(logger, "Got a weird orientation angle, ignoring");
                Orientation::Normal
            }
        };

        let decoder = CodecContext::from_parameters(video.parameters())
            .wrap_err("No codec found")?
            .decoder()
            .video()
            .wrap_err("No codec found, of type video (?)")?;

        let converter = Self::pixel_converter(&decoder)?;

        ictx.streams_mut()
            .filter(|stream| stream.index() != video_stream_index)
            .for_each(|mut stream| stream_set_discard_all(&mut stream));

        let myself = Self {
            logger,
            ictx,
            decoder,
            video_stream_index,
            converter,
            cur_timestamp: first_timestamp,
            seek_target_timestamp: first_timestamp,
            first_timestamp,
            timebase,
            orientation,
            info,
        };
        myself.log_ffmpeg_logs();
        Ok(myself)
    }

    fn log_ffmpeg_logs(&self) {
        LOGS.with_borrow_mut(|vec| {
            for item in vec.drain(..) {
                self.logger.log_item(item);
            }
        })
    }

    fn pixel_converter(decoder: &DecoderVideo) -> Result<ScalingContext> {
        eyre::ensure!(decoder.format() != Pixel::None, "No pixel format");
        Ok(ScalingContext::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            // http://git.videolan.org/?p=ffmpeg.git;a=blob;f=libavutil/pixfmt.h;hb=HEAD
            Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::Flags::FAST_BILINEAR,
        )?)
    }

    pub fn info(&self) -> VideoInfo {
        self.info
    }

    /// Seeks to frame number `index` and decodes it. `Ok(None)` means that the video
    /// ended before that frame.
    pub fn frame_at(&mut self, index: usize) -> Result<Option<(Timestamp, RgbImage)>> {
        let target = self.first_timestamp + self.index_offset(index)?;
        self.seek_internal(target)
            .wrap_err_with(|| format!("Failed to seek to frame {index}"))?;
        self.next()
    }

    /// How far into the stream, in timebase units, frame `index` is. Aims half a frame
    /// early, so that rounding never makes us skip past the wanted frame.
    fn index_offset(&self, index: usize) -> Result<i64> {
        let VideoInfo {
            frame_count,
            frame_rate,
            length,
        } = self.info;

        let early = (index as f64 - 0.5).max(0.0);
        let secs = match frame_rate {
            Some(rate) => early / rate,
            None if frame_count > 0 => length.as_secs_f64() * early / frame_count as f64,
            None => 0.0,
        };
        let dur = Duration::try_from_secs_f64(secs)
            .wrap_err_with(|| format!("Frame {index} is not a reasonable position"))?;
        Ok(Timestamp::from_duration(dur).relative_in(self.timebase))
    }

    /// The next frame at or after the last seek target
    pub fn next(&mut self) -> Result<Option<(Timestamp, RgbImage)>> {
        loop {
            loop {
                let mut frame = FrameVideo::empty();
                // avcodec_receive_frame
                // https://ffmpeg.org/doxygen/trunk/group__lavc__decoding.html#ga11e6542c4e66d3028668788a1a74217c
                match {
                    let ret = self.decoder.receive_frame(&mut frame);
                    self.log_ffmpeg_logs();
                    ret
                } {
                    Ok(()) => (),
                    Err(ffmpeg::Error::Other {
                        errno: libc::EAGAIN,
                    }) => break,
                    Err(ffmpeg::Error::Eof) => return Ok(None),
                    Err(e) => {
                        return Err(e)
                            .wrap_err("Decoder error when receiving a frame from it");
                    }
                }

                match frame.timestamp() {
                    Some(ts) => self.cur_timestamp = ts,
                    None => {
                        let after = self.timestamp(self.cur_timestamp);
                        warning!(
                            self.logger,
                            "Frame doesn't have a timestamp somewhere after: {}",
                            after
                        );
                        continue;
                    }
                }

                if self.cur_timestamp < self.seek_target_timestamp {
                    continue;
                }

                let mut converted = FrameVideo::empty();
                self.converter
                    .run(&frame, &mut converted)
                    .wrap_err("Failed to convert the decoded frame")?;
                let img = create_rust_image(&converted)?;
                let img = undo_rotation(img, self.orientation);

                return Ok(Some((self.timestamp(self.cur_timestamp), img)));
            }

            loop {
                // http://ffmpeg.org/doxygen/trunk/group__lavf__decoding.html#ga4fdb3084415a82e3810de6ee60e46a61
                let mut packet = CodecPacket::empty();
                match {
                    let ret = packet.read(&mut self.ictx);
                    self.log_ffmpeg_logs();
                    ret
                } {
                    Ok(()) if packet.stream() == self.video_stream_index => {
                        match {
                            let ret = self.decoder.send_packet(&packet);
                            self.log_ffmpeg_logs();
                            ret
                        } {
                            Ok(()) => break,
                            Err(e) => {
                                fault!(self.logger, "Failed to decode packet: {}", e);
                                continue;
                            }
                        }
                    }
                    Ok(()) => continue,
                    Err(ffmpeg::Error::Eof) => {
                        self.decoder
                            .send_eof()
                            .wrap_err("Failed to send EOF to the decoder")?;
                        break;
                    }
                    Err(e) => {
                        eyre::bail!("Failed to read a packet from the stream: {e}");
                    }
                }
            }
        }
    }

    fn timestamp(&self, ts: i64) -> Timestamp {
        Timestamp::new(ts, self.timebase, self.first_timestamp)
    }

    fn seek_internal(&mut self, target: i64) -> Result<()> {
        let Self {
            ictx,
            video_stream_index,
            decoder,
            seek_target_timestamp,
            ..
        } = self;

        // land on the keyframe at or before the target, decode forward from there. If there
        // is no such keyframe, any will do since earlier frames are skipped anyway.
        let [before, anywhere] = seek_windows(target);
        if let Err(e) = seek(ictx, *video_stream_index, before.0, target, before.1) {
            verbose!(
                self.logger,
                "No keyframe before {}, seeking anywhere: {}",
                target,
                e
            );
            seek(ictx, *video_stream_index, anywhere.0, target, anywhere.1)
                .wrap_err("Failed to seek")?;
        }
        decoder.flush();
        *seek_target_timestamp = target;
        self.log_ffmpeg_logs();
        Ok(())
    }
}

impl<L: logger::Logger> Drop for FrameExtractor<L> {
    fn drop(&mut self) {
        self.log_ffmpeg_logs();
    }
}

fn positive_rate(rate: Rational) -> Option<f64> {
    (rate.numerator() > 0 && rate.denominator() > 0)
        .then(|| f64::from(rate.numerator()) / f64::from(rate.denominator()))
}

#[derive(Clone, Copy, Debug)]
enum Orientation {
    Normal,
    Left,
    Right,
    Upside,
}

fn get_orientation(video: &ffmpeg::Stream) -> Option<Orientation> {
    for data in video.side_data() {
        if data.kind() != ffmpeg::packet::side_data::Type::DisplayMatrix {
            continue;
        }
        let rot = unsafe {
            ffmpeg_sys_next::av_display_rotation_get(data.data().as_ptr() as *const i32)
        };

        if rot.is_finite() {
            return match rot.round() as i32 {
                -90 => Some(Orientation::Right),
                90 => Some(Orientation::Left),
                0 => Some(Orientation::Normal),
                180 | -180 => Some(Orientation::Upside),
                _ => None,
            };
        }
    }

    Some(Orientation::Normal)
}

fn undo_rotation(img: RgbImage, ori: Orientation) -> RgbImage {
    match ori {
        Orientation::Normal => img,
        Orientation::Right => image::imageops::rotate90(&img),
        Orientation::Left => image::imageops::rotate270(&img),
        Orientation::Upside => image::imageops::rotate180(&img),
    }
}

/// Copies an RGB24 frame into an image, dropping any row padding
fn create_rust_image(converted: &FrameVideo) -> Result<RgbImage> {
    eyre::ensure!(
        converted.format() == Pixel::RGB24 && converted.planes() == 1,
        "The converted frame is not packed RGB24"
    );

    let width = converted.width();
    let height = converted.height();
    let src_linesize = converted.stride(0);
    let trg_linesize = 3 * usize::try_from(width)?;
    let rows = usize::try_from(height)?;
    let data = converted.data(0);
    eyre::ensure!(
        src_linesize >= trg_linesize && data.len() >= src_linesize * rows,
        "The frame buffer is smaller than the frame"
    );

    // https://stackoverflow.com/a/57666844
    let pixels = if src_linesize == trg_linesize {
        data[..trg_linesize * rows].to_vec()
    } else {
        data.chunks(src_linesize)
            .take(rows)
            .flat_map(|row| &row[..trg_linesize])
            .copied()
            .collect()
    };

    RgbImage::from_vec(width, height, pixels)
        .ok_or_else(|| eyre::eyre!("The pixel buffer doesn't match {width}x{height}"))
}

fn stream_set_discard_all(stream: &mut ffmpeg::StreamMut<'_>) {
    unsafe {
        let ptr = stream.as_mut_ptr();
        if !ptr.is_null() {
            (*ptr).discard = ffmpeg_sys_next::AVDiscard::AVDISCARD_ALL;
        }
    }
}

/// The `(min, max)` timestamps to seek within, the bounded window first
fn seek_windows(target: i64) -> [(i64, i64); 2] {
    [(i64::MIN, target), (i64::MIN, i64::MAX)]
}

/// Like FormatContext::seek, except that this accepts a stream_index to seek on and the
/// timestamps are in that stream's timebase.
fn seek(
    input: &mut FormatContext,
    stream_index: usize,
    min_ts: i64,
    ts: i64,
    max_ts: i64,
) -> std::result::Result<(), ffmpeg::Error> {
    let stream_index: libc::c_int = stream_index
        .try_into()
        .map_err(|_| ffmpeg::Error::StreamNotFound)?;
    unsafe {
        match ffmpeg_sys_next::avformat_seek_file(
            input.as_mut_ptr(),
            stream_index,
            min_ts,
            ts,
            max_ts,
            0,
        ) {
            s if s >= 0 => Ok(()),
            e => Err(ffmpeg::Error::from(e)),
        }
    }
}

impl<L: logger::Logger> fmt::Debug for FrameExtractor<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self {
            first_timestamp,
            timebase,
            cur_timestamp,
            seek_target_timestamp,
            info,
            ..
        } = self;

        f.debug_struct("FrameExtractor")
            .field("first_ts", first_timestamp)
            .field("cur_ts", cur_timestamp)
            .field(
                "tb",
                &format_args!("{}/{}", timebase.numerator(), timebase.denominator()),
            )
            .field("seek_ts", seek_target_timestamp)
            .field("info", info)
            .finish()
    }
}

extern "C" {
    pub fn vsnprintf(
        strbuf: *mut libc::c_char,
        size: libc::size_t,
        format: *const libc::c_char,
        va_list: *mut libc::c_void,
    ) -> libc::c_int;
}

fn map_ffmpeg_level(level: libc::c_int) -> logger::Level {
    use ffmpeglog::Level as L;
    match L::try_from(level) {
        Ok(L::Error | L::Fatal | L::Panic) => logger::Level::Error,
        Ok(L::Warning) => logger::Level::Warn,
        Ok(L::Verbose | L::Trace | L::Quiet | L::Debug) => logger::Level::Verbose,
        Ok(L::Info) | Err(_) => logger::Level::Info,
    }
}

/// Name of the ffmpeg thing that logged, like "h264" or "matroska,webm"
unsafe fn class_name<'a>(avcl: *mut libc::c_void) -> Cow<'a, str> {
    if avcl.is_null() {
        return "NULL_avcl".into();
    }
    let avc = *(avcl as *const *const ffmpeg_sys_next::AVClass);
    if avc.is_null() {
        return "NULL_avc".into();
    }
    let Some(item_name) = (*avc).item_name else {
        return "NULL_item".into();
    };
    let item = std::ffi::CStr::from_ptr(item_name(avcl)).to_string_lossy();
    if item == "NULL" {
        std::ffi::CStr::from_ptr((*avc).class_name).to_string_lossy()
    } else {
        item
    }
}

/// Buffers ffmpeg's log messages in [LOGS], they are forwarded to the extractor's logger
/// after each call into ffmpeg.
unsafe extern "C" fn ffmpeg_log_adaptor(
    avcl: *mut libc::c_void,
    level: libc::c_int,
    fmt: *const libc::c_char,
    va_list: *mut ffmpeg_sys_next::__va_list_tag,
) {
    if level > ffmpeg_sys_next::av_log_get_level() {
        return;
    }

    const BUF_SIZE: usize = 2048;
    let mut buffer: Vec<u8> = vec![1; BUF_SIZE];
    let written = vsnprintf(
        buffer.as_mut_ptr() as *mut libc::c_char,
        BUF_SIZE,
        fmt,
        va_list as *mut libc::c_void,
    );
    let Ok(written) = usize::try_from(written) else {
        let errno = std::io::Error::last_os_error();
        eprintln!("failed to create log message from ffmpeg, vsnprintf returned: {errno}");
        return;
    };
    // vsnprintf reports the untruncated length, and the last byte is the nul
    buffer.truncate(written.min(BUF_SIZE - 1));

    let mut body = String::from_utf8_lossy(&buffer).into_owned();
    body.truncate(body.trim_end().len());

    let item = Item {
        level: map_ffmpeg_level(level),
        target: format!("ffmpeg::{}", class_name(avcl)),
        body,
    };
    LOGS.with_borrow_mut(|vec| vec.push(item));
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rates() {
        assert_eq!(Some(25.0), positive_rate(Rational::new(25, 1)));
        assert_eq!(
            Some(30000.0 / 1001.0),
            positive_rate(Rational::new(30000, 1001))
        );
        assert_eq!(None, positive_rate(Rational::new(0, 1)));
        assert_eq!(None, positive_rate(Rational::new(0, 0)));
        assert_eq!(None, positive_rate(Rational::new(25, 0)));
    }

    #[test]
    fn seeking_falls_back_to_anywhere() {
        let [before, anywhere] = seek_windows(1000);
        assert_eq!((i64::MIN, 1000), before);
        assert!(anywhere.0 <= 1000 && 1000 <= anywhere.1);
        assert_eq!((i64::MIN, i64::MAX), anywhere);
    }

    #[test]
    fn ffmpeg_levels() {
        // AV_LOG_ERROR, AV_LOG_WARNING, AV_LOG_INFO and AV_LOG_DEBUG
        assert_eq!(logger::Level::Error, map_ffmpeg_level(16));
        assert_eq!(logger::Level::Warn, map_ffmpeg_level(24));
        assert_eq!(logger::Level::Info, map_ffmpeg_level(32));
        assert_eq!(logger::Level::Verbose, map_ffmpeg_level(48));
        assert_eq!(logger::Level::Info, map_ffmpeg_level(12345));
    }
}
