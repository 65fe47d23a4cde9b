use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use color_eyre::eyre::{self, Context};
use image::{ImageBuffer, ImageOutputFormat};

use super::fsutils;

/// Width of the zero padded frame number in file names
const FRAME_PADDING: usize = 2;

/// A directory where sampled frames and their captions are placed. Files with the same
/// name as a previous run are overwritten.
pub struct ResultsDir {
    path: PathBuf,
}

impl ResultsDir {
    pub fn open(path: impl Into<PathBuf>) -> eyre::Result<Self> {
        let path = path.into();
        fsutils::ensure_dir(&path)
            .wrap_err_with(|| format!("could not create the dir {}", path.display()))?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The file stem used for frame `number`, which is 1-based
    pub fn frame_stem(number: usize) -> String {
        let p = FRAME_PADDING;
        format!("frame_{number:0p$}")
    }

    /// Writes `frame_NN.jpg` and `frame_NN.txt`
    pub fn save_frame<P, C>(
        &self,
        number: usize,
        image: &ImageBuffer<P, C>,
        caption: &str,
    ) -> eyre::Result<()>
    where
        P: image::Pixel + image::PixelWithColorType,
        [P::Subpixel]: image::EncodableLayout,
        C: std::ops::Deref<Target = [P::Subpixel]>,
    {
        let stem = Self::frame_stem(number);
        self.create_jpg(&stem, image)
            .wrap_err_with(|| format!("failed to save the image of frame {number}"))?;
        self.create_text_file(&stem, caption)
            .wrap_err_with(|| format!("failed to save the caption of frame {number}"))?;
        Ok(())
    }

    pub fn create_file<F, E>(&self, name: impl AsRef<Path>, writer: F) -> eyre::Result<()>
    where
        F: FnOnce(&mut BufWriter<File>) -> std::result::Result<(), E>,
        std::result::Result<(), E>: eyre::WrapErr<(), E>,
    {
        let name = name.as_ref();
        eyre::ensure!(fsutils::is_basename(name), "{name:?} is not a basename");
        let file_path = self.path.join(name);
        let file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&file_path)
            .wrap_err_with(|| format!("could not create file {}", file_path.display()))?;

        let mut buf = BufWriter::new(file);
        writer(&mut buf).wrap_err("the writer failed")?;
        buf.flush().wrap_err("failed to flush")?;
        Ok(())
    }

    pub fn create_jpg<P, C>(
        &self,
        jpg_name: impl AsRef<Path>,
        image: &ImageBuffer<P, C>,
    ) -> eyre::Result<()>
    where
        P: image::Pixel + image::PixelWithColorType,
        [P::Subpixel]: image::EncodableLayout,
        C: std::ops::Deref<Target = [P::Subpixel]>,
    {
        let jpg_name = Path::new(jpg_name.as_ref()).with_extension("jpg");
        self.create_file(jpg_name, |w| {
            image
                .write_to(w, ImageOutputFormat::Jpeg(95))
                .wrap_err("image failed to write")
        })
    }

    pub fn create_text_file(
        &self,
        txt_name: impl AsRef<Path>,
        contents: impl AsRef<str>,
    ) -> eyre::Result<()> {
        let txt_name = Path::new(txt_name.as_ref()).with_extension("txt");
        self.create_file(txt_name, |w| {
            w.write_all(contents.as_ref().as_bytes())
                .wrap_err("failed to write string")
        })
    }
}
