//! Decoding and encoding between files and the float working space.
//!
//! | Direction | Crate / function |
//! |---|---|
//! | Decode (JPEG, PNG, TIFF, WebP) | `image::ImageReader` with format sniffing |
//! | Float conversion | `DynamicImage::to_rgb32f` |
//! | Encode → JPEG | `image::codecs::jpeg::JpegEncoder` (configured quality) |
//! | Encode → PNG / WebP / TIFF | `ImageBuffer::save_with_format` (lossless) |

use super::calculations::to_u8;
use crate::config::{OutputConfig, OutputFormat};
use image::codecs::jpeg::JpegEncoder;
use image::{ImageFormat, ImageReader, Rgb, Rgb32FImage, RgbImage};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImagingError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        source: image::ImageError,
    },
    #[error("Failed to encode {path}: {source}")]
    Encode {
        path: PathBuf,
        source: image::ImageError,
    },
    #[error("Image has no pixels: {0}")]
    Empty(PathBuf),
}

/// Extensions whose decoders are compiled in.
const PHOTO_CANDIDATES: &[(&str, ImageFormat)] = &[
    ("jpg", ImageFormat::Jpeg),
    ("jpeg", ImageFormat::Jpeg),
    ("png", ImageFormat::Png),
    ("tif", ImageFormat::Tiff),
    ("tiff", ImageFormat::Tiff),
    ("webp", ImageFormat::WebP),
];

static SUPPORTED_EXTENSIONS: LazyLock<Vec<&'static str>> = LazyLock::new(|| {
    PHOTO_CANDIDATES
        .iter()
        .filter(|(_, fmt)| fmt.reading_enabled())
        .map(|(ext, _)| *ext)
        .collect()
});

/// Returns the set of image file extensions that have working decoders compiled in.
pub fn supported_input_extensions() -> &'static [&'static str] {
    &SUPPORTED_EXTENSIONS
}

/// True when the path has an extension we can decode.
pub fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| {
            supported_input_extensions()
                .iter()
                .any(|s| s.eq_ignore_ascii_case(ext))
        })
}

/// Load and decode an image into normalised float RGB.
pub fn load_image(path: &Path) -> Result<Rgb32FImage, ImagingError> {
    let decoded = ImageReader::open(path)?
        .with_guessed_format()?
        .decode()
        .map_err(|source| ImagingError::Decode {
            path: path.to_path_buf(),
            source,
        })?;
    if decoded.width() == 0 || decoded.height() == 0 {
        return Err(ImagingError::Empty(path.to_path_buf()));
    }
    Ok(decoded.to_rgb32f())
}

/// Quantise a float image to 8-bit RGB.
pub fn to_rgb8(image: &Rgb32FImage) -> RgbImage {
    RgbImage::from_fn(image.width(), image.height(), |x, y| {
        let [r, g, b] = image.get_pixel(x, y).0;
        Rgb([to_u8(r), to_u8(g), to_u8(b)])
    })
}

fn image_format(format: OutputFormat) -> ImageFormat {
    match format {
        OutputFormat::Png => ImageFormat::Png,
        OutputFormat::Jpeg => ImageFormat::Jpeg,
        OutputFormat::Webp => ImageFormat::WebP,
        OutputFormat::Tiff => ImageFormat::Tiff,
    }
}

/// Encode a float image to `path` in the configured format.
pub fn save_image(
    image: &Rgb32FImage,
    path: &Path,
    output: &OutputConfig,
) -> Result<(), ImagingError> {
    let rgb = to_rgb8(image);
    let encode_err = |source| ImagingError::Encode {
        path: path.to_path_buf(),
        source,
    };
    match output.format {
        OutputFormat::Jpeg => {
            let mut writer = BufWriter::new(File::create(path)?);
            let encoder = JpegEncoder::new_with_quality(&mut writer, output.quality);
            rgb.write_with_encoder(encoder).map_err(encode_err)?;
        }
        format => {
            rgb.save_with_format(path, image_format(format))
                .map_err(encode_err)?;
        }
    }
    Ok(())
}
