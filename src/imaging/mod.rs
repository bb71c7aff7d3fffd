//! Image primitives in pure Rust, built on the `image` crate.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Decode** | `image::ImageReader` (JPEG, PNG, TIFF, WebP) |
//! | **Encode** | `JpegEncoder::new_with_quality`, `save_with_format` |
//! | **Blur** | `image::imageops::blur` on `f32` buffers |
//! | **Pixel math** | [`calculations`] (luminance, HSV, quantisation, sanitisation) |
//!
//! Every stage and effect works in a single float space: an
//! [`image::Rgb32FImage`] whose channels are normalised to `[0, 1]`. The
//! module is split into:
//! - **Calculations**: pure per-pixel functions (unit testable)
//! - **Ops**: whole-image helpers built from the calculations
//! - **Codec**: loading, saving, and the supported extension list

pub mod calculations;
pub mod codec;
pub mod ops;

pub use codec::{ImagingError, load_image, save_image, supported_input_extensions, to_rgb8};
pub use ops::LumaMap;
