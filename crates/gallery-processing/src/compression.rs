use anyhow::{anyhow, Result};
use bytes::Bytes;
use crate::resize::ImageResize;
use gallery_core::{OptimizationConfig, OutputFormat, VariantSpec};
use image::{DynamicImage, GenericImageView};
use rav1e::prelude::{
    ChromaSamplePosition, ChromaSampling, ColorDescription, ColorPrimaries, Config, Context,
    EncoderConfig, EncoderStatus, Frame, FrameType, MatrixCoefficients, PixelRange, Rational,
    TransferCharacteristics,
};

/// Encoder parameters for every output format
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EncoderSettings {
    pub webp_quality: f32,
    /// libwebp `method`, 0 (fast) to 6 (small)
    pub webp_effort: u8,
    pub avif_quality: f32,
    /// 0 (fast) to 10 (small)
    pub avif_effort: u8,
    pub jpeg_quality: f32,
    pub jpeg_progressive: bool,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self::from(&OptimizationConfig::default())
    }
}

impl From<&OptimizationConfig> for EncoderSettings {
    fn from(config: &OptimizationConfig) -> Self {
        Self {
            webp_quality: config.webp_quality as f32,
            webp_effort: config.webp_effort,
            avif_quality: config.avif_quality as f32,
            avif_effort: config.avif_effort,
            jpeg_quality: config.jpeg_quality as f32,
            jpeg_progressive: config.jpeg_progressive,
        }
    }
}

impl EncoderSettings {
    /// rav1e speed is the inverse of effort: effort 4 encodes at speed 6
    pub fn avif_speed(&self) -> u8 {
        10u8.saturating_sub(self.avif_effort.min(10)).max(1)
    }
}

/// Produces the bytes of one variant from the decoded source.
///
/// Called on the blocking pool, once per variant, never concurrently within a run.
pub trait VariantEncoder: Send + Sync {
    fn encode(
        &self,
        source: &DynamicImage,
        spec: &VariantSpec,
        settings: &EncoderSettings,
    ) -> Result<Bytes>;
}

/// Variant encoder
pub struct ImageCompressor;

impl VariantEncoder for ImageCompressor {
    fn encode(
        &self,
        source: &DynamicImage,
        spec: &VariantSpec,
        settings: &EncoderSettings,
    ) -> Result<Bytes> {
        let resized = ImageResize::cover(source, spec.width, spec.height);
        Self::compress(&resized, spec.format, settings)
    }
}

impl ImageCompressor {
    /// Encode an already resized image
    pub fn compress(
        img: &DynamicImage,
        format: OutputFormat,
        settings: &EncoderSettings,
    ) -> Result<Bytes> {
        match format {
            OutputFormat::Jpeg => Self::compress_jpeg(img, settings),
            OutputFormat::Webp => Self::compress_webp(img, settings),
            OutputFormat::Avif => Self::compress_avif(img, settings),
        }
    }

    /// Compress to JPEG using mozjpeg
    fn compress_jpeg(img: &DynamicImage, settings: &EncoderSettings) -> Result<Bytes> {
        let rgb_img = img.to_rgb8();
        let (width, height) = rgb_img.dimensions();

        let mut comp = mozjpeg::Compress::new(mozjpeg::ColorSpace::JCS_RGB);
        comp.set_size(width as usize, height as usize);
        comp.set_quality(settings.jpeg_quality);
        if settings.jpeg_progressive {
            comp.set_progressive_mode();
        }
        comp.set_optimize_coding(true);

        let mut comp = comp.start_compress(Vec::new())?;
        comp.write_scanlines(&rgb_img)?;
        let jpeg_data = comp.finish()?;

        Ok(Bytes::from(jpeg_data))
    }

    /// Compress to WebP (lossy, near-lossless off)
    fn compress_webp(img: &DynamicImage, settings: &EncoderSettings) -> Result<Bytes> {
        let (width, height) = img.dimensions();

        // Convert to RGBA for WebP encoding
        let rgba_img = img.to_rgba8();

        let mut config =
            webp::WebPConfig::new().map_err(|_| anyhow!("Failed to initialise WebP config"))?;
        config.lossless = 0;
        config.quality = settings.webp_quality;
        config.method = settings.webp_effort.min(6) as i32;
        config.near_lossless = 100;

        let encoder = webp::Encoder::from_rgba(&rgba_img, width, height);
        let webp_data = encoder
            .encode_advanced(&config)
            .map_err(|e| anyhow!("WebP encoding failed: {:?}", e))?;

        Ok(Bytes::copy_from_slice(&webp_data))
    }

    /// Compress to AVIF: 8-bit BT.601 full range with 4:2:0 chroma
    fn compress_avif(img: &DynamicImage, settings: &EncoderSettings) -> Result<Bytes> {
        let (width, height) = img.dimensions();
        let (width, height) = (width as usize, height as usize);
        let quantizer = quality_to_quantizer(settings.avif_quality);

        let rgba_img = img.to_rgba8();
        let [luma, cb, cr] = rgba_to_ycbcr420(rgba_img.as_raw(), width, height);
        let chroma_width = width.div_ceil(2);

        let color = encode_av1(
            width,
            height,
            ChromaSampling::Cs420,
            quantizer,
            settings.avif_speed(),
            |frame| {
                frame.planes[0].copy_from_raw_u8(&luma, width, 1);
                frame.planes[1].copy_from_raw_u8(&cb, chroma_width, 1);
                frame.planes[2].copy_from_raw_u8(&cr, chroma_width, 1);
            },
        )?;

        let alpha = if img.color().has_alpha() {
            let alpha: Vec<u8> = rgba_img.as_raw().chunks_exact(4).map(|px| px[3]).collect();
            Some(encode_av1(
                width,
                height,
                ChromaSampling::Cs400,
                quantizer,
                settings.avif_speed(),
                |frame| frame.planes[0].copy_from_raw_u8(&alpha, width, 1),
            )?)
        } else {
            None
        };

        let mut avif_data = Vec::new();
        avif_serialize::Aviffy::new()
            .set_chroma_subsampling((true, true))
            .set_matrix_coefficients(avif_serialize::constants::MatrixCoefficients::Bt601)
            .set_full_color_range(true)
            .write(
                &mut avif_data,
                &color,
                alpha.as_deref(),
                width as u32,
                height as u32,
                8,
            )
            .map_err(|e| anyhow!("AVIF container serialization failed: {}", e))?;

        Ok(Bytes::from(avif_data))
    }
}

/// Map 0-100 quality onto the rav1e quantizer range (0-255, lower is better)
fn quality_to_quantizer(quality: f32) -> u8 {
    let q = quality.clamp(0.0, 100.0) / 100.0;
    let x = if q >= 0.85 {
        (1.0 - q) * 3.0
    } else if q > 0.25 {
        1.0 - 0.125 - q * 0.5
    } else {
        1.0 - q
    };
    (x * 255.0).round() as u8
}

const BT601: [f32; 3] = [0.2990, 0.5870, 0.1140];

/// Full-range BT.601 planes; each chroma sample averages a 2x2 block
fn rgba_to_ycbcr420(rgba: &[u8], width: usize, height: usize) -> [Vec<u8>; 3] {
    let chroma_width = width.div_ceil(2);
    let chroma_height = height.div_ceil(2);
    let mut luma = Vec::with_capacity(width * height);
    let mut cb_sum = vec![0f32; chroma_width * chroma_height];
    let mut cr_sum = vec![0f32; chroma_width * chroma_height];
    let mut count = vec![0f32; chroma_width * chroma_height];

    for (i, px) in rgba.chunks_exact(4).enumerate() {
        let (r, g, b) = (f32::from(px[0]), f32::from(px[1]), f32::from(px[2]));
        let y = BT601[0] * r + BT601[1] * g + BT601[2] * b;
        luma.push(y.round().clamp(0.0, 255.0) as u8);

        let c = (i / width / 2) * chroma_width + (i % width) / 2;
        cb_sum[c] += (b - y) * (0.5 / (1.0 - BT601[2])) + 128.0;
        cr_sum[c] += (r - y) * (0.5 / (1.0 - BT601[0])) + 128.0;
        count[c] += 1.0;
    }

    let average = |sums: Vec<f32>| -> Vec<u8> {
        sums.iter()
            .zip(&count)
            .map(|(sum, n)| (sum / n.max(1.0)).round().clamp(0.0, 255.0) as u8)
            .collect()
    };
    [luma, average(cb_sum), average(cr_sum)]
}

/// Encode one still frame; `fill` writes the planes
fn encode_av1(
    width: usize,
    height: usize,
    chroma_sampling: ChromaSampling,
    quantizer: u8,
    speed: u8,
    fill: impl FnOnce(&mut Frame<u8>),
) -> Result<Vec<u8>> {
    let color_description = (chroma_sampling != ChromaSampling::Cs400).then_some(ColorDescription {
        color_primaries: ColorPrimaries::BT709,
        transfer_characteristics: TransferCharacteristics::SRGB,
        matrix_coefficients: MatrixCoefficients::BT601,
    });

    let encoder_config = EncoderConfig {
        width,
        height,
        time_base: Rational::new(1, 1),
        bit_depth: 8,
        chroma_sampling,
        chroma_sample_position: ChromaSamplePosition::Unknown,
        pixel_range: PixelRange::Full,
        color_description,
        still_picture: true,
        quantizer: quantizer.into(),
        min_quantizer: quantizer,
        ..EncoderConfig::with_speed_preset(speed)
    };

    let mut ctx: Context<u8> = Config::new().with_encoder_config(encoder_config).new_context()?;
    let mut frame = ctx.new_frame();
    fill(&mut frame);
    ctx.send_frame(frame)?;
    ctx.flush();

    let mut out = Vec::new();
    loop {
        match ctx.receive_packet() {
            Ok(mut packet) => {
                if packet.frame_type == FrameType::KEY {
                    out.append(&mut packet.data);
                }
            }
            Err(EncoderStatus::Encoded) | Err(EncoderStatus::LimitReached) => break,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage, Rgba, RgbaImage};

    fn gradient(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x * 4) as u8, (y * 4) as u8, 128])
        }))
    }

    #[test]
    fn test_default_settings() {
        let settings = EncoderSettings::default();
        assert_eq!(settings.webp_quality, 85.0);
        assert_eq!(settings.jpeg_quality, 85.0);
        assert_eq!(settings.webp_effort, 4);
        assert!(settings.jpeg_progressive);
        assert_eq!(settings.avif_speed(), 6);
    }

    #[test]
    fn test_avif_speed_bounds() {
        let mut settings = EncoderSettings::default();
        settings.avif_effort = 0;
        assert_eq!(settings.avif_speed(), 10);
        settings.avif_effort = 10;
        assert_eq!(settings.avif_speed(), 1);
    }

    #[test]
    fn test_jpeg_output_decodes() {
        let data =
            ImageCompressor::compress(&gradient(64, 32), OutputFormat::Jpeg, &EncoderSettings::default())
                .unwrap();
        assert_eq!(&data[..2], &[0xFF, 0xD8]);
        let decoded = image::load_from_memory(&data).unwrap();
        assert_eq!(decoded.dimensions(), (64, 32));
    }

    #[test]
    fn test_webp_output_decodes() {
        let data =
            ImageCompressor::compress(&gradient(40, 30), OutputFormat::Webp, &EncoderSettings::default())
                .unwrap();
        assert_eq!(&data[..4], b"RIFF");
        assert_eq!(&data[8..12], b"WEBP");
        let decoded = image::load_from_memory(&data).unwrap();
        assert_eq!(decoded.dimensions(), (40, 30));
    }

    /// Flags byte of the first `av1C` property: bits 3 and 2 carry chroma subsampling x/y
    fn av1c_flags(data: &[u8]) -> u8 {
        let pos = data.windows(4).position(|w| w == b"av1C").unwrap();
        data[pos + 4 + 2]
    }

    #[test]
    fn test_avif_output_has_ftyp_box() {
        let data =
            ImageCompressor::compress(&gradient(16, 16), OutputFormat::Avif, &EncoderSettings::default())
                .unwrap();
        assert_eq!(&data[4..8], b"ftyp");
        assert_eq!(&data[8..12], b"avif");
    }

    #[test]
    fn test_avif_uses_420_chroma() {
        let data =
            ImageCompressor::compress(&gradient(33, 17), OutputFormat::Avif, &EncoderSettings::default())
                .unwrap();
        let flags = av1c_flags(&data);
        assert_eq!(flags & 0b1100, 0b1100);
        assert_eq!(flags & 0b1_0000, 0, "colour image must not be monochrome");
    }

    #[test]
    fn test_avif_with_alpha() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(16, 16, Rgba([255, 0, 0, 128])));
        let data =
            ImageCompressor::compress(&img, OutputFormat::Avif, &EncoderSettings::default()).unwrap();
        assert_eq!(&data[4..8], b"ftyp");
        assert_eq!(data.windows(4).filter(|w| *w == b"av1C").count(), 2);
    }

    #[test]
    fn test_ycbcr420_plane_sizes_and_averaging() {
        // 3x3: chroma planes round up to 2x2
        let mut rgba = Vec::new();
        for _ in 0..9 {
            rgba.extend_from_slice(&[255, 255, 255, 255]);
        }
        let [luma, cb, cr] = rgba_to_ycbcr420(&rgba, 3, 3);
        assert_eq!(luma.len(), 9);
        assert_eq!((cb.len(), cr.len()), (4, 4));
        assert!(luma.iter().all(|&y| y == 255));
        assert!(cb.iter().chain(&cr).all(|&c| c == 128));

        // a red/blue 2x2 block carries the mean of both pixels' chroma
        let red = [255, 0, 0, 255];
        let blue = [0, 0, 255, 255];
        let [_, red_cb, red_cr] = rgba_to_ycbcr420(&red, 1, 1);
        let [_, blue_cb, blue_cr] = rgba_to_ycbcr420(&blue, 1, 1);
        let block = [red, blue, red, blue].concat();
        let [_, cb, cr] = rgba_to_ycbcr420(&block, 2, 2);
        assert_eq!(cb.len(), 1);
        let mean = |a: u8, b: u8| (i32::from(a) + i32::from(b)) / 2;
        assert!((i32::from(cb[0]) - mean(red_cb[0], blue_cb[0])).abs() <= 1);
        assert!((i32::from(cr[0]) - mean(red_cr[0], blue_cr[0])).abs() <= 1);
    }

    #[test]
    fn test_quality_to_quantizer_is_monotonic() {
        assert_eq!(quality_to_quantizer(100.0), 0);
        assert_eq!(quality_to_quantizer(0.0), 255);
        assert!(quality_to_quantizer(80.0) < quality_to_quantizer(50.0));
    }
}
