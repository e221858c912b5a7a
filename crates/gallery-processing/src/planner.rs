use gallery_core::{OutputFormat, VariantSpec};

/// Derives the size x format matrix for one source image
pub struct VariantPlanner;

impl VariantPlanner {
    /// Plan one variant per (format, breakpoint), formats-major.
    ///
    /// Heights follow the source aspect ratio (`width / height`), rounded, never below 1.
    /// Repeated breakpoints or formats are collapsed, keeping the first occurrence.
    /// A non-finite or non-positive aspect ratio yields an empty plan.
    pub fn plan(
        aspect_ratio: f64,
        breakpoints: &[u32],
        formats: &[OutputFormat],
    ) -> Vec<VariantSpec> {
        if !aspect_ratio.is_finite() || aspect_ratio <= 0.0 {
            return Vec::new();
        }

        let mut widths: Vec<u32> = Vec::with_capacity(breakpoints.len());
        for &width in breakpoints {
            if width > 0 && !widths.contains(&width) {
                widths.push(width);
            }
        }
        let mut unique_formats: Vec<OutputFormat> = Vec::with_capacity(formats.len());
        for &format in formats {
            if !unique_formats.contains(&format) {
                unique_formats.push(format);
            }
        }

        unique_formats
            .iter()
            .flat_map(|&format| {
                widths.iter().map(move |&width| {
                    VariantSpec::new(width, Self::height_for(width, aspect_ratio), format)
                })
            })
            .collect()
    }

    fn height_for(width: u32, aspect_ratio: f64) -> u32 {
        let height = (width as f64 / aspect_ratio).round();
        if height >= u32::MAX as f64 {
            u32::MAX
        } else {
            (height as u32).max(1)
        }
    }
}
