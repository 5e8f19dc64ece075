use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::path::Path;

use crate::convert::backend::{Backend, BackendJob, ExecContext};
use crate::convert::error::BackendError;

/// Largest edge an ICO entry may have.
const ICO_MAX_EDGE: u32 = 256;

/// Raster conversions through the `image` crate, run on the worker pool.
#[derive(Debug, Default)]
pub struct NativeImageBackend;

impl NativeImageBackend {
    pub fn new() -> Self {
        Self
    }
}

/// Composites any transparency onto a white background.
fn flatten_onto_white(image: &DynamicImage) -> RgbImage {
    let rgba = image.to_rgba8();
    let mut flat = RgbImage::new(rgba.width(), rgba.height());
    for (x, y, pixel) in rgba.enumerate_pixels() {
        let alpha = pixel[3] as u32;
        let blend = |channel: u8| ((channel as u32 * alpha + 255 * (255 - alpha)) / 255) as u8;
        flat.put_pixel(x, y, Rgb([blend(pixel[0]), blend(pixel[1]), blend(pixel[2])]));
    }
    flat
}

fn convert_image(input: &Path, output: &Path, target: &str) -> Result<(), BackendError> {
    let format = ImageFormat::from_extension(target)
        .ok_or_else(|| BackendError::failed(format!("image crate cannot write {}", target)))?;

    // Sniff the content; the name may not match the real format.
    let image = image::ImageReader::open(input)
        .and_then(|reader| reader.with_guessed_format())
        .map_err(|e| BackendError::failed(format!("failed to read image: {}", e)))?
        .decode()
        .map_err(|e| BackendError::failed(format!("failed to decode image: {}", e)))?;

    let prepared = match format {
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(flatten_onto_white(&image)),
        ImageFormat::Ico if image.width() > ICO_MAX_EDGE || image.height() > ICO_MAX_EDGE => {
            DynamicImage::ImageRgba8(image.thumbnail(ICO_MAX_EDGE, ICO_MAX_EDGE).to_rgba8())
        }
        _ => DynamicImage::ImageRgba8(image.to_rgba8()),
    };

    prepared
        .save_with_format(output, format)
        .map_err(|e| BackendError::failed(format!("failed to encode {}: {}", target, e)))
}

#[async_trait]
impl Backend for NativeImageBackend {
    fn name(&self) -> &str {
        "native-image"
    }

    async fn execute(&self, job: &BackendJob, ctx: &ExecContext) -> Result<(), BackendError> {
        if matches!(job.input_format.as_str(), "svg" | "heic") || job.target_format == "pdf" {
            return Err(BackendError::failed(format!(
                "image crate cannot convert {} to {}",
                job.input_format, job.target_format
            )));
        }

        let input = job.input.clone();
        let output = job.output.clone();
        let target = job.target_format.clone();
        ctx.pool
            .run(move || convert_image(&input, &output, &target))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::WorkerPool;
    use image::{GenericImageView, Rgba, RgbaImage};
    use tempfile::TempDir;

    fn write_png(path: &Path, width: u32, height: u32, pixel: Rgba<u8>) {
        RgbaImage::from_pixel(width, height, pixel).save(path).unwrap();
    }

    fn context(dir: &TempDir) -> ExecContext {
        ExecContext::new(WorkerPool::new(1), dir.path().join("scratch"))
    }

    #[tokio::test]
    async fn test_png_to_jpg_flattens_alpha_on_white() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("clear.png");
        let output = dir.path().join("clear.jpg");
        write_png(&input, 8, 8, Rgba([0, 0, 0, 0]));

        let job = BackendJob::file(&input, &output, "png", "jpg");
        NativeImageBackend::new()
            .execute(&job, &context(&dir))
            .await
            .unwrap();

        let decoded = image::open(&output).unwrap().to_rgb8();
        let pixel = decoded.get_pixel(4, 4);
        assert!(pixel[0] > 240 && pixel[1] > 240 && pixel[2] > 240);
    }

    #[tokio::test]
    async fn test_ico_is_downscaled() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("big.png");
        let output = dir.path().join("big.ico");
        write_png(&input, 512, 300, Rgba([10, 20, 30, 255]));

        let job = BackendJob::file(&input, &output, "png", "ico");
        NativeImageBackend::new()
            .execute(&job, &context(&dir))
            .await
            .unwrap();

        let (width, height) = image::open(&output).unwrap().dimensions();
        assert!(width <= 256 && height <= 256);
        assert_eq!(width, 256);
    }

    #[tokio::test]
    async fn test_png_to_bmp() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("a.png");
        let output = dir.path().join("a.bmp");
        write_png(&input, 4, 4, Rgba([200, 0, 0, 255]));

        let job = BackendJob::file(&input, &output, "png", "bmp");
        NativeImageBackend::new()
            .execute(&job, &context(&dir))
            .await
            .unwrap();

        assert_eq!(image::open(&output).unwrap().dimensions(), (4, 4));
    }

    #[tokio::test]
    async fn test_decodes_by_content_not_extension() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("upload.bin");
        let output = dir.path().join("upload.gif");
        RgbaImage::from_pixel(3, 2, Rgba([0, 90, 0, 255]))
            .save_with_format(&input, ImageFormat::Png)
            .unwrap();

        let job = BackendJob::file(&input, &output, "png", "gif");
        NativeImageBackend::new()
            .execute(&job, &context(&dir))
            .await
            .unwrap();

        assert_eq!(image::open(&output).unwrap().dimensions(), (3, 2));
    }

    #[tokio::test]
    async fn test_refuses_vector_sources() {
        let dir = TempDir::new().unwrap();
        let job = BackendJob::file("/in/a.svg", dir.path().join("a.png"), "svg", "png");
        let err = NativeImageBackend::new()
            .execute(&job, &context(&dir))
            .await
            .unwrap_err();
        assert!(!err.is_unavailable());
    }

    #[tokio::test]
    async fn test_corrupt_input_fails() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("broken.png");
        std::fs::write(&input, b"definitely not a png").unwrap();

        let job = BackendJob::file(&input, dir.path().join("broken.gif"), "png", "gif");
        assert!(NativeImageBackend::new()
            .execute(&job, &context(&dir))
            .await
            .is_err());
    }
}
