//! Frame to tensor conversion.

use image::imageops::FilterType;
use image::{ImageBuffer, Rgb, RgbImage};
use vball_media::Frame;

use crate::error::{VisionError, VisionResult};

/// ImageNet channel means, used by the video classifier.
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// ImageNet channel standard deviations.
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Borrow a frame's pixels as an image.
pub fn frame_to_image(frame: &Frame) -> VisionResult<RgbImage> {
    let buffer: Option<ImageBuffer<Rgb<u8>, Vec<u8>>> =
        ImageBuffer::from_raw(frame.width(), frame.height(), frame.data().to_vec());
    buffer.ok_or_else(|| VisionError::internal("Failed to create image buffer"))
}

/// Resize to a square and append CHW planes scaled to [0, 1], then normalized.
fn push_chw(
    out: &mut Vec<f32>,
    frame: &Frame,
    size: u32,
    mean: [f32; 3],
    std: [f32; 3],
) -> VisionResult<()> {
    let img = frame_to_image(frame)?;
    let resized = image::imageops::resize(&img, size, size, FilterType::Triangle);

    for c in 0..3 {
        for y in 0..size {
            for x in 0..size {
                let pixel = resized.get_pixel(x, y);
                out.push((pixel[c] as f32 / 255.0 - mean[c]) / std[c]);
            }
        }
    }
    Ok(())
}

/// Batch of frames as `[B, 3, size, size]`, values in [0, 1].
pub fn detector_batch(frames: &[Frame], size: u32) -> VisionResult<(Vec<usize>, Vec<f32>)> {
    let plane = 3 * size as usize * size as usize;
    let mut data = Vec::with_capacity(frames.len() * plane);
    for frame in frames {
        push_chw(&mut data, frame, size, [0.0; 3], [1.0; 3])?;
    }
    Ok((vec![frames.len(), 3, size as usize, size as usize], data))
}

/// Frames as one video clip `[1, T, 3, size, size]`, ImageNet-normalized.
pub fn clip_tensor(frames: &[&Frame], size: u32) -> VisionResult<(Vec<usize>, Vec<f32>)> {
    let plane = 3 * size as usize * size as usize;
    let mut data = Vec::with_capacity(frames.len() * plane);
    for frame in frames {
        push_chw(&mut data, frame, size, IMAGENET_MEAN, IMAGENET_STD)?;
    }
    Ok((
        vec![1, frames.len(), 3, size as usize, size as usize],
        data,
    ))
}

/// Pick `count` evenly spaced indices out of `len`, repeating when `len < count`.
pub fn subsample_indices(len: usize, count: usize) -> Vec<usize> {
    if len == 0 {
        return Vec::new();
    }
    (0..count).map(|i| i * len / count).collect()
}
