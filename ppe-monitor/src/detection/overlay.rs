// 检测框叠加层

use super::{BoundingBox, EQUIPMENT_LABELS, MISSING_EQUIPMENT_LABELS, NO_PPE_LABEL, SUBJECT_LABELS};
use image::{Rgb, RgbImage};

const VIOLATION_COLOR: Rgb<u8> = Rgb([220, 40, 40]);
const EQUIPMENT_COLOR: Rgb<u8> = Rgb([40, 200, 80]);
const SUBJECT_COLOR: Rgb<u8> = Rgb([60, 120, 230]);
const OTHER_COLOR: Rgb<u8> = Rgb([230, 210, 40]);

/// 线宽（像素）
const STROKE: u32 = 2;

fn color_for(label: &str) -> Rgb<u8> {
    if MISSING_EQUIPMENT_LABELS.contains(&label) || label == NO_PPE_LABEL {
        VIOLATION_COLOR
    } else if EQUIPMENT_LABELS.contains(&label) {
        EQUIPMENT_COLOR
    } else if SUBJECT_LABELS.contains(&label) {
        SUBJECT_COLOR
    } else {
        OTHER_COLOR
    }
}

/// 在图像副本上绘制检测框
///
/// 超出画面的部分会被裁剪；没有检测框时返回原图的副本。
pub fn draw_overlay(image: &RgbImage, boxes: &[BoundingBox]) -> RgbImage {
    let mut output = image.clone();
    for bbox in boxes {
        draw_box(&mut output, bbox);
    }
    output
}

fn draw_box(image: &mut RgbImage, bbox: &BoundingBox) {
    let (width, height) = image.dimensions();
    if bbox.width == 0 || bbox.height == 0 || bbox.x >= width || bbox.y >= height {
        return;
    }

    let color = color_for(&bbox.label);
    let x0 = bbox.x;
    let y0 = bbox.y;
    let x1 = bbox.x.saturating_add(bbox.width).min(width) - 1;
    let y1 = bbox.y.saturating_add(bbox.height).min(height) - 1;

    for y in y0..=y1 {
        for x in x0..=x1 {
            let on_edge = x < x0 + STROKE
                || x + STROKE > x1
                || y < y0 + STROKE
                || y + STROKE > y1;
            if on_edge {
                image.put_pixel(x, y, color);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(label: &str, x: u32, y: u32, width: u32, height: u32) -> BoundingBox {
        BoundingBox {
            label: label.to_string(),
            confidence: 0.9,
            x,
            y,
            width,
            height,
        }
    }

    #[test]
    fn test_draws_outline_only() {
        let image = RgbImage::new(20, 20);
        let output = draw_overlay(&image, &[bbox("no_helmet", 2, 2, 10, 10)]);

        assert_eq!(*output.get_pixel(2, 2), VIOLATION_COLOR);
        assert_eq!(*output.get_pixel(11, 11), VIOLATION_COLOR);
        assert_eq!(*output.get_pixel(7, 7), Rgb([0, 0, 0]));
        // 原图不被修改
        assert_eq!(*image.get_pixel(2, 2), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_box_clipped_to_frame() {
        let image = RgbImage::new(10, 10);
        let output = draw_overlay(&image, &[bbox("helmet", 6, 6, 50, 50)]);
        assert_eq!(*output.get_pixel(9, 9), EQUIPMENT_COLOR);
        assert_eq!(*output.get_pixel(6, 6), EQUIPMENT_COLOR);
    }

    #[test]
    fn test_out_of_frame_box_ignored() {
        let image = RgbImage::new(10, 10);
        let output = draw_overlay(&image, &[bbox("person", 20, 20, 5, 5)]);
        assert_eq!(output.as_raw(), image.as_raw());
    }

    #[test]
    fn test_label_colors() {
        assert_eq!(color_for("none"), VIOLATION_COLOR);
        assert_eq!(color_for("vest"), EQUIPMENT_COLOR);
        assert_eq!(color_for("Person"), SUBJECT_COLOR);
        assert_eq!(color_for("forklift"), OTHER_COLOR);
    }
}
