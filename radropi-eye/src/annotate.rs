//! Detection overlays for saved frames

use crate::utils::pixel_window;
use image::{Rgb, RgbImage};
use radropi_core::{BoundingBox, Category, Frame, PixelFormat};

const BOX_THICKNESS: u32 = 2;

/// Overlay color for a category
pub fn category_color(category: Category) -> Rgb<u8> {
    match category {
        Category::Meteor => Rgb([255, 255, 0]),
        Category::Asteroid => Rgb([255, 0, 0]),
        Category::NonMeteor => Rgb([128, 128, 128]),
    }
}

/// Copy of `frame` as RGB, `None` if the buffer is malformed
pub fn frame_to_rgb(frame: &Frame) -> Option<RgbImage> {
    if !frame.is_well_formed() {
        return None;
    }
    match frame.format {
        PixelFormat::Rgb8 => RgbImage::from_raw(frame.width, frame.height, frame.data.to_vec()),
        PixelFormat::Gray8 => {
            let data = frame.data.iter().flat_map(|&v| [v, v, v]).collect();
            RgbImage::from_raw(frame.width, frame.height, data)
        }
    }
}

/// Draw a box outline in the category color
pub fn draw_box(image: &mut RgbImage, bbox: &BoundingBox, category: Category) {
    let (width, height) = image.dimensions();
    let Some((x0, y0, x1, y1)) = pixel_window(bbox, BOX_THICKNESS, width, height) else {
        return;
    };
    let color = category_color(category);
    for y in y0..y1 {
        for x in x0..x1 {
            let on_edge = x < x0 + BOX_THICKNESS
                || x + BOX_THICKNESS >= x1
                || y < y0 + BOX_THICKNESS
                || y + BOX_THICKNESS >= y1;
            if on_edge {
                image.put_pixel(x, y, color);
            }
        }
    }
}

/// Frame rendered with the detection box, ready to be saved
pub fn annotate_frame(frame: &Frame, bbox: &BoundingBox, category: Category) -> Option<RgbImage> {
    let mut image = frame_to_rgb(frame)?;
    draw_box(&mut image, bbox, category);
    Some(image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_annotate_draws_outline_only() {
        let frame = Frame::new(0, 20, 20, PixelFormat::Gray8, vec![10u8; 400], Utc::now());
        let bbox = BoundingBox::new(8.0, 8.0, 4.0, 4.0);
        let image = annotate_frame(&frame, &bbox, Category::Asteroid).unwrap();
        assert_eq!(*image.get_pixel(6, 6), Rgb([255, 0, 0]));
        assert_eq!(*image.get_pixel(10, 10), Rgb([10, 10, 10]));
        assert_eq!(*image.get_pixel(0, 0), Rgb([10, 10, 10]));
    }

    #[test]
    fn test_box_clipped_at_border() {
        let mut image = RgbImage::new(10, 10);
        draw_box(&mut image, &BoundingBox::new(-3.0, -3.0, 5.0, 5.0), Category::Meteor);
        assert_eq!(*image.get_pixel(5, 5), Rgb([0, 0, 0]));
        assert_eq!(*image.get_pixel(3, 0), Rgb([255, 255, 0]));
    }

    #[test]
    fn test_malformed_frame_not_annotated() {
        let frame = Frame::new(0, 20, 20, PixelFormat::Rgb8, vec![0u8; 10], Utc::now());
        assert!(annotate_frame(&frame, &BoundingBox::new(0.0, 0.0, 1.0, 1.0), Category::Meteor).is_none());
    }
}
