//! Standalone tag detection.
//!
//! Dark regions are segmented against their local mean, traced, and
//! simplified to convex quadrilaterals. Each quad is sampled on the family's
//! bit grid and matched against the family's codes in all four rotations.
//! Reported corners start at the tag's top-left and run clockwise on screen.

use super::marker::{homography, TagLayout};
use glam::{DVec2, DVec3, Vec2};
use image::{GrayImage, Luma};
use imageproc::contours::{find_contours, BorderType};
use imageproc::filter::box_filter;
use imageproc::geometry::approximate_polygon_dp;
use imageproc::point::Point;

/// Pixels this much darker than their neighbourhood are foreground.
const THRESHOLD_OFFSET: i16 = 7;
/// Polygon approximation tolerance, as a fraction of contour length.
const POLY_EPSILON: f64 = 0.05;
/// Shortest accepted quad side in pixels.
const MIN_SIDE: f32 = 10.0;
/// Smallest brightness step between the black border and its surroundings.
const MIN_CONTRAST: f32 = 30.0;

/// A decoded tag.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct TagDetection {
    pub id: u32,
    /// Top-left, top-right, bottom-right, bottom-left.
    pub corners: [Vec2; 4],
}

/// Finds isolated tags of one family.
#[derive(Debug, Clone)]
pub(crate) struct QuadDetector {
    layout: TagLayout,
}

impl QuadDetector {
    pub fn new(layout: TagLayout) -> Self {
        Self { layout }
    }

    /// Detects every tag in `gray`, one detection per id.
    pub fn detect(&self, gray: &GrayImage) -> Vec<TagDetection> {
        let (width, height) = gray.dimensions();
        if (width.min(height) as f32) < MIN_SIDE {
            return Vec::new();
        }

        let binary = threshold(gray);
        let mut found: Vec<(TagDetection, f32)> = Vec::new();
        for contour in find_contours::<i32>(&binary) {
            if matches!(contour.border_type, BorderType::Hole)
                || (contour.points.len() as f32) < 4.0 * MIN_SIDE
            {
                continue;
            }
            let Some(quad) = fit_quad(&contour.points) else {
                continue;
            };
            let Some(detection) = self.decode(gray, &quad) else {
                continue;
            };

            // Nested candidates can decode to the same id; keep the outermost
            let area = quad_area(&detection.corners);
            match found.iter_mut().find(|(d, _)| d.id == detection.id) {
                Some(existing) if existing.1 >= area => {}
                Some(existing) => *existing = (detection, area),
                None => found.push((detection, area)),
            }
        }

        tracing::trace!(candidates = found.len(), "decoded quads");
        found.into_iter().map(|(detection, _)| detection).collect()
    }

    /// Tries each corner of `quad` as the tag's top-left.
    fn decode(&self, gray: &GrayImage, quad: &[Vec2; 4]) -> Option<TagDetection> {
        (0..4).find_map(|rotation| {
            let mut corners = *quad;
            corners.rotate_left(rotation);
            let id = self.read(gray, &corners)?;
            Some(TagDetection { id, corners })
        })
    }

    /// Reads the code of an upright tag bounded by `corners`.
    fn read(&self, gray: &GrayImage, corners: &[Vec2; 4]) -> Option<u32> {
        let TagLayout {
            codes,
            edge_bits,
            border_bits,
            max_correction,
        } = self.layout;
        let cells = (edge_bits + 2 * border_bits) as i32;
        let grid = CellGrid::new(gray, corners, cells)?;

        // One ring of quiet zone around the black border
        let mut dark = Vec::new();
        let mut light = Vec::new();
        for row in -1..=cells {
            for col in -1..=cells {
                let quiet = row == -1 || col == -1 || row == cells || col == cells;
                let border = row < border_bits as i32
                    || col < border_bits as i32
                    || row >= cells - border_bits as i32
                    || col >= cells - border_bits as i32;
                if quiet {
                    light.extend(grid.sample(col, row));
                } else if border {
                    dark.push(grid.sample(col, row)?);
                }
            }
        }
        if light.is_empty() {
            return None;
        }

        let dark_mean = dark.iter().sum::<f32>() / dark.len() as f32;
        let light_mean = light.iter().sum::<f32>() / light.len() as f32;
        if light_mean - dark_mean < MIN_CONTRAST {
            return None;
        }
        let mid = (dark_mean + light_mean) / 2.0;
        if dark.iter().any(|&b| b >= mid) {
            return None;
        }

        // Row-major, most significant bit first, white is 1
        let mut code = 0u64;
        for row in 0..edge_bits as i32 {
            for col in 0..edge_bits as i32 {
                let b = grid.sample(col + border_bits as i32, row + border_bits as i32)?;
                code = (code << 1) | u64::from(b > mid);
            }
        }

        let (id, distance) = codes
            .iter()
            .enumerate()
            .map(|(id, c)| (id, (c ^ code).count_ones()))
            .min_by_key(|&(_, distance)| distance)?;
        (distance <= max_correction).then_some(id as u32)
    }
}

/// Marks pixels darker than their local mean.
fn threshold(gray: &GrayImage) -> GrayImage {
    let radius = (gray.width().min(gray.height()) / 16).clamp(2, 32);
    let mean = box_filter(gray, radius, radius);
    GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        let pixel = i16::from(gray.get_pixel(x, y)[0]);
        let local = i16::from(mean.get_pixel(x, y)[0]);
        if pixel < local - THRESHOLD_OFFSET {
            Luma([255])
        } else {
            Luma([0])
        }
    })
}

/// Simplifies a traced border to a convex quad, clockwise on screen.
fn fit_quad(points: &[Point<i32>]) -> Option<[Vec2; 4]> {
    let epsilon = points.len() as f64 * POLY_EPSILON;
    let mut vertices: Vec<Vec2> = Vec::with_capacity(4);
    for p in approximate_polygon_dp(points, epsilon, true) {
        let v = Vec2::new(p.x as f32, p.y as f32);
        if vertices.last().map_or(true, |last| last.distance(v) >= MIN_SIDE) {
            vertices.push(v);
        }
    }
    if let (Some(first), Some(last)) = (vertices.first(), vertices.last()) {
        if vertices.len() > 1 && first.distance(*last) < MIN_SIDE {
            vertices.pop();
        }
    }
    let mut quad: [Vec2; 4] = vertices.try_into().ok()?;

    let turns: [f32; 4] = std::array::from_fn(|i| {
        let (a, b, c) = (quad[i], quad[(i + 1) % 4], quad[(i + 2) % 4]);
        (b - a).perp_dot(c - b)
    });
    if turns.iter().all(|&t| t < 0.0) {
        quad.swap(1, 3);
    } else if !turns.iter().all(|&t| t > 0.0) {
        return None;
    }

    // Border points are pixel centres; the tag edge lies half a pixel out
    let centre = quad.iter().copied().sum::<Vec2>() / 4.0;
    Some(quad.map(|c| c + (c - centre).normalize_or_zero() * std::f32::consts::FRAC_1_SQRT_2))
}

fn quad_area(corners: &[Vec2; 4]) -> f32 {
    let twice: f32 = (0..4)
        .map(|i| corners[i].perp_dot(corners[(i + 1) % 4]))
        .sum();
    twice.abs() / 2.0
}

/// Maps tag cells onto image pixels.
struct CellGrid<'a> {
    gray: &'a GrayImage,
    to_image: glam::DMat3,
}

impl<'a> CellGrid<'a> {
    fn new(gray: &'a GrayImage, corners: &[Vec2; 4], cells: i32) -> Option<Self> {
        let side = f64::from(cells);
        let model = [
            DVec2::new(0.0, 0.0),
            DVec2::new(side, 0.0),
            DVec2::new(side, side),
            DVec2::new(0.0, side),
        ];
        let image = corners.map(|c| DVec2::new(c.x.into(), c.y.into()));
        Some(Self {
            gray,
            to_image: homography(&model, &image)?,
        })
    }

    /// Brightness at the centre of a cell, `None` outside the image.
    fn sample(&self, col: i32, row: i32) -> Option<f32> {
        let p = self.to_image * DVec3::new(f64::from(col) + 0.5, f64::from(row) + 0.5, 1.0);
        if p.z.abs() < f64::EPSILON {
            return None;
        }
        let (x, y) = ((p.x / p.z).round(), (p.y / p.z).round());
        if x < 0.0 || y < 0.0 || x >= f64::from(self.gray.width()) || y >= f64::from(self.gray.height())
        {
            return None;
        }
        Some(f32::from(self.gray.get_pixel(x as u32, y as u32)[0]))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::vision::MarkerType;
    use image::{Rgb, RgbImage};

    const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
    const BLACK: Rgb<u8> = Rgb([0, 0, 0]);

    /// Draws tag `id` with its top-left border corner at `origin`.
    pub(crate) fn draw_tag(
        image: &mut RgbImage,
        marker_type: MarkerType,
        id: u32,
        origin: (u32, u32),
        cell: u32,
    ) {
        let layout = marker_type.layout();
        let (edge, border) = (layout.edge_bits, layout.border_bits);
        let cells = edge + 2 * border;
        let code = layout.codes[id as usize];

        for row in 0..cells {
            for col in 0..cells {
                let data = (border..border + edge).contains(&row)
                    && (border..border + edge).contains(&col);
                let white = data && {
                    let bit = (row - border) * edge + (col - border);
                    (code >> (edge * edge - 1 - bit)) & 1 == 1
                };
                for dy in 0..cell {
                    for dx in 0..cell {
                        let (x, y) = (origin.0 + col * cell + dx, origin.1 + row * cell + dy);
                        image.put_pixel(x, y, if white { WHITE } else { BLACK });
                    }
                }
            }
        }
    }

    /// A white scene with 10 px cells, one tag per `(id, origin)`.
    pub(crate) fn tag_scene(
        marker_type: MarkerType,
        size: (u32, u32),
        tags: &[(u32, (u32, u32))],
    ) -> RgbImage {
        let mut image = RgbImage::from_pixel(size.0, size.1, WHITE);
        for &(id, origin) in tags {
            draw_tag(&mut image, marker_type, id, origin, 10);
        }
        image
    }

    fn detect(marker_type: MarkerType, scene: &RgbImage) -> Vec<TagDetection> {
        let gray = image::DynamicImage::ImageRgb8(scene.clone()).to_luma8();
        let mut found = QuadDetector::new(marker_type.layout()).detect(&gray);
        found.sort_by_key(|d| d.id);
        found
    }

    fn assert_near(actual: Vec2, expected: (f32, f32)) {
        assert!(
            actual.distance(Vec2::new(expected.0, expected.1)) < 1.0,
            "{actual} is not near {expected:?}"
        );
    }

    #[test]
    fn test_detects_lone_tag() {
        let scene = tag_scene(MarkerType::Apriltag36h11, (200, 160), &[(7, (60, 40))]);
        let found = detect(MarkerType::Apriltag36h11, &scene);

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, 7);
        // Black square spans pixels 60..140 by 40..120
        assert_near(found[0].corners[0], (59.5, 39.5));
        assert_near(found[0].corners[1], (139.5, 39.5));
        assert_near(found[0].corners[2], (139.5, 119.5));
        assert_near(found[0].corners[3], (59.5, 119.5));
    }

    #[test]
    fn test_rotated_tag_reports_its_own_top_left_first() {
        let upright = tag_scene(MarkerType::Apriltag36h11, (200, 160), &[(12, (60, 40))]);
        // Quarter turn clockwise: the tag's top-left lands on screen top-right
        let scene = image::imageops::rotate90(&upright);
        let found = detect(MarkerType::Apriltag36h11, &scene);

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, 12);
        assert_near(found[0].corners[0], (119.5, 59.5));
        assert_near(found[0].corners[1], (119.5, 139.5));
        assert_near(found[0].corners[2], (39.5, 139.5));
        assert_near(found[0].corners[3], (39.5, 59.5));
    }

    #[test]
    fn test_detects_several_families() {
        let scene = tag_scene(
            MarkerType::Apriltag16h5,
            (260, 120),
            &[(3, (20, 30)), (11, (160, 30))],
        );
        let ids: Vec<u32> = detect(MarkerType::Apriltag16h5, &scene)
            .iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(ids, vec![3, 11]);

        let scene = tag_scene(MarkerType::Apriltag25h9, (140, 140), &[(4, (30, 30))]);
        assert_eq!(detect(MarkerType::Apriltag25h9, &scene)[0].id, 4);
    }

    #[test]
    fn test_wrong_family_finds_nothing() {
        let scene = tag_scene(MarkerType::Apriltag36h11, (200, 160), &[(7, (60, 40))]);
        assert!(detect(MarkerType::Apriltag16h5, &scene).is_empty());
    }

    #[test]
    fn test_plain_square_is_not_a_tag() {
        let mut scene = RgbImage::from_pixel(160, 160, WHITE);
        for y in 40..120 {
            for x in 40..120 {
                scene.put_pixel(x, y, BLACK);
            }
        }
        assert!(detect(MarkerType::Apriltag36h11, &scene).is_empty());
    }

    #[test]
    fn test_tiny_and_uniform_images() {
        for (w, h) in [(1, 1), (4, 3), (64, 48)] {
            assert!(detect(MarkerType::Apriltag36h11, &RgbImage::new(w, h)).is_empty());
            let white = RgbImage::from_pixel(w, h, WHITE);
            assert!(detect(MarkerType::Apriltag36h11, &white).is_empty());
        }
    }
}
