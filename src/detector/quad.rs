use imageproc::contours::{BorderType, Contour};
use imageproc::geometry::{approximate_polygon_dp, arc_length};
use imageproc::point::Point as IPoint;

use crate::models::Point;

/// Signed shoelace area of a closed contour, in pixels squared.
pub fn polygon_area(points: &[IPoint<i32>]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let mut twice_area = 0i64;
    for (i, p) in points.iter().enumerate() {
        let q = &points[(i + 1) % points.len()];
        twice_area += p.x as i64 * q.y as i64 - q.x as i64 * p.y as i64;
    }
    (twice_area.abs() as f64) / 2.0
}

/// A polygon is convex when all consecutive edge cross products share a sign.
/// Zero cross products (collinear corners) are rejected as degenerate.
fn is_convex(points: &[IPoint<i32>]) -> bool {
    let n = points.len();
    if n < 3 {
        return false;
    }
    let mut sign = 0i64;
    for i in 0..n {
        let a = points[i];
        let b = points[(i + 1) % n];
        let c = points[(i + 2) % n];
        let cross = (b.x - a.x) as i64 * (c.y - b.y) as i64
            - (b.y - a.y) as i64 * (c.x - b.x) as i64;
        if cross == 0 {
            return false;
        }
        if sign == 0 {
            sign = cross.signum();
        } else if sign != cross.signum() {
            return false;
        }
    }
    true
}

/// Average-side aspect ratio must stay close to square.
fn has_square_aspect(points: &[IPoint<i32>], tolerance: f64) -> bool {
    let p: Vec<Point> = points
        .iter()
        .map(|q| Point::new(q.x as f32, q.y as f32))
        .collect();
    let width = (p[0].distance(&p[1]) + p[2].distance(&p[3])) / 2.0;
    let height = (p[0].distance(&p[3]) + p[1].distance(&p[2])) / 2.0;
    if height < f64::EPSILON {
        return false;
    }
    let aspect = width / height;
    aspect > 1.0 - tolerance && aspect < 1.0 + tolerance
}

/// Search external contours for the largest convex quadrilateral that is
/// plausibly a grid outline.
///
/// Area bounds are absolute pixel counts derived from the frame area;
/// `epsilon_ratio` scales the polygon approximation tolerance with the
/// contour perimeter.
pub fn find_largest_quadrilateral(
    contours: &[Contour<i32>],
    min_area: f64,
    max_area: f64,
    epsilon_ratio: f64,
    aspect_tolerance: f64,
) -> Option<[Point; 4]> {
    let mut best: Option<[Point; 4]> = None;
    let mut best_area = 0.0;

    for contour in contours {
        if contour.border_type != BorderType::Outer {
            continue;
        }
        let area = polygon_area(&contour.points);
        if area < min_area || area > max_area {
            continue;
        }

        let epsilon = epsilon_ratio * arc_length(&contour.points, true);
        let approx = approximate_polygon_dp(&contour.points, epsilon, true);

        if approx.len() != 4 || !is_convex(&approx) {
            continue;
        }
        if !has_square_aspect(&approx, aspect_tolerance) {
            continue;
        }
        if area > best_area {
            best_area = area;
            let mut quad = [Point::new(0.0, 0.0); 4];
            for (slot, p) in quad.iter_mut().zip(approx.iter()) {
                *slot = Point::new(p.x as f32, p.y as f32);
            }
            best = Some(quad);
        }
    }

    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ipt(x: i32, y: i32) -> IPoint<i32> {
        IPoint::new(x, y)
    }

    #[test]
    fn shoelace_area_of_a_square() {
        let square = vec![ipt(0, 0), ipt(10, 0), ipt(10, 10), ipt(0, 10)];
        assert!((polygon_area(&square) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn convexity_rejects_chevrons() {
        let convex = vec![ipt(0, 0), ipt(10, 0), ipt(10, 10), ipt(0, 10)];
        assert!(is_convex(&convex));

        let concave = vec![ipt(0, 0), ipt(10, 0), ipt(5, 5), ipt(10, 10), ipt(0, 10)];
        assert!(!is_convex(&concave));
    }

    #[test]
    fn aspect_check_rejects_wide_rectangles() {
        let square = vec![ipt(0, 0), ipt(100, 0), ipt(100, 100), ipt(0, 100)];
        assert!(has_square_aspect(&square, 0.3));

        let wide = vec![ipt(0, 0), ipt(200, 0), ipt(200, 100), ipt(0, 100)];
        assert!(!has_square_aspect(&wide, 0.3));
    }
}
