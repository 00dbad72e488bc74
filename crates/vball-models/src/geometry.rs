//! Geometry helpers: pixel boxes, keypoints and court polygons.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::label::ObjectLabel;
use crate::ModelError;

/// Number of keypoints in a COCO pose.
pub const KEYPOINT_COUNT: usize = 17;

/// A point in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Persisted form of a box: corner coordinates only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct BoxCoords {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

/// Detected box in inclusive integer pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
    pub label: ObjectLabel,
    pub confidence: f32,
}

impl BoundingBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32, label: ObjectLabel, confidence: f32) -> Self {
        Self {
            x1,
            y1,
            x2,
            y2,
            label,
            confidence,
        }
    }

    /// Build from floating point corners, rounding to the nearest pixel.
    pub fn from_xyxy(x1: f32, y1: f32, x2: f32, y2: f32, label: ObjectLabel, confidence: f32) -> Self {
        Self::new(
            x1.round() as i32,
            y1.round() as i32,
            x2.round() as i32,
            y2.round() as i32,
            label,
            confidence,
        )
    }

    pub fn width(&self) -> i64 {
        (self.x2 - self.x1 + 1) as i64
    }

    pub fn height(&self) -> i64 {
        (self.y2 - self.y1 + 1) as i64
    }

    /// Inclusive pixel area.
    pub fn area(&self) -> i64 {
        self.width() * self.height()
    }

    pub fn center(&self) -> Point {
        Point::new(
            (self.x1 + self.x2) as f64 / 2.0,
            (self.y1 + self.y2) as f64 / 2.0,
        )
    }

    pub fn top_left(&self) -> Point {
        Point::new(self.x1 as f64, self.y1 as f64)
    }

    pub fn top_right(&self) -> Point {
        Point::new(self.x2 as f64, self.y1 as f64)
    }

    /// Bottom-left corner, where a standing player's left foot is.
    pub fn left_foot(&self) -> Point {
        Point::new(self.x1 as f64, self.y2 as f64)
    }

    /// Bottom-right corner.
    pub fn right_foot(&self) -> Point {
        Point::new(self.x2 as f64, self.y2 as f64)
    }

    /// Points used to decide whether a player stands on court.
    pub fn anchors(&self) -> [Point; 3] {
        [self.left_foot(), self.right_foot(), self.center()]
    }

    fn intersection(&self, other: &BoundingBox) -> i64 {
        let w = (self.x2.min(other.x2) - self.x1.max(other.x1) + 1).max(0) as i64;
        let h = (self.y2.min(other.y2) - self.y1.max(other.y1) + 1).max(0) as i64;
        w * h
    }

    /// Intersection over union with inclusive pixel areas.
    pub fn iou(&self, other: &BoundingBox) -> f64 {
        let intersection = self.intersection(other);
        let union = self.area() + other.area() - intersection;
        if union > 0 {
            intersection as f64 / union as f64
        } else {
            0.0
        }
    }

    pub fn contains(&self, p: Point) -> bool {
        self.x1 as f64 <= p.x && p.x <= self.x2 as f64 && self.y1 as f64 <= p.y && p.y <= self.y2 as f64
    }

    /// Clamp corners to a `width x height` frame.
    pub fn clamp(&self, width: u32, height: u32) -> BoundingBox {
        let max_x = width.saturating_sub(1) as i32;
        let max_y = height.saturating_sub(1) as i32;
        BoundingBox {
            x1: self.x1.clamp(0, max_x),
            y1: self.y1.clamp(0, max_y),
            x2: self.x2.clamp(0, max_x),
            y2: self.y2.clamp(0, max_y),
            ..*self
        }
    }

    pub fn coords(&self) -> BoxCoords {
        BoxCoords {
            x1: self.x1,
            y1: self.y1,
            x2: self.x2,
            y2: self.y2,
        }
    }

    /// Ranking used everywhere boxes are ordered: confidence, then area, both descending.
    pub fn rank_cmp(a: &BoundingBox, b: &BoundingBox) -> Ordering {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.area().cmp(&a.area()))
    }
}

/// Sort boxes by (confidence desc, area desc).
pub fn sort_by_rank(boxes: &mut [BoundingBox]) {
    boxes.sort_by(BoundingBox::rank_cmp);
}

/// One pose keypoint in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    pub confidence: f32,
}

/// A detected person pose.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct KeypointSet {
    pub keypoints: Vec<Keypoint>,
    pub bbox: BoxCoords,
    pub confidence: f32,
}

impl KeypointSet {
    /// Enclosing box as a player box.
    pub fn bounding_box(&self) -> BoundingBox {
        BoundingBox::new(
            self.bbox.x1,
            self.bbox.y1,
            self.bbox.x2,
            self.bbox.y2,
            ObjectLabel::Player,
            self.confidence,
        )
    }
}

/// Four-vertex court region in image coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<[f64; 2]>", into = "Vec<[f64; 2]>")]
pub struct CourtPolygon {
    vertices: [Point; 4],
}

impl CourtPolygon {
    pub fn new(vertices: [Point; 4]) -> Self {
        Self { vertices }
    }

    pub fn vertices(&self) -> &[Point; 4] {
        &self.vertices
    }

    /// Winding-number containment; points on an edge count as inside.
    pub fn contains(&self, p: Point) -> bool {
        let n = self.vertices.len();
        let mut winding = 0i32;

        for i in 0..n {
            let a = self.vertices[i];
            let b = self.vertices[(i + 1) % n];

            if on_segment(a, b, p) {
                return true;
            }

            if a.y <= p.y {
                if b.y > p.y && is_left(a, b, p) > 0.0 {
                    winding += 1;
                }
            } else if b.y <= p.y && is_left(a, b, p) < 0.0 {
                winding -= 1;
            }
        }

        winding != 0
    }
}

impl TryFrom<Vec<[f64; 2]>> for CourtPolygon {
    type Error = ModelError;

    fn try_from(points: Vec<[f64; 2]>) -> Result<Self, Self::Error> {
        if points.len() != 4 {
            return Err(ModelError::InvalidPolygon(points.len()));
        }
        let mut vertices = [Point::new(0.0, 0.0); 4];
        for (slot, [x, y]) in vertices.iter_mut().zip(points) {
            *slot = Point::new(x, y);
        }
        Ok(Self { vertices })
    }
}

impl From<CourtPolygon> for Vec<[f64; 2]> {
    fn from(polygon: CourtPolygon) -> Self {
        polygon.vertices.iter().map(|p| [p.x, p.y]).collect()
    }
}

/// Cross product sign: > 0 when `p` is left of the directed edge `a -> b`.
fn is_left(a: Point, b: Point, p: Point) -> f64 {
    (b.x - a.x) * (p.y - a.y) - (p.x - a.x) * (b.y - a.y)
}

fn on_segment(a: Point, b: Point, p: Point) -> bool {
    if is_left(a, b, p).abs() > 1e-9 {
        return false;
    }
    p.x >= a.x.min(b.x) && p.x <= a.x.max(b.x) && p.y >= a.y.min(b.y) && p.y <= a.y.max(b.y)
}

/// The two court regions used to filter player detections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourtZones {
    pub main: CourtPolygon,
    pub front: CourtPolygon,
}

impl CourtZones {
    /// True if any anchor of the box lies in either zone.
    pub fn admits(&self, bbox: &BoundingBox) -> bool {
        bbox.anchors()
            .iter()
            .any(|&p| self.main.contains(p) || self.front.contains(p))
    }

    /// True if any anchor of the box lies in the front zone.
    pub fn in_front(&self, bbox: &BoundingBox) -> bool {
        bbox.anchors().iter().any(|&p| self.front.contains(p))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x1: i32, y1: i32, x2: i32, y2: i32) -> BoundingBox {
        BoundingBox::new(x1, y1, x2, y2, ObjectLabel::Player, 0.9)
    }

    fn square(x0: f64, y0: f64, side: f64) -> CourtPolygon {
        CourtPolygon::new([
            Point::new(x0, y0),
            Point::new(x0 + side, y0),
            Point::new(x0 + side, y0 + side),
            Point::new(x0, y0 + side),
        ])
    }

    #[test]
    fn test_area_and_center() {
        let b = bbox(10, 20, 19, 29);
        assert_eq!(b.area(), 100);
        assert_eq!(b.center(), Point::new(14.5, 24.5));
        assert_eq!(b.left_foot(), Point::new(10.0, 29.0));
        assert_eq!(b.right_foot(), Point::new(19.0, 29.0));
        assert_eq!(b.top_left(), Point::new(10.0, 20.0));
        assert_eq!(b.top_right(), Point::new(19.0, 20.0));
    }

    #[test]
    fn test_iou() {
        let a = bbox(0, 0, 9, 9);
        assert!((a.iou(&a) - 1.0).abs() < 1e-12);

        let b = bbox(5, 0, 14, 9);
        // 50 shared pixels out of 150
        assert!((a.iou(&b) - 50.0 / 150.0).abs() < 1e-12);

        let far = bbox(100, 100, 110, 110);
        assert_eq!(a.iou(&far), 0.0);
    }

    #[test]
    fn test_contains_is_inclusive() {
        let b = bbox(0, 0, 10, 10);
        assert!(b.contains(Point::new(10.0, 10.0)));
        assert!(!b.contains(Point::new(10.5, 3.0)));
    }

    #[test]
    fn test_rank_ordering() {
        let mut boxes = vec![
            BoundingBox::new(0, 0, 4, 4, ObjectLabel::Ball, 0.5),
            BoundingBox::new(0, 0, 9, 9, ObjectLabel::Ball, 0.5),
            BoundingBox::new(0, 0, 1, 1, ObjectLabel::Ball, 0.9),
        ];
        sort_by_rank(&mut boxes);
        assert_eq!(boxes[0].confidence, 0.9);
        assert_eq!(boxes[1].area(), 100);
        assert_eq!(boxes[2].area(), 25);
    }

    #[test]
    fn test_polygon_convex() {
        let poly = square(0.0, 0.0, 10.0);
        assert!(poly.contains(Point::new(5.0, 5.0)));
        assert!(poly.contains(Point::new(10.0, 5.0)));
        assert!(!poly.contains(Point::new(11.0, 5.0)));
    }

    #[test]
    fn test_polygon_concave() {
        // Dart shape with its notch at (5, 4)
        let poly = CourtPolygon::new([
            Point::new(0.0, 0.0),
            Point::new(5.0, 4.0),
            Point::new(10.0, 0.0),
            Point::new(5.0, 10.0),
        ]);
        assert!(poly.contains(Point::new(5.0, 6.0)));
        assert!(!poly.contains(Point::new(5.0, 2.0)));
        assert!(!poly.contains(Point::new(1.0, 8.0)));
    }

    #[test]
    fn test_polygon_deserialize() {
        let poly: CourtPolygon = serde_json::from_str("[[0,0],[4,0],[4,4],[0,4]]").unwrap();
        assert!(poly.contains(Point::new(2.0, 2.0)));
        assert!(serde_json::from_str::<CourtPolygon>("[[0,0],[4,0],[4,4]]").is_err());
    }

    #[test]
    fn test_court_zones_admit_by_feet() {
        let zones = CourtZones {
            main: square(0.0, 0.0, 100.0),
            front: square(0.0, 100.0, 100.0),
        };
        // Body above the court, feet on the baseline
        assert!(zones.admits(&bbox(10, -80, 30, 0)));
        // Entirely outside
        assert!(!zones.admits(&bbox(200, 200, 220, 240)));
        assert!(zones.in_front(&bbox(10, 150, 30, 190)));
        assert!(!zones.in_front(&bbox(10, 10, 30, 50)));
    }
}
