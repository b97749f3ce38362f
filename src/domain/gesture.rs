//! Gesture capture buffer and segmentation
//!
//! The trail is a fixed arena of points written while a gesture is active.
//! [`segment`] trims settled motion from both ends and resamples what is
//! left into the fixed-size normalized series the classifier expects.

use crate::domain::models::TrailPoint;
use crate::error::SegmentError;

/// Points retained per gesture; later points are dropped.
pub const TRAIL_CAPACITY: usize = 8192;

/// Points in a resampled series.
pub const SERIES_LEN: usize = 50;

/// Trails of this many points or fewer are not classified.
pub const MIN_TRAIL_POINTS: usize = 99;

/// Movement below this distance counts as settled.
pub const MOVE_THRESHOLD: f32 = 8.0;

const TAIL_WINDOW: usize = 40;
const HEAD_WINDOW: usize = 10;
const TRIM_STEP: usize = 10;
const MIN_TRIMMED_LEN: usize = 120;

pub struct GestureTrail {
    points: Box<[TrailPoint]>,
    len: usize,
}

impl Default for GestureTrail {
    fn default() -> Self {
        Self::new()
    }
}

impl GestureTrail {
    pub fn new() -> Self {
        Self::with_capacity(TRAIL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            points: vec![TrailPoint::ORIGIN; capacity].into_boxed_slice(),
            len: 0,
        }
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Returns false once the arena is full.
    pub fn push(&mut self, point: TrailPoint) -> bool {
        match self.points.get_mut(self.len) {
            Some(slot) => {
                *slot = point;
                self.len += 1;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.points.len()
    }

    pub fn points(&self) -> &[TrailPoint] {
        &self.points[..self.len]
    }

    pub fn bounding_box(&self) -> Option<BoundingBox> {
        BoundingBox::of(self.points())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_x: f32,
    pub max_x: f32,
    pub min_y: f32,
    pub max_y: f32,
}

impl BoundingBox {
    pub fn of(points: &[TrailPoint]) -> Option<Self> {
        let first = points.first()?;
        let init = Self {
            min_x: first.x,
            max_x: first.x,
            min_y: first.y,
            max_y: first.y,
        };
        Some(points.iter().fold(init, |b, p| Self {
            min_x: b.min_x.min(p.x),
            max_x: b.max_x.max(p.x),
            min_y: b.min_y.min(p.y),
            max_y: b.max_y.max(p.y),
        }))
    }

    pub fn width(&self) -> f32 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f32 {
        self.max_y - self.min_y
    }

    /// Side of the enclosing square
    pub fn size(&self) -> f32 {
        self.width().max(self.height())
    }
}

/// Resampled gesture: 50 (x, y) pairs in [0, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct GestureSeries(pub [[f32; 2]; SERIES_LEN]);

impl GestureSeries {
    pub fn points(&self) -> &[[f32; 2]; SERIES_LEN] {
        &self.0
    }

    /// Row-major (x0, y0, x1, y1, ...)
    pub fn flatten(&self) -> Vec<f32> {
        self.0.iter().flatten().copied().collect()
    }
}

fn settled(a: &TrailPoint, b: &TrailPoint) -> bool {
    a.distance_squared(b) < MOVE_THRESHOLD * MOVE_THRESHOLD
}

/// Trim and resample a captured trail.
pub fn segment(points: &[TrailPoint]) -> Result<GestureSeries, SegmentError> {
    let bbox = BoundingBox::of(points).ok_or(SegmentError::NoMovement)?;
    let size = bbox.size();
    // NaN sizes fall through here as well
    if !(size > 0.0) {
        return Err(SegmentError::NoMovement);
    }

    let n = points.len();
    if n <= MIN_TRAIL_POINTS {
        return Err(SegmentError::InsufficientSamples(n));
    }

    let mut end = n;
    while end > MIN_TRIMMED_LEN {
        if !settled(&points[end - 1], &points[end - 1 - TAIL_WINDOW]) {
            break;
        }
        end -= TRIM_STEP;
    }

    let mut start = 0;
    if end > MIN_TRIMMED_LEN {
        while start + MIN_TRIMMED_LEN < end {
            if !settled(&points[start], &points[start + HEAD_WINDOW]) {
                break;
            }
            start += TRIM_STEP;
        }
    }

    let step = (end - start) as f32 / SERIES_LEN as f32;
    let mut position = (start + 1) as f32;
    let mut series = [[0.0f32; 2]; SERIES_LEN];
    for slot in series.iter_mut() {
        let index = (position as usize).min(n - 1);
        let point = &points[index];
        *slot = [(point.x - bbox.min_x) / size, (point.y - bbox.min_y) / size];
        position += step;
    }

    Ok(GestureSeries(series))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn circle(n: usize, radius: f32) -> Vec<TrailPoint> {
        (0..n)
            .map(|i| {
                let t = i as f32 / n as f32 * std::f32::consts::TAU;
                TrailPoint::new(radius * t.cos(), radius * t.sin())
            })
            .collect()
    }

    fn assert_normalized(series: &GestureSeries) {
        assert_eq!(series.points().len(), SERIES_LEN);
        for [x, y] in series.points() {
            assert!((0.0..=1.0).contains(x), "x = {x}");
            assert!((0.0..=1.0).contains(y), "y = {y}");
        }
    }

    #[test]
    fn test_trail_is_bounded() {
        let mut trail = GestureTrail::with_capacity(3);
        assert!(trail.push(TrailPoint::new(1.0, 1.0)));
        assert!(trail.push(TrailPoint::new(2.0, 2.0)));
        assert!(trail.push(TrailPoint::new(3.0, 3.0)));
        assert!(!trail.push(TrailPoint::new(4.0, 4.0)));
        assert_eq!(trail.len(), 3);
        assert_eq!(trail.points()[2], TrailPoint::new(3.0, 3.0));

        trail.clear();
        assert!(trail.is_empty());
        assert_eq!(trail.capacity(), 3);
        assert_eq!(trail.bounding_box(), None);
    }

    #[test]
    fn test_bounding_box() {
        let points = [
            TrailPoint::new(-1.0, 4.0),
            TrailPoint::new(3.0, -2.0),
            TrailPoint::new(0.0, 0.0),
        ];
        let bbox = BoundingBox::of(&points).unwrap();
        assert_eq!(bbox.width(), 4.0);
        assert_eq!(bbox.height(), 6.0);
        assert_eq!(bbox.size(), 6.0);
    }

    #[test]
    fn test_segment_returns_fifty_normalized_points() {
        for n in [100, 101, 150, 777, 4096, TRAIL_CAPACITY] {
            let series = segment(&circle(n, 120.0)).unwrap();
            assert_normalized(&series);
        }
    }

    #[test]
    fn test_segment_line_only_moves_on_one_axis() {
        let points: Vec<_> = (0..300).map(|i| TrailPoint::new(i as f32, 5.0)).collect();
        let series = segment(&points).unwrap();
        assert_normalized(&series);
        assert!(series.points().iter().all(|[_, y]| *y == 0.0));
        assert!(series.points().windows(2).all(|w| w[0][0] < w[1][0]));
    }

    #[test]
    fn test_no_movement_is_rejected() {
        let still = vec![TrailPoint::new(3.0, 3.0); 500];
        assert_eq!(segment(&still), Err(SegmentError::NoMovement));
        assert_eq!(segment(&[]), Err(SegmentError::NoMovement));
    }

    #[test]
    fn test_short_trail_is_rejected() {
        assert_eq!(
            segment(&circle(99, 50.0)),
            Err(SegmentError::InsufficientSamples(99))
        );
        assert!(segment(&circle(100, 50.0)).is_ok());
    }

    #[test]
    fn test_settled_tail_and_head_are_trimmed() {
        // 100 still points, a 200 point sweep, then 200 still points
        let mut points = vec![TrailPoint::new(0.0, 0.0); 100];
        points.extend((1..=200).map(|i| TrailPoint::new(i as f32 * 2.0, 0.0)));
        points.extend(vec![TrailPoint::new(400.0, 0.0); 200]);

        let series = segment(&points).unwrap();
        assert_normalized(&series);

        // Without trimming most samples would sit on the end stops
        let at_end = series.points().iter().filter(|[x, _]| *x == 1.0).count();
        let at_start = series.points().iter().filter(|[x, _]| *x == 0.0).count();
        assert!(at_end < 10, "{at_end} samples on the tail");
        assert!(at_start < 10, "{at_start} samples on the head");
    }
}
