//! R-tree entries shared by the sanitizer and the place builder.

use geo::Coord;
use rstar::{AABB, PointDistance, RTree, RTreeObject};

/// One straight piece of a feature polyline.
#[derive(Debug, Clone, Copy)]
pub struct IndexedSegment {
    pub feature: usize,
    pub index: usize,
    pub start: Coord,
    pub end: Coord,
}

impl RTreeObject for IndexedSegment {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners([self.start.x, self.start.y], [self.end.x, self.end.y])
    }
}

#[derive(Debug, Clone, Copy)]
pub struct IndexedPoint {
    pub id: usize,
    pub point: Coord,
}

impl RTreeObject for IndexedPoint {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point([self.point.x, self.point.y])
    }
}

impl PointDistance for IndexedPoint {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let dx = self.point.x - point[0];
        let dy = self.point.y - point[1];
        dx * dx + dy * dy
    }
}

/// Bounding box of an arbitrary shape, stored with the shape's id.
#[derive(Debug, Clone, Copy)]
pub struct IndexedEnvelope {
    pub id: usize,
    pub envelope: AABB<[f64; 2]>,
}

impl RTreeObject for IndexedEnvelope {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

pub fn segment_index(lines: &[Vec<Coord>]) -> RTree<IndexedSegment> {
    let segments: Vec<IndexedSegment> = lines
        .iter()
        .enumerate()
        .flat_map(|(feature, coords)| {
            coords
                .windows(2)
                .enumerate()
                .map(move |(index, w)| IndexedSegment {
                    feature,
                    index,
                    start: w[0],
                    end: w[1],
                })
        })
        .collect();
    RTree::bulk_load(segments)
}

pub fn point_index(points: &[Coord]) -> RTree<IndexedPoint> {
    RTree::bulk_load(
        points
            .iter()
            .enumerate()
            .map(|(id, &point)| IndexedPoint { id, point })
            .collect(),
    )
}

/// Envelope of `coords` grown by `margin` on every side.
pub fn expanded_envelope(coords: &[Coord], margin: f64) -> AABB<[f64; 2]> {
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (f64::MAX, f64::MAX, f64::MIN, f64::MIN);
    for c in coords {
        min_x = min_x.min(c.x);
        min_y = min_y.min(c.y);
        max_x = max_x.max(c.x);
        max_y = max_y.max(c.y);
    }
    AABB::from_corners(
        [min_x - margin, min_y - margin],
        [max_x + margin, max_y + margin],
    )
}
