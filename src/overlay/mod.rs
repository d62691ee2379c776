//! Overlay renderer
//!
//! Maps the latest detections to vector primitives in the model input's
//! logical coordinate space (the overlay's view box). The mapping is pure:
//! the same detections always give the same primitives.

pub mod skeleton;

use serde::{Deserialize, Serialize};

use crate::camera::{Platform, Size};
use crate::ml::{DetectionResult, Landmark, Topology};

/// Default confidence below which detections are not drawn
pub const MIN_SCORE: f32 = 0.2;

/// RGB color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Color(pub u8, pub u8, pub u8);

impl Color {
    pub const BLUE: Color = Color(0, 0, 255);
    pub const MAGENTA: Color = Color(255, 0, 255);
    pub const RED: Color = Color(255, 0, 0);
}

/// A drawable vector primitive in view box coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Primitive {
    Point {
        x: f32,
        y: f32,
        radius: f32,
        fill: Color,
    },
    Line {
        x1: f32,
        y1: f32,
        x2: f32,
        y2: f32,
        stroke: Color,
        width: f32,
    },
    Rect {
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        fill: Color,
        opacity: f32,
    },
}

/// Primitives for one detected entity
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverlayGroup {
    /// Index of the entity in the detection set
    pub entity: usize,
    pub primitives: Vec<Primitive>,
}

/// A rendered overlay
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Overlay {
    pub view_box: Size,
    /// Horizontal mirror factor already applied to every x coordinate
    pub mirror: f32,
    pub groups: Vec<OverlayGroup>,
}

impl Overlay {
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn primitive_count(&self) -> usize {
        self.groups.iter().map(|g| g.primitives.len()).sum()
    }

    pub fn primitives(&self) -> impl Iterator<Item = &Primitive> {
        self.groups.iter().flat_map(|g| g.primitives.iter())
    }

    /// Placement of the view box inside a display area of `viewport` size.
    pub fn viewport_mapping(&self, viewport: Size) -> ViewportMapping {
        ViewportMapping::new(self.view_box, viewport)
    }
}

/// Uniform scale + centring of the view box in a viewport (SVG "xMidYMid meet").
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportMapping {
    pub scale: f32,
    pub offset: [f32; 2],
}

impl ViewportMapping {
    pub fn new(view_box: Size, viewport: Size) -> Self {
        let bw = view_box.width.max(1) as f32;
        let bh = view_box.height.max(1) as f32;
        let vw = viewport.width as f32;
        let vh = viewport.height as f32;
        let scale = (vw / bw).min(vh / bh);
        Self {
            scale,
            offset: [(vw - bw * scale) / 2.0, (vh - bh * scale) / 2.0],
        }
    }

    pub fn map(&self, point: [f32; 2]) -> [f32; 2] {
        [
            point[0] * self.scale + self.offset[0],
            point[1] * self.scale + self.offset[1],
        ]
    }
}

/// Drawing parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayStyle {
    /// Detections and landmarks below this score are not drawn
    pub min_score: f32,
    pub point_radius: f32,
    pub line_width: f32,
    pub box_opacity: f32,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            min_score: MIN_SCORE,
            point_radius: 2.0,
            line_width: 1.0,
            box_opacity: 0.2,
        }
    }
}

/// Turns detection sets into overlays.
#[derive(Debug, Clone)]
pub struct OverlayRenderer {
    view_box: Size,
    mirror: f32,
    style: OverlayStyle,
}

impl OverlayRenderer {
    pub fn new(view_box: Size, platform: Platform, style: OverlayStyle) -> Self {
        Self {
            view_box,
            mirror: platform.mirror_factor(),
            style,
        }
    }

    pub fn mirror(&self) -> f32 {
        self.mirror
    }

    /// Render `detections`; `None` or an empty set gives an empty overlay.
    pub fn render(&self, detections: Option<&[DetectionResult]>) -> Overlay {
        let groups = detections
            .unwrap_or_default()
            .iter()
            .enumerate()
            .filter(|(_, d)| d.score >= self.style.min_score)
            .map(|(entity, detection)| OverlayGroup {
                entity,
                primitives: match detection.topology {
                    Topology::FaceMesh => self.face_primitives(detection),
                    Topology::Pose => self.pose_primitives(detection),
                },
            })
            .collect();

        Overlay {
            view_box: self.view_box,
            mirror: self.mirror,
            groups,
        }
    }

    /// Reflect x about the vertical centre line of the view box.
    fn mirror_x(&self, x: f32) -> f32 {
        let center = self.view_box.width as f32 / 2.0;
        center + self.mirror * (x - center)
    }

    fn visible(&self, landmark: &Landmark) -> bool {
        landmark.score.map_or(true, |s| s >= self.style.min_score)
    }

    fn point(&self, landmark: &Landmark) -> Primitive {
        Primitive::Point {
            x: self.mirror_x(landmark.x),
            y: landmark.y,
            radius: self.style.point_radius,
            fill: Color::BLUE,
        }
    }

    fn face_primitives(&self, face: &DetectionResult) -> Vec<Primitive> {
        let bbox = &face.bounding_box;
        let left = self.mirror_x(bbox.top_left[0]);
        let right = self.mirror_x(bbox.bottom_right[0]);

        let mut primitives = Vec::with_capacity(face.landmarks.len() + 1);
        primitives.push(Primitive::Rect {
            x: left.min(right),
            y: bbox.top_left[1],
            width: (right - left).abs(),
            height: bbox.height(),
            fill: Color::RED,
            opacity: self.style.box_opacity,
        });
        primitives.extend(
            face.landmarks
                .iter()
                .filter(|l| self.visible(l))
                .map(|l| self.point(l)),
        );
        primitives
    }

    fn pose_primitives(&self, pose: &DetectionResult) -> Vec<Primitive> {
        let keypoints = &pose.landmarks;
        let lines = skeleton::adjacent_keypoints(keypoints, self.style.min_score)
            .into_iter()
            .map(|(from, to)| Primitive::Line {
                x1: self.mirror_x(keypoints[from].x),
                y1: keypoints[from].y,
                x2: self.mirror_x(keypoints[to].x),
                y2: keypoints[to].y,
                stroke: Color::MAGENTA,
                width: self.style.line_width,
            });

        // Skeleton first so keypoints draw on top
        lines
            .chain(keypoints.iter().filter(|k| self.visible(k)).map(|k| self.point(k)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::MODEL_INPUT_SIZE;
    use crate::ml::BoundingBox;

    fn renderer(platform: Platform) -> OverlayRenderer {
        OverlayRenderer::new(MODEL_INPUT_SIZE, platform, OverlayStyle::default())
    }

    fn face(score: f32) -> DetectionResult {
        DetectionResult::face(
            BoundingBox::new([40.0, 50.0], [110.0, 150.0]),
            vec![Landmark::new(60.0, 80.0), Landmark::new(90.0, 80.0)],
            score,
        )
    }

    fn point_xs(overlay: &Overlay) -> Vec<f32> {
        overlay
            .primitives()
            .filter_map(|p| match p {
                Primitive::Point { x, .. } => Some(*x),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_no_detections_renders_nothing() {
        let renderer = renderer(Platform::Ios);
        assert!(renderer.render(None).is_empty());
        assert!(renderer.render(Some(&[][..])).is_empty());
    }

    #[test]
    fn test_threshold_excludes_low_scores() {
        let renderer = renderer(Platform::Ios);
        let detections = vec![face(0.19), face(0.2), face(0.95)];
        let overlay = renderer.render(Some(detections.as_slice()));

        let entities: Vec<usize> = overlay.groups.iter().map(|g| g.entity).collect();
        assert_eq!(entities, vec![1, 2]);
    }

    #[test]
    fn test_face_primitives() {
        let renderer = renderer(Platform::Ios);
        let overlay = renderer.render(Some(&[face(0.9)][..]));
        assert_eq!(overlay.groups.len(), 1);
        assert_eq!(
            overlay.groups[0].primitives,
            vec![
                Primitive::Rect {
                    x: 40.0,
                    y: 50.0,
                    width: 70.0,
                    height: 100.0,
                    fill: Color::RED,
                    opacity: 0.2
                },
                Primitive::Point { x: 60.0, y: 80.0, radius: 2.0, fill: Color::BLUE },
                Primitive::Point { x: 90.0, y: 80.0, radius: 2.0, fill: Color::BLUE },
            ]
        );
    }

    #[test]
    fn test_mirroring_flips_every_x() {
        let detections = vec![face(0.9)];
        let ios = renderer(Platform::Ios).render(Some(detections.as_slice()));
        let android = renderer(Platform::Android).render(Some(detections.as_slice()));
        assert_eq!(ios.mirror, 1.0);
        assert_eq!(android.mirror, -1.0);

        // Reflected about x = 76
        assert_eq!(point_xs(&ios), vec![60.0, 90.0]);
        assert_eq!(point_xs(&android), vec![92.0, 62.0]);

        match android.groups[0].primitives[0] {
            Primitive::Rect { x, width, .. } => {
                assert_eq!(x, 42.0);
                assert_eq!(width, 70.0);
            }
            other => panic!("expected rect, got {:?}", other),
        }
    }

    #[test]
    fn test_render_does_not_mutate_input() {
        let detections = vec![face(0.9)];
        let before = detections.clone();
        let _ = renderer(Platform::Desktop).render(Some(detections.as_slice()));
        assert_eq!(detections, before);
    }

    #[test]
    fn test_pose_skeleton_and_keypoint_filtering() {
        let mut keypoints: Vec<Landmark> = (0..17)
            .map(|i| Landmark::new(10.0 + i as f32, 20.0 + i as f32).with_score(0.9))
            .collect();
        // Left wrist below threshold: no point, no elbow-wrist line
        keypoints[9].score = Some(0.1);
        let pose = DetectionResult::pose(keypoints, 0.8);

        let overlay = renderer(Platform::Ios).render(Some(&[pose][..]));
        let primitives = &overlay.groups[0].primitives;
        let points = primitives.iter().filter(|p| matches!(p, Primitive::Point { .. })).count();
        let lines = primitives.iter().filter(|p| matches!(p, Primitive::Line { .. })).count();
        assert_eq!(points, 16);
        assert_eq!(lines, 11);
    }

    #[test]
    fn test_viewport_mapping_meets() {
        let overlay = renderer(Platform::Ios).render(None);
        let mapping = overlay.viewport_mapping(Size::new(300, 400));
        // Width-limited: 300 / 152
        assert!((mapping.scale - 1.9736842).abs() < 1e-5);
        assert!(mapping.offset[0].abs() < 1e-3);
        assert!((mapping.offset[1] - 2.6315789).abs() < 1e-3);

        let [x, y] = mapping.map([152.0, 200.0]);
        assert!((x - 300.0).abs() < 1e-3);
        assert!((y - 397.36842).abs() < 1e-3);
    }
}
