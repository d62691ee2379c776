//! COCO 17-keypoint pose skeleton

use crate::ml::Landmark;

/// Keypoint names in model output order
pub const KEYPOINT_NAMES: [&str; 17] = [
    "nose",
    "left_eye",
    "right_eye",
    "left_ear",
    "right_ear",
    "left_shoulder",
    "right_shoulder",
    "left_elbow",
    "right_elbow",
    "left_wrist",
    "right_wrist",
    "left_hip",
    "right_hip",
    "left_knee",
    "right_knee",
    "left_ankle",
    "right_ankle",
];

/// Connected keypoint pairs drawn as limbs
pub const SKELETON: [(usize, usize); 12] = [
    (11, 5),  // left hip - left shoulder
    (7, 5),   // left elbow - left shoulder
    (7, 9),   // left elbow - left wrist
    (11, 13), // left hip - left knee
    (13, 15), // left knee - left ankle
    (12, 6),  // right hip - right shoulder
    (8, 6),   // right elbow - right shoulder
    (8, 10),  // right elbow - right wrist
    (12, 14), // right hip - right knee
    (14, 16), // right knee - right ankle
    (5, 6),   // left shoulder - right shoulder
    (11, 12), // left hip - right hip
];

/// Skeleton pairs whose endpoints both exist and score at least `min_score`.
/// Keypoints without a score count as confident.
pub fn adjacent_keypoints(keypoints: &[Landmark], min_score: f32) -> Vec<(usize, usize)> {
    let confident = |i: usize| {
        keypoints
            .get(i)
            .is_some_and(|k| k.score.map_or(true, |s| s >= min_score))
    };

    SKELETON
        .iter()
        .copied()
        .filter(|&(a, b)| confident(a) && confident(b))
        .collect()
}
