/// One labeled landmark candidate from the external detector front end.
///
/// The detector groups blob features, matches them against its pretrained
/// index and emits one of these per identified blob. Lifetime is one frame.
#[derive(Clone, Copy, Debug)]
pub struct Correspondence {
    /// Detected position in pixels.
    pub position: glam::Vec2,
    /// Landmark index in the object model.
    pub id: usize,
    /// Votes received by the winning label.
    pub nb_votes: f32,
    /// Vote margin between the best and second-best label.
    pub discriminative_power: i32,
}

/// Most discriminative detections first, so that the bounded subset search
/// tries the reliable labels before the ambiguous ones.
pub fn sort_by_discriminative_power(correspondences: &mut [Correspondence]) {
    correspondences.sort_by(|a, b| b.discriminative_power.cmp(&a.discriminative_power));
}
