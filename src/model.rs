use image::GrayImage;
use nalgebra as na;

use crate::calibration::PinholeCamera;
use crate::types::Pose;

/// Canonical texture resolution, pixels per meter of surface extent.
const TEXTURE_PX_PER_METER: f32 = 1200.0;
/// Lower bound on a canonical texture side.
const TEXTURE_MIN_PX: u32 = 16;

/// Directed edge of the object silhouette model. Traversing from `pt_from`
/// to `pt_to`, the two adjacent faces have normals `normal1` and `normal2`;
/// the edge is on the visible silhouette iff exactly one face is
/// front-facing.
#[derive(Clone, Copy, Debug)]
pub struct ModelEdge {
    pub pt_from: glam::Vec3,
    pub pt_to: glam::Vec3,
    pub normal1: glam::Vec3,
    pub normal2: glam::Vec3,
}

impl ModelEdge {
    pub fn new(
        pt_from: glam::Vec3,
        pt_to: glam::Vec3,
        normal1: glam::Vec3,
        normal2: glam::Vec3,
    ) -> ModelEdge {
        ModelEdge {
            pt_from,
            pt_to,
            normal1,
            normal2,
        }
    }
}

/// Appearance buffer of a planar surface.
///
/// Learning owns the floating-point accumulator exclusively; tracking only
/// ever sees the quantized `Finalized` texture. The two phases are separate
/// variants so one cannot be read as the other.
#[derive(Clone, Debug)]
pub enum TextureState {
    Empty,
    Accumulating { buf: na::DMatrix<f32>, weight: f32 },
    Finalized(GrayImage),
}

/// Textured planar patch of the object model.
///
/// `normal = b1 x b2`; the canonical texture rectangle spans
/// `center +/- radius1*b1 +/- radius2*b2`. A mirrored copy (`mirror_of`
/// set) carries its own mirrored geometry but never owns a texture: reads
/// resolve to the source surface's texture.
#[derive(Clone, Debug)]
pub struct PlanarSurface {
    pub center: glam::Vec3,
    pub normal: glam::Vec3,
    pub b1: glam::Vec3,
    pub b2: glam::Vec3,
    pub radius1: f32,
    pub radius2: f32,
    pub tex_w: u32,
    pub tex_h: u32,
    pub texture: TextureState,
    pub mirror_of: Option<usize>,
}

impl PlanarSurface {
    pub fn new(
        center: glam::Vec3,
        b1: glam::Vec3,
        b2: glam::Vec3,
        radius1: f32,
        radius2: f32,
    ) -> PlanarSurface {
        let tex_w = ((2.0 * radius1 * TEXTURE_PX_PER_METER).round() as u32).max(TEXTURE_MIN_PX);
        let tex_h = ((2.0 * radius2 * TEXTURE_PX_PER_METER).round() as u32).max(TEXTURE_MIN_PX);
        PlanarSurface {
            center,
            normal: b1.cross(b2).normalize(),
            b1: b1.normalize(),
            b2: b2.normalize(),
            radius1,
            radius2,
            tex_w,
            tex_h,
            texture: TextureState::Empty,
            mirror_of: None,
        }
    }

    pub fn new_square(
        center: glam::Vec3,
        b1: glam::Vec3,
        b2: glam::Vec3,
        radius: f32,
    ) -> PlanarSurface {
        PlanarSurface::new(center, b1, b2, radius, radius)
    }

    /// Geometric mirror across the object's longitudinal (x = 0) plane.
    /// Extents and texture dimensions are kept; the copy references the
    /// source's texture instead of owning one.
    pub fn mirrored(&self, source_index: usize) -> PlanarSurface {
        let flip = |v: glam::Vec3| glam::Vec3::new(-v.x, v.y, v.z);
        PlanarSurface {
            center: flip(self.center),
            normal: flip(self.normal),
            b1: flip(self.b1),
            b2: flip(self.b2),
            radius1: self.radius1,
            radius2: self.radius2,
            tex_w: self.tex_w,
            tex_h: self.tex_h,
            texture: TextureState::Empty,
            mirror_of: Some(source_index),
        }
    }

    pub fn is_mirror(&self) -> bool {
        self.mirror_of.is_some()
    }

    /// The four rectangle corners, in the order matched by
    /// [`PlanarSurface::canonical_corners`].
    pub fn corners(&self) -> [glam::Vec3; 4] {
        let e1 = self.b1 * self.radius1;
        let e2 = self.b2 * self.radius2;
        [
            self.center + e1 + e2,
            self.center + e1 - e2,
            self.center - e1 - e2,
            self.center - e1 + e2,
        ]
    }

    /// Corners of the canonical texture rectangle, matched one-to-one with
    /// [`PlanarSurface::corners`].
    pub fn canonical_corners(&self) -> [glam::Vec2; 4] {
        let w = self.tex_w as f32;
        let h = self.tex_h as f32;
        [
            glam::Vec2::new(w, 0.0),
            glam::Vec2::new(w, h),
            glam::Vec2::new(0.0, h),
            glam::Vec2::new(0.0, 0.0),
        ]
    }
}

/// The rigid object: labeled landmarks, silhouette edges, planar surfaces
/// and the current object pose (object frame -> world).
#[derive(Clone, Debug)]
pub struct ObjectModel {
    pub vertices: Vec<glam::Vec3>,
    pub edges: Vec<ModelEdge>,
    pub surfaces: Vec<PlanarSurface>,
    pub pose: Pose,
}

impl ObjectModel {
    pub fn landmark(&self, id: usize) -> Option<glam::Vec3> {
        self.vertices.get(id).copied()
    }

    /// Point in camera frame: object pose then camera pose.
    pub fn point_in_camera(&self, p: glam::Vec3, cam_pose: &Pose) -> na::Vector3<f64> {
        cam_pose.compose(&self.pose).transform_point(p)
    }

    /// Project an object-frame point to pixel coordinates.
    pub fn project_point(
        &self,
        p: glam::Vec3,
        cam_pose: &Pose,
        camera: &PinholeCamera<f64>,
    ) -> glam::Vec2 {
        let pc = self.point_in_camera(p, cam_pose);
        let uv = camera.project_one(&pc);
        glam::Vec2::new(uv[0] as f32, uv[1] as f32)
    }

    /// Viewing score of a surface under `cam_pose`:
    /// `1 - 2*acos(-n . r)/pi` with `n` the surface normal and `r` the unit
    /// ray from camera to surface center, both in camera frame. 1 when the
    /// surface faces the camera head on, 0 at grazing incidence, negative
    /// when back-facing.
    pub fn view_score(&self, surface: &PlanarSurface, cam_pose: &Pose) -> f32 {
        let world = cam_pose.compose(&self.pose);
        let center_cam = world.transform_point(surface.center);
        let ray = center_cam.normalize();
        let normal_cam = world.transform_vector(surface.normal);
        let cos = (-normal_cam.dot(&ray)).clamp(-1.0, 1.0);
        (1.0 - 2.0 * cos.acos() / std::f64::consts::PI) as f32
    }

    /// Silhouette test: exactly one adjacent face front-facing.
    pub fn edge_on_silhouette(&self, edge: &ModelEdge, cam_pose: &Pose) -> bool {
        let world = cam_pose.compose(&self.pose);
        let ray = world.transform_point(edge.pt_from).normalize();
        let n1 = world.transform_vector(edge.normal1);
        let n2 = world.transform_vector(edge.normal2);
        let a1 = n1.dot(&ray).clamp(-1.0, 1.0).acos();
        let a2 = n2.dot(&ray).clamp(-1.0, 1.0).acos();
        let half = std::f64::consts::FRAC_PI_2;
        (a1 > half) != (a2 > half)
    }

    /// Projected silhouette segments under `cam_pose`, as plain data for an
    /// external renderer.
    pub fn silhouette_segments(
        &self,
        cam_pose: &Pose,
        camera: &PinholeCamera<f64>,
    ) -> Vec<(glam::Vec2, glam::Vec2)> {
        self.edges
            .iter()
            .filter(|e| self.edge_on_silhouette(e, cam_pose))
            .map(|e| {
                (
                    self.project_point(e.pt_from, cam_pose, camera),
                    self.project_point(e.pt_to, cam_pose, camera),
                )
            })
            .collect()
    }

    /// Indices of surfaces that own a texture (non-mirror).
    pub fn owned_surface_indices(&self) -> Vec<usize> {
        self.surfaces
            .iter()
            .enumerate()
            .filter(|(_, s)| !s.is_mirror())
            .map(|(i, _)| i)
            .collect()
    }

    /// Finalized texture backing a surface, resolving mirror references.
    /// A mirrored surface reads its source texture as-is: its mirrored basis
    /// vectors already produce the mirrored appearance through the warp.
    pub fn texture_of(&self, surface_index: usize) -> Option<&GrayImage> {
        let surf = &self.surfaces[surface_index];
        let owner = match surf.mirror_of {
            Some(src) => &self.surfaces[src],
            None => surf,
        };
        match &owner.texture {
            TextureState::Finalized(img) => Some(img),
            _ => None,
        }
    }
}

/// The tracked robot model: blob landmarks on the top plate, the silhouette
/// edge set and the textured surface patches, all in meters in the robot
/// frame (x right, y forward, z up, origin at the wheel axle center).
pub fn robot_model() -> ObjectModel {
    ObjectModel {
        vertices: blob_landmarks(),
        edges: silhouette_edges(),
        surfaces: surface_patches(),
        pose: Pose::identity(),
    }
}

/// Labeled blob positions on the top plate. Index is the landmark id used by
/// the detector:
/// ```text
///  10             0
///  11  7       4  1
///
///  12  8       5  2
///  13  9       6  3
/// ```
fn blob_landmarks() -> Vec<glam::Vec3> {
    vec![
        glam::Vec3::new(0.044, 0.036, 0.0305),
        glam::Vec3::new(0.044, 0.028, 0.0305),
        glam::Vec3::new(0.044, -0.012, 0.0305),
        glam::Vec3::new(0.044, -0.02, 0.0305),
        glam::Vec3::new(0.036, 0.028, 0.0305),
        glam::Vec3::new(0.036, -0.012, 0.0305),
        glam::Vec3::new(0.036, -0.02, 0.0305),
        glam::Vec3::new(-0.036, 0.028, 0.0305),
        glam::Vec3::new(-0.036, -0.012, 0.0305),
        glam::Vec3::new(-0.036, -0.02, 0.0305),
        glam::Vec3::new(-0.044, 0.036, 0.0305),
        glam::Vec3::new(-0.044, 0.028, 0.0305),
        glam::Vec3::new(-0.044, -0.012, 0.0305),
        glam::Vec3::new(-0.044, -0.02, 0.0305),
    ]
}

fn silhouette_edges() -> Vec<ModelEdge> {
    let mut edges = Vec::new();
    let height = glam::Vec3::new(0.0, 0.0, 0.0445);
    let sqrt2_2 = (2.0f32).sqrt() / 2.0;

    // Straight part of the top plate outline.
    let top = [
        glam::Vec3::new(-0.055, 0.055, 0.0305),
        glam::Vec3::new(-0.055, -0.0295, 0.0305),
        glam::Vec3::new(0.055, -0.0295, 0.0305),
        glam::Vec3::new(0.055, 0.055, 0.0305),
    ];
    let down = glam::Vec3::new(0.0, 0.0, -1.0);
    let side_normals = [
        glam::Vec3::new(sqrt2_2, 0.0, 0.0),
        glam::Vec3::new(0.0, sqrt2_2, 0.0),
        glam::Vec3::new(-sqrt2_2, 0.0, 0.0),
    ];
    for v in 0..3 {
        edges.push(ModelEdge::new(top[v], top[v + 1], down, side_normals[v]));
    }

    // Rounded front, slightly elliptic.
    let nb_round_cut = 4i32;
    let radius_front = 0.08f32;
    let radius_sides = 0.078f32;
    let mut round_pts = Vec::new();
    let mut round_normals = Vec::new();
    for i in -nb_round_cut..=nb_round_cut {
        let angle = -(i as f32) * std::f32::consts::PI / (4.0 * nb_round_cut as f32);
        let radius = radius_sides * i.abs() as f32 / nb_round_cut as f32
            + radius_front * (nb_round_cut - i.abs()) as f32 / nb_round_cut as f32;
        round_pts.push(glam::Vec3::new(
            radius * angle.sin(),
            radius * angle.cos(),
            0.0305,
        ));
        let angle_seg = -((i as f32) + 0.5) * std::f32::consts::PI / (4.0 * nb_round_cut as f32);
        round_normals.push(glam::Vec3::new(-angle_seg.sin(), -angle_seg.cos(), 0.0));
    }
    for v in 0..round_pts.len() - 1 {
        edges.push(ModelEdge::new(
            round_pts[v],
            round_pts[v + 1],
            down,
            round_normals[v],
        ));
    }

    // Bottom outline mirrors the top one, with the opposite face normal.
    let up = glam::Vec3::new(0.0, 0.0, 1.0);
    let nb_top = edges.len();
    for i in 0..nb_top {
        let e = edges[i];
        edges.push(ModelEdge::new(
            e.pt_from - height,
            e.pt_to - height,
            up,
            e.normal2,
        ));
    }

    // Vertical corner edges.
    edges.push(ModelEdge::new(
        top[0],
        top[0] - height,
        glam::Vec3::new(sqrt2_2, -sqrt2_2, 0.0),
        glam::Vec3::new(1.0, 0.0, 0.0),
    ));
    edges.push(ModelEdge::new(
        top[1],
        top[1] - height,
        glam::Vec3::new(0.0, 1.0, 0.0),
        glam::Vec3::new(1.0, 0.0, 0.0),
    ));
    edges.push(ModelEdge::new(
        top[2],
        top[2] - height,
        glam::Vec3::new(0.0, 1.0, 0.0),
        glam::Vec3::new(-1.0, 0.0, 0.0),
    ));
    edges.push(ModelEdge::new(
        top[3],
        top[3] - height,
        glam::Vec3::new(-sqrt2_2, -sqrt2_2, 0.0),
        glam::Vec3::new(-1.0, 0.0, 0.0),
    ));

    edges
}

fn surface_patches() -> Vec<PlanarSurface> {
    let mut surfaces = Vec::with_capacity(15);

    // Wheel-side patches.
    surfaces.push(PlanarSurface::new(
        glam::Vec3::new(0.055, 0.015, 0.005),
        glam::Vec3::new(0.0, 1.0, 0.0),
        glam::Vec3::new(0.0, 0.0, 1.0),
        0.01,
        0.015,
    ));
    surfaces.push(PlanarSurface::new(
        glam::Vec3::new(0.055, -0.015, 0.005),
        glam::Vec3::new(0.0, 1.0, 0.0),
        glam::Vec3::new(0.0, 0.0, 1.0),
        0.01,
        0.015,
    ));
    // Top blob patches.
    surfaces.push(PlanarSurface::new_square(
        glam::Vec3::new(0.04, -0.015, 0.031),
        glam::Vec3::new(1.0, 0.0, 0.0),
        glam::Vec3::new(0.0, 1.0, 0.0),
        0.01,
    ));
    surfaces.push(PlanarSurface::new_square(
        glam::Vec3::new(0.04, 0.033, 0.031),
        glam::Vec3::new(1.0, 0.0, 0.0),
        glam::Vec3::new(0.0, 1.0, 0.0),
        0.01,
    ));
    // Back rectangle.
    surfaces.push(PlanarSurface::new_square(
        glam::Vec3::new(0.03, -0.0295, 0.012),
        glam::Vec3::new(1.0, 0.0, 0.0),
        glam::Vec3::new(0.0, 0.0, 1.0),
        0.01,
    ));

    // Front arc patches, the last one on the symmetry plane.
    let nb_round_cut = 2i32;
    let radius_front = 0.08f32;
    let radius_sides = 0.078f32;
    for i in -nb_round_cut..=0 {
        let angle = -(i as f32) * std::f32::consts::PI / (4.7 * nb_round_cut as f32);
        let radius = radius_sides * i.abs() as f32 / nb_round_cut as f32
            + radius_front * (nb_round_cut - i.abs()) as f32 / nb_round_cut as f32;
        let center = glam::Vec3::new(radius * angle.sin(), radius * angle.cos(), 0.013);
        surfaces.push(PlanarSurface::new(
            center,
            glam::Vec3::new(-angle.cos(), angle.sin(), 0.0),
            glam::Vec3::new(0.0, 0.0, 1.0),
            0.01,
            0.005,
        ));
    }

    // Mirrored copies of every off-axis surface.
    for i in 0..7 {
        let copy = surfaces[i].mirrored(i);
        surfaces.push(copy);
    }

    surfaces
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn robot_model_surface_layout() {
        let model = robot_model();
        assert_eq!(model.vertices.len(), 14);
        assert_eq!(model.surfaces.len(), 15);
        assert_eq!(model.owned_surface_indices().len(), 8);
        for (i, s) in model.surfaces.iter().enumerate().skip(8) {
            assert_eq!(s.mirror_of, Some(i - 8));
        }
    }

    #[test]
    fn surface_normal_is_unit_and_orthogonal() {
        let model = robot_model();
        for s in &model.surfaces {
            assert!((s.normal.length() - 1.0).abs() < 1e-5);
            assert!(s.normal.dot(s.b1).abs() < 1e-5);
            assert!(s.normal.dot(s.b2).abs() < 1e-5);
        }
    }
}
