//! View frustum planes and box culling.

use glam::{Mat4, Vec3, Vec4};

use crate::core::Aabb;

/// Plane `normal · p + displacement = 0`, with the positive halfspace on the
/// side the normal points into.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    pub normal: Vec3,
    pub displacement: f32,
}

impl Plane {
    /// Normalizes a raw `(a, b, c, d)` plane equation.
    pub fn from_equation(equation: Vec4) -> Self {
        let normal = equation.truncate();
        let length = normal.length();
        if length > 0.0 {
            Self {
                normal: normal / length,
                displacement: equation.w / length,
            }
        } else {
            Self {
                normal,
                displacement: equation.w,
            }
        }
    }

    pub fn from_normal_and_point(normal: Vec3, point: Vec3) -> Self {
        let normal = normal.normalize_or_zero();
        Self {
            normal,
            displacement: -normal.dot(point),
        }
    }

    pub fn signed_distance(&self, point: Vec3) -> f32 {
        self.normal.dot(point) + self.displacement
    }

    /// Whether all of the box lies strictly in the negative halfspace.
    ///
    /// Only the corner furthest along the normal needs testing. A box touching
    /// the plane is not outside.
    pub fn aabb_lies_outside(&self, aabb: &Aabb) -> bool {
        let furthest = Vec3::select(self.normal.cmpge(Vec3::ZERO), aabb.max, aabb.min);
        self.signed_distance(furthest) < 0.0
    }
}

/// Six planes whose positive halfspaces intersect in the visible volume.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frustum {
    planes: [Plane; 6],
}

impl Frustum {
    pub const LEFT: usize = 0;
    pub const RIGHT: usize = 1;
    pub const BOTTOM: usize = 2;
    pub const TOP: usize = 3;
    pub const NEAR: usize = 4;
    pub const FAR: usize = 5;

    /// Extracts world-space planes from a combined view-projection matrix
    /// (Gribb and Hartmann), for clip-space depth in `[0, 1]`.
    pub fn from_view_projection(view_projection: Mat4) -> Self {
        let r0 = view_projection.row(0);
        let r1 = view_projection.row(1);
        let r2 = view_projection.row(2);
        let r3 = view_projection.row(3);
        Self {
            planes: [
                Plane::from_equation(r3 + r0),
                Plane::from_equation(r3 - r0),
                Plane::from_equation(r3 + r1),
                Plane::from_equation(r3 - r1),
                Plane::from_equation(r2),
                Plane::from_equation(r3 - r2),
            ],
        }
    }

    /// Frustum of a camera, with the far plane pulled in to `far_depth` from the
    /// eye when given.
    pub fn from_camera(view: Mat4, projection: Mat4, far_depth: Option<f32>) -> Self {
        let frustum = Self::from_view_projection(projection * view);
        match far_depth {
            Some(depth) => frustum.with_far_depth(view.inverse().transform_point3(Vec3::ZERO), depth),
            None => frustum,
        }
    }

    /// Replaces the far plane with one `depth` in front of `eye`, facing back along the view.
    pub fn with_far_depth(mut self, eye: Vec3, depth: f32) -> Self {
        let forward = self.planes[Self::NEAR].normal;
        self.planes[Self::FAR] = Plane::from_normal_and_point(-forward, eye + forward * depth);
        self
    }

    pub fn planes(&self) -> &[Plane; 6] {
        &self.planes
    }

    pub fn contains_point(&self, point: Vec3) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.signed_distance(point) >= 0.0)
    }

    /// Conservative box test: rejects only boxes entirely outside one plane.
    pub fn intersects_aabb(&self, aabb: &Aabb) -> bool {
        !self.planes.iter().any(|plane| plane.aabb_lies_outside(aabb))
    }
}
