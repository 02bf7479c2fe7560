use glam::{Mat4, Quat, Vec2, Vec3, Vec4};

use crate::gpu::types::GpuCameraData;
use crate::options::CameraOptions;
use crate::renderer::cull::CullVolume;

/// Perspective camera orbiting a target point.
#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    /// Eye (camera) position in world space.
    pub eye: Vec3,
    /// Look-at target position.
    pub target: Vec3,
    /// Up direction vector.
    pub up: Vec3,
    /// Viewport aspect ratio (width / height).
    pub aspect: f32,
    /// Vertical field of view in degrees.
    pub fovy: f32,
    /// Near clipping plane distance.
    pub znear: f32,
    /// Far clipping plane distance.
    pub zfar: f32,
}

impl Camera {
    /// Camera at +Z looking at the origin.
    #[must_use]
    pub fn from_options(options: &CameraOptions, aspect: f32) -> Self {
        Self {
            eye: Vec3::new(0.0, 0.0, 50.0),
            target: Vec3::ZERO,
            up: Vec3::Y,
            aspect,
            fovy: options.fovy,
            znear: options.znear,
            zfar: options.zfar,
        }
    }

    /// World-to-view matrix.
    #[must_use]
    pub fn view(&self) -> Mat4 {
        Mat4::look_at_rh(self.eye, self.target, self.up)
    }

    /// Projection with `[0, 1]` depth.
    #[must_use]
    pub fn projection(&self) -> Mat4 {
        Mat4::perspective_rh(self.fovy.to_radians(), self.aspect, self.znear, self.zfar)
    }

    /// Projection restricted to the NDC rectangle `min`..`max`, which is
    /// stretched over the whole clip volume. Used for rectangle selection.
    #[must_use]
    pub fn sub_projection(&self, min: Vec2, max: Vec2) -> Mat4 {
        let lo = min.min(max);
        let hi = min.max(max);
        let size = (hi - lo).max(Vec2::splat(1e-6));
        let scale = Vec2::splat(2.0) / size;
        let shift = -(hi + lo) / size;
        let crop = Mat4::from_cols(
            Vec4::new(scale.x, 0.0, 0.0, 0.0),
            Vec4::new(0.0, scale.y, 0.0, 0.0),
            Vec4::Z,
            Vec4::new(shift.x, shift.y, 0.0, 1.0),
        );
        crop * self.projection()
    }

    /// Cull volume of the full view.
    #[must_use]
    pub fn cull_volume(&self) -> CullVolume {
        CullVolume::new(self.view(), self.projection())
    }

    /// Uniform data for the mesh shaders.
    #[must_use]
    pub fn gpu_data(&self, light_dir: Vec3) -> GpuCameraData {
        let view = self.view();
        GpuCameraData {
            proj_view: (self.projection() * view).to_cols_array_2d(),
            view: view.to_cols_array_2d(),
            position: self.eye.extend(1.0).to_array(),
            light_dir: light_dir.normalize_or_zero().extend(0.0).to_array(),
        }
    }

    /// Rotate the eye around the target, horizontally about the camera's up
    /// vector then vertically about its right vector. `delta` is in radians.
    pub fn orbit(&mut self, delta: Vec2) {
        let offset = self.eye - self.target;
        let forward = -offset.normalize_or(Vec3::Z);
        let right = forward.cross(self.up).normalize_or(Vec3::X);
        let rotation = Quat::from_axis_angle(right, -delta.y)
            * Quat::from_axis_angle(self.up.normalize_or(Vec3::Y), -delta.x);
        self.eye = self.target + rotation * offset;
        self.up = (rotation * self.up).normalize_or(Vec3::Y);
    }

    /// Move the eye towards the target by `delta` (fraction of the
    /// distance), never closer than the near plane.
    pub fn zoom(&mut self, delta: f32) {
        let offset = self.eye - self.target;
        let distance = (offset.length() * (1.0 - delta)).clamp(self.znear * 2.0, self.zfar * 0.5);
        self.eye = self.target + offset.normalize_or(Vec3::Z) * distance;
    }

    /// Center on the centroid of `positions` at a distance that keeps their
    /// bounding sphere in view.
    pub fn fit_to_positions(&mut self, positions: &[Vec3]) {
        if positions.is_empty() {
            return;
        }
        let centroid = positions.iter().copied().sum::<Vec3>() / positions.len() as f32;
        let radius = positions
            .iter()
            .map(|p| (*p - centroid).length())
            .fold(0.0f32, f32::max)
            .max(1.0);
        let fit_distance = radius / (self.fovy.to_radians() / 2.0).tan();
        let direction = (self.eye - self.target).normalize_or(Vec3::Z);
        self.target = centroid;
        self.eye = centroid + direction * fit_distance * 1.5;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera() -> Camera {
        Camera::from_options(&CameraOptions::default(), 1.0)
    }

    #[test]
    fn fit_keeps_every_point_in_view() {
        let mut cam = camera();
        let points = [Vec3::new(100.0, 0.0, 0.0), Vec3::new(140.0, 30.0, -10.0)];
        cam.fit_to_positions(&points);
        let volume = cam.cull_volume();
        let view = cam.view();
        for p in points {
            assert!(volume.frustum.intersects_sphere(view.transform_point3(p), 0.0));
        }
    }

    #[test]
    fn sub_projection_maps_the_rect_corner_to_the_clip_corner() {
        let cam = camera();
        let m = cam.sub_projection(Vec2::new(0.0, 0.0), Vec2::new(0.5, 0.5));
        let p = Vec3::new(0.0, 0.0, -10.0);
        let full = cam.projection().project_point3(p);
        let cropped = m.project_point3(p);
        assert!(full.x.abs() < 1e-6);
        assert!((cropped.x + 1.0).abs() < 1e-5);
        assert!((cropped.y + 1.0).abs() < 1e-5);
        assert!((cropped.z - full.z).abs() < 1e-6);
    }

    #[test]
    fn orbit_keeps_the_distance() {
        let mut cam = camera();
        let before = cam.eye.distance(cam.target);
        cam.orbit(Vec2::new(0.4, -0.2));
        assert!((cam.eye.distance(cam.target) - before).abs() < 1e-3);
        assert!((cam.up.length() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn gpu_data_normalizes_the_light() {
        let data = camera().gpu_data(Vec3::new(0.0, 3.0, 4.0));
        let light = Vec4::from_array(data.light_dir);
        assert!(light.abs_diff_eq(Vec4::new(0.0, 0.6, 0.8, 0.0), 1e-6));
        assert_eq!(data.position, [0.0, 0.0, 50.0, 1.0]);
    }
}
