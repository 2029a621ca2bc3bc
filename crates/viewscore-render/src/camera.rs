//! Orbit camera around the origin.

use nalgebra::{Matrix4, Point3, Vector3};
use viewscore_core::Pose;

const Z_NEAR: f32 = 0.01;
const Z_FAR: f32 = 100.0;

/// Perspective camera on a sphere of `radius` looking at the origin.
///
/// Elevation is in degrees with negative values looking down from above;
/// azimuth 0 sits on +z and looks at the asset's front.
#[derive(Debug, Clone, Copy)]
pub struct OrbitCamera {
    pub radius: f32,
    /// Vertical field of view in degrees
    pub fovy: f32,
    pub pose: Pose,
}

impl OrbitCamera {
    pub fn new(radius: f32, fovy: f32) -> Self {
        Self {
            radius,
            fovy,
            pose: Pose::new(0.0, 0.0),
        }
    }

    pub fn eye(&self) -> Point3<f32> {
        let e = self.pose.elevation.to_radians() as f32;
        let a = self.pose.azimuth.to_radians() as f32;
        Point3::new(
            self.radius * e.cos() * a.sin(),
            -self.radius * e.sin(),
            self.radius * e.cos() * a.cos(),
        )
    }

    fn up(&self) -> Vector3<f32> {
        let e = self.pose.elevation.to_radians() as f32;
        if e.cos().abs() > 1e-4 {
            return Vector3::y();
        }
        // Straight above/below: orient screen-up toward the azimuth direction.
        let a = self.pose.azimuth.to_radians() as f32;
        let toward = Vector3::new(-a.sin(), 0.0, -a.cos());
        if e.sin() < 0.0 {
            toward
        } else {
            -toward
        }
    }

    pub fn view(&self) -> Matrix4<f32> {
        Matrix4::look_at_rh(&self.eye(), &Point3::origin(), &self.up())
    }

    pub fn projection(&self, aspect: f32) -> Matrix4<f32> {
        Matrix4::new_perspective(aspect, self.fovy.to_radians(), Z_NEAR, Z_FAR)
    }

    pub fn view_projection(&self, aspect: f32) -> Matrix4<f32> {
        self.projection(aspect) * self.view()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector4;

    #[test]
    fn front_view_sits_on_positive_z() {
        let cam = OrbitCamera::new(3.0, 50.0);
        let eye = cam.eye();
        assert!((eye - Point3::new(0.0, 0.0, 3.0)).norm() < 1e-5);
    }

    #[test]
    fn negative_elevation_is_above() {
        let mut cam = OrbitCamera::new(3.0, 50.0);
        cam.pose = Pose::new(-30.0, 0.0);
        assert!(cam.eye().y > 0.0);
        assert!((cam.eye().coords.norm() - 3.0).abs() < 1e-5);
    }

    #[test]
    fn azimuth_90_sits_on_positive_x() {
        let mut cam = OrbitCamera::new(2.0, 50.0);
        cam.pose = Pose::new(0.0, 90.0);
        assert!((cam.eye() - Point3::new(2.0, 0.0, 0.0)).norm() < 1e-5);
    }

    #[test]
    fn origin_projects_to_screen_centre() {
        for pose in [Pose::new(0.0, 0.0), Pose::new(-15.0, 135.0), Pose::new(-90.0, 0.0)] {
            let mut cam = OrbitCamera::new(3.0, 50.0);
            cam.pose = pose;
            let clip = cam.view_projection(1.0) * Vector4::new(0.0, 0.0, 0.0, 1.0);
            assert!(clip.w > 0.0);
            assert!((clip.x / clip.w).abs() < 1e-5 && (clip.y / clip.w).abs() < 1e-5);
        }
    }
}
