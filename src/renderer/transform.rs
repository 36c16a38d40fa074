//! Pure transform composition on top of glam.
//!
//! Matrices are column-major and act on column vectors, so a transform that
//! applies `A` first and then `B` is written `B * A`.

use glam::{Mat4, Vec3, Vec4};

pub fn make_identity() -> Mat4 {
    Mat4::IDENTITY
}

pub fn add(a: &Mat4, b: &Mat4) -> Mat4 {
    *a + *b
}

pub fn subtract(a: &Mat4, b: &Mat4) -> Mat4 {
    *a - *b
}

/// Applies `first`, then `second`
pub fn multiply(first: &Mat4, second: &Mat4) -> Mat4 {
    *second * *first
}

pub fn inverse(m: &Mat4) -> Mat4 {
    m.inverse()
}

pub fn transpose(m: &Mat4) -> Mat4 {
    m.transpose()
}

pub fn make_scale(scale: Vec3) -> Mat4 {
    Mat4::from_scale(scale)
}

pub fn make_translate(translate: Vec3) -> Mat4 {
    Mat4::from_translation(translate)
}

pub fn make_rotate_x(radians: f32) -> Mat4 {
    Mat4::from_rotation_x(radians)
}

pub fn make_rotate_y(radians: f32) -> Mat4 {
    Mat4::from_rotation_y(radians)
}

pub fn make_rotate_z(radians: f32) -> Mat4 {
    Mat4::from_rotation_z(radians)
}

/// Rotation about X, then Y, then Z
pub fn make_rotate_xyz(rotate: Vec3) -> Mat4 {
    make_rotate_z(rotate.z) * make_rotate_y(rotate.y) * make_rotate_x(rotate.x)
}

/// Scale, then rotate, then translate
pub fn make_affine_matrix(scale: Vec3, rotate: Vec3, translate: Vec3) -> Mat4 {
    make_translate(translate) * make_rotate_xyz(rotate) * make_scale(scale)
}

/// Right-handed perspective projection with a [0, 1] depth range
pub fn make_perspective_fov(fov_y: f32, aspect_ratio: f32, near: f32, far: f32) -> Mat4 {
    Mat4::perspective_rh(fov_y, aspect_ratio, near, far)
}

pub fn make_orthographic(
    left: f32,
    top: f32,
    right: f32,
    bottom: f32,
    near: f32,
    far: f32,
) -> Mat4 {
    Mat4::orthographic_rh(left, right, bottom, top, near, far)
}

/// Maps normalized device coordinates to window coordinates with y pointing down
pub fn make_viewport(
    left: f32,
    top: f32,
    width: f32,
    height: f32,
    min_depth: f32,
    max_depth: f32,
) -> Mat4 {
    Mat4::from_cols(
        Vec4::new(width * 0.5, 0.0, 0.0, 0.0),
        Vec4::new(0.0, -height * 0.5, 0.0, 0.0),
        Vec4::new(0.0, 0.0, max_depth - min_depth, 0.0),
        Vec4::new(left + width * 0.5, top + height * 0.5, min_depth, 1.0),
    )
}

/// Transforms a point, including the perspective divide
pub fn transform_point(point: Vec3, m: &Mat4) -> Vec3 {
    m.project_point3(point)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_2;

    const EPS: f32 = 1e-5;

    #[test]
    fn test_affine_is_scale_then_rotate_then_translate() {
        let scale = Vec3::new(2.0, 3.0, 4.0);
        let rotate = Vec3::new(0.3, -1.1, 0.7);
        let translate = Vec3::new(5.0, -6.0, 7.0);

        let composed = multiply(
            &multiply(&make_scale(scale), &make_rotate_xyz(rotate)),
            &make_translate(translate),
        );
        let affine = make_affine_matrix(scale, rotate, translate);
        assert!(affine.abs_diff_eq(composed, EPS));

        let p = Vec3::new(1.0, 1.0, 1.0);
        let by_steps = transform_point(
            transform_point(transform_point(p, &make_scale(scale)), &make_rotate_xyz(rotate)),
            &make_translate(translate),
        );
        assert!(transform_point(p, &affine).abs_diff_eq(by_steps, 1e-4));
    }

    #[test]
    fn test_identity_is_a_no_op() {
        let m = make_affine_matrix(
            Vec3::new(1.5, 0.5, 2.0),
            Vec3::new(0.1, 0.2, 0.3),
            Vec3::new(-1.0, 4.0, 9.0),
        );
        assert!(multiply(&m, &make_identity()).abs_diff_eq(m, EPS));
        assert!(multiply(&make_identity(), &m).abs_diff_eq(m, EPS));
        assert!(multiply(&m, &inverse(&m)).abs_diff_eq(make_identity(), 1e-4));
    }

    #[test]
    fn test_rotate_xyz_applies_x_first() {
        // X quarter turn takes +Y to +Z, then the Z quarter turn leaves +Z alone
        let m = make_rotate_xyz(Vec3::new(FRAC_PI_2, 0.0, FRAC_PI_2));
        let p = transform_point(Vec3::Y, &m);
        assert!(p.abs_diff_eq(Vec3::Z, EPS));
    }

    #[test]
    fn test_viewport_maps_ndc_corners() {
        let vp = make_viewport(0.0, 0.0, 1280.0, 720.0, 0.0, 1.0);
        let top_left = transform_point(Vec3::new(-1.0, 1.0, 0.0), &vp);
        let bottom_right = transform_point(Vec3::new(1.0, -1.0, 1.0), &vp);
        assert!(top_left.abs_diff_eq(Vec3::new(0.0, 0.0, 0.0), EPS));
        assert!(bottom_right.abs_diff_eq(Vec3::new(1280.0, 720.0, 1.0), EPS));
    }

    #[test]
    fn test_add_subtract_and_transpose() {
        let a = make_translate(Vec3::new(1.0, 2.0, 3.0));
        let b = make_scale(Vec3::splat(2.0));
        assert!(subtract(&add(&a, &b), &b).abs_diff_eq(a, EPS));
        assert!(transpose(&transpose(&a)).abs_diff_eq(a, EPS));
    }

    #[test]
    fn test_orthographic_maps_screen_rect_to_ndc() {
        let m = make_orthographic(0.0, 0.0, 1280.0, 720.0, 0.0, 100.0);
        let p = transform_point(Vec3::new(1280.0, 720.0, 0.0), &m);
        assert!((p.x - 1.0).abs() < EPS);
        assert!((p.y + 1.0).abs() < EPS);
    }
}
