//! Angle conversion helpers shared by the chain, the solver, and the motion
//! controllers.

use std::f32::consts::PI;

/// Converts `degrees` to radians.
#[must_use]
pub fn degrees_to_radians(degrees: f32) -> f32 {
    degrees * PI / 180.0
}

/// Converts `radians` to degrees.
#[must_use]
pub fn radians_to_degrees(radians: f32) -> f32 {
    radians * 180.0 / PI
}

/// Wraps `degrees` into `0.0..360.0`.
#[must_use]
pub fn normalize_degrees(degrees: f32) -> f32 {
    let normalized = degrees.rem_euclid(360.0);
    // rem_euclid rounds tiny negative inputs up to exactly 360.
    if normalized >= 360.0 {
        0.
    } else {
        normalized
    }
}

/// Converts a physics-engine joint angle (unbounded radians) into normalized
/// degrees.
#[must_use]
pub fn box2d_angle_to_degrees(radians: f32) -> f32 {
    normalize_degrees(radians_to_degrees(radians))
}

/// Returns the signed rotation in degrees that takes `from` to `to` along the
/// shorter arc.
///
/// The result is always in `(-180.0, 180.0]`. Positive values rotate
/// counter-clockwise. When both arcs are equally long the counter-clockwise
/// arc is chosen.
#[must_use]
pub fn shortest_delta_degrees(from: f32, to: f32) -> f32 {
    let ccw = normalize_degrees(to - from);
    if ccw > 180.0 {
        ccw - 360.0
    } else {
        ccw
    }
}

#[test]
fn normalization() {
    assert!((normalize_degrees(-90.) - 270.).abs() < 1e-4);
    assert!((normalize_degrees(720.) - 0.).abs() < 1e-4);
    assert!(normalize_degrees(-1e-7) < 360.);
    assert!((box2d_angle_to_degrees(-PI / 2.) - 270.).abs() < 1e-3);
}

#[test]
fn shortest_delta() {
    assert!((shortest_delta_degrees(10., 350.) + 20.).abs() < 1e-4);
    assert!((shortest_delta_degrees(350., 10.) - 20.).abs() < 1e-4);
    assert!((shortest_delta_degrees(0., 180.) - 180.).abs() < 1e-4);
    assert!((shortest_delta_degrees(180., 0.) - 180.).abs() < 1e-4);
}
