//! Fly camera input controller for the demo scene.
//!
//! WASD moves in the view plane, Q/E move down/up, arrows or mouse motion
//! with the right button held turn the view. Left shift moves faster.

use std::collections::HashSet;
use std::f32::consts::FRAC_PI_2;

use lumen_core::input::{Input, InputEvent, KeyCode, MouseButton};
use lumen_core::math::{UnitQuat, Vec3, quat_from_euler};
use lumen_core::scene::Camera;

/// Radians of turn per pixel of mouse motion.
const MOUSE_SENSITIVITY: f32 = 0.003;
const PITCH_LIMIT: f32 = FRAC_PI_2 - 0.05;

pub struct FlyCamera {
    pub camera: Camera,
    /// Units per second.
    pub speed: f32,
    pub fast_multiplier: f32,
    /// Radians per second when turning with the arrow keys.
    pub turn_speed: f32,
    held: HashSet<KeyCode>,
    looking: bool,
}

impl FlyCamera {
    pub fn new(camera: Camera) -> Self {
        Self {
            camera,
            speed: 3.0,
            fast_multiplier: 4.0,
            turn_speed: 1.5,
            held: HashSet::new(),
            looking: false,
        }
    }

    pub fn handle(&mut self, event: &InputEvent) {
        match event.input {
            Input::Key(key) => {
                if event.data > 0.0 {
                    self.held.insert(key);
                } else {
                    self.held.remove(&key);
                }
            }
            Input::MouseButton(MouseButton::Right) => self.looking = event.data > 0.0,
            Input::MouseX if self.looking => self.turn(event.data * MOUSE_SENSITIVITY, 0.0),
            Input::MouseY if self.looking => self.turn(0.0, event.data * MOUSE_SENSITIVITY),
            _ => {}
        }
    }

    /// Apply held keys for `delta_seconds`.
    pub fn update(&mut self, delta_seconds: f32) {
        let axis = |positive: KeyCode, negative: KeyCode| -> f32 {
            let mut value = 0.0;
            if self.held.contains(&positive) {
                value += 1.0;
            }
            if self.held.contains(&negative) {
                value -= 1.0;
            }
            value
        };

        let yaw = axis(KeyCode::ArrowRight, KeyCode::ArrowLeft);
        let pitch = axis(KeyCode::ArrowDown, KeyCode::ArrowUp);
        let forward = axis(KeyCode::W, KeyCode::S);
        let right = axis(KeyCode::D, KeyCode::A);
        let up = axis(KeyCode::E, KeyCode::Q);

        self.turn(
            yaw * self.turn_speed * delta_seconds,
            pitch * self.turn_speed * delta_seconds,
        );

        let mut speed = self.speed * delta_seconds;
        if self.held.contains(&KeyCode::ShiftLeft) {
            speed *= self.fast_multiplier;
        }
        let rotation = rotation_of(self.camera.rotation);
        let movement = rotation * Vec3::new(right, 0.0, forward) + Vec3::new(0.0, up, 0.0);
        if movement.norm_squared() > 0.0 {
            self.camera.position += movement.normalize() * speed;
        }
    }

    fn turn(&mut self, yaw: f32, pitch: f32) {
        self.camera.rotation.y += yaw;
        self.camera.rotation.x = (self.camera.rotation.x + pitch).clamp(-PITCH_LIMIT, PITCH_LIMIT);
    }

    /// Unit vector the camera looks along.
    pub fn forward(&self) -> Vec3 {
        rotation_of(self.camera.rotation) * Vec3::new(0.0, 0.0, 1.0)
    }
}

fn rotation_of(euler: Vec3) -> UnitQuat {
    UnitQuat::new_unchecked(quat_from_euler(euler))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: Vec3, b: Vec3) -> bool {
        (a - b).norm() < 1e-4
    }

    #[test]
    fn test_forward_moves_along_view() {
        let mut fly = FlyCamera::new(Camera::new(Vec3::new(0.0, 0.0, -5.0)));
        fly.handle(&InputEvent::key(KeyCode::W, true, false));
        fly.update(1.0);
        assert!(approx(fly.camera.position, Vec3::new(0.0, 0.0, -2.0)));

        fly.handle(&InputEvent::key(KeyCode::W, false, false));
        fly.update(1.0);
        assert!(approx(fly.camera.position, Vec3::new(0.0, 0.0, -2.0)));
    }

    #[test]
    fn test_mouse_look_needs_right_button() {
        let mut fly = FlyCamera::new(Camera::default());
        fly.handle(&InputEvent::axis(Input::MouseX, 100.0));
        assert_eq!(fly.camera.rotation.y, 0.0);

        fly.handle(&InputEvent {
            repeated: false,
            input: Input::MouseButton(MouseButton::Right),
            port: 0,
            data: 1.0,
        });
        fly.handle(&InputEvent::axis(Input::MouseX, 100.0));
        assert!((fly.camera.rotation.y - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_pitch_is_clamped() {
        let mut fly = FlyCamera::new(Camera::default());
        fly.handle(&InputEvent::key(KeyCode::ArrowDown, true, false));
        fly.update(10.0);
        assert!((fly.camera.rotation.x - PITCH_LIMIT).abs() < 1e-6);
    }

    #[test]
    fn test_default_forward_is_positive_z() {
        let fly = FlyCamera::new(Camera::default());
        assert!(approx(fly.forward(), Vec3::new(0.0, 0.0, 1.0)));
    }
}
