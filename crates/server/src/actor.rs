use serde::{Deserialize, Serialize};
use vek::Vec3;

use crate::input::{InputState, MovementFlags};

/// Server-assigned identity of a connected player.
pub type ActorId = u32;

/// A player-controlled body in the world.
#[derive(Debug, Clone, PartialEq)]
pub struct Actor {
    pub id: ActorId,
    pub name: String,
    pub position: Vec3<f32>,
    pub yaw: f32,
    pub pitch: f32,
    /// Sequence number of the last input applied.
    pub last_input: Option<u64>,
}

impl Actor {
    pub fn new(id: ActorId, name: impl Into<String>, position: Vec3<f32>) -> Self {
        Self {
            id,
            name: name.into(),
            position,
            yaw: 0.0,
            pitch: 0.0,
            last_input: None,
        }
    }

    /// Apply one input for one tick: copy head rotation, then move
    /// `dt * speed` along the held directions.
    pub fn apply_input(&mut self, input: &InputState, dt: f32, speed: f32) {
        self.yaw = input.yaw;
        self.pitch = input.pitch;
        self.position += movement_direction(input.flags, input.yaw) * (dt * speed);
        self.last_input = Some(input.sequence);
    }

    pub fn state(&self) -> ActorState {
        ActorState {
            id: self.id,
            position: self.position.into_array(),
            yaw: self.yaw,
            pitch: self.pitch,
            last_input: self.last_input,
        }
    }
}

/// Unit vector (or zero) for the held movement keys at `yaw`.
///
/// Yaw 0 faces -Z with +X to the right; pitch never tilts movement.
pub fn movement_direction(flags: MovementFlags, yaw: f32) -> Vec3<f32> {
    let (sin, cos) = yaw.sin_cos();
    let forward = Vec3::new(-sin, 0.0, -cos);
    let right = Vec3::new(cos, 0.0, -sin);

    let mut dir = Vec3::zero();
    if flags.contains(MovementFlags::FORWARD) {
        dir += forward;
    }
    if flags.contains(MovementFlags::BACKWARD) {
        dir -= forward;
    }
    if flags.contains(MovementFlags::RIGHT) {
        dir += right;
    }
    if flags.contains(MovementFlags::LEFT) {
        dir -= right;
    }
    if flags.contains(MovementFlags::JUMP) {
        dir.y += 1.0;
    }
    if flags.contains(MovementFlags::CROUCH) {
        dir.y -= 1.0;
    }
    if dir.magnitude_squared() > f32::EPSILON {
        dir.normalized()
    } else {
        Vec3::zero()
    }
}

/// Canonical actor state as broadcast to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActorState {
    pub id: ActorId,
    pub position: [f32; 3],
    pub yaw: f32,
    pub pitch: f32,
    pub last_input: Option<u64>,
}

#[cfg(test)]
mod tests {
    use std::f32::consts::FRAC_PI_2;

    use super::*;

    fn close(a: Vec3<f32>, b: Vec3<f32>) -> bool {
        (a - b).magnitude() < 1e-5
    }

    #[test]
    fn forward_at_zero_yaw_is_negative_z() {
        let dir = movement_direction(MovementFlags::FORWARD, 0.0);
        assert!(close(dir, Vec3::new(0.0, 0.0, -1.0)), "{dir:?}");
        let dir = movement_direction(MovementFlags::RIGHT, 0.0);
        assert!(close(dir, Vec3::new(1.0, 0.0, 0.0)), "{dir:?}");
    }

    #[test]
    fn yaw_rotates_counter_clockwise() {
        let dir = movement_direction(MovementFlags::FORWARD, FRAC_PI_2);
        assert!(close(dir, Vec3::new(-1.0, 0.0, 0.0)), "{dir:?}");
    }

    #[test]
    fn diagonals_are_normalized_and_opposites_cancel() {
        let dir = movement_direction(MovementFlags::FORWARD | MovementFlags::RIGHT, 0.0);
        assert!((dir.magnitude() - 1.0).abs() < 1e-5);
        let none = movement_direction(MovementFlags::FORWARD | MovementFlags::BACKWARD, 0.3);
        assert_eq!(none, Vec3::zero());
        let up = movement_direction(MovementFlags::JUMP, 1.0);
        assert!(close(up, Vec3::unit_y()));
    }

    #[test]
    fn apply_input_moves_and_records_sequence() {
        let mut actor = Actor::new(1, "a", Vec3::new(0.0, 1.0, 0.0));
        let input = InputState {
            flags: MovementFlags::FORWARD,
            yaw: 0.0,
            pitch: 0.5,
            sequence: 9,
        };
        actor.apply_input(&input, 0.05, 4.0);
        assert!(close(actor.position, Vec3::new(0.0, 1.0, -0.2)));
        assert_eq!(actor.pitch, 0.5);
        assert_eq!(actor.last_input, Some(9));
    }
}
