//! Device orientation feed behind `u_orientation`.

use std::fmt;

use doodle_core::uniforms::{orientation_uniforms, ORIENTATION};
use doodle_core::{UniformState, UniformValue};
use doodle_loader::{Liveness, Pending};

/// Host-provided orientation sensor (alpha, beta, gamma in degrees).
pub trait OrientationSensor {
    /// Ask for access. Hosts without a prompt return an already granted result.
    fn request_permission(&mut self, liveness: Liveness) -> Pending<bool>;

    /// Most recent reading since the last call, if any.
    fn latest(&mut self) -> Option<[f32; 3]>;
}

#[derive(Debug)]
enum Permission {
    Idle,
    Requested(Pending<bool>),
    Granted,
    Denied,
}

pub struct OrientationFeed {
    sensor: Option<Box<dyn OrientationSensor>>,
    permission: Permission,
    uniforms: Vec<UniformState>,
    liveness: Liveness,
}

impl fmt::Debug for OrientationFeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrientationFeed")
            .field("sensor", &self.sensor.is_some())
            .field("permission", &self.permission)
            .field("uniforms", &self.uniforms)
            .finish()
    }
}

impl Default for OrientationFeed {
    fn default() -> Self {
        Self::new(None)
    }
}

impl OrientationFeed {
    pub fn new(sensor: Option<Box<dyn OrientationSensor>>) -> Self {
        Self {
            sensor,
            permission: Permission::Idle,
            uniforms: orientation_uniforms(),
            liveness: Liveness::new(),
        }
    }

    pub fn set_sensor(&mut self, sensor: Box<dyn OrientationSensor>) {
        self.sensor = Some(sensor);
        self.permission = Permission::Idle;
    }

    /// Request sensor access. Only the first call does anything.
    pub fn request(&mut self) {
        if !matches!(self.permission, Permission::Idle) {
            return;
        }
        self.permission = match self.sensor.as_mut() {
            Some(sensor) => Permission::Requested(sensor.request_permission(self.liveness.clone())),
            None => {
                tracing::debug!("no orientation sensor; u_orientation stays zero");
                Permission::Denied
            }
        };
    }

    pub fn is_granted(&self) -> bool {
        matches!(self.permission, Permission::Granted)
    }

    /// Resolve a pending permission and pull the latest reading.
    pub fn tick(&mut self) {
        if let Permission::Requested(pending) = &mut self.permission {
            match pending.try_take() {
                Some(Ok(true)) => {
                    tracing::debug!("orientation permission granted");
                    self.permission = Permission::Granted;
                }
                Some(Ok(false)) => {
                    tracing::info!("orientation permission refused");
                    self.permission = Permission::Denied;
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "orientation permission request failed");
                    self.permission = Permission::Denied;
                }
                None => {}
            }
        }

        if !self.is_granted() {
            return;
        }
        if let Some(reading) = self.sensor.as_mut().and_then(|s| s.latest()) {
            self.set_reading(reading);
        }
    }

    pub fn set_reading(&mut self, [alpha, beta, gamma]: [f32; 3]) {
        self.uniforms[ORIENTATION].value.assign(&UniformValue::Vec3([alpha, beta, gamma]));
    }

    pub fn uniforms(&self) -> &[UniformState] {
        &self.uniforms
    }

    pub fn dispose(&mut self) {
        self.liveness.kill();
        self.sensor = None;
        self.permission = Permission::Denied;
    }
}
