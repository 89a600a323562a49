//! Lock-free listener/source position, readable from the audio thread
//! without allocating or blocking.

use std::sync::atomic::{AtomicU32, Ordering};

/// Azimuth, elevation, and distance of a sound source relative to the
/// listener, stored as bit-cast `f32`s in `AtomicU32`s. Any thread may
/// update position (e.g. a game/UI thread); the audio thread reads it
/// once per block with a relaxed load, matching the plain-atomic
/// position fields this type is modeled on.
pub struct Source {
    azimuth: AtomicU32,
    elevation: AtomicU32,
    distance: AtomicU32,
}

impl Source {
    pub fn new(azimuth: f32, elevation: f32, distance: f32) -> Self {
        Self {
            azimuth: AtomicU32::new(azimuth.to_bits()),
            elevation: AtomicU32::new(elevation.to_bits()),
            distance: AtomicU32::new(distance.to_bits()),
        }
    }

    pub fn azimuth(&self) -> f32 {
        f32::from_bits(self.azimuth.load(Ordering::Relaxed))
    }

    pub fn elevation(&self) -> f32 {
        f32::from_bits(self.elevation.load(Ordering::Relaxed))
    }

    pub fn distance(&self) -> f32 {
        f32::from_bits(self.distance.load(Ordering::Relaxed))
    }

    pub fn set_azimuth(&self, value: f32) {
        self.azimuth.store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn set_elevation(&self, value: f32) {
        self.elevation.store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn set_distance(&self, value: f32) {
        self.distance.store(value.to_bits(), Ordering::Relaxed);
    }

    /// Linear distance attenuation, clamped to silence beyond 1.0 units.
    pub fn volume(&self) -> f32 {
        (1.0 - self.distance()).max(0.0)
    }
}

impl Default for Source {
    fn default() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }
}
