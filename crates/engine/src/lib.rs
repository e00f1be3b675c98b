//! Authoritative voxel storage for cubesync.
//!
//! - [`registry`]: lookup tables with a not-found fallback.
//! - [`world`]: block types and their referrer, cubic chunks, and the [`world::Map`]
//!   that generates, caches and persists them.
//! - [`save`]: save directory layout and descriptor.

pub mod registry;
pub mod save;
pub mod world;
