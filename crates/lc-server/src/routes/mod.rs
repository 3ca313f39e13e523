//! Route handlers for the HTTP surfaces.

pub mod events;
pub mod health;
pub mod live;
pub mod playback;
pub mod tools;
