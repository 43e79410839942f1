//! Video processing between decoder and encoder
//!
//! - `FrameDropper`: frame rate reduction by dropping decoded frames
//! - `FrameRenderer`: the opaque capability drawing a decoded frame (scaled
//!   to the output size) into the encoder input

pub mod frame_dropper;
pub mod renderer;

pub use frame_dropper::FrameDropper;
pub use renderer::{CopyFrameRenderer, FrameRenderer};
