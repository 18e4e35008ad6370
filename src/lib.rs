pub mod bridge;
pub mod config;
pub mod context;
pub mod engine;
pub mod expander;
pub mod mesh;
pub mod node;
pub mod output;

pub mod prelude {
    pub use crate::{
        bridge::*, config::*, context::*, engine::*, expander::*, mesh::*, node::*, output::*,
    };
    pub use common::{Command, EffectSpec, VirtualClock};
}
