// Domain layer: models, manifest parsing and ports. Nothing here spawns processes.

pub mod manifest;
pub mod model;
pub mod ports;
