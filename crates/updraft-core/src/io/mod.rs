//! IO modules - side effects (network, archives, binary patches)

pub mod container;
pub mod download;
pub mod patch;
