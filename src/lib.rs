#![deny(rust_2018_idioms)]
pub mod config;
pub mod events;
pub mod hmd;
pub mod pose;
pub mod refresh;
pub mod swapchain;
mod utils;
pub mod vrapi;

pub use crate::{
    config::{load_config, Config},
    events::{SessionState, SessionStatus},
    hmd::{Hmd, HmdError},
    pose::{AngleUnit, Eye},
    refresh::FrameRefreshReport,
    swapchain::Resolution,
    vrapi::{GraphicsBinding, OpenXr, XrRuntime},
};
