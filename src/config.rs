use std::{path::Path, time::Duration};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::swapchain::Resolution;

pub const CONFIG_FILE: &str = "openxr_hmd.toml";
pub const ENV_PREFIX: &str = "OPENXR_HMD";

pub const fn default_swapchain_wait_timeout() -> Duration {
    Duration::from_secs(1)
}
pub const fn default_transition_poll_interval() -> Duration {
    Duration::from_millis(1)
}
pub fn default_application_name() -> String {
    "openxr_hmd".to_owned()
}

#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct SessionConfig {
    /// how long to wait for a swapchain image to become available before giving up on the frame
    #[serde(default = "default_swapchain_wait_timeout", with = "humantime_serde")]
    pub swapchain_wait_timeout: Duration,
    /// how long to sleep between event polls while waiting for the session to end
    #[serde(default = "default_transition_poll_interval", with = "humantime_serde")]
    pub transition_poll_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            swapchain_wait_timeout: default_swapchain_wait_timeout(),
            transition_poll_interval: default_transition_poll_interval(),
        }
    }
}

#[derive(Clone, PartialEq, Debug, Serialize, Deserialize, Default)]
pub struct DebugConfig {
    /// log at debug level, overriding RUST_LOG
    #[serde(default)]
    pub verbose: bool,
    #[serde(default)]
    pub print_api_layers: bool,
    #[serde(default)]
    pub print_runtime_extensions: bool,
    #[serde(default)]
    pub print_system_properties: bool,
    #[serde(default)]
    pub print_view_configurations: bool,
}

/// OpenXR headset
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct Config {
    /// name the runtime shows for us
    #[serde(default = "default_application_name")]
    pub application_name: String,
    /// seated experience, poses are relative to the initial head position instead of the floor
    #[serde(default)]
    pub seated: bool,
    /// per eye render resolution. the runtime's recommendation if not set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub debug: DebugConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            application_name: default_application_name(),
            seated: false,
            resolution: None,
            session: Default::default(),
            debug: Default::default(),
        }
    }
}

fn environment() -> ::config::Environment {
    ::config::Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .try_parsing(true)
}

/// Load the configuration from, in increasing priority: the config file in the XDG config
/// directory, `path`, and `OPENXR_HMD__*` environment variables.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let xdgdir = xdg::BaseDirectories::new()?;
    let mut builder = ::config::Config::builder();
    if let Some(f) = xdgdir.find_config_file(CONFIG_FILE) {
        log::debug!("loading config from {}", f.display());
        builder = builder.add_source(::config::File::from(f).format(::config::FileFormat::Toml));
    }
    if let Some(path) = path {
        builder =
            builder.add_source(::config::File::from(path).format(::config::FileFormat::Toml));
    }
    Ok(builder
        .add_source(environment())
        .build()?
        .try_deserialize()?)
}
