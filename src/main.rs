#![deny(rust_2018_idioms)]
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Serialize;

use openxr_hmd::{
    load_config,
    vrapi::{SystemProperties, ViewDescriptor},
    Hmd, OpenXr, Resolution,
};

/// Connect to the OpenXR runtime and describe the headset.
#[derive(argh::FromArgs)]
struct Args {
    /// configuration file, on top of the one in the XDG config directory
    #[argh(option)]
    config: Option<PathBuf>,
    /// use the seated reference space
    #[argh(switch)]
    seated: bool,
    /// print the report as JSON
    #[argh(switch)]
    json: bool,
    /// print the effective configuration and exit
    #[argh(switch)]
    print_config: bool,
}

#[derive(Serialize)]
struct Report<'a> {
    runtime: &'a str,
    runtime_version: String,
    reference_space: &'static str,
    system: Option<&'a SystemProperties>,
    views: &'a [ViewDescriptor],
    resolution: Resolution,
}

fn main() -> Result<()> {
    let args: Args = argh::from_env();
    let mut cfg = load_config(args.config.as_deref()).context("cannot load configuration")?;
    cfg.seated |= args.seated;
    if cfg.debug.verbose {
        std::env::set_var("RUST_LOG", "debug");
    }
    env_logger::init();

    if args.print_config {
        print!("{}", toml::to_string(&cfg)?);
        return Ok(());
    }

    let runtime = OpenXr::new().context("cannot load the OpenXR loader")?;
    let mut hmd = Hmd::with_config(runtime, &cfg);
    hmd.init().context("cannot connect to the headset")?;

    let report = Report {
        runtime: hmd.runtime_name(),
        runtime_version: hmd.runtime_version(),
        reference_space: hmd.reference_space_type(),
        system: hmd.system_properties(),
        views: hmd.view_descriptors(),
        resolution: hmd.resolution(),
    };
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("runtime: {} {}", report.runtime, report.runtime_version);
        if let Some(system) = report.system {
            println!("headset: {} (vendor {:#x})", system.name, system.vendor_id);
        }
        println!("reference space: {}", report.reference_space);
        for (i, v) in report.views.iter().enumerate() {
            println!(
                "view {i}: {}x{} recommended, {}x{} max",
                v.recommended_width, v.recommended_height, v.max_width, v.max_height
            );
        }
        println!(
            "render resolution: {}x{}",
            report.resolution.width, report.resolution.height
        );
    }

    hmd.terminate().context("cannot disconnect from the runtime")?;
    Ok(())
}
