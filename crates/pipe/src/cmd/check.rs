//! Check command - Validate and print the effective configuration

use std::path::Path;

use anyhow::Result;
use pipe_config::Config;

/// Print the configuration that was loaded (and validated) by `main`
pub fn run(config: &Config, path: Option<&Path>) -> Result<()> {
    match path {
        Some(path) => println!("Configuration {} is valid", path.display()),
        None => println!("No configuration file given, using defaults"),
    }
    println!();
    println!("{config:#?}");
    Ok(())
}
