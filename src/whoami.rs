//! IdentityPrinter: emit the local public identity.

use anyhow::Result;

use crate::config::Config;
use crate::keystore;

/// Load (or create) the local identity and return its feed id.
pub fn run_whoami(config: &Config) -> Result<String> {
    let identity = keystore::load_or_create(&config.identity.path)?;
    Ok(identity.id().to_string())
}
