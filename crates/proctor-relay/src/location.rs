//! External location lookups
//!
//! Locations come from an external executable invoked with
//! (hostname, clientName, hardwareAddress); it prints the location string on
//! stdout. Any failure yields the empty string, which also feeds the
//! `sameLocation` ACL filter as "unknown".

use std::path::PathBuf;
use tokio::process::Command;

/// Wrapper around the configured location command
pub struct LocationResolver {
    command: PathBuf,
}

impl LocationResolver {
    pub fn new(command: PathBuf) -> Self {
        Self { command }
    }

    pub async fn lookup(&self, server: &str, client: &str, hwaddr: &str) -> String {
        let output = Command::new(&self.command)
            .arg(server)
            .arg(client)
            .arg(hwaddr)
            .output()
            .await;

        match output {
            Ok(out) if out.status.success() => String::from_utf8_lossy(&out.stdout)
                .trim_end()
                .to_string(),
            Ok(out) => {
                tracing::debug!(
                    "location lookup for {} exited with {}",
                    server,
                    out.status
                );
                String::new()
            }
            Err(e) => {
                tracing::debug!("location lookup for {} failed: {}", server, e);
                String::new()
            }
        }
    }
}
