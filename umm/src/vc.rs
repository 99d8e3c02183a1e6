// SPDX-License-Identifier: BSD-3-Clause

//! The virtual-circuit provisioner: an external, synchronous command that
//! builds or tears down an AL2S-style circuit between two endpoints. The
//! core treats it as a black box and captures only the circuit id it
//! prints to stdout.

use std::path::Path;
use std::process::Command;

use umm_core::Error;

use crate::entry::VcEndpoint;

/// Invokes `command` to build a circuit from `local` to `remote`, returning
/// the circuit id it prints on success. `workgroup` and `description` are
/// passed through unopinionated; the command's own argument contract is
/// out of scope here.
pub fn provision(
    command: &Path,
    workgroup: &str,
    description: &str,
    local: &VcEndpoint,
    remote: &VcEndpoint,
) -> Result<String, Error> {
    let output = Command::new(command)
        .arg("provision")
        .arg("--workgroup")
        .arg(workgroup)
        .arg("--description")
        .arg(description)
        .arg("--local-switch")
        .arg(&local.switch_id)
        .arg("--local-port")
        .arg(&local.port_id)
        .arg("--local-vlan")
        .arg(local.vlan_id.to_string())
        .arg("--remote-switch")
        .arg(&remote.switch_id)
        .arg("--remote-port")
        .arg(&remote.port_id)
        .arg("--remote-vlan")
        .arg(remote.vlan_id.to_string())
        .output()
        .map_err(|e| Error::system_io(format!("exec {}", command.display()), e))?;

    if !output.status.success() {
        return Err(Error::system(format!(
            "{} exited with {}: {}",
            command.display(),
            output.status,
            String::from_utf8_lossy(&output.stderr)
        )));
    }

    let circuit_id = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if circuit_id.is_empty() {
        return Err(Error::logic(format!(
            "{} printed no circuit id",
            command.display()
        )));
    }
    Ok(circuit_id)
}

/// Tears down a circuit previously returned by [`provision`].
pub fn destroy(command: &Path, circuit_id: &str) -> Result<(), Error> {
    let output = Command::new(command)
        .arg("destroy")
        .arg("--circuit")
        .arg(circuit_id)
        .output()
        .map_err(|e| Error::system_io(format!("exec {}", command.display()), e))?;

    if !output.status.success() {
        return Err(Error::system(format!(
            "{} exited with {}: {}",
            command.display(),
            output.status,
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(())
}
