//! Rewrites the kube-config written by `minikube start` so it works from anywhere on the network.
//!
//! minikube references its certificates by absolute path under its home directory and points the
//! server at the loopback address. Materialization mirrors the certificates into the project's
//! `.minikube/` directory, inlines them as `*-data` fields, and swaps the loopback address for
//! the host's outward-facing one.
//!
//! Each substitution is a plain text replacement. The label (`certificate-authority: `) is turned
//! into its `-data` form first, then the path that followed it is replaced by the base64 content.
//! Running it again over an already rewritten file finds neither the labels nor the paths nor the
//! loopback address, so it changes nothing and succeeds.

use crate::environment::ProjectPaths;
use crate::error::DevError;
use base64::{engine::general_purpose, Engine as _};
use serde::Serialize;
use std::fs;
use std::io;
use std::net::{IpAddr, UdpSocket};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const LOOPBACK_ADDRESS: &str = "127.0.0.1";
const ROUTE_PROBE_TARGET: &str = "8.8.8.8:80";

#[derive(Debug, Clone)]
struct Certificate {
    label: &'static str,
    source: PathBuf,
    mirror: PathBuf,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MaterializeReport {
    pub kubeconfig: PathBuf,
    pub inlined: Vec<String>,
    pub host_address: String,
    pub server_rewritten: bool,
}

impl MaterializeReport {
    pub fn changed(&self) -> bool {
        !self.inlined.is_empty() || self.server_rewritten
    }
}

pub struct Materializer {
    kubeconfig: PathBuf,
    mirror_dir: PathBuf,
    certificates: Vec<Certificate>,
}

impl Materializer {
    pub fn for_minikube(paths: &ProjectPaths, minikube_home: &Path, profile: &str) -> Self {
        let mirror_dir = paths.minikube_state();
        let profile_dir = minikube_home.join("profiles").join(profile);
        let certificates = vec![
            Certificate {
                label: "certificate-authority",
                source: minikube_home.join("ca.crt"),
                mirror: mirror_dir.join("ca.crt"),
            },
            Certificate {
                label: "client-certificate",
                source: profile_dir.join("client.crt"),
                mirror: mirror_dir.join("client.crt"),
            },
            Certificate {
                label: "client-key",
                source: profile_dir.join("client.key"),
                mirror: mirror_dir.join("client.key"),
            },
        ];
        Self {
            kubeconfig: paths.kubeconfig(),
            mirror_dir,
            certificates,
        }
    }

    pub fn materialize(&self, host_address: &str) -> Result<MaterializeReport, DevError> {
        if !self.kubeconfig.is_file() {
            return Err(DevError::MissingArtifact(format!(
                "expected minikube to write the kube-config file at {}, but it does not exist",
                self.kubeconfig.display()
            )));
        }
        fs::create_dir_all(&self.mirror_dir)?;

        let mut inlined = Vec::new();
        for cert in &self.certificates {
            mirror_certificate(&cert.source, &cert.mirror)?;
            let content = fs::read(&cert.mirror)?;
            let label_changed = replace_in_file(
                &self.kubeconfig,
                &format!("{}: ", cert.label),
                &format!("{}-data: ", cert.label),
            )?;
            let path_changed = replace_in_file(
                &self.kubeconfig,
                &cert.source.to_string_lossy(),
                &general_purpose::STANDARD.encode(&content),
            )?;
            debug!(
                label = cert.label,
                label_changed, path_changed, "inlined certificate into kube-config"
            );
            if label_changed || path_changed {
                inlined.push(cert.label.to_string());
            }
        }

        let server_rewritten = replace_in_file(&self.kubeconfig, LOOPBACK_ADDRESS, host_address)?;
        Ok(MaterializeReport {
            kubeconfig: self.kubeconfig.clone(),
            inlined,
            host_address: host_address.to_string(),
            server_rewritten,
        })
    }
}

fn mirror_certificate(source: &Path, mirror: &Path) -> Result<(), DevError> {
    fs::copy(source, mirror).map_err(|err| {
        if err.kind() == io::ErrorKind::NotFound {
            DevError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("minikube certificate {} does not exist", source.display()),
            ))
        } else {
            DevError::Io(err)
        }
    })?;
    Ok(())
}

/// Replaces every occurrence of `pattern`; the file is only rewritten when something changed.
pub fn replace_in_file(path: &Path, pattern: &str, replacement: &str) -> Result<bool, DevError> {
    if pattern.is_empty() || pattern == replacement {
        return Ok(false);
    }
    let content = fs::read_to_string(path)?;
    if !content.contains(pattern) {
        return Ok(false);
    }
    fs::write(path, content.replace(pattern, replacement))?;
    Ok(true)
}

/// The local address the kernel would use to reach the public internet. Connecting a UDP socket
/// only selects a route; nothing is sent.
pub fn outbound_address() -> io::Result<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.connect(ROUTE_PROBE_TARGET)?;
    Ok(socket.local_addr()?.ip())
}
