// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Self-signed server credentials
//!
//! Credentials live under the user configuration directory:
//!
//! ```text
//! <config>/libepc/certificates/<hostname>.pem
//! <config>/libepc/keys/<hostname>.pem
//! ```
//!
//! A persisted pair is reused while the certificate parses, names the host,
//! is within its validity period and belongs to the stored key. Anything else
//! is regenerated and written back.

use crate::progress::ProgressHooks;
use crate::TlsError;
use std::path::{Path, PathBuf};
use x509_parser::prelude::*;

/// Paths of a certificate/key pair in PEM format
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerCredentials {
    pub certificate: PathBuf,
    pub private_key: PathBuf,
}

/// Default credential directory, `<config>/libepc`
///
/// # Errors
///
/// Returns `TlsError::NoConfigDir` if the platform has no configuration directory.
pub fn credentials_dir() -> Result<PathBuf, TlsError> {
    dirs::config_dir()
        .map(|dir| dir.join("libepc"))
        .ok_or(TlsError::NoConfigDir)
}

/// Credentials for `hostname` from the default directory, generated on demand
///
/// # Errors
///
/// Fails if the directory is unavailable, files cannot be written, or key
/// generation fails.
pub fn get_server_credentials(hostname: &str) -> Result<ServerCredentials, TlsError> {
    get_server_credentials_with_progress(hostname, None, None)
}

/// Credentials for `hostname` below `dir` (default: [`credentials_dir`])
///
/// `hooks` hear about key generation when it happens.
///
/// # Errors
///
/// Fails if files cannot be written or key generation fails.
pub fn get_server_credentials_with_progress(
    hostname: &str,
    dir: Option<&Path>,
    hooks: Option<&dyn ProgressHooks>,
) -> Result<ServerCredentials, TlsError> {
    let dir = match dir {
        Some(dir) => dir.to_path_buf(),
        None => credentials_dir()?,
    };
    let file_name = format!("{}.pem", file_stem(hostname));
    let credentials = ServerCredentials {
        certificate: dir.join("certificates").join(&file_name),
        private_key: dir.join("keys").join(&file_name),
    };

    match validate(&credentials, hostname) {
        Ok(()) => {
            tracing::debug!(
                "Reusing server certificate {}",
                credentials.certificate.display()
            );
            return Ok(credentials);
        }
        Err(reason) => {
            tracing::info!("Generating server credentials for {hostname}: {reason}");
        }
    }

    let mut task = hooks.map(|hooks| hooks.begin("Generating server key"));
    let result = generate(&credentials, hostname, &mut |fraction, message| {
        if let Some(task) = task.as_mut() {
            task.update(fraction, message);
        }
    });
    if let Some(task) = task {
        task.end();
    }
    result?;

    Ok(credentials)
}

/// Why a persisted pair cannot be used, if it cannot
fn validate(credentials: &ServerCredentials, hostname: &str) -> Result<(), String> {
    let cert_pem = std::fs::read_to_string(&credentials.certificate)
        .map_err(|e| format!("no usable certificate ({e})"))?;
    let key_pem = std::fs::read_to_string(&credentials.private_key)
        .map_err(|e| format!("no usable private key ({e})"))?;

    let cert_der = pem::parse(&cert_pem)
        .map_err(|e| format!("certificate is not PEM ({e})"))?
        .into_contents();
    let (_, cert) = X509Certificate::from_der(&cert_der)
        .map_err(|e| format!("certificate does not parse ({e})"))?;

    let common_name = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok());
    if common_name != Some(hostname) {
        return Err(format!(
            "certificate names {}",
            common_name.unwrap_or("nobody")
        ));
    }
    if !cert.validity().is_valid() {
        return Err("certificate expired".to_string());
    }

    let key = rcgen::KeyPair::from_pem(&key_pem)
        .map_err(|e| format!("private key does not parse ({e})"))?;
    if key.public_key_der() != cert.public_key().raw {
        return Err("certificate does not match private key".to_string());
    }
    Ok(())
}

fn generate(
    credentials: &ServerCredentials,
    hostname: &str,
    progress: &mut dyn FnMut(Option<f64>, &str),
) -> Result<(), TlsError> {
    progress(None, "Generating private key");
    let key_pair = rcgen::KeyPair::generate()?;

    progress(Some(0.5), "Signing certificate");
    let mut params = rcgen::CertificateParams::new(vec![hostname.to_string()])?;
    params
        .distinguished_name
        .push(rcgen::DnType::CommonName, hostname.to_string());
    let cert = params.self_signed(&key_pair)?;

    progress(Some(0.9), "Storing credentials");
    write_file(&credentials.private_key, key_pair.serialize_pem().as_bytes(), true)?;
    write_file(&credentials.certificate, cert.pem().as_bytes(), false)?;

    progress(Some(1.0), "Done");
    tracing::info!(
        "Stored new server certificate {}",
        credentials.certificate.display()
    );
    Ok(())
}

fn write_file(path: &Path, contents: &[u8], private: bool) -> Result<(), TlsError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| TlsError::io(parent, e))?;
    }

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        if private {
            options.mode(0o600);
        }
    }
    #[cfg(not(unix))]
    let _ = private;

    use std::io::Write;
    options
        .open(path)
        .and_then(|mut file| file.write_all(contents))
        .map_err(|e| TlsError::io(path, e))
}

/// File name safe form of a host name
fn file_stem(hostname: &str) -> String {
    hostname
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_stem() {
        assert_eq!(file_stem("box.local"), "box.local");
        assert_eq!(file_stem("../etc/passwd"), ".._etc_passwd");
    }
}
