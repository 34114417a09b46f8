//! Ephemeral SSH key pairs for a single deployer run.
//!
//! Keys are Ed25519, written as an OpenSSH private key container plus an
//! authorized-key line next to it. Files are addressed through a `cap-std`
//! directory handle so every write stays inside the configured key directory.

use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use rand::rngs::OsRng;
use ssh_key::{Algorithm, LineEnding, PrivateKey};
use thiserror::Error;

const PRIVATE_KEY_SUFFIX: &str = ".pem";
const PUBLIC_KEY_SUFFIX: &str = ".pem.pub";

/// Errors raised while generating, persisting, or removing key files.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum KeyError {
    /// Raised when the random source or key generation fails.
    #[error("failed to generate ed25519 key: {message}")]
    Generate {
        /// Message from the key library.
        message: String,
    },
    /// Raised when a generated key cannot be serialised.
    #[error("failed to encode {kind} key: {message}")]
    Encode {
        /// Either `private` or `public`.
        kind: &'static str,
        /// Message from the key library.
        message: String,
    },
    /// Raised when reading or writing a key file fails.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path that could not be accessed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
}

/// Deterministic on-disk locations of a run's key pair.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct KeyPaths {
    dir: Utf8PathBuf,
    private_name: String,
    public_name: String,
}

impl KeyPaths {
    /// Derives `<dir>/<identity>.pem` and `<dir>/<identity>.pem.pub`.
    #[must_use]
    pub fn for_identity(dir: &Utf8Path, identity: &str) -> Self {
        Self {
            dir: dir.to_owned(),
            private_name: format!("{identity}{PRIVATE_KEY_SUFFIX}"),
            public_name: format!("{identity}{PUBLIC_KEY_SUFFIX}"),
        }
    }

    /// Directory holding both files.
    #[must_use]
    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    /// Full path of the private key.
    #[must_use]
    pub fn private_key(&self) -> Utf8PathBuf {
        self.dir.join(&self.private_name)
    }

    /// Full path of the public key.
    #[must_use]
    pub fn public_key(&self) -> Utf8PathBuf {
        self.dir.join(&self.public_name)
    }

    fn open_dir(&self) -> Result<Dir, KeyError> {
        Dir::open_ambient_dir(&self.dir, ambient_authority()).map_err(|err| KeyError::Io {
            path: self.dir.clone(),
            message: err.to_string(),
        })
    }
}

/// Generates a fresh Ed25519 key pair, writes both halves to `paths`, and
/// returns the public key as an authorized-key line ending in a newline.
///
/// The private key file is restricted to the owner before any key material
/// is written to it.
///
/// # Errors
///
/// Returns [`KeyError`] when generation, encoding, or any file write fails.
pub fn generate_key_pair(paths: &KeyPaths) -> Result<String, KeyError> {
    let private = PrivateKey::random(&mut OsRng, Algorithm::Ed25519).map_err(|err| {
        KeyError::Generate {
            message: err.to_string(),
        }
    })?;
    let private_pem = private
        .to_openssh(LineEnding::LF)
        .map_err(|err| KeyError::Encode {
            kind: "private",
            message: err.to_string(),
        })?;
    let public_line = private
        .public_key()
        .to_openssh()
        .map_err(|err| KeyError::Encode {
            kind: "public",
            message: err.to_string(),
        })?;
    let authorized_key = format!("{public_line}\n");

    let dir = paths.open_dir()?;
    write_restricted(&dir, paths, &paths.private_name, private_pem.as_bytes(), 0o600)?;
    write_restricted(&dir, paths, &paths.public_name, authorized_key.as_bytes(), 0o644)?;

    Ok(authorized_key)
}

/// Removes both key files. Missing files are not an error, and the public
/// key removal is attempted even when the private key removal fails.
///
/// # Errors
///
/// Returns the first [`KeyError::Io`] encountered.
pub fn remove_key_pair(paths: &KeyPaths) -> Result<(), KeyError> {
    let dir = match Dir::open_ambient_dir(&paths.dir, ambient_authority()) {
        Ok(dir) => dir,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => {
            return Err(KeyError::Io {
                path: paths.dir.clone(),
                message: err.to_string(),
            });
        }
    };

    let private = remove_if_present(&dir, paths, &paths.private_name);
    let public = remove_if_present(&dir, paths, &paths.public_name);
    private.and(public)
}

fn remove_if_present(dir: &Dir, paths: &KeyPaths, name: &str) -> Result<(), KeyError> {
    match dir.remove_file(name) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(KeyError::Io {
            path: paths.dir.join(name),
            message: err.to_string(),
        }),
    }
}

fn write_restricted(
    dir: &Dir,
    paths: &KeyPaths,
    name: &str,
    contents: &[u8],
    mode: u32,
) -> Result<(), KeyError> {
    let io_error = |err: io::Error| KeyError::Io {
        path: paths.dir.join(name),
        message: err.to_string(),
    };

    dir.write(name, b"").map_err(io_error)?;
    set_mode(dir, name, mode).map_err(io_error)?;
    dir.write(name, contents).map_err(io_error)
}

#[cfg(unix)]
fn set_mode(dir: &Dir, name: &str, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let permissions = cap_std::fs::Permissions::from_std(std::fs::Permissions::from_mode(mode));
    dir.set_permissions(name, permissions)
}

#[cfg(not(unix))]
fn set_mode(_dir: &Dir, _name: &str, _mode: u32) -> io::Result<()> {
    Ok(())
}
