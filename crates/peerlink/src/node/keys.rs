//! Node identity: the libp2p keypair and the peer id derived from it.

use std::{fs, path::Path};

use anyhow::{Context, Result};
use libp2p::{identity::Keypair, PeerId};
use tracing::info;

/// Load the keypair at `path`, or generate and persist a new one
pub fn load_or_generate_keypair<P: AsRef<Path>>(path: P) -> Result<Keypair> {
    let path = path.as_ref();

    if path.exists() {
        let keypair = load_keypair(path)?;
        info!(path = %path.display(), peer = %peer_id_from_keypair(&keypair), "Loaded node identity");
        Ok(keypair)
    } else {
        let keypair = generate_keypair();
        save_keypair(&keypair, path)?;
        info!(path = %path.display(), peer = %peer_id_from_keypair(&keypair), "Generated node identity");
        Ok(keypair)
    }
}

/// Generate a new Ed25519 keypair
pub fn generate_keypair() -> Keypair {
    Keypair::generate_ed25519()
}

/// Save a keypair to a file, creating parent directories
pub fn save_keypair<P: AsRef<Path>>(keypair: &Keypair, path: P) -> Result<()> {
    let path = path.as_ref();

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let bytes = keypair.to_protobuf_encoding()?;
    fs::write(path, &bytes).with_context(|| format!("failed to write {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }

    Ok(())
}

/// Load a keypair from a file
pub fn load_keypair<P: AsRef<Path>>(path: P) -> Result<Keypair> {
    let path = path.as_ref();
    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let keypair = Keypair::from_protobuf_encoding(&bytes)
        .with_context(|| format!("{} is not a protobuf-encoded keypair", path.display()))?;
    Ok(keypair)
}

pub fn peer_id_from_keypair(keypair: &Keypair) -> PeerId {
    PeerId::from(keypair.public())
}
