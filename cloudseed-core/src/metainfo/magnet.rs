//! Magnet link parsing

use super::MetainfoError;
use crate::hash::NetworkHash;

/// Magnet link components.
///
/// Carries the swarm identity only; the info dictionary is fetched from
/// peers by the network client later.
#[derive(Debug, Clone, PartialEq)]
pub struct MagnetLink {
    pub info_hash: NetworkHash,
    pub display_name: Option<String>,
    pub trackers: Vec<String>,
}

/// Parses a magnet URI carrying a hex `urn:btih` exact topic.
///
/// # Errors
/// - `MetainfoError::InvalidMagnet` - Malformed URI or missing/invalid info hash
pub fn parse_magnet_link(magnet_url: &str) -> Result<MagnetLink, MetainfoError> {
    let magnet = magnet_url::Magnet::new(magnet_url).map_err(|e| MetainfoError::InvalidMagnet {
        reason: format!("{e}"),
    })?;

    let info_hash = extract_info_hash(&magnet)?;

    Ok(MagnetLink {
        info_hash,
        display_name: magnet.display_name().map(|s| s.to_string()),
        trackers: magnet.trackers().to_vec(),
    })
}

fn extract_info_hash(magnet: &magnet_url::Magnet) -> Result<NetworkHash, MetainfoError> {
    let topic = magnet
        .hash()
        .filter(|_| magnet.hash_type() == Some("btih"))
        .ok_or_else(|| MetainfoError::InvalidMagnet {
            reason: "Missing or invalid info hash".to_string(),
        })?;

    if topic.len() != 40 {
        return Err(MetainfoError::InvalidMagnet {
            reason: format!("Invalid hash length: {} (expected 40)", topic.len()),
        });
    }

    NetworkHash::from_hex(topic).map_err(|e| MetainfoError::InvalidMagnet {
        reason: format!("Invalid info hash {topic}: {e}"),
    })
}
