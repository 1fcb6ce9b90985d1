//! CAIP-2 network id normalization and the USDC contract registry.

/// `(short_name, caip2)` aliases accepted on the wire.
const ALIASES: &[(&str, &str)] = &[
    ("base", "eip155:8453"),
    ("base-sepolia", "eip155:84532"),
    ("ethereum", "eip155:1"),
    ("mainnet", "eip155:1"),
];

/// Networks with a known USDC contract address; the only networks a
/// payment is ever allowed to settle on.
const REGISTRY: &[(&str, &str)] = &[
    ("eip155:8453", "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913"),
    ("eip155:84532", "0x036CbD53842c5426634e7929541eC2318f3dCF7e"),
    ("eip155:1", "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48"),
];

/// Maps a short name or raw CAIP-2 string to a registry-known CAIP-2 id.
/// Returns `None` for anything unsupported, including well-formed CAIP-2
/// ids (e.g. `solana:...`) with no USDC contract registered.
pub fn normalize_network(input: &str) -> Option<String> {
    let caip2 = ALIASES
        .iter()
        .find(|(short, _)| *short == input)
        .map(|(_, full)| *full)
        .unwrap_or(input);
    REGISTRY
        .iter()
        .find(|(known, _)| *known == caip2)
        .map(|(known, _)| known.to_string())
}

pub fn usdc_contract(network_caip2: &str) -> Option<&'static str> {
    REGISTRY
        .iter()
        .find(|(known, _)| *known == network_caip2)
        .map(|(_, contract)| *contract)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_short_names_to_caip2() {
        assert_eq!(normalize_network("base").as_deref(), Some("eip155:8453"));
        assert_eq!(normalize_network("base-sepolia").as_deref(), Some("eip155:84532"));
    }

    #[test]
    fn accepts_raw_caip2_when_registered() {
        assert_eq!(normalize_network("eip155:1").as_deref(), Some("eip155:1"));
    }

    #[test]
    fn rejects_unregistered_networks() {
        assert_eq!(normalize_network("solana"), None);
        assert_eq!(normalize_network("eip155:999"), None);
    }
}
