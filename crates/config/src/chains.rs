//! Static registry of supported chains and their RPC endpoint templates.
use url::Url;

/// Transport used to reach a chain's RPC endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// WebSocket, required for head subscriptions
    Ws,
    /// HTTPS request/response
    Http,
}

impl Transport {
    const fn scheme(self) -> &'static str {
        match self {
            Self::Ws => "wss",
            Self::Http => "https",
        }
    }
}

/// Metadata of a supported chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainInfo {
    /// Registry key, also used as the table prefix
    pub name: &'static str,
    /// Network label
    pub network: &'static str,
    /// Endpoint template without scheme, ending in the API key path segment
    pub url: &'static str,
    /// Chain id
    pub chain_id: u64,
}

impl ChainInfo {
    /// Build the endpoint URL for `transport`, appending `api_key`.
    pub fn endpoint(&self, transport: Transport, api_key: &str) -> Result<Url, url::ParseError> {
        Url::parse(&format!("{}{}{}", transport.scheme(), self.url, api_key))
    }
}

/// Every chain the miner knows how to reach.
pub const CHAINS: &[ChainInfo] = &[
    ChainInfo {
        name: "ethereum",
        network: "Mainnet",
        url: "://eth-mainnet.g.alchemy.com/v2/",
        chain_id: 1,
    },
    ChainInfo {
        name: "polygon",
        network: "Mainnet",
        url: "://polygon-mainnet.g.alchemy.com/v2/",
        chain_id: 137,
    },
    ChainInfo {
        name: "bnb",
        network: "Mainnet",
        url: "://bnb-mainnet.g.alchemy.com/v2/",
        chain_id: 56,
    },
    ChainInfo {
        name: "avalanche",
        network: "Mainnet",
        url: "://avax-mainnet.g.alchemy.com/v2/",
        chain_id: 43114,
    },
    ChainInfo {
        name: "optimism",
        network: "Mainnet",
        url: "://opt-mainnet.g.alchemy.com/v2/",
        chain_id: 10,
    },
    ChainInfo {
        name: "base",
        network: "Mainnet",
        url: "://base-mainnet.g.alchemy.com/v2/",
        chain_id: 8453,
    },
];

/// Look up a chain by registry name (case-insensitive).
pub fn lookup(name: &str) -> Option<&'static ChainInfo> {
    CHAINS.iter().find(|chain| chain.name.eq_ignore_ascii_case(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_scheme_follows_transport() {
        let eth = lookup("ethereum").unwrap();
        assert_eq!(
            eth.endpoint(Transport::Ws, "key").unwrap().as_str(),
            "wss://eth-mainnet.g.alchemy.com/v2/key"
        );
        assert_eq!(
            eth.endpoint(Transport::Http, "key").unwrap().as_str(),
            "https://eth-mainnet.g.alchemy.com/v2/key"
        );
    }

    #[test]
    fn lookup_is_case_insensitive() {
        assert_eq!(lookup("Polygon").map(|c| c.chain_id), Some(137));
        assert!(lookup("dogechain").is_none());
    }

    #[test]
    fn names_are_valid_table_prefixes() {
        for chain in CHAINS {
            assert!(chain.name.chars().all(|c| c.is_ascii_lowercase()));
        }
    }
}
