//! Wallet clustering via union-find over funding/co-trading relationships.
//!
//! Two wallets are linked either because one funded the other directly (the
//! strongest signal) or because they traded the same mint within a window
//! the caller considers suspicious. `WalletClusterer` just wraps the
//! union-find with wallet-address bookkeeping; the actual linking policy
//! lives in the caller (the scoring stage, or a dedicated funding-graph
//! builder fed by the enrichment RPC).

use std::collections::HashMap;

pub struct UnionFind {
    parent: HashMap<String, String>,
    rank: HashMap<String, u32>,
}

impl UnionFind {
    pub fn new() -> Self {
        Self { parent: HashMap::new(), rank: HashMap::new() }
    }

    pub fn add(&mut self, wallet: &str) {
        self.parent.entry(wallet.to_string()).or_insert_with(|| wallet.to_string());
        self.rank.entry(wallet.to_string()).or_insert(0);
    }

    pub fn find(&mut self, wallet: &str) -> String {
        self.add(wallet);
        let parent = self.parent.get(wallet).cloned().unwrap();
        if parent != wallet {
            let root = self.find(&parent);
            self.parent.insert(wallet.to_string(), root.clone());
            root
        } else {
            wallet.to_string()
        }
    }

    /// Returns the resulting root.
    pub fn union(&mut self, a: &str, b: &str) -> String {
        let root_a = self.find(a);
        let root_b = self.find(b);
        if root_a == root_b {
            return root_a;
        }

        let rank_a = *self.rank.get(&root_a).unwrap_or(&0);
        let rank_b = *self.rank.get(&root_b).unwrap_or(&0);

        if rank_a < rank_b {
            self.parent.insert(root_a, root_b.clone());
            root_b
        } else if rank_a > rank_b {
            self.parent.insert(root_b, root_a.clone());
            root_a
        } else {
            self.parent.insert(root_b, root_a.clone());
            self.rank.insert(root_a.clone(), rank_a + 1);
            root_a
        }
    }

    pub fn connected(&mut self, a: &str, b: &str) -> bool {
        self.find(a) == self.find(b)
    }

    pub fn get_all_clusters(&mut self) -> HashMap<String, Vec<String>> {
        let wallets: Vec<String> = self.parent.keys().cloned().collect();
        let mut clusters: HashMap<String, Vec<String>> = HashMap::new();
        for wallet in wallets {
            let root = self.find(&wallet);
            clusters.entry(root).or_default().push(wallet);
        }
        clusters
    }
}

impl Default for UnionFind {
    fn default() -> Self {
        Self::new()
    }
}

pub struct WalletClusterer {
    uf: UnionFind,
}

impl WalletClusterer {
    pub fn new() -> Self {
        Self { uf: UnionFind::new() }
    }

    pub fn add_wallet(&mut self, wallet: &str) {
        self.uf.add(wallet);
    }

    /// Link two wallets via a direct funding relationship - the strongest
    /// clustering signal, since it's a single on-chain transfer rather than
    /// a coincidence of trading the same mint.
    pub fn link_funding(&mut self, funder: &str, recipient: &str) {
        self.uf.union(funder, recipient);
    }

    pub fn link_wallets(&mut self, a: &str, b: &str) {
        self.uf.union(a, b);
    }

    pub fn get_cluster(&mut self, wallet: &str) -> Vec<String> {
        let root = self.uf.find(wallet);
        self.uf.get_all_clusters().remove(&root).unwrap_or_default()
    }

    pub fn get_cluster_for_wallets(&mut self, wallets: &[String]) -> Vec<String> {
        let mut merged = std::collections::HashSet::new();
        for wallet in wallets {
            for member in self.get_cluster(wallet) {
                merged.insert(member);
            }
        }
        merged.into_iter().collect()
    }

    pub fn get_all_clusters(&mut self) -> HashMap<String, Vec<String>> {
        self.uf.get_all_clusters()
    }

    pub fn get_large_clusters(&mut self, min_size: usize) -> Vec<Vec<String>> {
        self.uf
            .get_all_clusters()
            .into_values()
            .filter(|c| c.len() >= min_size)
            .collect()
    }

    /// Human-readable summary of the top clusters, lettered A, B, C, ...
    pub fn generate_summary(&mut self, mint: &str, max_clusters: usize) -> String {
        let mut clusters = self.get_large_clusters(2);
        clusters.sort_by(|a, b| b.len().cmp(&a.len()));

        let mut lines = vec![format!("coordinated wallet clusters for {}:", mint)];
        for (idx, cluster) in clusters.iter().take(max_clusters).enumerate() {
            let letter = (b'A' + idx as u8) as char;
            lines.push(format!("  cluster {}: {} wallets", letter, cluster.len()));
        }
        lines.join("\n")
    }

    pub fn get_stats(&mut self) -> (usize, usize) {
        let clusters = self.uf.get_all_clusters();
        let total_wallets = clusters.values().map(|c| c.len()).sum();
        (clusters.len(), total_wallets)
    }
}

impl Default for WalletClusterer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn funding_link_puts_wallets_in_the_same_cluster() {
        let mut clusterer = WalletClusterer::new();
        clusterer.link_funding("funder", "child1");
        clusterer.link_funding("funder", "child2");

        let cluster = clusterer.get_cluster("child1");
        assert!(cluster.contains(&"child2".to_string()));
        assert!(cluster.contains(&"funder".to_string()));
    }

    #[test]
    fn unrelated_wallets_are_not_clustered() {
        let mut clusterer = WalletClusterer::new();
        clusterer.add_wallet("a");
        clusterer.add_wallet("b");
        assert!(!clusterer.get_cluster("a").contains(&"b".to_string()));
    }

    #[test]
    fn large_clusters_filters_by_minimum_size() {
        let mut clusterer = WalletClusterer::new();
        clusterer.link_wallets("a", "b");
        clusterer.add_wallet("solo");

        let large = clusterer.get_large_clusters(2);
        assert_eq!(large.len(), 1);
        assert_eq!(large[0].len(), 2);
    }

    #[test]
    fn union_find_path_compression_keeps_find_consistent() {
        let mut uf = UnionFind::new();
        uf.union("a", "b");
        uf.union("b", "c");
        uf.union("c", "d");
        assert!(uf.connected("a", "d"));
    }
}
