//! Module du cache LRU à budget d'octets
//!
//! L'horodatage des accès est un simple compteur monotone : chaque `get` ou
//! `insert` incrémente le tick et l'éviction retire l'entrée au tick le plus
//! ancien, comme l'éviction "oldest first" des caches sur disque.

use std::collections::HashMap;
use std::hash::Hash;

struct Entry<V> {
    value: V,
    cost: u64,
    last_used: u64,
}

/// Cache LRU générique borné par un coût cumulé.
///
/// # Paramètres de type
///
/// * `K` - Type de clé (hashable, clonable)
/// * `V` - Type de valeur (possédée par le cache)
///
/// Le coût d'une entrée est fourni à l'insertion et reste figé. La somme des
/// coûts ne dépasse jamais `max_cost`.
pub struct CostCache<K, V> {
    max_cost: u64,
    used_cost: u64,
    tick: u64,
    entries: HashMap<K, Entry<V>>,
}

impl<K: Eq + Hash + Clone, V> CostCache<K, V> {
    /// Crée un cache vide avec le budget donné (en octets).
    pub fn new(max_cost: u64) -> Self {
        Self {
            max_cost,
            used_cost: 0,
            tick: 0,
            entries: HashMap::new(),
        }
    }

    /// Insère une entrée avec son coût.
    ///
    /// Évince les entrées les moins récemment utilisées jusqu'à ce que la
    /// nouvelle entrée tienne dans le budget. Si `cost` dépasse le budget
    /// total, l'insertion est refusée et le cache n'est pas modifié.
    ///
    /// # Returns
    ///
    /// `true` si l'entrée a été insérée, `false` si elle a été refusée.
    pub fn insert(&mut self, key: K, value: V, cost: u64) -> bool {
        if cost > self.max_cost {
            tracing::debug!(
                "cache insert rejected: cost {} exceeds budget {}",
                cost,
                self.max_cost
            );
            return false;
        }

        // Remplacer une entrée existante libère d'abord son coût
        if let Some(old) = self.entries.remove(&key) {
            self.used_cost -= old.cost;
        }

        while self.used_cost + cost > self.max_cost {
            if !self.evict_oldest() {
                break;
            }
        }

        self.tick += 1;
        self.used_cost += cost;
        self.entries.insert(
            key,
            Entry {
                value,
                cost,
                last_used: self.tick,
            },
        );
        true
    }

    /// Récupère une valeur et rafraîchit sa récence.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        self.tick += 1;
        let tick = self.tick;
        self.entries.get_mut(key).map(|entry| {
            entry.last_used = tick;
            &entry.value
        })
    }

    /// Récupère une valeur sans modifier sa récence.
    pub fn peek(&self, key: &K) -> Option<&V> {
        self.entries.get(key).map(|entry| &entry.value)
    }

    /// Indique si la clé est présente (sans rafraîchir la récence).
    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Retire une entrée et rend sa valeur.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.entries.remove(key).map(|entry| {
            self.used_cost -= entry.cost;
            entry.value
        })
    }

    /// Vide le cache.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.used_cost = 0;
    }

    /// Modifie le budget et évince si nécessaire pour s'y conformer.
    pub fn set_max_cost(&mut self, max_cost: u64) {
        self.max_cost = max_cost;
        while self.used_cost > self.max_cost {
            if !self.evict_oldest() {
                break;
            }
        }
    }

    /// Budget maximal du cache.
    pub fn max_cost(&self) -> u64 {
        self.max_cost
    }

    /// Somme des coûts des entrées présentes.
    pub fn total_cost(&self) -> u64 {
        self.used_cost
    }

    /// Nombre d'entrées présentes.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Évince l'entrée la moins récemment utilisée.
    ///
    /// Le balayage est linéaire : les caches visés contiennent au plus
    /// quelques milliers d'entrées et l'éviction reste marginale face au
    /// coût de décodage des valeurs.
    fn evict_oldest(&mut self) -> bool {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_used)
            .map(|(key, _)| key.clone());

        match oldest {
            Some(key) => {
                if let Some(entry) = self.entries.remove(&key) {
                    self.used_cost -= entry.cost;
                    tracing::debug!("cache eviction: freed {} bytes", entry.cost);
                }
                true
            }
            None => false,
        }
    }
}
