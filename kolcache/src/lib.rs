//! # kolcache - Cache mémoire borné en coût pour Kolekto
//!
//! Cette crate fournit un cache LRU générique dont l'éviction est pilotée
//! par un budget cumulé (en octets) plutôt que par un nombre d'entrées.
//! Elle est utilisée comme brique de base par les caches spécialisés comme
//! `kolimages` (cache d'images décodées et de pixmaps rendus).
//!
//! ## Vue d'ensemble
//!
//! Chaque entrée est insérée avec un coût explicite. Quand le budget est
//! dépassé, les entrées les moins récemment utilisées sont évincées jusqu'à
//! ce que la nouvelle entrée tienne. Une entrée plus grosse que le budget
//! total est refusée d'emblée : l'insertion est tout-ou-rien, jamais
//! partielle.
//!
//! ## Utilisation
//!
//! ```rust
//! use kolcache::CostCache;
//!
//! let mut cache: CostCache<String, Vec<u8>> = CostCache::new(1024);
//! assert!(cache.insert("a".to_string(), vec![0; 512], 512));
//! assert!(cache.insert("b".to_string(), vec![0; 512], 512));
//! // "a" est évincé pour faire de la place
//! assert!(cache.insert("c".to_string(), vec![0; 512], 512));
//! assert!(!cache.contains(&"a".to_string()));
//! ```

mod cache;

pub use cache::CostCache;
