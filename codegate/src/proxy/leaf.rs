//! The leaf-certificate cache: bounded LRU keyed by SNI host with a short
//! TTL. The miss path releases the lock while the signature runs.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use lru::LruCache;
use rustls::sign::CertifiedKey;

use super::ca::CertificateAuthority;
use super::ProxyError;

const CACHE_CAPACITY: usize = 256;
const LEAF_TTL: Duration = Duration::from_secs(60 * 60);

struct CachedLeaf {
    key: Arc<CertifiedKey>,
    issued_at: Instant,
}

pub struct LeafCache {
    inner: Mutex<LruCache<String, CachedLeaf>>,
    ttl: Duration,
}

impl LeafCache {
    pub fn new() -> Self {
        Self::with_ttl(LEAF_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(LruCache::new(
                NonZeroUsize::new(CACHE_CAPACITY).expect("capacity is nonzero"),
            )),
            ttl,
        }
    }

    fn build_certified(
        ca: &CertificateAuthority,
        host: &str,
    ) -> Result<Arc<CertifiedKey>, ProxyError> {
        let issued = ca.issue_leaf(host)?;
        let signing_key = rustls::sign::any_supported_type(&rustls::PrivateKey(issued.key_der))
            .map_err(|err| ProxyError::BadKey(err.to_string()))?;
        let chain = vec![
            rustls::Certificate(issued.cert_der),
            rustls::Certificate(ca.cert_der()?),
        ];
        Ok(Arc::new(CertifiedKey::new(chain, signing_key)))
    }

    pub fn get_or_issue(
        &self,
        host: &str,
        ca: &CertificateAuthority,
    ) -> Result<Arc<CertifiedKey>, ProxyError> {
        {
            let mut cache = self.inner.lock().expect("leaf cache poisoned");
            if let Some(cached) = cache.get(host) {
                if cached.issued_at.elapsed() < self.ttl {
                    return Ok(cached.key.clone());
                }
                cache.pop(host);
            }
        }
        // signing happens outside the lock
        let key = Self::build_certified(ca, host)?;
        let mut cache = self.inner.lock().expect("leaf cache poisoned");
        cache.put(
            host.to_owned(),
            CachedLeaf {
                key: key.clone(),
                issued_at: Instant::now(),
            },
        );
        Ok(key)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("leaf cache poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for LeafCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_ca() -> CertificateAuthority {
        let dir = tempfile::tempdir().expect("tempdir");
        CertificateAuthority::load_or_generate(
            &dir.path().join("ca.crt"),
            &dir.path().join("ca.key"),
        )
        .expect("ca")
    }

    #[test]
    fn same_host_hits_the_cache() {
        let ca = test_ca();
        let cache = LeafCache::new();
        let first = cache.get_or_issue("example.com", &ca).expect("issue");
        let second = cache.get_or_issue("example.com", &ca).expect("cached");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn expired_leaf_is_reissued() {
        let ca = test_ca();
        let cache = LeafCache::with_ttl(Duration::from_millis(0));
        let first = cache.get_or_issue("example.com", &ca).expect("issue");
        let second = cache.get_or_issue("example.com", &ca).expect("reissue");
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn distinct_hosts_get_distinct_leaves() {
        let ca = test_ca();
        let cache = LeafCache::new();
        let a = cache.get_or_issue("a.example.com", &ca).expect("a");
        let b = cache.get_or_issue("b.example.com", &ca).expect("b");
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 2);
    }
}
