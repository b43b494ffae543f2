//! System DNS resolution gated by the pattern matcher, with a bounded TTL
//! positive cache and a per-name negative cache for IP-based rejections.

use crate::error::{ProxyError, Result};
use crate::proxy::pattern::PatternMatcher;
use dns_lookup::lookup_host;
use lru::LruCache;
use std::collections::HashMap;
use std::net::IpAddr;
use std::num::NonZeroUsize;
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};

const CACHE_TTL: Duration = Duration::from_secs(12 * 60 * 60);
const CACHE_CAPACITY: usize = 10_000;

struct CacheEntry {
    ip: IpAddr,
    inserted_at: Instant,
}

pub struct NameResolver {
    rules: PatternMatcher<()>,
    overrides: HashMap<String, IpAddr>,
    rejected_by_ips: RwLock<HashMap<String, IpAddr>>,
    cache: Mutex<LruCache<String, CacheEntry>>,
    /// Advisory only: the original never actually wires this into DNS
    /// resolution, only logs it at startup. Preserved as such (see
    /// DESIGN.md).
    force_nameserver: Option<String>,
}

impl NameResolver {
    pub fn new(rules: PatternMatcher<()>, force_nameserver: Option<String>) -> Self {
        if let Some(ns) = &force_nameserver {
            log::warn!("force_nameserver={ns} is configured but only advisory; system DNS resolution is used as-is");
        }
        Self {
            rules,
            overrides: HashMap::new(),
            rejected_by_ips: RwLock::new(HashMap::new()),
            cache: Mutex::new(LruCache::new(NonZeroUsize::new(CACHE_CAPACITY).unwrap())),
            force_nameserver,
        }
    }

    pub fn override_host(&mut self, host: &str, ip: IpAddr) {
        self.overrides.insert(host.to_string(), ip);
    }

    pub fn resolve(&self, name: &str) -> Result<IpAddr> {
        if let Some(ip) = self.cache_get(name) {
            return Ok(ip);
        }

        if let Some(ip) = self.rejected_by_ips.read().unwrap().get(name) {
            return Err(ProxyError::HostRejected {
                reason: format!("[cached domain/ip] {name}/{ip}"),
            });
        }

        let (rejected, reason, _) = self.rules.eval(name);
        if rejected {
            return Err(ProxyError::HostRejected {
                reason: format!("[domain] {}", reason.unwrap_or_default()),
            });
        }

        if let Some(ip) = self.overrides.get(name) {
            return Ok(*ip);
        }

        let ip = lookup_host(name)
            .ok()
            .and_then(|ips| ips.into_iter().next())
            .ok_or_else(|| ProxyError::ResolveFailed {
                host: name.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no address found"),
            })?;

        let (rejected, reason, _) = self.rules.eval(&ip.to_string());
        if rejected {
            self.rejected_by_ips
                .write()
                .unwrap()
                .insert(name.to_string(), ip);
            return Err(ProxyError::HostRejected {
                reason: format!("[domain/ip] {}/{name}", reason.unwrap_or_default()),
            });
        }

        self.cache.lock().unwrap().put(
            name.to_string(),
            CacheEntry {
                ip,
                inserted_at: Instant::now(),
            },
        );
        Ok(ip)
    }

    fn cache_get(&self, name: &str) -> Option<IpAddr> {
        let mut cache = self.cache.lock().unwrap();
        let entry = cache.get(name)?;
        if entry.inserted_at.elapsed() >= CACHE_TTL {
            cache.pop(name);
            return None;
        }
        Some(entry.ip)
    }
}
